// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of, size_of_val};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

const fn v(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { pos, color, uv }
}

/// Two stacked quads, half a unit apart along Z.
pub const VERTICES: [Vertex; 8] = [
    v([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
    v([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
    v([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    v([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
    v([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
    v([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    v([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    v([-0.5, 0.5, -0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
];

pub const INDICES: [u16; 12] = [0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Byte size of the vertex region and of the whole combined buffer. Index data starts
/// right after the vertices.
pub fn combined_sizes(vertices: &[Vertex], indices: &[u16]) -> (u64, u64) {
    let vertex_bytes = size_of_val(vertices) as u64;
    (vertex_bytes, vertex_bytes + size_of_val(indices) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs.map(|a| a.offset), [0, 12, 24]);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn indices_stay_in_range() {
        assert_eq!(INDICES.len(), 12);
        assert!(INDICES.iter().all(|&i| (i as usize) < VERTICES.len()));
    }

    #[test]
    fn index_region_follows_vertex_region() {
        let (index_offset, total) = combined_sizes(&VERTICES, &INDICES);
        assert_eq!(index_offset, 8 * 32);
        assert_eq!(total, 8 * 32 + 12 * 2);
        // u16 indices need 2-byte alignment for vkCmdBindIndexBuffer
        assert_eq!(index_offset % 2, 0);
    }
}
