// SPDX-License-Identifier: CEPL-1.0
//! Staging uploads for the texture and the combined vertex/index buffer, plus the closed
//! set of image layout transitions they need.

use crate::device::{CommandPools, DeviceContext};
use crate::geometry::{combined_sizes, Vertex};
use crate::memory::{run_one_shot, GpuBuffer, GpuImage};
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use tracing::debug;
use turntable_render::{DecodedImage, RenderError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutState {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    DepthStencilAttachment,
}

impl LayoutState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            LayoutState::Undefined => vk::ImageLayout::UNDEFINED,
            LayoutState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            LayoutState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            LayoutState::DepthStencilAttachment => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(from: LayoutState, to: LayoutState) -> Result<TransitionMasks, RenderError> {
    use LayoutState::*;
    match (from, to) {
        (Undefined, TransferDst) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (TransferDst, ShaderReadOnly) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (Undefined, DepthStencilAttachment) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        (from, to) => Err(RenderError::UnsupportedTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }),
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

fn aspect_for(format: vk::Format, to: LayoutState) -> vk::ImageAspectFlags {
    if to == LayoutState::DepthStencilAttachment {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Records a pipeline barrier for one of the supported transitions; anything else fails
/// before a command is recorded.
pub unsafe fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    from: LayoutState,
    to: LayoutState,
) -> Result<(), RenderError> {
    let masks = transition_masks(from, to)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: masks.src_access,
        dst_access_mask: masks.dst_access,
        old_layout: from.layout(),
        new_layout: to.layout(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect_for(format, to),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

/// Runs a single transition on the main queue.
pub unsafe fn transition_image(
    ctx: &DeviceContext,
    pools: &CommandPools,
    image: vk::Image,
    format: vk::Format,
    from: LayoutState,
    to: LayoutState,
) -> Result<()> {
    // validate before anything is allocated
    transition_masks(from, to)?;
    run_one_shot(&ctx.device, pools.main, ctx.main_queue, |cmd| {
        Ok(record_transition(&ctx.device, cmd, image, format, from, to)?)
    })
    .with_context(|| format!("layout transition {from:?} -> {to:?}"))
}

pub struct Texture {
    device: Arc<ash::Device>,
    pub image: GpuImage,
    pub sampler: vk::Sampler,
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Staging buffer → device-local sampled image, then a sampler for it. The staging buffer
/// is gone when this returns.
pub unsafe fn upload_texture(
    ctx: &DeviceContext,
    pools: &CommandPools,
    pixels: &DecodedImage,
) -> Result<Texture> {
    let size = pixels.byte_len();
    let mut staging = GpuBuffer::staging(ctx, size)?;
    staging.write(0, pixels.rgba())?;

    let extent = vk::Extent2D {
        width: pixels.width(),
        height: pixels.height(),
    };
    let (mode, families) = ctx.upload_sharing();
    let image = GpuImage::new(
        ctx,
        extent,
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::ImageAspectFlags::COLOR,
        (mode, families.as_slice()),
    )?;

    transition_image(
        ctx,
        pools,
        image.image,
        TEXTURE_FORMAT,
        LayoutState::Undefined,
        LayoutState::TransferDst,
    )?;
    run_one_shot(&ctx.device, pools.transfer, ctx.transfer_queue, |cmd| {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        ctx.device.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        Ok(())
    })
    .context("texture copy")?;
    transition_image(
        ctx,
        pools,
        image.image,
        TEXTURE_FORMAT,
        LayoutState::TransferDst,
        LayoutState::ShaderReadOnly,
    )?;
    drop(staging);

    let sampler = create_sampler(&ctx.device, ctx.max_anisotropy)?;
    debug!("texture uploaded ({}x{}, {size} bytes)", extent.width, extent.height);
    Ok(Texture {
        device: ctx.device.clone(),
        image,
        sampler,
    })
}

pub unsafe fn create_sampler(device: &ash::Device, max_anisotropy: f32) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        ..Default::default()
    };
    Ok(device.create_sampler(&info, None).context("create_sampler")?)
}

/// Device-local buffer holding vertices then indices.
pub struct GeometryBuffer {
    pub buffer: GpuBuffer,
    pub index_offset: vk::DeviceSize,
    pub index_count: u32,
}

pub unsafe fn upload_geometry(
    ctx: &DeviceContext,
    pools: &CommandPools,
    vertices: &[Vertex],
    indices: &[u16],
) -> Result<GeometryBuffer> {
    let (index_offset, total) = combined_sizes(vertices, indices);
    let mut staging = GpuBuffer::staging(ctx, total)?;
    staging.write(0, bytemuck::cast_slice(vertices))?;
    staging.write(index_offset, bytemuck::cast_slice(indices))?;

    let (mode, families) = ctx.upload_sharing();
    let buffer = GpuBuffer::new(
        ctx,
        total,
        vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        (mode, families.as_slice()),
    )?;
    run_one_shot(&ctx.device, pools.transfer, ctx.transfer_queue, |cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: total,
        };
        ctx.device
            .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, std::slice::from_ref(&region));
        Ok(())
    })
    .context("geometry copy")?;

    debug!(
        "geometry uploaded: {} vertices, {} indices, {total} bytes",
        vertices.len(),
        indices.len()
    );
    Ok(GeometryBuffer {
        buffer,
        index_offset,
        index_count: indices.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use LayoutState::*;

    const ALL: [LayoutState; 4] = [Undefined, TransferDst, ShaderReadOnly, DepthStencilAttachment];

    #[test]
    fn exactly_three_transitions_are_supported() {
        let supported: Vec<_> = ALL
            .iter()
            .flat_map(|&a| ALL.iter().map(move |&b| (a, b)))
            .filter(|&(a, b)| transition_masks(a, b).is_ok())
            .collect();
        assert_eq!(
            supported,
            vec![
                (Undefined, TransferDst),
                (Undefined, DepthStencilAttachment),
                (TransferDst, ShaderReadOnly),
            ]
        );
    }

    #[test]
    fn unsupported_pairs_fail_instead_of_zero_masks() {
        for (a, b) in [(ShaderReadOnly, TransferDst), (TransferDst, TransferDst), (Undefined, ShaderReadOnly)] {
            match transition_masks(a, b) {
                Err(RenderError::UnsupportedTransition { from, to }) => {
                    assert_eq!(from, format!("{a:?}"));
                    assert_eq!(to, format!("{b:?}"));
                }
                other => panic!("{a:?} -> {b:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn upload_transitions_use_transfer_and_fragment_stages() {
        let to_dst = transition_masks(Undefined, TransferDst).unwrap();
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read = transition_masks(TransferDst, ShaderReadOnly).unwrap();
        assert_eq!(to_read.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);

        let depth = transition_masks(Undefined, DepthStencilAttachment).unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(depth.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn depth_aspect_includes_stencil_only_when_present() {
        assert_eq!(
            aspect_for(vk::Format::D32_SFLOAT, DepthStencilAttachment),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT, DepthStencilAttachment),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for(TEXTURE_FORMAT, TransferDst), vk::ImageAspectFlags::COLOR);
    }
}
