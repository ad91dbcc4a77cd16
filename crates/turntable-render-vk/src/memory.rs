// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation, memory-type selection and one-shot submissions.

use crate::device::DeviceContext;
use anyhow::{Context, Result};
use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;
use turntable_render::RenderError;

/// First memory type allowed by `filter` whose flags contain all of `required`.
/// Never falls back to a weaker property set.
pub fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .position(|(i, t)| filter & (1 << i) != 0 && t.property_flags.contains(required))
        .map(|i| i as u32)
        .ok_or_else(|| RenderError::NoMemoryType {
            filter,
            properties: format!("{required:?}"),
        })
}

unsafe fn allocate(
    ctx: &DeviceContext,
    reqs: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = select_memory_type(&ctx.memory_properties, reqs.memory_type_bits, props)?;
    let info = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: reqs.size,
        memory_type_index,
        ..Default::default()
    };
    Ok(ctx
        .device
        .allocate_memory(&info, None)
        .context("allocate_memory")?)
}

/// Buffer plus its dedicated allocation, optionally persistently mapped.
pub struct GpuBuffer {
    device: Arc<ash::Device>,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl GpuBuffer {
    pub unsafe fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        sharing: (vk::SharingMode, &[u32]),
    ) -> Result<Self> {
        let device = ctx.device.clone();
        let bci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing.0)
            .queue_family_indices(sharing.1);
        let buffer = device.create_buffer(&bci, None).context("create_buffer")?;
        let reqs = device.get_buffer_memory_requirements(buffer);
        let memory = match allocate(ctx, reqs, props) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        let out = GpuBuffer {
            device,
            buffer,
            memory,
            size,
            mapped: None,
        };
        out.device
            .bind_buffer_memory(buffer, memory, 0)
            .context("bind_buffer_memory")?;
        Ok(out)
    }

    /// Host-visible, coherent, used once as a copy source.
    pub unsafe fn staging(ctx: &DeviceContext, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            (vk::SharingMode::EXCLUSIVE, &[][..]),
        )
    }

    /// Maps the whole buffer until drop.
    pub unsafe fn map_persistent(&mut self) -> Result<()> {
        if self.mapped.is_none() {
            let ptr = self
                .device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            self.mapped = NonNull::new(ptr.cast::<u8>());
        }
        Ok(())
    }

    /// Copies `bytes` at `offset`. Uses the persistent mapping if there is one, otherwise
    /// maps just that region for the duration of the copy.
    pub unsafe fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as vk::DeviceSize;
        if offset + len > self.size {
            anyhow::bail!(
                "write of {len} bytes at {offset} overflows buffer of {} bytes",
                self.size
            );
        }
        match self.mapped {
            Some(base) => {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    base.as_ptr().add(offset as usize),
                    bytes.len(),
                );
            }
            None => {
                let ptr = self
                    .device
                    .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                    .context("map_memory")?;
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                self.device.unmap_memory(self.memory);
            }
        }
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// 2D image, its allocation and a single view over all of it.
pub struct GpuImage {
    device: Arc<ash::Device>,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl GpuImage {
    pub unsafe fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        sharing: (vk::SharingMode, &[u32]),
    ) -> Result<Self> {
        let device = ctx.device.clone();
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(sharing.0)
            .queue_family_indices(sharing.1)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = device.create_image(&info, None).context("create_image")?;
        let reqs = device.get_image_memory_requirements(image);
        let memory = match allocate(ctx, reqs, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e);
            }
        };
        let mut out = GpuImage {
            device,
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            extent,
        };
        out.device
            .bind_image_memory(image, memory, 0)
            .context("bind_image_memory")?;
        out.view = create_view(&out.device, image, format, aspect)?;
        Ok(out)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device
        .create_image_view(&info, None)
        .context("create_image_view")?)
}

/// Records `body` into a fresh single-use command buffer, submits it and blocks until
/// `queue` is idle. Setup-time only.
pub unsafe fn run_one_shot<F>(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    body: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmds = device
        .allocate_command_buffers(&ai)
        .context("allocate_command_buffers(one-shot)")?;

    let result = (|| -> Result<()> {
        let cmd = cmds[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        body(cmd)?;
        device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo::default().command_buffers(&cmds);
        device
            .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("queue_submit(one-shot)")?;
        device.queue_wait_idle(queue).context("queue_wait_idle")?;
        Ok(())
    })();

    device.free_command_buffers(pool, &cmds);
    result
}
