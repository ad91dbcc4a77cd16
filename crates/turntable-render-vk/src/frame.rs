// SPDX-License-Identifier: CEPL-1.0
//! Per-frame resources: one slot per swapchain image.

use crate::device::DeviceContext;
use crate::memory::GpuBuffer;
use crate::upload::Texture;
use anyhow::{Context, Result};
use ash::vk;
use std::mem::size_of;
use std::sync::Arc;
use turntable_math::ModelData;

pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    /// Persistently mapped, host-coherent.
    pub uniform: GpuBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

pub struct FrameSet {
    device: Arc<ash::Device>,
    cmd_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    pub slots: Vec<FrameSlot>,
}

impl FrameSet {
    /// Fences start signaled so the first wait on each slot returns immediately.
    pub unsafe fn new(
        ctx: &DeviceContext,
        cmd_pool: vk::CommandPool,
        set_layout: vk::DescriptorSetLayout,
        texture: &Texture,
        count: usize,
    ) -> Result<Self> {
        let device = ctx.device.clone();
        let n = count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: n,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: n,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(n)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = device
            .create_descriptor_pool(&pool_info, None)
            .context("create_descriptor_pool")?;

        let mut set = FrameSet {
            device: device.clone(),
            cmd_pool,
            descriptor_pool,
            slots: Vec::with_capacity(count),
        };

        let layouts = vec![set_layout; count];
        let alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);
        let descriptor_sets = device
            .allocate_descriptor_sets(&alloc)
            .context("allocate_descriptor_sets")?;

        let cmd_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: n,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&cmd_info)
            .context("allocate_command_buffers")?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let ubo_size = size_of::<ModelData>() as vk::DeviceSize;

        for (i, (&cmd, &descriptor_set)) in cmds.iter().zip(&descriptor_sets).enumerate() {
            let mut uniform = match GpuBuffer::new(
                ctx,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                (vk::SharingMode::EXCLUSIVE, &[][..]),
            ) {
                Ok(b) => b,
                Err(e) => {
                    device.free_command_buffers(cmd_pool, &cmds[i..]);
                    return Err(e);
                }
            };
            let sync = (|| -> Result<_> {
                uniform.map_persistent()?;
                let image_available = device.create_semaphore(&sem_ci, None)?;
                let render_finished = device.create_semaphore(&sem_ci, None).inspect_err(|_| {
                    device.destroy_semaphore(image_available, None);
                })?;
                let in_flight = device.create_fence(&fence_ci, None).inspect_err(|_| {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                })?;
                Ok((image_available, render_finished, in_flight))
            })();
            let (image_available, render_finished, in_flight) = match sync {
                Ok(s) => s,
                Err(e) => {
                    device.free_command_buffers(cmd_pool, &cmds[i..]);
                    return Err(e.context("frame slot sync objects"));
                }
            };

            let buffer_info = vk::DescriptorBufferInfo {
                buffer: uniform.buffer,
                offset: 0,
                range: ubo_size,
            };
            let image_info = vk::DescriptorImageInfo {
                sampler: texture.sampler,
                image_view: texture.image.view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_info)),
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_info)),
            ];
            device.update_descriptor_sets(&writes, &[]);

            set.slots.push(FrameSlot {
                cmd,
                image_available,
                render_finished,
                in_flight,
                uniform,
                descriptor_set,
            });
        }
        Ok(set)
    }
}

impl Drop for FrameSet {
    fn drop(&mut self) {
        unsafe {
            for slot in &self.slots {
                self.device.destroy_fence(slot.in_flight, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.free_command_buffers(self.cmd_pool, &[slot.cmd]);
            }
            // frees every descriptor set with it
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}
