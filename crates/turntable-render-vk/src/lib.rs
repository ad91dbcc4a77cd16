// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::time::Instant;
use tracing::{debug, info};
use turntable_render::{
    AcquireOutcome, DepthConvention, FrameDriver, FrameLoop, FrameOutcome, ModelData,
    PresentOutcome, RecreateOutcome, RenderError, RenderSize, Renderer, SceneDesc, ShaderSet,
    ShaderSource,
};

mod device;
mod frame;
mod geometry;
mod instance;
mod memory;
mod pipeline;
mod swapchain;
mod upload;

use device::{CommandPools, DeviceContext};
use frame::FrameSet;
use instance::InstanceBundle;
use pipeline::{GraphicsPipeline, SetLayout, ShaderCode};
use swapchain::{Swapchain, SwapchainPlan};
use upload::{GeometryBuffer, Texture};

/// SPIR-V compiled from the GLSL in `build.rs`.
pub fn builtin_shaders() -> ShaderSet {
    ShaderSet {
        vertex: ShaderSource::Embedded {
            name: "model.vert",
            bytes: include_bytes!(concat!(env!("OUT_DIR"), "/model.vert.spv")),
        },
        fragment: ShaderSource::Embedded {
            name: "model.frag",
            bytes: include_bytes!(concat!(env!("OUT_DIR"), "/model.frag.spv")),
        },
        fragment_fallback: ShaderSource::Embedded {
            name: "model_fallback.frag",
            bytes: include_bytes!(concat!(env!("OUT_DIR"), "/model_fallback.frag.spv")),
        },
    }
}

struct SurfaceGuard {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

// STRICT TEARDOWN ORDER: fields drop top to bottom, after `Drop::drop` has idled the device.
// Everything created from the device precedes `ctx`; the swapchain precedes `surface`;
// `instance` is last.
struct GpuState {
    frames: FrameSet,
    swapchain: Option<Swapchain>,
    pipeline: GraphicsPipeline,
    set_layout: SetLayout,
    texture: Texture,
    geometry: GeometryBuffer,
    pools: CommandPools,
    swapchain_loader: khr_swapchain::Device,
    shader_code: ShaderCode,
    depth_format: vk::Format,
    depth: DepthConvention,
    clear: [f32; 4],
    /// Last size reported by the window; used when the surface has no fixed extent.
    want: RenderSize,
    ctx: DeviceContext,
    surface: SurfaceGuard,
    _instance: InstanceBundle,
}

impl Drop for GpuState {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }
        info!("vk: shutting down");
    }
}

pub struct VkRenderer {
    frame_loop: FrameLoop,
    gpu: GpuState,
    started: Instant,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    scene: SceneDesc,
) -> Result<VkRenderer> {
    let dh: RawDisplayHandle = display.display_handle()?.as_raw();
    let wh: RawWindowHandle = window.window_handle()?.as_raw();

    let instance = instance::create_instance(dh, scene.validation)?;
    let handle = ash_window::create_surface(&instance.entry, &instance.instance, dh, wh, None)
        .context("create_surface")?;
    let surface = SurfaceGuard {
        loader: surface::Instance::new(&instance.entry, &instance.instance),
        handle,
    };

    let phys = device::pick_physical_device(&instance.instance)?;
    let families =
        device::find_queue_families(&instance.instance, &surface.loader, surface.handle, phys.handle)?;
    let depth_format = swapchain::pick_depth_format(|f| {
        instance
            .instance
            .get_physical_device_format_properties(phys.handle, f)
    })?;
    let ctx = DeviceContext::new(&instance.instance, phys, families)?;
    let pools = CommandPools::new(&ctx)?;

    let shader_code = ShaderCode::load(&scene.shaders, ctx.demote_enabled)?;
    let texture = upload::upload_texture(&ctx, &pools, &scene.texture)?;
    let geometry = upload::upload_geometry(&ctx, &pools, &geometry::VERTICES, &geometry::INDICES)?;
    let set_layout = SetLayout::new(&ctx.device)?;

    let plan = SwapchainPlan::query(&surface.loader, ctx.phys.handle, surface.handle, size)?
        .ok_or_else(|| anyhow::anyhow!("surface has zero area at startup ({}x{})", size.width, size.height))?;
    let pipeline = GraphicsPipeline::new(
        &ctx.device,
        plan.surface_format.format,
        depth_format,
        set_layout.handle,
        &shader_code,
        scene.camera.depth,
    )?;
    let swapchain_loader = khr_swapchain::Device::new(&instance.instance, &ctx.device);
    let sc = Swapchain::create(
        &ctx,
        &pools,
        &swapchain_loader,
        surface.handle,
        &plan,
        pipeline.render_pass,
        depth_format,
    )?;
    let image_count = sc.image_count();
    let frames = FrameSet::new(&ctx, pools.main, set_layout.handle, &texture, image_count)?;

    let gpu = GpuState {
        frames,
        swapchain: Some(sc),
        pipeline,
        set_layout,
        texture,
        geometry,
        pools,
        swapchain_loader,
        shader_code,
        depth_format,
        depth: scene.camera.depth,
        clear: scene.clear_color,
        want: size,
        ctx,
        surface,
        _instance: instance,
    };
    info!("vk: {} frame slots", image_count);

    Ok(VkRenderer {
        frame_loop: FrameLoop::new(image_count, scene.camera),
        gpu,
        started: Instant::now(),
    })
}

impl GpuState {
    fn swapchain(&self) -> Result<&Swapchain, RenderError> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::vulkan("swapchain", "not created"))
    }

    unsafe fn record_commands(&self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        let d = &self.ctx.device;
        let sc = self.swapchain()?;
        let cmd = self.frames.slots[slot].cmd;
        let framebuffer = *sc
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| RenderError::vulkan("framebuffer lookup", image_index))?;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)
            .map_err(|e| RenderError::vulkan("vkBeginCommandBuffer", e))?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth.clear_depth(),
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: sc.extent,
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.pipeline.render_pass,
            framebuffer,
            render_area,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: sc.extent.width as f32,
            height: sc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(cmd, 0, &[viewport]);
        d.cmd_set_scissor(cmd, 0, &[render_area]);

        let geo = &self.geometry;
        d.cmd_bind_vertex_buffers(cmd, 0, &[geo.buffer.buffer], &[0]);
        d.cmd_bind_index_buffer(cmd, geo.buffer.buffer, geo.index_offset, vk::IndexType::UINT16);
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            0,
            &[self.frames.slots[slot].descriptor_set],
            &[],
        );
        d.cmd_draw_indexed(cmd, geo.index_count, 1, 0, 0, 0);

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)
            .map_err(|e| RenderError::vulkan("vkEndCommandBuffer", e))?;
        Ok(())
    }

    unsafe fn rebuild(&mut self) -> Result<RecreateOutcome> {
        self.ctx
            .device
            .device_wait_idle()
            .context("device_wait_idle")?;

        let Some(plan) =
            SwapchainPlan::query(&self.surface.loader, self.ctx.phys.handle, self.surface.handle, self.want)?
        else {
            debug!("vk: surface has zero area; keeping current swapchain");
            return Ok(RecreateOutcome::Deferred);
        };

        // the old swapchain must be gone before a new one is created on the surface
        self.swapchain = None;

        if plan.surface_format.format != self.pipeline.color_format {
            info!(
                "vk: surface format {:?} -> {:?}; rebuilding pipeline",
                self.pipeline.color_format, plan.surface_format.format
            );
            self.pipeline = GraphicsPipeline::new(
                &self.ctx.device,
                plan.surface_format.format,
                self.depth_format,
                self.set_layout.handle,
                &self.shader_code,
                self.depth,
            )?;
        }

        let sc = Swapchain::create(
            &self.ctx,
            &self.pools,
            &self.swapchain_loader,
            self.surface.handle,
            &plan,
            self.pipeline.render_pass,
            self.depth_format,
        )?;
        let image_count = sc.image_count();
        self.swapchain = Some(sc);

        if image_count != self.frames.slots.len() {
            info!("vk: image count {} -> {}; rebuilding frame slots", self.frames.slots.len(), image_count);
            self.frames = FrameSet::new(
                &self.ctx,
                self.pools.main,
                self.set_layout.handle,
                &self.texture,
                image_count,
            )?;
        }
        Ok(RecreateOutcome::Rebuilt { image_count })
    }
}

fn vk_err(call: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| RenderError::vulkan(call, e)
}

impl FrameDriver for GpuState {
    fn extent(&self) -> RenderSize {
        self.swapchain.as_ref().map_or(self.want, Swapchain::size)
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fence = self.frames.slots[slot].in_flight;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(vk_err("vkWaitForFences"))
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        let handle = self.swapchain()?.handle;
        let semaphore = self.frames.slots[slot].image_available;
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("vkAcquireNextImageKHR", e)),
        }
    }

    fn write_uniforms(&mut self, slot: usize, data: &ModelData) -> Result<(), RenderError> {
        unsafe {
            self.frames.slots[slot]
                .uniform
                .write(0, bytemuck::bytes_of(data))
                .map_err(|e| RenderError::vulkan("uniform write", e))
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let s = &self.frames.slots[slot];
        unsafe {
            self.ctx
                .device
                .reset_fences(&[s.in_flight])
                .map_err(vk_err("vkResetFences"))?;
            self.ctx
                .device
                .reset_command_buffer(s.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(vk_err("vkResetCommandBuffer"))
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        unsafe { self.record_commands(slot, image_index) }
    }

    fn submit(&mut self, slot: usize) -> Result<(), RenderError> {
        let s = &self.frames.slots[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.main_queue, std::slice::from_ref(&submit), s.in_flight)
                .map_err(vk_err("vkQueueSubmit"))
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError> {
        let handle = self.swapchain()?.handle;
        let s = &self.frames.slots[slot];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_finished,
            swapchain_count: 1,
            p_swapchains: &handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.ctx.main_queue, &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("vkQueuePresentKHR", e)),
        }
    }

    fn recreate_swapchain(&mut self) -> Result<RecreateOutcome, RenderError> {
        unsafe { self.rebuild() }.map_err(|e| RenderError::vulkan("swapchain recreation", format_args!("{e:#}")))
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: SceneDesc,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, scene) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size != self.gpu.want {
            debug!("vk: resize to {}x{}", size.width, size.height);
        }
        self.gpu.want = size;
        self.frame_loop.notify_resized();
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let elapsed = self.started.elapsed();
        match self.frame_loop.draw_frame(&mut self.gpu, elapsed)? {
            FrameOutcome::Presented { .. } | FrameOutcome::Suspended => {}
            FrameOutcome::Retry => debug!("vk: swapchain was stale at acquire; frame skipped"),
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        // command buffers are re-recorded every frame
        self.gpu.clear = rgba;
    }
}
