// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its image views, the shared depth buffer and one framebuffer per image.
//! Every rebuild starts from scratch; nothing carries over from the previous swapchain.

use crate::device::{CommandPools, DeviceContext};
use crate::memory::{create_view, GpuImage};
use crate::upload::{transition_image, LayoutState};
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use std::sync::Arc;
use tracing::info;
use turntable_render::{RenderError, RenderSize};

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_SURFACE_FORMAT)
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent when it has one, otherwise the request clamped to its limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `min + 1`, capped by the maximum when the surface declares one (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

pub fn pick_depth_format<F>(mut props: F) -> Result<vk::Format, RenderError>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| {
            props(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RenderError::NoDepthFormat(format!("{DEPTH_CANDIDATES:?}")))
}

/// Everything decided from the surface's current state before any object is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `None` while the surface has zero area.
    pub fn new(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        modes: &[vk::PresentModeKHR],
        want: RenderSize,
    ) -> Option<Self> {
        let extent = choose_extent(caps, want);
        if extent.width == 0 || extent.height == 0 {
            return None;
        }
        Some(SwapchainPlan {
            surface_format: choose_surface_format(formats),
            present_mode: choose_present_mode(modes),
            extent,
            image_count: choose_image_count(caps),
            transform: caps.current_transform,
        })
    }

    pub unsafe fn query(
        surface_loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        want: RenderSize,
    ) -> Result<Option<Self>> {
        let caps = surface_loader
            .get_physical_device_surface_capabilities(phys, surface)
            .context("get_physical_device_surface_capabilities")?;
        let formats = surface_loader
            .get_physical_device_surface_formats(phys, surface)
            .context("get_physical_device_surface_formats")?;
        let modes = surface_loader
            .get_physical_device_surface_present_modes(phys, surface)
            .context("get_physical_device_surface_present_modes")?;
        Ok(Self::new(&caps, &formats, &modes, want))
    }
}

pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub depth: GpuImage,
}

impl Swapchain {
    pub unsafe fn create(
        ctx: &DeviceContext,
        pools: &CommandPools,
        loader: &swapchain::Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let depth = GpuImage::new(
            ctx,
            plan.extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            (vk::SharingMode::EXCLUSIVE, &[][..]),
        )?;
        transition_image(
            ctx,
            pools,
            depth.image,
            depth_format,
            LayoutState::Undefined,
            LayoutState::DepthStencilAttachment,
        )?;

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: plan.image_count,
            image_format: plan.surface_format.format,
            image_color_space: plan.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: plan.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        let handle = loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;

        let mut out = Swapchain {
            device: ctx.device.clone(),
            loader: loader.clone(),
            handle,
            format: plan.surface_format,
            extent: plan.extent,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            depth,
        };
        out.images = loader
            .get_swapchain_images(handle)
            .context("get_swapchain_images")?;

        for &image in &out.images {
            let view = create_view(
                &out.device,
                image,
                plan.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            out.views.push(view);
        }

        for &view in &out.views {
            let attachments = [view, out.depth.view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: plan.extent.width,
                height: plan.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = out
                .device
                .create_framebuffer(&fb_info, None)
                .context("create_framebuffer")?;
            out.framebuffers.push(fb);
        }

        info!(
            "swapchain ready ({}x{}, {} images, {:?}, {:?}, depth {:?})",
            plan.extent.width,
            plan.extent.height,
            out.images.len(),
            plan.surface_format.format,
            plan.present_mode,
            depth_format
        );
        Ok(out)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn size(&self) -> RenderSize {
        RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
