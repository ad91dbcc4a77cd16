// SPDX-License-Identifier: CEPL-1.0
//! Physical device scoring, queue family discovery and logical device creation.

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use tracing::{debug, info, warn};
use turntable_render::RenderError;

pub const DEMOTE_EXTENSION: &CStr = c"VK_EXT_shader_demote_to_helper_invocation";

/// Device extensions asked for; only those the device advertises are enabled.
const REQUESTED_EXTENSIONS: [&CStr; 2] = [swapchain::NAME, DEMOTE_EXTENSION];

pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<CString>,
    /// `shaderDemoteToHelperInvocation` as reported by the feature query.
    pub demote_feature: bool,
}

/// +1000 for discrete GPUs, plus the 2D image limit, plus the uniform-buffer descriptor limit.
pub fn score_device(props: &vk::PhysicalDeviceProperties) -> u64 {
    let mut score = 0u64;
    if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }
    score += u64::from(props.limits.max_image_dimension2_d);
    score += u64::from(props.limits.max_descriptor_set_uniform_buffers);
    score
}

/// Index of the highest score; the earliest device wins a tie.
pub fn pick_best(scores: &[u64]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

#[derive(Clone, Copy, Debug)]
pub struct QueueFamilyCaps {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilySelection {
    /// Graphics + presentation.
    pub main: u32,
    /// Transfer-capable; equals `main` when no other family qualifies.
    pub transfer: u32,
}

impl QueueFamilySelection {
    pub fn dedicated_transfer(&self) -> bool {
        self.main != self.transfer
    }
}

pub fn select_queue_families(families: &[QueueFamilyCaps]) -> Option<QueueFamilySelection> {
    let mut main = None;
    let mut transfer = None;
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if main.is_none() && family.flags.contains(vk::QueueFlags::GRAPHICS) && family.present {
            main = Some(i);
        } else if transfer.is_none() && family.flags.contains(vk::QueueFlags::TRANSFER) {
            transfer = Some(i);
        }
        if main.is_some() && transfer.is_some() {
            break;
        }
    }
    let main = main?;
    Some(QueueFamilySelection {
        main,
        transfer: transfer.unwrap_or(main),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnabledExtensions {
    pub names: Vec<&'static CStr>,
    pub demote: bool,
}

/// Intersects the requested set with what the device advertises. The swapchain extension
/// is mandatory.
pub fn negotiate_extensions(
    available: &[CString],
    demote_feature: bool,
) -> Result<EnabledExtensions, RenderError> {
    let names: Vec<&'static CStr> = REQUESTED_EXTENSIONS
        .into_iter()
        .filter(|req| available.iter().any(|a| a.as_c_str() == *req))
        .filter(|req| *req != DEMOTE_EXTENSION || demote_feature)
        .collect();
    if !names.contains(&swapchain::NAME) {
        return Err(RenderError::MissingExtension(
            swapchain::NAME.to_string_lossy().into_owned(),
        ));
    }
    let demote = names.contains(&DEMOTE_EXTENSION);
    Ok(EnabledExtensions { names, demote })
}

unsafe fn describe(instance: &Instance, handle: vk::PhysicalDevice) -> Result<PhysicalDeviceInfo> {
    let properties = instance.get_physical_device_properties(handle);
    let features = instance.get_physical_device_features(handle);
    let extensions: Vec<CString> = instance
        .enumerate_device_extension_properties(handle)
        .context("enumerate_device_extension_properties")?
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    let has_demote = extensions.iter().any(|e| e.as_c_str() == DEMOTE_EXTENSION);
    let demote_feature = if has_demote && properties.api_version >= vk::API_VERSION_1_1 {
        let mut demote = vk::PhysicalDeviceShaderDemoteToHelperInvocationFeatures::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut demote);
        instance.get_physical_device_features2(handle, &mut features2);
        demote.shader_demote_to_helper_invocation == vk::TRUE
    } else {
        false
    };

    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned());

    Ok(PhysicalDeviceInfo {
        handle,
        name,
        properties,
        features,
        extensions,
        demote_feature,
    })
}

pub unsafe fn pick_physical_device(instance: &Instance) -> Result<PhysicalDeviceInfo> {
    let handles = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    let mut devices = handles
        .into_iter()
        .map(|h| describe(instance, h))
        .collect::<Result<Vec<_>>>()?;

    let scores: Vec<u64> = devices.iter().map(|d| score_device(&d.properties)).collect();
    for (d, s) in devices.iter().zip(&scores) {
        debug!("candidate device {} ({:?}) score {s}", d.name, d.properties.device_type);
    }
    let best = pick_best(&scores).ok_or(RenderError::NoPhysicalDevice)?;
    let chosen = devices.swap_remove(best);
    info!(
        "physical device: {} ({:?}), score {}",
        chosen.name, chosen.properties.device_type, scores[best]
    );
    Ok(chosen)
}

pub unsafe fn find_queue_families(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<QueueFamilySelection> {
    let props = instance.get_physical_device_queue_family_properties(phys);
    let mut caps = Vec::with_capacity(props.len());
    for (i, q) in props.iter().enumerate() {
        let present = surface_loader
            .get_physical_device_surface_support(phys, i as u32, surface)
            .context("get_physical_device_surface_support")?;
        caps.push(QueueFamilyCaps {
            flags: q.queue_flags,
            present,
        });
    }
    Ok(select_queue_families(&caps).ok_or(RenderError::NoPresentQueue)?)
}

/// The logical device and everything selected alongside it. Destroys the device on drop,
/// so it must outlive every resource created from it.
pub struct DeviceContext {
    pub instance: Instance,
    pub phys: PhysicalDeviceInfo,
    pub device: Arc<ash::Device>,
    pub families: QueueFamilySelection,
    pub main_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub demote_enabled: bool,
    pub max_anisotropy: f32,
}

impl DeviceContext {
    pub unsafe fn new(
        instance: &Instance,
        phys: PhysicalDeviceInfo,
        families: QueueFamilySelection,
    ) -> Result<Self> {
        let enabled = negotiate_extensions(&phys.extensions, phys.demote_feature)?;
        if !enabled.demote {
            warn!("demote-to-helper-invocation unavailable; using the fallback fragment shader");
        }
        let ext_ptrs: Vec<_> = enabled.names.iter().map(|n| n.as_ptr()).collect();

        let priorities = [1.0_f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: families.main,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        }];
        if families.dedicated_transfer() {
            queue_infos.push(vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: families.transfer,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            });
        }

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        let mut demote = vk::PhysicalDeviceShaderDemoteToHelperInvocationFeatures {
            shader_demote_to_helper_invocation: vk::TRUE,
            ..Default::default()
        };
        let mut dinfo = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_ptrs)
            .enabled_features(&features);
        if enabled.demote {
            dinfo = dinfo.push_next(&mut demote);
        }

        let device = instance
            .create_device(phys.handle, &dinfo, None)
            .context("create_device")?;
        let main_queue = device.get_device_queue(families.main, 0);
        let transfer_queue = device.get_device_queue(families.transfer, 0);
        let memory_properties = instance.get_physical_device_memory_properties(phys.handle);
        let max_anisotropy = phys.properties.limits.max_sampler_anisotropy;

        info!(
            "device ready: main family {}, transfer family {}{}",
            families.main,
            families.transfer,
            if families.dedicated_transfer() { "" } else { " (aliased)" }
        );

        Ok(DeviceContext {
            instance: instance.clone(),
            phys,
            device: Arc::new(device),
            families,
            main_queue,
            transfer_queue,
            memory_properties,
            demote_enabled: enabled.demote,
            max_anisotropy,
        })
    }

    /// Sharing for device-local upload targets touched by both queues.
    pub fn upload_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.families.dedicated_transfer() {
            (
                vk::SharingMode::CONCURRENT,
                vec![self.families.main, self.families.transfer],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

/// Main pool recycles per-frame command buffers; the transfer pool only serves one-shots.
pub struct CommandPools {
    device: Arc<ash::Device>,
    pub main: vk::CommandPool,
    pub transfer: vk::CommandPool,
}

impl CommandPools {
    pub unsafe fn new(ctx: &DeviceContext) -> Result<Self> {
        let device = ctx.device.clone();
        let main_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.families.main,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let main = device
            .create_command_pool(&main_info, None)
            .context("create_command_pool(main)")?;
        let transfer_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.families.transfer,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let transfer = match device.create_command_pool(&transfer_info, None) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_command_pool(main, None);
                return Err(RenderError::vulkan("vkCreateCommandPool", e).into());
            }
        };
        Ok(CommandPools {
            device,
            main,
            transfer,
        })
    }
}

impl Drop for CommandPools {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.transfer, None);
            self.device.destroy_command_pool(self.main, None);
        }
    }
}
