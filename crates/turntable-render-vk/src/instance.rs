// SPDX-License-Identifier: CEPL-1.0
//! Instance creation, optional validation layer and the debug-utils messenger.

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr};
use tracing::{debug, error, info, trace, warn};
use turntable_render::DebugSeverity;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Severity bits at or above `min`.
pub fn severity_mask(min: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    match min {
        DebugSeverity::Verbose => S::VERBOSE | S::INFO | S::WARNING | S::ERROR,
        DebugSeverity::Info => S::INFO | S::WARNING | S::ERROR,
        DebugSeverity::Warning => S::WARNING | S::ERROR,
        DebugSeverity::Error => S::ERROR,
    }
}

/// A message passes when its severity intersects the configured mask.
pub fn passes_filter(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    mask: vk::DebugUtilsMessageSeverityFlagsEXT,
) -> bool {
    severity.intersects(mask)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    if !user.is_null() {
        let mask = vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(user as usize as u32);
        if !passes_filter(severity, mask) {
            return vk::FALSE;
        }
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Instance plus whatever debug plumbing was enabled for it.
pub struct InstanceBundle {
    pub entry: Entry,
    pub instance: Instance,
    pub debug: Option<DebugMessenger>,
}

impl Drop for InstanceBundle {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn layer_available(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
        })
        .unwrap_or(false)
}

unsafe fn instance_extension_available(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_extension_properties(None)
        .map(|exts| {
            exts.iter()
                .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
        })
        .unwrap_or(false)
}

/// Loads the Vulkan library and creates a 1.1 instance with the window-system extensions.
/// Validation is enabled only when requested and both the layer and debug-utils exist.
pub unsafe fn create_instance(
    display_raw: RawDisplayHandle,
    validation: Option<DebugSeverity>,
) -> Result<InstanceBundle> {
    let entry = Entry::load().context("loading the Vulkan library")?;
    let app_name = c"turntable";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: app_name.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers = Vec::new();

    let validation = validation.filter(|_| {
        let layer = layer_available(&entry, VALIDATION_LAYER);
        let utils = instance_extension_available(&entry, debug_utils::NAME);
        if !(layer && utils) {
            warn!("validation requested but VK_LAYER_KHRONOS_validation or VK_EXT_debug_utils is missing");
        }
        layer && utils
    });
    if validation.is_some() {
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;

    let debug = match validation {
        Some(min) => match create_debug_messenger(&entry, &instance, min) {
            Ok(messenger) => {
                info!("validation enabled (min severity {min:?})");
                Some(messenger)
            }
            Err(e) => {
                instance.destroy_instance(None);
                return Err(e);
            }
        },
        None => None,
    };

    Ok(InstanceBundle {
        entry,
        instance,
        debug,
    })
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
    min: DebugSeverity,
) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let mask = severity_mask(min);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: mask,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        // mask travels as the user pointer; no allocation to free
        p_user_data: mask.as_raw() as usize as *mut c_void,
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, messenger })
}
