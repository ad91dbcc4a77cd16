// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Unrecoverable renderer failures. Stale or zero-sized surfaces are reported through
/// the frame-loop outcome types instead.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no Vulkan physical devices available")]
    NoPhysicalDevice,
    #[error("no queue family supports both graphics and presentation to the surface")]
    NoPresentQueue,
    #[error("required device extension {0} is not supported")]
    MissingExtension(String),
    #[error("no memory type matches filter {filter:#b} with properties {properties}")]
    NoMemoryType { filter: u32, properties: String },
    #[error("unsupported image layout transition {from} -> {to}")]
    UnsupportedTransition { from: String, to: String },
    #[error("none of the depth formats {0} supports optimal-tiling depth attachments")]
    NoDepthFormat(String),
    #[error("shader {name}: {reason}")]
    Shader { name: String, reason: String },
    #[error("pixel buffer of {len} bytes does not match {width}x{height} with {channels} channels")]
    InvalidPixels {
        width: u32,
        height: u32,
        channels: u8,
        len: usize,
    },
    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: String },
}

impl RenderError {
    pub fn vulkan(call: &'static str, result: impl std::fmt::Debug) -> Self {
        RenderError::Vulkan {
            call,
            result: format!("{result:?}"),
        }
    }
}
