// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod error;
pub mod frame_loop;
mod image;
mod shader;

pub use error::RenderError;
pub use frame_loop::{
    AcquireOutcome, FrameDriver, FrameLoop, FrameOutcome, PresentOutcome, RecreateOutcome,
    SurfaceDirty,
};
pub use image::DecodedImage;
pub use shader::{ShaderSet, ShaderSource};
pub use turntable_core::DebugSeverity;
pub use turntable_math::{CameraRig, DepthConvention, ModelData};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// A minimized window reports zero width or height.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Everything the renderer consumes from the outside world, already decoded.
#[derive(Clone, Debug)]
pub struct SceneDesc {
    pub texture: DecodedImage,
    pub shaders: ShaderSet,
    pub camera: CameraRig,
    pub clear_color: [f32; 4],
    /// Forward validation-layer messages at or above this severity; `None` disables validation.
    pub validation: Option<DebugSeverity>,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: SceneDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
