// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue. winit is re-exported so downstream crates share one version.
pub use winit;

use turntable_render::RenderSize;
use winit::dpi::{PhysicalSize, Size};
use winit::window::WindowAttributes;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

/// Attributes for the single output window; `size` is the requested inner size in pixels.
pub fn window_attributes(title: &str, size: RenderSize) -> WindowAttributes {
    winit::window::Window::default_attributes()
        .with_title(title)
        .with_inner_size(Size::Physical(PhysicalSize::new(size.width.max(1), size.height.max(1))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_directly() {
        let s = render_size(PhysicalSize::new(1080, 720));
        assert_eq!((s.width, s.height), (1080, 720));
        assert!(!s.is_empty());
        assert!(render_size(PhysicalSize::new(0, 720)).is_empty());
    }
}
