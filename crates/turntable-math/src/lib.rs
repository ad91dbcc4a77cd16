// SPDX-License-Identifier: CEPL-1.0
//! Per-frame transform bundle for the spinning object.

use bytemuck::{Pod, Zeroable};
use std::time::Duration;

pub use glam::{Mat4, Vec3, Vec4};

/// Uniform payload written into each frame slot's mapped buffer.
/// Layout matches `layout(set = 0, binding = 0) uniform ModelData` in `model.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ModelData {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

/// Depth-test comparison a pipeline must use to match a projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthTest {
    Less,
    GreaterOrEqual,
}

/// Pairs a projection's depth mapping with the comparison and clear value that make
/// nearer fragments win.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DepthConvention {
    /// Near plane maps to 1.0, far plane to 0.0.
    #[default]
    Reversed,
    /// Near plane maps to 0.0, far plane to 1.0.
    Standard,
}

impl DepthConvention {
    pub fn depth_test(self) -> DepthTest {
        match self {
            DepthConvention::Reversed => DepthTest::GreaterOrEqual,
            DepthConvention::Standard => DepthTest::Less,
        }
    }

    /// Value the depth attachment is cleared to: the "farthest" depth.
    pub fn clear_depth(self) -> f32 {
        match self {
            DepthConvention::Reversed => 0.0,
            DepthConvention::Standard => 1.0,
        }
    }

    /// Right-handed perspective with 0..1 clip depth and the Y axis flipped for
    /// swapchain space (clip Y points down).
    pub fn projection(self, fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let mut proj = match self {
            DepthConvention::Reversed => Mat4::perspective_rh(fov_y, aspect, far, near),
            DepthConvention::Standard => Mat4::perspective_rh(fov_y, aspect, near, far),
        };
        proj.y_axis.y = -proj.y_axis.y;
        proj
    }
}

/// Fixed camera looking at an object spinning about +Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraRig {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Radians per second.
    pub spin_rate: f32,
    pub depth: DepthConvention,
}

impl Default for CameraRig {
    fn default() -> Self {
        CameraRig {
            eye: Vec3::splat(2.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 10.0,
            spin_rate: 90f32.to_radians(),
            depth: DepthConvention::Reversed,
        }
    }
}

impl CameraRig {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        self.depth.projection(self.fov_y, aspect, self.near, self.far)
    }

    /// Rotation angle after `elapsed`, wrapped to one turn so precision holds for long runs.
    pub fn spin_angle(&self, elapsed: Duration) -> f32 {
        (f64::from(self.spin_rate) * elapsed.as_secs_f64()).rem_euclid(std::f64::consts::TAU) as f32
    }

    pub fn model_data(&self, elapsed: Duration, width: u32, height: u32) -> ModelData {
        ModelData {
            model: Mat4::from_rotation_z(self.spin_angle(elapsed)),
            view: self.view(),
            proj: self.projection(aspect_ratio(width, height)),
        }
    }
}

/// Width over height; degenerate extents fall back to square.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn depth_of(proj: Mat4, view_distance: f32) -> f32 {
        let clip = proj * Vec4::new(0.0, 0.0, -view_distance, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn model_rotates_ninety_degrees_per_second_about_z() {
        let rig = CameraRig::default();
        for t in 0..3u64 {
            let data = rig.model_data(Duration::from_secs(t), 1080, 720);
            let expected = Mat4::from_rotation_z((90.0 * t as f32).to_radians());
            assert!(data.model.abs_diff_eq(expected, EPS), "t={t}");
        }
        let quarter = rig.model_data(Duration::from_secs(1), 1080, 720).model;
        assert!(quarter.transform_vector3(Vec3::X).abs_diff_eq(Vec3::Y, EPS));
    }

    #[test]
    fn view_is_fixed_across_frames() {
        let rig = CameraRig::default();
        let a = rig.model_data(Duration::from_millis(0), 800, 600);
        let b = rig.model_data(Duration::from_millis(2500), 800, 600);
        assert_eq!(a.view, b.view);
        assert_eq!(a.view, Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z));
    }

    #[test]
    fn projection_flips_y_for_swapchain_space() {
        for depth in [DepthConvention::Reversed, DepthConvention::Standard] {
            let rig = CameraRig { depth, ..CameraRig::default() };
            let proj = rig.projection(1.5);
            assert!(proj.y_axis.y < 0.0);
            let unflipped = match depth {
                DepthConvention::Reversed => Mat4::perspective_rh(rig.fov_y, 1.5, rig.far, rig.near),
                DepthConvention::Standard => Mat4::perspective_rh(rig.fov_y, 1.5, rig.near, rig.far),
            };
            assert!((proj.y_axis.y + unflipped.y_axis.y).abs() < EPS);
        }
    }

    #[test]
    fn reversed_depth_maps_near_to_one_and_pairs_with_greater_or_equal() {
        let conv = DepthConvention::Reversed;
        let proj = conv.projection(1.0, 1.0, 0.1, 10.0);
        assert!((depth_of(proj, 0.1) - 1.0).abs() < EPS);
        assert!(depth_of(proj, 10.0).abs() < EPS);
        assert!(depth_of(proj, 1.0) > depth_of(proj, 2.0));
        assert_eq!(conv.depth_test(), DepthTest::GreaterOrEqual);
        assert_eq!(conv.clear_depth(), 0.0);
    }

    #[test]
    fn standard_depth_maps_near_to_zero_and_pairs_with_less() {
        let conv = DepthConvention::Standard;
        let proj = conv.projection(1.0, 1.0, 0.1, 10.0);
        assert!(depth_of(proj, 0.1).abs() < EPS);
        assert!((depth_of(proj, 10.0) - 1.0).abs() < EPS);
        assert!(depth_of(proj, 1.0) < depth_of(proj, 2.0));
        assert_eq!(conv.depth_test(), DepthTest::Less);
        assert_eq!(conv.clear_depth(), 1.0);
    }

    #[test]
    fn spin_angle_wraps_after_a_full_turn() {
        let rig = CameraRig::default();
        let angle = rig.spin_angle(Duration::from_secs(5));
        assert!((angle - 90f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn degenerate_extent_uses_square_aspect() {
        assert_eq!(aspect_ratio(0, 720), 1.0);
        assert_eq!(aspect_ratio(1080, 0), 1.0);
        assert!((aspect_ratio(1080, 720) - 1.5).abs() < EPS);
    }

    #[test]
    fn model_data_is_three_packed_matrices() {
        assert_eq!(std::mem::size_of::<ModelData>(), 3 * 64);
        let data = CameraRig::default().model_data(Duration::ZERO, 4, 4);
        assert_eq!(bytemuck::bytes_of(&data).len(), 192);
    }
}
