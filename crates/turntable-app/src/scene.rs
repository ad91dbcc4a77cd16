// SPDX-License-Identifier: CEPL-1.0
//! Turns configuration into the renderer's `SceneDesc`: decoded texture, shader sources, camera.

use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::Path;
use tracing::info;
use turntable_core::{AppCfg, AssetsCfg, CameraCfg, DepthMode};
use turntable_math::{CameraRig, DepthConvention, Vec3};
use turntable_render::{DecodedImage, SceneDesc, ShaderSet, ShaderSource};

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELLS: u32 = 8;

pub fn camera_rig(cam: &CameraCfg, depth: DepthMode) -> CameraRig {
    CameraRig {
        eye: Vec3::from_array(cam.eye),
        target: Vec3::from_array(cam.target),
        up: Vec3::from_array(cam.up),
        fov_y: cam.fov_y_degrees.to_radians(),
        near: cam.near,
        far: cam.far,
        spin_rate: cam.spin_degrees_per_second.to_radians(),
        depth: match depth {
            DepthMode::Reversed => DepthConvention::Reversed,
            DepthMode::Standard => DepthConvention::Standard,
        },
    }
}

/// 8-bit gray, gray-alpha and RGB images keep their channel count; everything else goes
/// through the image crate's RGBA8 conversion.
pub fn decode_texture(img: DynamicImage) -> Result<DecodedImage> {
    let (w, h) = (img.width(), img.height());
    let decoded = match img {
        DynamicImage::ImageLuma8(b) => DecodedImage::from_raw(w, h, 1, b.into_raw()),
        DynamicImage::ImageLumaA8(b) => DecodedImage::from_raw(w, h, 2, b.into_raw()),
        DynamicImage::ImageRgb8(b) => DecodedImage::from_raw(w, h, 3, b.into_raw()),
        other => DecodedImage::from_raw(w, h, 4, other.into_rgba8().into_raw()),
    };
    Ok(decoded?)
}

pub fn load_texture(path: Option<&Path>) -> Result<DecodedImage> {
    match path {
        Some(p) => {
            let img = image::open(p).with_context(|| format!("decoding texture {}", p.display()))?;
            let tex = decode_texture(img)?;
            info!("texture {} ({}x{})", p.display(), tex.width(), tex.height());
            Ok(tex)
        }
        None => {
            info!("no texture configured, using checkerboard");
            Ok(DecodedImage::checkerboard(CHECKER_SIZE, CHECKER_CELLS))
        }
    }
}

/// File overrides replace individual stages of `builtin`.
pub fn shader_set(assets: &AssetsCfg, builtin: ShaderSet) -> ShaderSet {
    let pick = |path: &Option<std::path::PathBuf>, fallback: ShaderSource| match path {
        Some(p) => ShaderSource::File(p.clone()),
        None => fallback,
    };
    ShaderSet {
        vertex: pick(&assets.vertex_shader, builtin.vertex),
        fragment: pick(&assets.fragment_shader, builtin.fragment),
        fragment_fallback: pick(&assets.fragment_fallback_shader, builtin.fragment_fallback),
    }
}

pub fn build_scene(cfg: &AppCfg, builtin: ShaderSet) -> Result<SceneDesc> {
    Ok(SceneDesc {
        texture: load_texture(cfg.assets.texture.as_deref())?,
        shaders: shader_set(&cfg.assets, builtin),
        camera: camera_rig(&cfg.camera, cfg.render.depth),
        clear_color: cfg.render.clear_color,
        validation: cfg.render.validation.then_some(cfg.render.debug_severity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
    use std::path::PathBuf;

    fn embedded(name: &'static str) -> ShaderSource {
        ShaderSource::Embedded { name, bytes: &[] }
    }

    fn builtin() -> ShaderSet {
        ShaderSet {
            vertex: embedded("v"),
            fragment: embedded("f"),
            fragment_fallback: embedded("ff"),
        }
    }

    #[test]
    fn default_camera_matches_rig_default() {
        let rig = camera_rig(&CameraCfg::default(), DepthMode::Reversed);
        let def = CameraRig::default();
        assert_eq!(rig.eye, def.eye);
        assert_eq!(rig.up, def.up);
        assert!((rig.fov_y - def.fov_y).abs() < 1e-6);
        assert!((rig.spin_rate - def.spin_rate).abs() < 1e-6);
        assert_eq!(rig.depth, DepthConvention::Reversed);
        assert_eq!(
            camera_rig(&CameraCfg::default(), DepthMode::Standard).depth,
            DepthConvention::Standard
        );
    }

    #[test]
    fn rgb_and_gray_keep_dimensions_and_expand() {
        let rgb = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let tex = decode_texture(DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!((tex.width(), tex.height()), (3, 2));
        assert_eq!(&tex.rgba()[..4], &[10, 20, 30, 255]);

        let gray = GrayImage::from_pixel(2, 2, image::Luma([7]));
        let tex = decode_texture(DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(&tex.rgba()[..4], &[7, 7, 7, 255]);
    }

    #[test]
    fn rgba_passes_through() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 4]));
        let tex = decode_texture(DynamicImage::ImageRgba8(img)).unwrap();
        assert_eq!(tex.rgba(), &[1, 2, 3, 4]);
    }

    #[test]
    fn missing_texture_path_yields_checkerboard() {
        let tex = load_texture(None).unwrap();
        assert_eq!((tex.width(), tex.height()), (CHECKER_SIZE, CHECKER_SIZE));
    }

    #[test]
    fn unreadable_texture_is_an_error() {
        let err = load_texture(Some(Path::new("no/such/texture.png"))).unwrap_err();
        assert!(format!("{err:#}").contains("no/such/texture.png"));
    }

    #[test]
    fn png_on_disk_round_trips_through_loader() {
        let path = std::env::temp_dir().join(format!("turntable-test-{}.png", std::process::id()));
        RgbImage::from_pixel(4, 3, Rgb([200, 100, 50])).save(&path).unwrap();
        let tex = load_texture(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!((tex.width(), tex.height()), (4, 3));
        assert_eq!(&tex.rgba()[..4], &[200, 100, 50, 255]);
    }

    #[test]
    fn shader_overrides_replace_single_stages() {
        let assets = AssetsCfg {
            fragment_shader: Some(PathBuf::from("custom.frag.spv")),
            ..Default::default()
        };
        let set = shader_set(&assets, builtin());
        assert_eq!(set.vertex.name(), "v");
        assert!(matches!(&set.fragment, ShaderSource::File(p) if p == Path::new("custom.frag.spv")));
        assert_eq!(set.fragment_fallback.name(), "ff");
    }

    #[test]
    fn validation_off_means_no_severity() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = false;
        assert_eq!(build_scene(&cfg, builtin()).unwrap().validation, None);
        cfg.render.validation = true;
        assert_eq!(
            build_scene(&cfg, builtin()).unwrap().validation,
            Some(cfg.render.debug_severity)
        );
    }
}
