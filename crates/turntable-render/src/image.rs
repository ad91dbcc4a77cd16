// SPDX-License-Identifier: CEPL-1.0
use crate::RenderError;

/// Tightly packed, row-major RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl DecodedImage {
    /// Accepts 1 (gray), 2 (gray + alpha), 3 (RGB) or 4 (RGBA) channels and expands to RGBA8.
    pub fn from_raw(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, RenderError> {
        let texels = width as usize * height as usize;
        let invalid = || RenderError::InvalidPixels {
            width,
            height,
            channels,
            len: pixels.len(),
        };
        if texels == 0 || !(1..=4).contains(&channels) || pixels.len() != texels * channels as usize {
            return Err(invalid());
        }

        let rgba = match channels {
            4 => pixels,
            3 => pixels
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 0xff])
                .collect(),
            2 => pixels
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            _ => pixels.iter().flat_map(|&g| [g, g, g, 0xff]).collect(),
        };
        Ok(DecodedImage { width, height, rgba })
    }

    /// Two-tone checkerboard used when no texture file is configured.
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let texel = if light {
                    [0xe8, 0xe4, 0xd8, 0xff]
                } else {
                    [0x3a, 0x4a, 0x6b, 0xff]
                };
                rgba.extend_from_slice(&texel);
            }
        }
        DecodedImage {
            width: size,
            height: size,
            rgba,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// `width * height * 4`, the size of the staging buffer for an upload.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}
