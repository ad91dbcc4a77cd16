// SPDX-License-Identifier: CEPL-1.0
use crate::RenderError;
use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;

/// Where a precompiled SPIR-V blob comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    Embedded {
        name: &'static str,
        bytes: &'static [u8],
    },
    File(PathBuf),
}

impl ShaderSource {
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            ShaderSource::Embedded { name, .. } => Cow::Borrowed(*name),
            ShaderSource::File(path) => path.to_string_lossy(),
        }
    }

    /// The whole blob; files are read fully into memory.
    pub fn bytes(&self) -> Result<Cow<'static, [u8]>, RenderError> {
        match self {
            ShaderSource::Embedded { bytes, .. } => Ok(Cow::Borrowed(*bytes)),
            ShaderSource::File(path) => fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| RenderError::Shader {
                    name: path.display().to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Vertex stage plus the two fragment variants; the device decides which fragment is used.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: ShaderSource,
    /// Requires `VK_EXT_shader_demote_to_helper_invocation`.
    pub fragment: ShaderSource,
    pub fragment_fallback: ShaderSource,
}

impl ShaderSet {
    pub fn fragment_for(&self, demote_supported: bool) -> &ShaderSource {
        if demote_supported {
            &self.fragment
        } else {
            &self.fragment_fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ShaderSet {
        ShaderSet {
            vertex: ShaderSource::Embedded { name: "v", bytes: &[3, 2, 35, 7] },
            fragment: ShaderSource::File(PathBuf::from("frag.spv")),
            fragment_fallback: ShaderSource::Embedded { name: "fallback", bytes: &[] },
        }
    }

    #[test]
    fn fragment_variant_follows_extension_support() {
        let s = set();
        assert_eq!(s.fragment_for(true).name(), "frag.spv");
        assert_eq!(s.fragment_for(false).name(), "fallback");
    }

    #[test]
    fn embedded_bytes_are_borrowed_verbatim() {
        let s = set();
        assert_eq!(&*s.vertex.bytes().unwrap(), &[3, 2, 35, 7]);
    }

    #[test]
    fn unreadable_file_reports_its_path() {
        let src = ShaderSource::File(PathBuf::from("no/such/shader.spv"));
        match src.bytes() {
            Err(RenderError::Shader { name, .. }) => assert_eq!(name, "no/such/shader.spv"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
