//! Ray-query compute shader for rtquery.
//!
//! The GLSL source lives in `shaders/raytrace.comp.glsl`. At runtime the
//! precompiled `shaders/raytrace.comp.glsl.spv` is looked up through the
//! asset search paths. With the `compile` feature the source is also
//! compiled at build time and embedded as a fallback.

use std::borrow::Cow;
use std::path::Path;

use rtquery_core::SearchPaths;
use thiserror::Error;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Threads per workgroup along x, matching `local_size_x`.
pub const LOCAL_SIZE_X: u32 = rtquery_core::constants::WORKGROUP_WIDTH;
/// Threads per workgroup along y, matching `local_size_y`.
pub const LOCAL_SIZE_Y: u32 = rtquery_core::constants::WORKGROUP_HEIGHT;

/// GLSL source of the ray-query compute shader.
pub const RAYTRACE_SOURCE: &str = include_str!("../shaders/raytrace.comp.glsl");

/// Push constants consumed by the shader: the image extent.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayTracePushConstants {
    pub width: u32,
    pub height: u32,
}

impl RayTracePushConstants {
    /// Size in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Errors raised while loading SPIR-V.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// Lookup or I/O failed.
    #[error(transparent)]
    Core(#[from] rtquery_core::Error),

    /// Byte length is not a whole number of words.
    #[error("SPIR-V length {0} is not a multiple of 4")]
    Misaligned(usize),

    /// The module does not start with the SPIR-V magic number.
    #[error("Invalid SPIR-V magic number {0:#010x}")]
    BadMagic(u32),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ShaderError>;

/// Convert a byte slice to SPIR-V words (SPIR-V requires 4-byte alignment).
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Misaligned(bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(ShaderError::BadMagic(other)),
        None => Err(ShaderError::BadMagic(0)),
    }
}

#[cfg(feature = "compile")]
mod embedded {
    use std::sync::OnceLock;

    static RAYTRACE_BYTES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/raytrace.comp.spv"));
    static RAYTRACE_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

    pub fn raytrace() -> Option<&'static [u32]> {
        let words = RAYTRACE_SPIRV.get_or_init(|| super::bytes_to_spirv(RAYTRACE_BYTES).unwrap_or_default());
        (!words.is_empty()).then_some(words.as_slice())
    }
}

/// SPIR-V compiled into the binary, if built with the `compile` feature.
pub fn embedded_raytrace_shader() -> Option<&'static [u32]> {
    #[cfg(feature = "compile")]
    {
        embedded::raytrace()
    }
    #[cfg(not(feature = "compile"))]
    {
        None
    }
}

/// Read a SPIR-V file from disk.
pub fn load_spirv_file(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path.as_ref()).map_err(rtquery_core::Error::from)?;
    bytes_to_spirv(&bytes)
}

/// Locate `name` through the search paths and load it, falling back to the
/// embedded shader when no file is found.
pub fn load_raytrace_shader(
    paths: &SearchPaths,
    name: impl AsRef<Path>,
) -> Result<Cow<'static, [u32]>> {
    match paths.find(name) {
        Ok(path) => {
            tracing::info!("Loading shader {}", path.display());
            Ok(Cow::Owned(load_spirv_file(&path)?))
        }
        Err(err @ rtquery_core::Error::NotFound { .. }) => match embedded_raytrace_shader() {
            Some(words) => {
                tracing::warn!("{err}; using embedded shader");
                Ok(Cow::Borrowed(words))
            }
            None => Err(err.into()),
        },
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_module_converts() {
        let words = bytes_to_spirv(&module_bytes(&[SPIRV_MAGIC, 0x0001_0600, 7])).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0600, 7]);
    }

    #[test]
    fn misaligned_module_is_rejected() {
        assert!(matches!(
            bytes_to_spirv(&[0x03, 0x02, 0x23, 0x07, 0x00]),
            Err(ShaderError::Misaligned(5))
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        assert!(matches!(
            bytes_to_spirv(&module_bytes(&[0xDEAD_BEEF])),
            Err(ShaderError::BadMagic(0xDEAD_BEEF))
        ));
        assert!(matches!(bytes_to_spirv(&[]), Err(ShaderError::BadMagic(0))));
    }

    #[test]
    fn source_matches_workgroup_tile() {
        assert!(RAYTRACE_SOURCE.contains(&format!("local_size_x = {LOCAL_SIZE_X}")));
        assert!(RAYTRACE_SOURCE.contains(&format!("local_size_y = {LOCAL_SIZE_Y}")));
        assert!(RAYTRACE_SOURCE.contains("GL_EXT_ray_query"));
    }

    #[test]
    fn push_constants_layout() {
        assert_eq!(RayTracePushConstants::SIZE, 8);
        let push_constants = RayTracePushConstants {
            width: 1920,
            height: 1280,
        };
        let bytes = bytemuck::bytes_of(&push_constants);
        assert_eq!(bytes.len(), RayTracePushConstants::SIZE as usize);
        assert_eq!(&bytes[..4], &1920u32.to_ne_bytes());
        assert_eq!(&bytes[4..], &1280u32.to_ne_bytes());
        assert_eq!(
            bytemuck::from_bytes::<RayTracePushConstants>(bytes),
            &push_constants
        );
    }

    #[test]
    fn shader_file_is_found_through_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shaders")).unwrap();
        std::fs::write(
            dir.path().join("shaders/raytrace.comp.glsl.spv"),
            module_bytes(&[SPIRV_MAGIC, 1, 2, 3]),
        )
        .unwrap();

        let paths = SearchPaths::new().with_dir(dir.path());
        let words = load_raytrace_shader(&paths, "shaders/raytrace.comp.glsl.spv").unwrap();
        assert_eq!(words.len(), 4);
        assert!(matches!(words, Cow::Owned(_)));
    }

    #[cfg(not(feature = "compile"))]
    #[test]
    fn missing_shader_without_embedded_copy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SearchPaths::new().with_dir(dir.path());
        assert!(matches!(
            load_raytrace_shader(&paths, "shaders/raytrace.comp.glsl.spv"),
            Err(ShaderError::Core(rtquery_core::Error::NotFound { .. }))
        ));
    }

    #[cfg(feature = "compile")]
    #[test]
    fn embedded_shader_loads() {
        let shader = embedded_raytrace_shader().unwrap();
        assert_eq!(shader[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
        assert!(shader.len() > 100, "Shader too small");
    }
}
