//! Core types for the rtquery ray tracer.
//!
//! This crate provides the pieces shared by every stage of the pipeline:
//! - Render resolution presets and workgroup tile size
//! - Workgroup dispatch arithmetic
//! - Asset lookup across a list of search directories
//! - Common error types

pub mod dispatch;
pub mod error;
pub mod paths;

pub use dispatch::WorkgroupGrid;
pub use error::{Error, Result};
pub use paths::SearchPaths;

/// Project-wide constants.
pub mod constants {
    /// Project directory name used as an extra asset search location.
    pub const PROJECT_NAME: &str = "rtquery";

    /// Workgroup width in pixels. Must match `local_size_x` in the shader.
    pub const WORKGROUP_WIDTH: u32 = 16;
    /// Workgroup height in pixels. Must match `local_size_y` in the shader.
    pub const WORKGROUP_HEIGHT: u32 = 8;

    /// Default render width.
    pub const DEFAULT_WIDTH: u32 = 1920;
    /// Default render height.
    pub const DEFAULT_HEIGHT: u32 = 1280;

    /// Float channels per output pixel (linear RGB).
    pub const CHANNELS: u32 = 3;

    /// Default scene, relative to a search path.
    pub const DEFAULT_SCENE: &str = "scenes/cornellbox_original_merged.obj";
    /// Default compute shader binary, relative to a search path.
    pub const DEFAULT_SHADER: &str = "shaders/raytrace.comp.glsl.spv";
    /// Default output file.
    pub const DEFAULT_OUTPUT: &str = "output.hdr";
}

/// Size in bytes of a tightly packed RGB32F image.
pub const fn output_buffer_size(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * constants::CHANNELS as u64 * std::mem::size_of::<f32>() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_size_matches_rgb32f() {
        assert_eq!(output_buffer_size(1920, 1280), 1920 * 1280 * 12);
        assert_eq!(output_buffer_size(800, 600), 800 * 600 * 12);
        assert_eq!(output_buffer_size(0, 600), 0);
    }
}
