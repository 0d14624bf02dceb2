//! Render pipeline errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::hdr::HdrError;

/// Any failure along the render pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] rtquery_core::Error),

    #[error("GPU error: {0}")]
    Gpu(#[from] rtquery_gpu::GpuError),

    #[error("Scene error: {0}")]
    Scene(#[from] rtquery_scene::SceneError),

    #[error("Acceleration structure error: {0}")]
    Accel(#[from] rtquery_accel::AccelError),

    #[error("Shader error: {0}")]
    Shader(#[from] rtquery_shaders::ShaderError),

    #[error("HDR error: {0}")]
    Hdr(#[from] HdrError),

    /// A count does not fit the 32-bit fields Vulkan uses.
    #[error("Scene too large: {0}")]
    TooLarge(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
