//! Acceleration structure errors.

use ash::vk;
use thiserror::Error;

/// Errors raised while building acceleration structures.
#[derive(Error, Debug)]
pub enum AccelError {
    /// A geometry with nothing to build.
    #[error("Empty geometry: {0}")]
    EmptyGeometry(&'static str),

    /// `build_blas` was given no inputs.
    #[error("No BLAS inputs")]
    NoBlasInputs,

    /// `build_tlas` was given no instances.
    #[error("No TLAS instances")]
    NoInstances,

    /// An instance names a BLAS that was never built.
    #[error("Instance references BLAS {index}, but only {count} exist")]
    MissingBlas { index: usize, count: usize },

    /// A packed instance field does not fit its bit width.
    #[error("{field} value {value} does not fit in 24 bits")]
    FieldOverflow { field: &'static str, value: u32 },

    /// A device limit would be exceeded.
    #[error("{what} count {count} exceeds device limit {limit}")]
    LimitExceeded {
        what: &'static str,
        count: u64,
        limit: u64,
    },

    /// The TLAS was requested before being built, or built twice.
    #[error("Invalid builder state: {0}")]
    InvalidState(&'static str),

    /// Vulkan API error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Device, memory or command error.
    #[error(transparent)]
    Gpu(#[from] rtquery_gpu::GpuError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, AccelError>;
