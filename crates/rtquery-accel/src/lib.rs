//! Acceleration structures for ray-query compute.
//!
//! This crate builds the two-level hierarchy a ray query traverses:
//! - [`TriangleBlas`]: one bottom-level structure per opaque triangle mesh
//! - [`Tlas`]: a single top-level structure whose instances reference BLASes
//!
//! Builds are one-shot. There is no update or refit; a changed scene means a
//! fresh [`AccelerationStructureBuilder`].
//!
//! # Example
//!
//! ```ignore
//! let mut builder = AccelerationStructureBuilder::new();
//! let input = BlasInput::from_triangles(vertex_address, index_address, 8, 12)?;
//! builder.build_blas(&ctx, &pool, &[input], DEFAULT_BUILD_FLAGS)?;
//! builder.build_tlas(&ctx, &pool, &[InstanceDesc::new(0)], DEFAULT_BUILD_FLAGS)?;
//! let tlas = builder.tlas()?.acceleration_structure;
//! ```

pub mod builder;
pub mod error;
pub mod input;

pub use builder::{AccelerationStructureBuilder, Tlas, TriangleBlas, DEFAULT_BUILD_FLAGS};
pub use error::{AccelError, Result};
pub use input::{align_up, validate_blas_inputs, BlasInput, InstanceDesc};
