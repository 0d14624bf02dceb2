//! Vulkan abstraction layer for rtquery.
//!
//! This crate provides:
//! - Vulkan instance and device management with ray query enabled
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - One-shot command submission and staged uploads
//! - Descriptor and compute pipeline helpers
//! - Creation-order tracking for teardown

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod teardown;
pub mod upload;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use command::{execute_single_time_commands, CommandPool};
pub use context::{check_device, GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_acceleration_structure, write_storage_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer};
pub use pipeline::{create_shader_module, ComputePipeline};
pub use teardown::{FirstError, ResourceId, TeardownLedger};
pub use upload::upload_buffer;
