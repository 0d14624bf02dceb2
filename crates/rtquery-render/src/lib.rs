//! Headless ray-query render pipeline for rtquery.
//!
//! This crate provides:
//! - Render configuration and command line parsing
//! - The ray-query compute pipeline and its descriptor bindings
//! - Orchestration from scene load to image readback
//! - Radiance HDR output

pub mod config;
pub mod error;
pub mod hdr;
pub mod ray_trace_pipeline;
pub mod renderer;

pub use config::{Checkpoint, ConfigError, Preset, RenderConfig};
pub use error::{RenderError, Result};
pub use hdr::{read_hdr, write_hdr, HdrError};
pub use ray_trace_pipeline::{RayTraceBindings, RayTracePipeline};
pub use renderer::{run, RenderOutput, Renderer};
