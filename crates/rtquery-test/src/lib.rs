//! Test harness for rtquery.
//!
//! Provides headless rendering and HDR image comparison.

pub mod harness;
pub mod image;

pub use harness::{cube_scene, HeadlessRenderer, VisualRegressionTest};
pub use image::RgbImage;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Render error: {0}")]
    Render(#[from] rtquery_render::RenderError),
    #[error("Scene error: {0}")]
    Scene(#[from] rtquery_scene::SceneError),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HDR error: {0}")]
    Hdr(#[from] rtquery_render::HdrError),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Visual regression test configuration.
#[derive(Debug, Clone)]
pub struct VisualTestConfig {
    /// Maximum allowed mean absolute channel difference.
    pub threshold: f64,
    /// Directory for baseline images.
    pub baseline_dir: String,
    /// Directory for test output images.
    pub output_dir: String,
}

impl Default for VisualTestConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            baseline_dir: "assets/test_data/baselines".to_string(),
            output_dir: "target/test_output".to_string(),
        }
    }
}
