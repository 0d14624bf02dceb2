//! Headless rendering and visual regression testing.
//!
//! Runs the full ray-query pipeline off-screen and returns the image as
//! linear floats, so tests can assert on pixel values without a display.

use std::path::{Path, PathBuf};

use rtquery_core::constants::DEFAULT_SHADER;
use rtquery_core::SearchPaths;
use rtquery_render::{RenderConfig, RenderOutput, Renderer};
use rtquery_scene::Scene;

use crate::image::RgbImage;
use crate::{Result, TestError, VisualTestConfig};

/// Unit cube centred at (0, 1, 0), twelve triangles.
///
/// The shader camera sits at height 1 looking down -z, so the centre pixel
/// lands on the front face.
pub fn cube_scene() -> Result<Scene> {
    #[rustfmt::skip]
    let vertices = vec![
        -0.5, 0.5, -0.5,
         0.5, 0.5, -0.5,
         0.5, 1.5, -0.5,
        -0.5, 1.5, -0.5,
        -0.5, 0.5,  0.5,
         0.5, 0.5,  0.5,
         0.5, 1.5,  0.5,
        -0.5, 1.5,  0.5,
    ];
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 0, 3, 2, // back
        4, 5, 6, 4, 6, 7, // front
        0, 1, 5, 0, 5, 4, // bottom
        3, 7, 6, 3, 6, 2, // top
        0, 4, 7, 0, 7, 3, // left
        1, 2, 6, 1, 6, 5, // right
    ];
    Ok(Scene::from_parts("cube", vertices, indices)?)
}

/// Search paths for test assets: the workspace root first, then the usual
/// executable-relative locations.
pub fn workspace_search_paths() -> SearchPaths {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..");
    SearchPaths::from_current_exe().with_priority_dir(root)
}

/// Headless renderer for testing.
///
/// Owns a GPU context and the shader binary; each render builds and tears
/// down the full set of per-render resources.
pub struct HeadlessRenderer {
    renderer: Renderer,
    shader: Vec<u32>,
    width: u32,
    height: u32,
}

impl HeadlessRenderer {
    /// Create a new headless renderer with validation enabled.
    ///
    /// # Arguments
    /// * `width` - Output image width
    /// * `height` - Output image height
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let paths = workspace_search_paths();
        let shader = rtquery_shaders::load_raytrace_shader(&paths, DEFAULT_SHADER)
            .map_err(rtquery_render::RenderError::from)?
            .into_owned();
        Self::with_shader(width, height, shader)
    }

    /// Create with explicit SPIR-V.
    pub fn with_shader(width: u32, height: u32, shader: Vec<u32>) -> Result<Self> {
        let config = RenderConfig::new()
            .with_app_name("rtquery-test")
            .with_size(width, height)
            .with_validation(true);
        config.validate().map_err(rtquery_render::RenderError::from)?;
        let renderer = Renderer::new(&config)?;

        Ok(Self {
            renderer,
            shader,
            width,
            height,
        })
    }

    /// Render `scene` and return the full output record.
    pub fn render_output(&self, scene: &Scene) -> Result<RenderOutput> {
        Ok(self
            .renderer
            .render_scene(scene, &self.shader, self.width, self.height)?)
    }

    /// Render `scene` and return the resulting image.
    pub fn render(&self, scene: &Scene) -> Result<RgbImage> {
        let output = self.render_output(scene)?;
        let data = output
            .pixels
            .ok_or_else(|| TestError::ImageComparison("Render produced no pixels".to_string()))?;
        RgbImage::from_raw(output.width, output.height, data)
    }

    /// Allocate and release the output buffer only.
    pub fn allocate_storage(&self) -> Result<RenderOutput> {
        Ok(self.renderer.allocate_storage(self.width, self.height)?)
    }

    /// Get the output dimensions.
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Visual regression test runner.
///
/// Compares rendered images against HDR baselines and reports differences.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
    renderer: HeadlessRenderer,
}

impl VisualRegressionTest {
    /// Create a new visual regression test runner at 256x256.
    pub fn new(config: VisualTestConfig) -> Result<Self> {
        Self::with_dimensions(config, 256, 256)
    }

    /// Create with custom dimensions.
    pub fn with_dimensions(config: VisualTestConfig, width: u32, height: u32) -> Result<Self> {
        let renderer = HeadlessRenderer::new(width, height)?;
        Ok(Self { config, renderer })
    }

    /// Render `scene` and compare it with the baseline called `name`.
    ///
    /// A missing baseline is created from the current render.
    pub fn run_test(&self, name: &str, scene: &Scene) -> Result<()> {
        let image = self.renderer.render(scene)?;
        self.compare_and_save(name, &image)
    }

    fn compare_and_save(&self, name: &str, image: &RgbImage) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let baseline_path = PathBuf::from(&self.config.baseline_dir).join(format!("{name}.hdr"));
        let output_path = PathBuf::from(&self.config.output_dir).join(format!("{name}.hdr"));

        image.save(&output_path)?;

        if baseline_path.exists() {
            let baseline = RgbImage::load(&baseline_path)?;
            let diff = baseline.mean_abs_difference(image)?;
            if diff > self.config.threshold {
                let diff_path =
                    PathBuf::from(&self.config.output_dir).join(format!("{name}_diff.hdr"));
                baseline.difference_image(image, 0.05)?.save(&diff_path)?;

                return Err(TestError::ImageComparison(format!(
                    "Image difference {:.4} exceeds threshold {:.4} (see {})",
                    diff,
                    self.config.threshold,
                    diff_path.display()
                )));
            }
        } else {
            image.save(&baseline_path)?;
            tracing::info!("Created new baseline: {}", baseline_path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_closed_and_valid() {
        let cube = cube_scene().unwrap();
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.triangle_count(), 12);

        // Every edge of a closed mesh is shared by exactly two triangles
        let mut edges = std::collections::HashMap::new();
        for tri in cube.indices().chunks_exact(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        assert!(edges.values().all(|&n| n == 2));
    }

    #[test]
    fn centre_ray_hits_cube_front_face() {
        // Same camera as raytrace.comp.glsl
        let origin = [-0.001_f32, 1.0, 6.0];
        let slope = 1.0_f32 / 5.0;
        let (width, height) = (160.0_f32, 120.0_f32);
        let (px, py) = (80.0_f32, 60.0_f32);
        let u = (2.0 * px + 1.0 - width) / height;
        let v = -(2.0 * py + 1.0 - height) / height;
        let dir = [slope * u, slope * v, -1.0];

        let (min, max) = cube_scene().unwrap().bounds();
        let t = (origin[2] - max.z) / -dir[2];
        let x = origin[0] + t * dir[0];
        let y = origin[1] + t * dir[1];
        assert!(t > 0.0);
        assert!(x > min.x && x < max.x, "x = {x}");
        assert!(y > min.y && y < max.y, "y = {y}");
    }

    #[test]
    fn workspace_root_is_searched_first() {
        let paths = workspace_search_paths();
        assert!(paths.dirs()[0].ends_with(".."));
        assert!(paths.dirs()[0].join("Cargo.toml").is_file());
    }

    // These tests require a GPU and will be skipped in CI without GPU support

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_renderer_creation() {
        let renderer = HeadlessRenderer::new(256, 256).unwrap();
        assert_eq!(renderer.dimensions(), (256, 256));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn render_has_expected_size_and_values() {
        let renderer = HeadlessRenderer::new(800, 600).unwrap();
        let image = renderer.render(&cube_scene().unwrap()).unwrap();
        assert_eq!((image.width, image.height), (800, 600));
        assert_eq!(image.data.len(), 800 * 600 * 3);
        assert!(image.is_finite_non_negative());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn one_blas_and_one_tlas() {
        let renderer = HeadlessRenderer::new(64, 64).unwrap();
        let output = renderer.render_output(&cube_scene().unwrap()).unwrap();
        assert_eq!(output.blas_count, 1);
        assert_eq!(output.instance_count, 1);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn repeated_renders_match() {
        let renderer = HeadlessRenderer::new(128, 96).unwrap();
        let scene = cube_scene().unwrap();
        let first = renderer.render(&scene).unwrap();
        let second = renderer.render(&scene).unwrap();
        assert!(first.max_abs_difference(&second).unwrap() < 1e-6);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn cube_is_visible_at_centre() {
        let renderer = HeadlessRenderer::new(160, 120).unwrap();
        let image = renderer.render(&cube_scene().unwrap()).unwrap();
        // Front face normal is +z, shaded as 0.5 + 0.5 * n
        let centre = image.pixel(80, 60).unwrap();
        assert!((centre[2] - 1.0).abs() < 1e-3);
        assert!((centre[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn storage_checkpoint_releases_everything() {
        let renderer = HeadlessRenderer::new(1920, 1280).unwrap();
        let output = renderer.allocate_storage().unwrap();
        assert!(output.pixels.is_none());
    }
}
