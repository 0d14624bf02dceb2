//! rtquery: headless ray-query renderer
//!
//! Loads a single-shape OBJ scene, builds acceleration structures over it,
//! traces one ray per pixel from a compute shader and writes the result to a
//! Radiance HDR file.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p rtquery-cli -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-W, --width <N>`, `-H, --height <N>`: Image size (default: 1920x1280)
//! - `--preset hd|small`: 1920x1280 or 800x600
//! - `-s, --scene <PATH>`: OBJ scene (default: scenes/cornellbox_original_merged.obj)
//! - `--shader <PATH>`: SPIR-V binary (default: shaders/raytrace.comp.glsl.spv)
//! - `-o, --output <PATH>`: Output file (default: output.hdr)
//! - `--checkpoint context|storage|full`: Stop early after setup
//! - `--validation`, `--no-validation`: Toggle Vulkan validation layers
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use anyhow::Context;
use rtquery_render::RenderConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Check for help flag before doing any work
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RenderConfig::from_args().context("Invalid arguments (see --help)")?;
    tracing::info!(
        "Rendering {} at {}x{} to {}",
        config.scene.display(),
        config.width,
        config.height,
        config.output.display()
    );

    let output = rtquery_render::run(&config).context("Render failed")?;
    if output.pixels.is_some() {
        tracing::info!("Done: {}", config.output.display());
    }
    Ok(())
}

fn print_help() {
    eprintln!(
        "rtquery - headless ray-query renderer

USAGE:
    cargo run -p rtquery-cli -- [OPTIONS]

IMAGE OPTIONS:
    -W, --width <N>         Image width in pixels (default: 1920)
    -H, --height <N>        Image height in pixels (default: 1280)
    --preset <NAME>         hd (1920x1280) or small (800x600)

FILE OPTIONS:
    -s, --scene <PATH>      Single-shape OBJ scene
                            Default: scenes/cornellbox_original_merged.obj
    --shader <PATH>         Compute shader SPIR-V
                            Default: shaders/raytrace.comp.glsl.spv
    -o, --output <PATH>     Radiance HDR output (default: output.hdr)

    Relative scene and shader paths are searched next to the executable,
    one and two directories above it, in an 'rtquery' directory beside it,
    and finally in the current directory.

PIPELINE OPTIONS:
    --checkpoint <STAGE>    Stop after a setup stage:
                            context  create the device, then exit
                            storage  also allocate the output buffer
                            full     render and write the image (default)
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers
                            (default: enabled in debug builds)

OTHER:
    -h, --help              Print this help message

EXAMPLES:
    # Render the default scene at 1920x1280
    cargo run -p rtquery-cli --release

    # Quick small render of a custom scene
    cargo run -p rtquery-cli -- --preset small -s scenes/bunny.obj -o bunny.hdr

    # Check that the device supports ray queries
    cargo run -p rtquery-cli -- --checkpoint context

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
