//! Render configuration and command line parsing.

use std::path::PathBuf;
use std::str::FromStr;

use rtquery_core::constants::{
    DEFAULT_HEIGHT, DEFAULT_OUTPUT, DEFAULT_SCENE, DEFAULT_SHADER, DEFAULT_WIDTH, PROJECT_NAME,
};
use rtquery_core::SearchPaths;
use thiserror::Error;

/// How far the pipeline runs before tearing down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Checkpoint {
    /// Create the device context, then stop.
    Context,
    /// Also allocate the output storage buffer, then stop.
    Storage,
    /// Render and write the image.
    #[default]
    Full,
}

impl FromStr for Checkpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context" => Ok(Self::Context),
            "storage" => Ok(Self::Storage),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::InvalidValue {
                flag: "--checkpoint".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Named render resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 1920x1280
    Hd,
    /// 800x600
    Small,
}

impl Preset {
    /// Width and height in pixels.
    pub const fn size(self) -> (u32, u32) {
        match self {
            Self::Hd => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
            Self::Small => (800, 600),
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hd" => Ok(Self::Hd),
            "small" => Ok(Self::Small),
            _ => Err(ConfigError::InvalidValue {
                flag: "--preset".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Errors from command line parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("Invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("Unknown argument {0:?}")]
    UnknownArgument(String),

    #[error("Image size {width}x{height} must be non-zero")]
    ZeroSize { width: u32, height: u32 },
}

/// Everything a headless render needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    pub app_name: String,
    pub width: u32,
    pub height: u32,
    /// Scene file, relative to a search path or absolute.
    pub scene: PathBuf,
    /// SPIR-V file, relative to a search path or absolute.
    pub shader: PathBuf,
    /// Output HDR file.
    pub output: PathBuf,
    pub search_paths: SearchPaths,
    pub validation: bool,
    pub checkpoint: Checkpoint,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: PROJECT_NAME.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            scene: PathBuf::from(DEFAULT_SCENE),
            shader: PathBuf::from(DEFAULT_SHADER),
            output: PathBuf::from(DEFAULT_OUTPUT),
            search_paths: SearchPaths::from_current_exe(),
            validation: cfg!(debug_assertions),
            checkpoint: Checkpoint::Full,
        }
    }
}

impl RenderConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the image size.
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Use a preset image size.
    pub const fn with_preset(self, preset: Preset) -> Self {
        let (width, height) = preset.size();
        self.with_size(width, height)
    }

    /// Set the scene file.
    pub fn with_scene(mut self, scene: impl Into<PathBuf>) -> Self {
        self.scene = scene.into();
        self
    }

    /// Set the shader binary.
    pub fn with_shader(mut self, shader: impl Into<PathBuf>) -> Self {
        self.shader = shader.into();
        self
    }

    /// Set the output file.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Replace the asset search paths.
    pub fn with_search_paths(mut self, search_paths: SearchPaths) -> Self {
        self.search_paths = search_paths;
        self
    }

    /// Enable or disable validation layers.
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Stop after the given checkpoint.
    pub const fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Set the application name reported to Vulkan.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Parse from command line arguments.
    pub fn from_args() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments; `args[0]` is the program name.
    ///
    /// Recognizes:
    /// - `-W` or `--width <N>`, `-H` or `--height <N>`
    /// - `--preset hd|small`
    /// - `-s` or `--scene <PATH>`
    /// - `--shader <PATH>`
    /// - `-o` or `--output <PATH>`
    /// - `--checkpoint context|storage|full`
    /// - `--validation`, `--no-validation`
    ///
    /// `-h`/`--help` is left to the caller.
    pub fn parse_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };
            match flag {
                "-W" | "--width" => config.width = parse_number(flag, value()?)?,
                "-H" | "--height" => config.height = parse_number(flag, value()?)?,
                "--preset" => config = config.with_preset(value()?.parse()?),
                "-s" | "--scene" => config.scene = PathBuf::from(value()?),
                "--shader" => config.shader = PathBuf::from(value()?),
                "-o" | "--output" => config.output = PathBuf::from(value()?),
                "--checkpoint" => config.checkpoint = value()?.parse()?,
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                "-h" | "--help" => {}
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject sizes the pipeline cannot render.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

fn parse_number(flag: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("rtquery")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults() {
        let config = RenderConfig::parse_args(&args(&[])).unwrap();
        assert_eq!((config.width, config.height), (1920, 1280));
        assert_eq!(config.scene, PathBuf::from(DEFAULT_SCENE));
        assert_eq!(config.shader, PathBuf::from(DEFAULT_SHADER));
        assert_eq!(config.output, PathBuf::from("output.hdr"));
        assert_eq!(config.checkpoint, Checkpoint::Full);
    }

    #[test]
    fn explicit_size() {
        let config = RenderConfig::parse_args(&args(&["-W", "640", "--height", "480"])).unwrap();
        assert_eq!((config.width, config.height), (640, 480));
    }

    #[test]
    fn small_preset() {
        let config = RenderConfig::parse_args(&args(&["--preset", "small"])).unwrap();
        assert_eq!((config.width, config.height), (800, 600));
    }

    #[test]
    fn later_flags_override_preset() {
        let config =
            RenderConfig::parse_args(&args(&["--preset", "small", "--width", "1024"])).unwrap();
        assert_eq!((config.width, config.height), (1024, 600));
    }

    #[test]
    fn paths_and_flags() {
        let config = RenderConfig::parse_args(&args(&[
            "-s",
            "scenes/box.obj",
            "--shader",
            "custom.spv",
            "-o",
            "out/render.hdr",
            "--checkpoint",
            "storage",
            "--no-validation",
        ]))
        .unwrap();
        assert_eq!(config.scene, PathBuf::from("scenes/box.obj"));
        assert_eq!(config.shader, PathBuf::from("custom.spv"));
        assert_eq!(config.output, PathBuf::from("out/render.hdr"));
        assert_eq!(config.checkpoint, Checkpoint::Storage);
        assert!(!config.validation);

        let config = RenderConfig::parse_args(&args(&["--validation"])).unwrap();
        assert!(config.validation);
    }

    #[test]
    fn missing_value() {
        assert_eq!(
            RenderConfig::parse_args(&args(&["--width"])),
            Err(ConfigError::MissingValue("--width".to_string()))
        );
    }

    #[test]
    fn bad_values() {
        assert!(matches!(
            RenderConfig::parse_args(&args(&["--width", "wide"])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            RenderConfig::parse_args(&args(&["--preset", "4k"])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            RenderConfig::parse_args(&args(&["--checkpoint", "half"])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            RenderConfig::parse_args(&args(&["--height", "0"])),
            Err(ConfigError::ZeroSize {
                width: 1920,
                height: 0
            })
        );
    }

    #[test]
    fn unknown_argument() {
        assert_eq!(
            RenderConfig::parse_args(&args(&["--frobnicate"])),
            Err(ConfigError::UnknownArgument("--frobnicate".to_string()))
        );
    }

    #[test]
    fn checkpoints_are_ordered() {
        assert!(Checkpoint::Context < Checkpoint::Storage);
        assert!(Checkpoint::Storage < Checkpoint::Full);
    }
}
