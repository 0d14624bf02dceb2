//! Asset lookup across a list of search directories.
//!
//! Scenes and shader binaries are located relative to the executable so the
//! binary works both from `target/<profile>/` and from an installed layout.

use std::path::{Path, PathBuf};

use crate::constants::PROJECT_NAME;
use crate::error::{Error, Result};

/// Ordered list of directories searched for assets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    /// Create an empty search list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard search list for an executable at `exe_path`:
    /// its directory, the two parent levels above it, the project directory
    /// next to it, and finally the current working directory.
    pub fn for_executable(exe_path: impl AsRef<Path>) -> Self {
        let exe_dir = exe_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut paths = Self::new()
            .with_dir(exe_dir.clone())
            .with_dir(exe_dir.join(".."))
            .with_dir(exe_dir.join("..").join(".."))
            .with_dir(exe_dir.join(PROJECT_NAME));

        if let Ok(cwd) = std::env::current_dir() {
            paths = paths.with_dir(cwd);
        }
        paths
    }

    /// Standard search list for the running executable.
    pub fn from_current_exe() -> Self {
        match std::env::current_exe() {
            Ok(exe) => Self::for_executable(exe),
            Err(e) => {
                tracing::warn!("Could not resolve executable path: {e}");
                Self::for_executable(PathBuf::from("."))
            }
        }
    }

    /// Append a directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    /// Prepend a directory so it is searched first.
    pub fn with_priority_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.insert(0, dir.into());
        self
    }

    /// The directories in search order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Find `name` in the first directory that contains it.
    ///
    /// Absolute paths are returned as-is if they exist.
    pub fn find(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        let name = name.as_ref();

        if name.is_absolute() {
            if name.is_file() {
                return Ok(name.to_path_buf());
            }
            return Err(Error::NotFound {
                name: name.display().to_string(),
                searched: Vec::new(),
            });
        }

        for dir in &self.dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                tracing::debug!("Resolved {} -> {}", name.display(), candidate.display());
                return Ok(candidate);
            }
        }

        Err(Error::NotFound {
            name: name.display().to_string(),
            searched: self.dirs.clone(),
        })
    }

    /// Find and read `name` as bytes.
    pub fn load(&self, name: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.find(name)?;
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn executable_layout() {
        let paths = SearchPaths::for_executable("/opt/app/bin/rtquery");
        let dirs = paths.dirs();
        assert_eq!(dirs[0], PathBuf::from("/opt/app/bin"));
        assert_eq!(dirs[1], PathBuf::from("/opt/app/bin/.."));
        assert_eq!(dirs[2], PathBuf::from("/opt/app/bin/../.."));
        assert_eq!(dirs[3], PathBuf::from("/opt/app/bin").join(PROJECT_NAME));
    }

    #[test]
    fn first_match_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::create_dir_all(a.path().join("scenes")).unwrap();
        fs::create_dir_all(b.path().join("scenes")).unwrap();
        fs::write(a.path().join("scenes/box.obj"), "a").unwrap();
        fs::write(b.path().join("scenes/box.obj"), "b").unwrap();

        let paths = SearchPaths::new().with_dir(b.path()).with_dir(a.path());
        assert_eq!(paths.load("scenes/box.obj").unwrap(), b"b");

        let paths = paths.with_priority_dir(a.path());
        assert_eq!(paths.load("scenes/box.obj").unwrap(), b"a");
    }

    #[test]
    fn missing_file_lists_searched_dirs() {
        let a = tempfile::tempdir().unwrap();
        let paths = SearchPaths::new().with_dir(a.path());

        match paths.find("shaders/missing.spv") {
            Err(Error::NotFound { name, searched }) => {
                assert_eq!(name, "shaders/missing.spv");
                assert_eq!(searched, vec![a.path().to_path_buf()]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn directories_are_not_files() {
        let a = tempfile::tempdir().unwrap();
        fs::create_dir_all(a.path().join("scenes")).unwrap();
        let paths = SearchPaths::new().with_dir(a.path());
        assert!(paths.find("scenes").is_err());
    }

    #[test]
    fn absolute_paths_bypass_search() {
        let a = tempfile::tempdir().unwrap();
        let file = a.path().join("mesh.obj");
        fs::write(&file, "v 0 0 0").unwrap();
        assert_eq!(SearchPaths::new().find(&file).unwrap(), file);
    }
}
