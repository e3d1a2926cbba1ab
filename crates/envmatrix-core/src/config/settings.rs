//! Cache location settings.
//!
//! The cache root holds the base virtualenvs, the package-specific
//! installation layers and the compiled requirements files. It is shared
//! mutable state owned by a single process for the duration of a run.

use std::path::{Path, PathBuf};

/// Env var overriding the cache root (default `.envmatrix`).
pub const ENVMATRIX_BASE_PATH: &str = "ENVMATRIX_BASE_PATH";
/// Env var overriding the base venv directory prefix (default `venv_py`).
pub const ENVMATRIX_VENV_PREFIX: &str = "ENVMATRIX_VENV_PREFIX";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Cache root, e.g. `.envmatrix`.
    pub base_path: PathBuf,
    /// Directory name prefix for base venvs, e.g. `venv_py` -> `venv_py3112`.
    pub venv_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(".envmatrix"),
            venv_prefix: "venv_py".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(path) = std::env::var(ENVMATRIX_BASE_PATH) {
            if !path.is_empty() {
                settings.base_path = PathBuf::from(path);
            }
        }
        if let Ok(prefix) = std::env::var(ENVMATRIX_VENV_PREFIX) {
            if !prefix.is_empty() {
                settings.venv_prefix = prefix;
            }
        }
        settings
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Directory holding the `<short>.in` / `<short>.txt` lockfile pairs.
    pub fn requirements_dir(&self) -> PathBuf {
        self.base_path.join("requirements")
    }

    /// Absolute form of the cache root (base venv paths are absolute so
    /// activation works from any working directory).
    pub fn absolute_base_path(&self) -> PathBuf {
        absolute(&self.base_path)
    }
}

/// Make a path absolute against the current working directory without
/// touching the filesystem (the path may not exist yet).
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.base_path, PathBuf::from(".envmatrix"));
        assert_eq!(settings.venv_prefix, "venv_py");
        assert_eq!(
            settings.requirements_dir(),
            PathBuf::from(".envmatrix/requirements")
        );
    }

    #[test]
    fn test_absolute_base_path_is_absolute() {
        let settings = Settings::default();
        assert!(settings.absolute_base_path().is_absolute());
    }
}
