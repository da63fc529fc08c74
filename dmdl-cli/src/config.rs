use crate::error::{AppError, Result};
use danmaku::ExportFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound on in-flight segment requests.
pub const MAX_CONCURRENCY: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub max_segments: u32,
    pub cookie_file: PathBuf,
    pub concurrency: usize,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            format: ExportFormat::Xml,
            max_segments: 10,
            cookie_file: PathBuf::from("cookie.txt"),
            concurrency: 8,
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl AppConfig {
    /// `<config dir>/dmdl/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dmdl").join("config.toml"))
    }

    fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        path.map(Path::to_path_buf).or_else(Self::default_path)
    }

    /// Load the configuration. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_path(path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.show()?)?;
        Ok(())
    }

    /// Write the defaults to the configuration file and return its path.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)
            .ok_or_else(|| AppError::Config("no configuration directory found".to_string()))?;
        Self::default().save(&path)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_segments == 0 {
            return Err(AppError::Config("max_segments must be at least 1".to_string()));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(AppError::Config(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "format = \"csv\"\nmax_segments = 3\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.format, ExportFormat::Csv);
        assert_eq!(config.max_segments, 3);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "format = \"pdf\"\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(AppError::Config(_))));

        std::fs::write(&path, "concurrency = 0\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(AppError::Config(_))));

        std::fs::write(&path, "concurrency = 3000000000000000000\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(AppError::Config(_))));

        std::fs::write(&path, "concurrency = 255\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().concurrency, 255);
    }

    #[test]
    fn reset_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let written = AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(written, path);
        let shown = std::fs::read_to_string(&path).unwrap();
        assert!(shown.contains("format = \"xml\""));
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }
}
