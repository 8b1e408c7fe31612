use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Runtime configuration shared by every component.
///
/// Built once in `main` and handed to the storage layer, the reader and the
/// dispatcher, so tests can point each instance at its own directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding uploads, metadata sidecars and rendered plots
    pub data_dir: PathBuf,
    /// Address the TCP transport binds to
    pub listen: String,
    /// Defaults applied when a plot request omits its options
    pub plot: PlotDefaults,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlotDefaults {
    pub width: u32,
    pub height: u32,
    pub bins: usize,
}

impl Default for PlotDefaults {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            bins: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            listen: Self::DEFAULT_LISTEN.to_string(),
            plot: PlotDefaults::default(),
        }
    }
}

impl ServerConfig {
    pub const DEFAULT_DATA_DIR: &'static str = "/data/uploads";
    pub const DEFAULT_LISTEN: &'static str = "0.0.0.0:8080";

    /// Configuration rooted at an explicit data directory
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a YAML configuration file. Missing keys fall back to defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig = serde_yaml::from_str(&yaml_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// Precedence: command line / environment, then the YAML file, then defaults.
    pub fn load(
        config_path: Option<&Path>,
        data_dir: Option<PathBuf>,
        listen: Option<String>,
    ) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };

        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }
        if let Some(addr) = listen {
            config.listen = addr;
        }

        info!("📁 Data directory: {}", config.data_dir.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/data/uploads"));
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.plot.bins, 10);
    }

    #[test]
    fn test_yaml_partial_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheetstat.yaml");
        std::fs::write(&path, "data_dir: /srv/datasets\nplot:\n  bins: 25\n").unwrap();

        let config = ServerConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/datasets"));
        assert_eq!(config.listen, ServerConfig::DEFAULT_LISTEN);
        assert_eq!(config.plot.bins, 25);
        assert_eq!(config.plot.width, 640);
    }

    #[test]
    fn test_cli_values_win_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheetstat.yaml");
        std::fs::write(&path, "data_dir: /srv/datasets\nlisten: 127.0.0.1:9000\n").unwrap();

        let config = ServerConfig::load(
            Some(&path),
            Some(PathBuf::from("/tmp/override")),
            None,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
        assert_eq!(config.listen, "127.0.0.1:9000");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ServerConfig::from_yaml_file(Path::new("/nonexistent/sheetstat.yaml"));
        assert!(result.is_err());
    }
}
