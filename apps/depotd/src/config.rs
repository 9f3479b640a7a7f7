//! Daemon configuration: TOML file named on the command line.

use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_log_level() -> String {
    "info".into()
}

/// On-disk configuration format.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Flat storage folder served by the depot.
    pub folder: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Loads and parses the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Validates the loaded configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("config: host is required");
        }
        if self.port < 10 {
            anyhow::bail!("config: port must be at least 10");
        }
        if self.folder.as_os_str().is_empty() {
            anyhow::bail!("config: folder is required");
        }
        if !self.folder.is_dir() {
            anyhow::bail!(
                "config: folder {} does not exist or is not a directory",
                self.folder.display()
            );
        }
        Ok(())
    }
}
