//! Configuration for the taskstore CLI

use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the plan document
    #[serde(default = "default_plan_path")]
    pub plan_path: PathBuf,

    /// Path to the status file
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
}

fn default_plan_path() -> PathBuf {
    PathBuf::from("plan.yml")
}

fn default_status_path() -> PathBuf {
    PathBuf::from("status.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plan_path: default_plan_path(),
            status_path: default_status_path(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("taskstore").join("config.yml")),
            Some(PathBuf::from("taskstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
