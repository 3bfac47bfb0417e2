//! Config store for loading chainplan.toml.

use std::path::{Path, PathBuf};

use super::{ChainplanConfig, parser};

pub const CONFIG_FILE_NAME: &str = "chainplan.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    global_path: Option<PathBuf>,
    project_path: PathBuf,
}

impl ConfigStore {
    /// Project file in the current directory over the user-level file.
    pub fn from_defaults() -> anyhow::Result<Self> {
        let global_dir = dirs::config_dir().map(|dir| dir.join("chainplan"));
        let project_root = std::env::current_dir()?;
        Ok(Self {
            global_path: global_dir.map(|dir| dir.join(CONFIG_FILE_NAME)),
            project_path: project_root.join(CONFIG_FILE_NAME),
        })
    }

    pub fn from_paths(global_dir: Option<PathBuf>, project_root: &Path) -> Self {
        Self {
            global_path: global_dir.map(|dir| dir.join(CONFIG_FILE_NAME)),
            project_path: project_root.join(CONFIG_FILE_NAME),
        }
    }

    /// Store reading exactly one file.
    pub fn from_file(path: PathBuf) -> Self {
        Self {
            global_path: None,
            project_path: path,
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Load and merge the layers that exist; missing files are empty.
    pub fn load(&self) -> anyhow::Result<ChainplanConfig> {
        let mut merged = ChainplanConfig::new();
        if let Some(global) = &self.global_path
            && global.exists()
        {
            merged.merge(parser::parse_config_toml(global)?);
        }
        if self.project_path.exists() {
            merged.merge(parser::parse_config_toml(&self.project_path)?);
        }
        Ok(merged)
    }
}
