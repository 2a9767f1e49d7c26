//! Engine configuration.
//!
//! Read from a YAML file such as:
//!
//! ```text
//! root_dir: /var/lib/stfl
//! config_prefix: /.config
//! delayed_writing: true
//! pretty: false
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Host directory backing `FsStorage`.
    pub root_dir: PathBuf,
    /// Storage directory holding one document per module.
    pub config_prefix: String,
    /// Whether new bindings defer writes to a batch commit.
    pub delayed_writing: bool,
    /// Pretty-print stored documents.
    pub pretty: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            root_dir: PathBuf::from("."),
            config_prefix: "/.config".into(),
            delayed_writing: true,
            pretty: false,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StateError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Load from a YAML file, or return defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| StateError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(|e| StateError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| StateError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    /// Storage path of a named module's document, e.g.
    /// `/.config/lights.json`.
    pub fn module_path(&self, module: &str) -> String {
        format!("{}/{}.json", self.config_prefix.trim_end_matches('/'), module)
    }
}
