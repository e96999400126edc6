//! Layer keys of the last successful build, kept in `.berth/layers.json`.
//!
//! The engine owns the real layer cache; the ledger only lets `berth plan`
//! predict which layers the next build will reuse.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plan::ImagePlan;

const LEDGER_FILE: &str = "layers.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLedger {
    /// Image tag the keys were recorded for
    pub image: String,
    /// Cache keys, bottom layer first
    pub layers: Vec<String>,
}

impl CacheLedger {
    pub fn from_plan(image: &str, plan: &ImagePlan) -> Self {
        Self {
            image: image.to_owned(),
            layers: plan.layers().iter().map(|l| l.cache_key.clone()).collect(),
        }
    }

    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(".berth").join(LEDGER_FILE)
    }

    /// Load the ledger, or `None` if no build has been recorded yet.
    pub fn load(project_dir: &Path) -> Result<Option<Self>, LedgerError> {
        let path = Self::path(project_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| LedgerError::Read {
            path: path.clone(),
            source: e,
        })?;
        let ledger = serde_json::from_str(&content)
            .map_err(|e| LedgerError::Parse { path, source: e })?;
        Ok(Some(ledger))
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), LedgerError> {
        let path = Self::path(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| LedgerError::Parse {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, content).map_err(|e| LedgerError::Write { path, source: e })?;
        Ok(())
    }

    /// Removes the ledger file if present.
    pub fn clear(project_dir: &Path) -> Result<bool, LedgerError> {
        let path = Self::path(project_dir);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| LedgerError::Write { path, source: e })?;
        Ok(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read layer ledger at {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write layer ledger at {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("layer ledger at {path} is malformed")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
