//! Audit settings.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file is valid. Callers override individual fields afterwards.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{AuditError, Result};
use crate::run::RunLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Root collection under which runs are archived
    #[serde(default = "default_dest_root")]
    pub dest_root: String,

    /// Instrument name, the collection level below `dest_root`
    #[serde(default = "default_gridion_name")]
    pub gridion_name: String,

    /// Minimum number of valid replicas per ancillary object
    #[serde(default = "default_num_replicas")]
    pub num_replicas: usize,

    /// Suffix archived entries may carry when stored compressed
    #[serde(default = "default_compressed_suffix")]
    pub compressed_suffix: String,

    /// Digest used for manifest checksums in membership checks
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,

    /// Digest the remote store records; ancillary files are recomputed with it
    #[serde(default)]
    pub remote_checksum: ChecksumAlgorithm,

    /// Items between progress log lines in membership checks
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Per-item worker threads; 1 checks sequentially
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub tags: TagKeys,

    #[serde(default)]
    pub layout: RunLayout,
}

/// Tag keys carrying run provenance on container objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagKeys {
    #[serde(default = "default_experiment_tag")]
    pub experiment_name: String,
    #[serde(default = "default_device_tag")]
    pub device_id: String,
}

fn default_dest_root() -> String {
    "/seq/ont/gridion".to_string()
}

fn default_gridion_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "gridion".to_string())
}

fn default_num_replicas() -> usize {
    2
}

fn default_compressed_suffix() -> String {
    ".bz2".to_string()
}

fn default_progress_interval() -> usize {
    10_000
}

fn default_workers() -> usize {
    1
}

fn default_experiment_tag() -> String {
    "experiment_name".to_string()
}

fn default_device_tag() -> String {
    "device_id".to_string()
}

impl Default for TagKeys {
    fn default() -> Self {
        Self { experiment_name: default_experiment_tag(), device_id: default_device_tag() }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            dest_root: default_dest_root(),
            gridion_name: default_gridion_name(),
            num_replicas: default_num_replicas(),
            compressed_suffix: default_compressed_suffix(),
            checksum: ChecksumAlgorithm::default(),
            remote_checksum: ChecksumAlgorithm::default(),
            progress_interval: default_progress_interval(),
            workers: default_workers(),
            tags: TagKeys::default(),
            layout: RunLayout::default(),
        }
    }
}

impl AuditSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("read {}: {e}", path.display())))?;
        let settings: AuditSettings = toml::from_str(&content)
            .map_err(|e| AuditError::Config(format!("parse {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dest_root.trim_end_matches('/').is_empty() {
            return Err(AuditError::Config("dest_root must name a collection".into()));
        }
        if self.gridion_name.is_empty() || self.gridion_name.contains('/') {
            return Err(AuditError::Config(format!("bad gridion_name {:?}", self.gridion_name)));
        }
        if self.num_replicas == 0 {
            return Err(AuditError::Config("num_replicas must be at least 1".into()));
        }
        if self.progress_interval == 0 {
            return Err(AuditError::Config("progress_interval must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(AuditError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}
