use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// One archived file: where it went and what it hashed to at archive time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub logical_path: String,
    pub checksum: String,
    pub container_path: String,
}

/// Index of the files written into one set of container (tar) files.
///
/// Built once by [`Manifest::load`] or [`Manifest::from_entries`]; there are
/// no mutators.
#[derive(Clone, Debug)]
pub struct Manifest {
    source_path: PathBuf,
    entries: HashMap<String, ManifestEntry>,
    container_paths: Vec<String>,
}

impl Manifest {
    /// Parse a serialized manifest. Files ending in `.json` hold a JSON array of
    /// entries; anything else is tab-separated
    /// `container_path<TAB>logical_path<TAB>checksum`, one entry per line.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| parse_err(path, e.to_string()))?;
        let entries = if path.extension().map(|s| s == "json").unwrap_or(false) {
            serde_json::from_str::<Vec<ManifestEntry>>(&text)
                .map_err(|e| parse_err(path, format!("read manifest json: {e}")))?
        } else {
            parse_tsv(path, &text)?
        };
        Self::from_entries(path, entries)
    }

    /// Build a manifest from entries in archive order. Duplicate logical paths
    /// are rejected.
    pub fn from_entries(
        source_path: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = ManifestEntry>,
    ) -> Result<Self> {
        let source_path = source_path.into();
        let mut map = HashMap::new();
        let mut seen = HashSet::new();
        let mut container_paths = Vec::new();
        for entry in entries {
            if seen.insert(entry.container_path.clone()) {
                container_paths.push(entry.container_path.clone());
            }
            if map.contains_key(&entry.logical_path) {
                return Err(parse_err(
                    &source_path,
                    format!("duplicate logical path {:?}", entry.logical_path),
                ));
            }
            map.insert(entry.logical_path.clone(), entry);
        }
        Ok(Self { source_path, entries: map, container_paths })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_item(&self, logical_path: &str) -> bool {
        self.entries.contains_key(logical_path)
    }

    pub fn get_item(&self, logical_path: &str) -> Result<&ManifestEntry> {
        self.entries.get(logical_path).ok_or_else(|| AuditError::NotFound {
            manifest: self.source_path.clone(),
            key: logical_path.to_string(),
        })
    }

    /// Unique container paths in the order they first appear.
    pub fn container_paths(&self) -> &[String] {
        &self.container_paths
    }
}

fn parse_tsv(path: &Path, text: &str) -> Result<Vec<ManifestEntry>> {
    let mut out = vec![];
    for (i, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 3 {
            return Err(parse_err(
                path,
                format!("line {}: expected 3 tab-separated columns, found {}", i + 1, cols.len()),
            ));
        }
        if cols.iter().any(|c| c.is_empty()) {
            return Err(parse_err(path, format!("line {}: empty field", i + 1)));
        }
        out.push(ManifestEntry {
            container_path: cols[0].to_string(),
            logical_path: cols[1].to_string(),
            checksum: cols[2].to_string(),
        });
    }
    Ok(out)
}

fn parse_err(path: &Path, reason: String) -> AuditError {
    AuditError::ManifestParse { path: path.to_path_buf(), reason }
}
