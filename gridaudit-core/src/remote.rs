//! Read-only view of the remote repository.
//!
//! The auditor only needs a handful of queries per object, captured by
//! [`RemoteStore`]. [`SnapshotStore`] answers them from an exported JSON
//! description of a collection, or from objects added in code.

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Tag holding the checksum the repository recorded for an object.
pub const CHECKSUM_TAG: &str = "md5";

/// A data object addressed by collection and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath {
    collection: String,
    name: String,
}

impl RemotePath {
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        let collection = collection.into();
        let collection = match collection.trim_end_matches('/') {
            "" if collection.starts_with('/') => "/".to_string(),
            c => c.to_string(),
        };
        Self { collection, name: name.into() }
    }

    /// Split a full object path at its last `/`.
    pub fn parse(path: &str) -> Self {
        match path.rsplit_once('/') {
            Some(("", name)) => Self::new("/", name),
            Some((coll, name)) => Self::new(coll, name),
            None => Self::new("", path),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.collection.as_str() {
            "" => write!(f, "{}", self.name),
            "/" => write!(f, "/{}", self.name),
            c => write!(f, "{}/{}", c, self.name),
        }
    }
}

/// Key/value tags of an object. A key may carry several values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, BTreeSet<String>>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().insert(value.into());
    }

    pub fn values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn has(&self, key: &str, value: &str) -> bool {
        self.0.get(key).map(|vs| vs.contains(value)).unwrap_or(false)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut t = Tags::new();
        for (k, v) in iter {
            t.insert(k, v);
        }
        t
    }
}

/// Queries the auditor issues against the remote repository.
pub trait RemoteStore: Send + Sync {
    fn exists(&self, obj: &RemotePath) -> Result<bool>;
    fn checksum(&self, obj: &RemotePath) -> Result<String>;
    /// Whether the repository considers its own checksum metadata consistent.
    fn checksum_metadata_valid(&self, obj: &RemotePath) -> Result<bool>;
    /// Replicas the repository itself considers valid.
    fn valid_replica_count(&self, obj: &RemotePath) -> Result<usize>;
    fn tags(&self, obj: &RemotePath) -> Result<Tags>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Replica {
    pub number: u32,
    #[serde(default)]
    pub checksum: Option<String>,
    pub valid: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagRecord {
    pub attribute: String,
    pub value: String,
}

/// One object as exported from the repository.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub path: String,
    pub checksum: String,
    #[serde(default)]
    pub replicas: Vec<Replica>,
    #[serde(default)]
    pub tags: Vec<TagRecord>,
}

impl ObjectRecord {
    /// An object with `replicas` valid replicas and checksum metadata that
    /// agrees with `checksum`.
    pub fn consistent(path: &str, checksum: &str, replicas: u32) -> Self {
        Self {
            path: path.to_string(),
            checksum: checksum.to_string(),
            replicas: (0..replicas)
                .map(|number| Replica { number, checksum: Some(checksum.to_string()), valid: true })
                .collect(),
            tags: vec![TagRecord { attribute: CHECKSUM_TAG.into(), value: checksum.into() }],
        }
    }

    pub fn with_tag(mut self, attribute: &str, value: &str) -> Self {
        self.tags.push(TagRecord { attribute: attribute.into(), value: value.into() });
        self
    }

    fn tag_map(&self) -> Tags {
        self.tags.iter().map(|t| (t.attribute.as_str(), t.value.as_str())).collect()
    }

    /// The checksum tag is single-valued and equal to the stored checksum, and
    /// no valid replica disagrees with it.
    fn checksum_metadata_valid(&self) -> bool {
        let tagged = match self.tag_map().values(CHECKSUM_TAG) {
            Some(vs) if vs.len() == 1 => vs.iter().next() == Some(&self.checksum),
            _ => false,
        };
        tagged
            && self
                .replicas
                .iter()
                .filter(|r| r.valid)
                .all(|r| r.checksum.as_ref().map(|c| c == &self.checksum).unwrap_or(true))
    }
}

#[derive(Serialize, Deserialize, Default)]
struct SnapshotFile {
    #[serde(default)]
    objects: Vec<ObjectRecord>,
}

/// In-memory remote store keyed by full object path.
#[derive(Clone, Debug, Default)]
pub struct SnapshotStore {
    objects: HashMap<String, ObjectRecord>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"objects": [...]}` exported from the repository. A later record
    /// for the same path replaces an earlier one.
    pub fn load(path: &Path) -> Result<Self> {
        let snap_err = |reason: String| AuditError::Snapshot { path: path.to_path_buf(), reason };
        let f = File::open(path).map_err(|e| snap_err(e.to_string()))?;
        let snap: SnapshotFile = serde_json::from_reader(std::io::BufReader::new(f))
            .map_err(|e| snap_err(e.to_string()))?;
        let mut store = Self::new();
        for obj in snap.objects {
            store.insert(obj);
        }
        Ok(store)
    }

    pub fn insert(&mut self, obj: ObjectRecord) {
        let key = RemotePath::parse(&obj.path).to_string();
        self.objects.insert(key, obj);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn get(&self, obj: &RemotePath) -> Result<&ObjectRecord> {
        self.objects.get(&obj.to_string()).ok_or_else(|| AuditError::ObjectMissing {
            remote: obj.to_string(),
        })
    }
}

impl RemoteStore for SnapshotStore {
    fn exists(&self, obj: &RemotePath) -> Result<bool> {
        Ok(self.objects.contains_key(&obj.to_string()))
    }

    fn checksum(&self, obj: &RemotePath) -> Result<String> {
        Ok(self.get(obj)?.checksum.clone())
    }

    fn checksum_metadata_valid(&self, obj: &RemotePath) -> Result<bool> {
        Ok(self.get(obj)?.checksum_metadata_valid())
    }

    fn valid_replica_count(&self, obj: &RemotePath) -> Result<usize> {
        Ok(self.get(obj)?.replicas.iter().filter(|r| r.valid).count())
    }

    fn tags(&self, obj: &RemotePath) -> Result<Tags> {
        Ok(self.get(obj)?.tag_map())
    }
}
