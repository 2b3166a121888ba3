use crate::checksum::Checksummer;
use crate::config::TagKeys;
use crate::error::{AuditError, Result};
use crate::remote::{RemotePath, RemoteStore};
use crate::run::RunIdentity;
use std::path::Path;

/// Result of checking one item: whether it was found, and what was wrong.
/// A present item can still carry failures.
#[derive(Debug, Default)]
pub struct ItemOutcome {
    pub present: bool,
    pub failures: Vec<AuditError>,
}

impl ItemOutcome {
    pub fn present() -> Self {
        Self { present: true, failures: vec![] }
    }

    pub fn failed(e: AuditError) -> Self {
        Self { present: false, failures: vec![e] }
    }

    pub fn is_ok(&self) -> bool {
        self.present && self.failures.is_empty()
    }
}

/// Checks remote objects against local files and run identity.
pub struct RemoteValidator<'a, S, C> {
    store: &'a S,
    checksummer: &'a C,
    identity: &'a RunIdentity,
    collection: String,
    num_replicas: usize,
    tag_keys: &'a TagKeys,
}

impl<'a, S: RemoteStore, C: Checksummer> RemoteValidator<'a, S, C> {
    pub fn new(
        store: &'a S,
        checksummer: &'a C,
        identity: &'a RunIdentity,
        dest_root: &str,
        gridion_name: &str,
        num_replicas: usize,
        tag_keys: &'a TagKeys,
    ) -> Self {
        let collection = ancillary_collection(dest_root, gridion_name, identity);
        Self { store, checksummer, identity, collection, num_replicas, tag_keys }
    }

    /// `<dest_root>/<gridion_name>/<experiment_name>/<device_id>`
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn ancillary_object(&self, local: &Path) -> RemotePath {
        let name = local.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        RemotePath::new(self.collection.clone(), name)
    }

    /// Presence, checksum metadata, recomputed checksum, replica count; in
    /// that order, stopping at the first failure.
    pub fn check_ancillary(&self, local: &Path) -> ItemOutcome {
        let obj = self.ancillary_object(local);
        match self.store.exists(&obj) {
            Ok(true) => {}
            Ok(false) => {
                return ItemOutcome::failed(AuditError::ObjectMissing { remote: obj.to_string() })
            }
            Err(e) => return ItemOutcome::failed(e),
        }
        let mut outcome = ItemOutcome::present();
        if let Err(e) = self.verify_ancillary(local, &obj) {
            outcome.failures.push(e);
        }
        outcome
    }

    fn verify_ancillary(&self, local: &Path, obj: &RemotePath) -> Result<()> {
        let remote = obj.to_string();
        if !self.store.checksum_metadata_valid(obj)? {
            return Err(AuditError::ChecksumMetadataInvalid { remote });
        }
        // Valid metadata and a matching recomputed digest are both required.
        let remote_checksum = self.store.checksum(obj)?;
        let local_checksum = self.checksummer.checksum(local)?;
        if local_checksum != remote_checksum {
            return Err(AuditError::ChecksumMismatch {
                local: local.to_path_buf(),
                remote,
                local_checksum,
                remote_checksum,
            });
        }
        let actual = self.store.valid_replica_count(obj)?;
        if actual < self.num_replicas {
            let expected = self.num_replicas;
            return Err(AuditError::InsufficientReplicas { remote, expected, actual });
        }
        Ok(())
    }

    /// Presence, then the experiment and device tags. Each tag is checked
    /// regardless of the other, so a container yields up to two tag failures.
    pub fn check_container(&self, container_path: &str) -> ItemOutcome {
        let obj = RemotePath::parse(container_path);
        let remote = obj.to_string();
        match self.store.exists(&obj) {
            Ok(true) => {}
            Ok(false) => return ItemOutcome::failed(AuditError::ObjectMissing { remote }),
            Err(e) => return ItemOutcome::failed(e),
        }
        let mut outcome = ItemOutcome::present();
        let tags = match self.store.tags(&obj) {
            Ok(t) => t,
            Err(e) => {
                outcome.failures.push(e);
                return outcome;
            }
        };
        let required = [
            (&self.tag_keys.experiment_name, self.identity.experiment_name()),
            (&self.tag_keys.device_id, self.identity.device_id()),
        ];
        for (key, expected) in required {
            if tags.has(key, expected) {
                continue;
            }
            let err = match tags.values(key) {
                None => AuditError::TagMissing {
                    remote: remote.clone(),
                    key: key.clone(),
                    expected: expected.to_string(),
                },
                Some(vs) => AuditError::TagMismatch {
                    remote: remote.clone(),
                    key: key.clone(),
                    expected: expected.to_string(),
                    actual: vs.iter().cloned().collect(),
                },
            };
            outcome.failures.push(err);
        }
        outcome
    }
}

fn ancillary_collection(dest_root: &str, gridion_name: &str, identity: &RunIdentity) -> String {
    format!(
        "{}/{}/{}/{}",
        dest_root.trim_end_matches('/'),
        gridion_name,
        identity.experiment_name(),
        identity.device_id()
    )
}
