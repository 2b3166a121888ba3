//! Error taxonomy for the audit.
//!
//! Item-scoped variants are caught at the item boundary by the auditor and
//! counted; the rest abort the check that raised them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to parse manifest {path:?}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("{key:?} not found in manifest {manifest:?}")]
    NotFound { manifest: PathBuf, key: String },

    #[error("remote object {remote} is missing")]
    ObjectMissing { remote: String },

    #[error("checksum metadata of remote object {remote} is not valid")]
    ChecksumMetadataInvalid { remote: String },

    #[error(
        "checksum mismatch for {local:?} against {remote}: \
         local {local_checksum}, remote {remote_checksum}"
    )]
    ChecksumMismatch {
        local: PathBuf,
        remote: String,
        local_checksum: String,
        remote_checksum: String,
    },

    #[error("remote object {remote} has {actual} valid replicas, expected at least {expected}")]
    InsufficientReplicas { remote: String, expected: usize, actual: usize },

    #[error(
        "{local:?} (checksum {checksum}) not found in any manifest; probed {candidates:?}{}",
        mismatch_note(.mismatched)
    )]
    ManifestEntryMissing {
        local: PathBuf,
        checksum: String,
        candidates: Vec<String>,
        /// Candidates that were present in a manifest with a different checksum.
        mismatched: Vec<String>,
    },

    #[error("remote object {remote} has no {key:?} tag, expected {expected:?}")]
    TagMissing { remote: String, key: String, expected: String },

    #[error("remote object {remote} tag {key:?} is {actual:?}, expected {expected:?}")]
    TagMismatch { remote: String, key: String, expected: String, actual: Vec<String> },

    #[error("failed to compute checksum of {path:?}: {source}")]
    ChecksumCompute {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{local:?} is not under source directory {source_dir:?}")]
    PathOutsideSource { local: PathBuf, source_dir: PathBuf },

    #[error("remote query for {remote} failed: {reason}")]
    Remote { remote: String, reason: String },

    #[error("invalid source directory {path:?}: {reason}")]
    SourceDir { path: PathBuf, reason: String },

    #[error("failed to list run files under {path:?}: {reason}")]
    RunListing { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load remote snapshot {path:?}: {reason}")]
    Snapshot { path: PathBuf, reason: String },
}

fn mismatch_note(mismatched: &[String]) -> String {
    if mismatched.is_empty() {
        String::new()
    } else {
        format!("; present with a different checksum: {mismatched:?}")
    }
}

impl AuditError {
    /// Stable machine-readable name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::ManifestParse { .. } => "manifest_parse",
            AuditError::NotFound { .. } => "not_found",
            AuditError::ObjectMissing { .. } => "object_missing",
            AuditError::ChecksumMetadataInvalid { .. } => "checksum_metadata_invalid",
            AuditError::ChecksumMismatch { .. } => "checksum_mismatch",
            AuditError::InsufficientReplicas { .. } => "insufficient_replicas",
            AuditError::ManifestEntryMissing { .. } => "manifest_entry_missing",
            AuditError::TagMissing { .. } => "tag_missing",
            AuditError::TagMismatch { .. } => "tag_mismatch",
            AuditError::ChecksumCompute { .. } => "checksum_compute",
            AuditError::PathOutsideSource { .. } => "path_outside_source",
            AuditError::Remote { .. } => "remote",
            AuditError::SourceDir { .. } => "source_dir",
            AuditError::RunListing { .. } => "run_listing",
            AuditError::Config(_) => "config",
            AuditError::Snapshot { .. } => "snapshot",
        }
    }

    /// True for failures that concern a single item and must not abort a check.
    pub fn is_item_scoped(&self) -> bool {
        !matches!(
            self,
            AuditError::ManifestParse { .. }
                | AuditError::SourceDir { .. }
                | AuditError::RunListing { .. }
                | AuditError::Config(_)
                | AuditError::Snapshot { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
