//! Run-level audit: every category of a run checked against its manifests and
//! the remote store, with failures tallied per item instead of aborting.

use crate::checksum::{ChecksumAlgorithm, Checksummer};
use crate::config::AuditSettings;
use crate::error::{AuditError, Result};
use crate::manifest::Manifest;
use crate::progress::Progress;
use crate::reconcile::PathReconciler;
use crate::remote::RemoteStore;
use crate::run::{RunFiles, RunIdentity};
use crate::validate::{ItemOutcome, RemoteValidator};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Config,
    SequencingSummary,
    Manifest,
    RawSignalContainer,
    ReadContainer,
    RawSignalMembership,
    ReadMembership,
}

impl Category {
    /// Order in which a full audit runs the checks.
    pub const ALL: [Category; 7] = [
        Category::Config,
        Category::SequencingSummary,
        Category::Manifest,
        Category::RawSignalContainer,
        Category::ReadContainer,
        Category::RawSignalMembership,
        Category::ReadMembership,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Config => "config",
            Category::SequencingSummary => "sequencing_summary",
            Category::Manifest => "manifest",
            Category::RawSignalContainer => "raw_signal_container",
            Category::ReadContainer => "read_container",
            Category::RawSignalMembership => "raw_signal_membership",
            Category::ReadMembership => "read_membership",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AuditError::Config(format!("unknown category {s:?}")))
    }
}

/// Items looked at, items found, and failed verifications. An item that was
/// found can still have failed, so `errors` is not `examined - present`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub examined: usize,
    pub present: usize,
    pub errors: usize,
}

impl CheckCounts {
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.examined, self.present, self.errors)
    }
}

impl std::ops::AddAssign for CheckCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.examined += rhs.examined;
        self.present += rhs.present;
        self.errors += rhs.errors;
    }
}

/// One failed verification of one item (a local path or a remote path).
#[derive(Debug)]
pub struct ItemFailure {
    pub category: Category,
    pub item: String,
    pub error: AuditError,
}

impl Serialize for ItemFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ItemFailure", 4)?;
        s.serialize_field("category", &self.category)?;
        s.serialize_field("item", &self.item)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.end()
    }
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub category: Category,
    pub counts: CheckCounts,
    pub failures: Vec<ItemFailure>,
}

impl CheckReport {
    fn new(category: Category) -> Self {
        Self { category, counts: CheckCounts::default(), failures: vec![] }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub experiment_name: String,
    pub device_id: String,
    pub source_dir: PathBuf,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    pub checks: Vec<CheckReport>,
    pub totals: CheckCounts,
}

impl AuditReport {
    pub fn totals(&self) -> CheckCounts {
        self.totals
    }

    pub fn is_clean(&self) -> bool {
        self.totals.errors == 0
    }

    pub fn check(&self, category: Category) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.category == category)
    }
}

/// Audits one run directory.
///
/// The run model, remote store and checksum capability are injected; the
/// auditor owns them for its lifetime. The injected checksummer computes
/// membership digests; ancillary files are compared with the store using
/// `settings.remote_checksum`. Manifests are parsed once and cached,
/// so the container and membership checks of a category share them.
pub struct Auditor<R, S, C> {
    identity: RunIdentity,
    settings: AuditSettings,
    run: R,
    store: S,
    checksummer: C,
    reconciler: PathReconciler,
    manifests: Mutex<HashMap<PathBuf, Arc<Manifest>>>,
    pool: Option<rayon::ThreadPool>,
}

impl<R: RunFiles, S: RemoteStore, C: Checksummer> Auditor<R, S, C> {
    pub fn new(
        identity: RunIdentity,
        settings: AuditSettings,
        run: R,
        store: S,
        checksummer: C,
    ) -> Result<Self> {
        settings.validate()?;
        let pool = if settings.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(settings.workers)
                .build()
                .map_err(|e| AuditError::Config(format!("worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        let reconciler = PathReconciler::new(&identity, &settings.compressed_suffix);
        Ok(Self {
            identity,
            settings,
            run,
            store,
            checksummer,
            reconciler,
            manifests: Mutex::new(HashMap::new()),
            pool,
        })
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn source_dir(&self) -> &Path {
        self.identity.source_dir()
    }

    pub fn experiment_name(&self) -> &str {
        self.identity.experiment_name()
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    pub fn run(&self) -> &R {
        &self.run
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    /// Run every check in [`Category::ALL`] order. Only faults outside a single
    /// item (unreadable manifest, failed listing) stop the audit.
    pub fn check_all_files(&self) -> Result<AuditReport> {
        self.check_categories(&Category::ALL)
    }

    /// Partial audit: the given checks, in the given order.
    pub fn check_categories(&self, categories: &[Category]) -> Result<AuditReport> {
        let started_utc = Utc::now();
        let mut checks = Vec::with_capacity(categories.len());
        let mut totals = CheckCounts::default();
        for &category in categories {
            let report = self.check(category)?;
            totals += report.counts;
            checks.push(report);
        }
        info!(
            experiment = self.experiment_name(),
            device = self.device_id(),
            examined = totals.examined,
            present = totals.present,
            errors = totals.errors,
            "audit finished"
        );
        Ok(AuditReport {
            experiment_name: self.experiment_name().to_string(),
            device_id: self.device_id().to_string(),
            source_dir: self.source_dir().to_path_buf(),
            started_utc,
            finished_utc: Utc::now(),
            checks,
            totals,
        })
    }

    pub fn check(&self, category: Category) -> Result<CheckReport> {
        match category {
            Category::Config => self.check_config_files(),
            Category::SequencingSummary => self.check_summary_files(),
            Category::Manifest => self.check_manifest_files(),
            Category::RawSignalContainer => self.check_raw_signal_container_files(),
            Category::ReadContainer => self.check_read_container_files(),
            Category::RawSignalMembership => self.check_raw_signal_files(),
            Category::ReadMembership => self.check_read_files(),
        }
    }

    pub fn check_config_files(&self) -> Result<CheckReport> {
        let files = self.run.config_files()?;
        Ok(self.check_ancillary(Category::Config, &files))
    }

    pub fn check_summary_files(&self) -> Result<CheckReport> {
        let files = self.run.summary_files()?;
        Ok(self.check_ancillary(Category::SequencingSummary, &files))
    }

    pub fn check_manifest_files(&self) -> Result<CheckReport> {
        let files = self.run.manifest_files()?;
        Ok(self.check_ancillary(Category::Manifest, &files))
    }

    pub fn check_raw_signal_container_files(&self) -> Result<CheckReport> {
        let manifests = self.load_manifests(&self.run.raw_signal_manifest_files()?)?;
        Ok(self.check_containers(Category::RawSignalContainer, &manifests))
    }

    pub fn check_read_container_files(&self) -> Result<CheckReport> {
        let manifests = self.load_manifests(&self.run.read_manifest_files()?)?;
        Ok(self.check_containers(Category::ReadContainer, &manifests))
    }

    pub fn check_raw_signal_files(&self) -> Result<CheckReport> {
        let manifests = self.load_manifests(&self.run.raw_signal_manifest_files()?)?;
        let files = self.run.raw_signal_files()?;
        Ok(self.check_membership(Category::RawSignalMembership, &files, &manifests))
    }

    pub fn check_read_files(&self) -> Result<CheckReport> {
        let manifests = self.load_manifests(&self.run.read_manifest_files()?)?;
        let files = self.run.read_files()?;
        Ok(self.check_membership(Category::ReadMembership, &files, &manifests))
    }

    fn validator(&self) -> RemoteValidator<'_, S, ChecksumAlgorithm> {
        RemoteValidator::new(
            &self.store,
            &self.settings.remote_checksum,
            &self.identity,
            &self.settings.dest_root,
            &self.settings.gridion_name,
            self.settings.num_replicas,
            &self.settings.tags,
        )
    }

    fn check_ancillary(&self, category: Category, files: &[PathBuf]) -> CheckReport {
        let v = self.validator();
        info!(
            category = category.as_str(),
            files = files.len(),
            collection = v.collection(),
            "checking"
        );
        self.run_items(category, files, None, |path| {
            let label = path.display().to_string();
            (label, v.check_ancillary(path))
        })
    }

    /// Container paths are taken per manifest in manifest order; a container
    /// named by two manifests is checked twice.
    fn check_containers(&self, category: Category, manifests: &[Arc<Manifest>]) -> CheckReport {
        let v = self.validator();
        let containers: Vec<&str> = manifests
            .iter()
            .flat_map(|m| m.container_paths().iter().map(String::as_str))
            .collect();
        info!(
            category = category.as_str(),
            manifests = manifests.len(),
            containers = containers.len(),
            "checking"
        );
        self.run_items(category, &containers, None, |tar| {
            (tar.to_string(), v.check_container(tar))
        })
    }

    fn check_membership(
        &self,
        category: Category,
        files: &[PathBuf],
        manifests: &[Arc<Manifest>],
    ) -> CheckReport {
        info!(
            category = category.as_str(),
            files = files.len(),
            manifests = manifests.len(),
            "checking"
        );
        if manifests.is_empty() && !files.is_empty() {
            warn!(
                category = category.as_str(),
                "no manifests found; every file will be reported missing"
            );
        }
        let interval = self.settings.progress_interval;
        let progress = Progress::new(category.as_str(), interval, files.len());
        let report = self.run_items(category, files, Some(&progress), |path| {
            let label = path.display().to_string();
            let resolved = self.checksummer.checksum(path).and_then(|sum| {
                let res = self.reconciler.resolve(path, &sum, manifests)?;
                debug!(
                    local = %label,
                    manifest = %res.manifest.display(),
                    key = %res.entry.logical_path,
                    container = %res.entry.container_path,
                    "resolved"
                );
                Ok(())
            });
            let outcome = match resolved {
                Ok(()) => ItemOutcome::present(),
                Err(e) => ItemOutcome::failed(e),
            };
            (label, outcome)
        });
        progress.finish();
        report
    }

    /// Check each item, in parallel when a worker pool is configured, then fold
    /// the outcomes in input order.
    fn run_items<T, F>(
        &self,
        category: Category,
        items: &[T],
        progress: Option<&Progress>,
        f: F,
    ) -> CheckReport
    where
        T: Sync,
        F: Fn(&T) -> (String, ItemOutcome) + Sync,
    {
        let check_one = |item: &T| {
            let (label, outcome) = f(item);
            for e in &outcome.failures {
                warn!(category = category.as_str(), item = %label, kind = e.kind(), "{e}");
            }
            if outcome.is_ok() {
                debug!(category = category.as_str(), item = %label, "ok");
            }
            if let Some(p) = progress {
                p.inc(!outcome.is_ok());
            }
            (label, outcome)
        };
        let outcomes: Vec<(String, ItemOutcome)> = match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(check_one).collect()),
            None => items.iter().map(check_one).collect(),
        };

        let mut report = CheckReport::new(category);
        for (item, outcome) in outcomes {
            report.counts.examined += 1;
            if outcome.present {
                report.counts.present += 1;
            }
            report.counts.errors += outcome.failures.len();
            report.failures.extend(
                outcome
                    .failures
                    .into_iter()
                    .map(|error| ItemFailure { category, item: item.clone(), error }),
            );
        }
        info!(
            category = category.as_str(),
            examined = report.counts.examined,
            present = report.counts.present,
            errors = report.counts.errors,
            "checked"
        );
        report
    }

    /// Load (or fetch from cache) the manifests at `paths`, preserving order.
    fn load_manifests(&self, paths: &[PathBuf]) -> Result<Vec<Arc<Manifest>>> {
        let mut cache = self.manifests.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            if let Some(m) = cache.get(p) {
                out.push(m.clone());
                continue;
            }
            let m = Arc::new(Manifest::load(p)?);
            info!(
                manifest = %p.display(),
                entries = m.len(),
                containers = m.container_paths().len(),
                "loaded manifest"
            );
            cache.insert(p.clone(), m.clone());
            out.push(m);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert!("fastq".parse::<Category>().is_err());
    }

    #[test]
    fn counts_add() {
        let mut t = CheckCounts::default();
        t += CheckCounts { examined: 3, present: 2, errors: 2 };
        t += CheckCounts { examined: 1, present: 1, errors: 0 };
        assert_eq!(t.as_tuple(), (4, 3, 2));
    }

    #[test]
    fn failure_serializes_kind_and_message() {
        let f = ItemFailure {
            category: Category::ReadContainer,
            item: "/arch/a.tar".into(),
            error: AuditError::ObjectMissing { remote: "/arch/a.tar".into() },
        };
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["category"], "read_container");
        assert_eq!(v["kind"], "object_missing");
        assert!(v["message"].as_str().unwrap().contains("/arch/a.tar"));
    }
}
