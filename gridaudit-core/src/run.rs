//! The local side of an audit: which run is being checked and which of its
//! files fall into each category.

use crate::error::{AuditError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Experiment and device a run directory belongs to, taken from the last two
/// segments of `<...>/<experiment_name>/<device_id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunIdentity {
    source_dir: PathBuf,
    #[serde(skip)]
    canonical_dir: PathBuf,
    experiment_name: String,
    device_id: String,
}

impl RunIdentity {
    /// The directory must exist. Names come from the path as given (made
    /// absolute and with `.`/`..` folded), not from where a symlink points.
    pub fn from_source_dir(dir: &Path) -> Result<Self> {
        let source_err = |reason: String| AuditError::SourceDir { path: dir.to_path_buf(), reason };
        let meta = std::fs::metadata(dir).map_err(|e| source_err(e.to_string()))?;
        if !meta.is_dir() {
            return Err(source_err("not a directory".into()));
        }
        let source_dir = lexical_absolute(dir).map_err(|e| source_err(e.to_string()))?;
        let canonical_dir = std::fs::canonicalize(dir).map_err(|e| source_err(e.to_string()))?;
        let name = |p: Option<&Path>| {
            p.and_then(|p| p.file_name()).and_then(|s| s.to_str()).map(str::to_string)
        };
        let device_id = name(Some(source_dir.as_path()))
            .ok_or_else(|| source_err("no device id segment".into()))?;
        let experiment_name = name(source_dir.parent())
            .ok_or_else(|| source_err("no experiment name segment".into()))?;
        Ok(Self { source_dir, canonical_dir, experiment_name, device_id })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// `source_dir` with symlinks resolved.
    pub fn canonical_dir(&self) -> &Path {
        &self.canonical_dir
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Categorized local files of one run, each list in a stable order.
pub trait RunFiles: Send + Sync {
    fn config_files(&self) -> Result<Vec<PathBuf>>;
    fn summary_files(&self) -> Result<Vec<PathBuf>>;
    fn manifest_files(&self) -> Result<Vec<PathBuf>>;
    fn raw_signal_files(&self) -> Result<Vec<PathBuf>>;
    fn read_files(&self) -> Result<Vec<PathBuf>>;
    fn raw_signal_manifest_files(&self) -> Result<Vec<PathBuf>>;
    fn read_manifest_files(&self) -> Result<Vec<PathBuf>>;
}

/// Glob patterns, matched against paths relative to the walked directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLayout {
    pub config: Vec<String>,
    pub summary: Vec<String>,
    pub manifest: Vec<String>,
    pub raw_signal: Vec<String>,
    pub reads: Vec<String>,
    pub raw_signal_manifest: Vec<String>,
    pub read_manifest: Vec<String>,
}

impl Default for RunLayout {
    fn default() -> Self {
        let v = |s: &str| vec![s.to_string()];
        Self {
            config: v("**/*.cfg"),
            summary: v("**/sequencing_summary*.txt"),
            manifest: v("**/*_manifest.{txt,json}"),
            raw_signal: v("**/*.fast5"),
            reads: v("**/*.fastq"),
            raw_signal_manifest: v("**/*fast5_manifest.{txt,json}"),
            read_manifest: v("**/*fastq_manifest.{txt,json}"),
        }
    }
}

struct Matchers {
    config: GlobSet,
    summary: GlobSet,
    manifest: GlobSet,
    raw_signal: GlobSet,
    reads: GlobSet,
    raw_signal_manifest: GlobSet,
    read_manifest: GlobSet,
}

impl Matchers {
    fn build(layout: &RunLayout) -> Result<Self> {
        Ok(Self {
            config: build_globset(&layout.config)?,
            summary: build_globset(&layout.summary)?,
            manifest: build_globset(&layout.manifest)?,
            raw_signal: build_globset(&layout.raw_signal)?,
            reads: build_globset(&layout.reads)?,
            raw_signal_manifest: build_globset(&layout.raw_signal_manifest)?,
            read_manifest: build_globset(&layout.read_manifest)?,
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for g in patterns {
        let glob = Glob::new(g).map_err(|e| AuditError::Config(format!("bad glob {g:?}: {e}")))?;
        b.add(glob);
    }
    b.build().map_err(|e| AuditError::Config(e.to_string()))
}

/// A run directory scanned once from disk.
///
/// Manifests may live outside the run directory; when `manifest_dir` is given
/// the manifest categories are taken from there instead.
#[derive(Clone, Debug, Default)]
pub struct RunDirectory {
    config: Vec<PathBuf>,
    summary: Vec<PathBuf>,
    manifest: Vec<PathBuf>,
    raw_signal: Vec<PathBuf>,
    reads: Vec<PathBuf>,
    raw_signal_manifest: Vec<PathBuf>,
    read_manifest: Vec<PathBuf>,
}

impl RunDirectory {
    pub fn scan(
        identity: &RunIdentity,
        layout: &RunLayout,
        manifest_dir: Option<&Path>,
    ) -> Result<Self> {
        let m = Matchers::build(layout)?;
        let mut run = Self::default();
        let manifests_here = manifest_dir.is_none();
        for (path, rel) in list_files(identity.source_dir())? {
            if m.config.is_match(&rel) {
                run.config.push(path.clone());
            }
            if m.summary.is_match(&rel) {
                run.summary.push(path.clone());
            }
            if m.raw_signal.is_match(&rel) {
                run.raw_signal.push(path.clone());
            }
            if m.reads.is_match(&rel) {
                run.reads.push(path.clone());
            }
            if manifests_here {
                run.push_manifest(&m, path, &rel);
            }
        }
        if let Some(dir) = manifest_dir {
            for (path, rel) in list_files(dir)? {
                run.push_manifest(&m, path, &rel);
            }
        }
        tracing::debug!(
            source_dir = %identity.source_dir().display(),
            config = run.config.len(),
            summary = run.summary.len(),
            manifest = run.manifest.len(),
            raw_signal = run.raw_signal.len(),
            reads = run.reads.len(),
            "scanned run directory"
        );
        Ok(run)
    }

    fn push_manifest(&mut self, m: &Matchers, path: PathBuf, rel: &str) {
        if m.raw_signal_manifest.is_match(rel) {
            self.raw_signal_manifest.push(path.clone());
        }
        if m.read_manifest.is_match(rel) {
            self.read_manifest.push(path.clone());
        }
        if m.manifest.is_match(rel) {
            self.manifest.push(path);
        }
    }
}

/// Regular files under `root`, sorted, paired with their `/`-separated
/// relative path. Symlinks are followed and reported under their link path;
/// loops and dangling links are logged and skipped.
fn list_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut v = vec![];
    for e in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let e = match e {
            Ok(e) => e,
            Err(e) if e.depth() > 0 && (e.loop_ancestor().is_some() || dangling(&e)) => {
                tracing::warn!(path = ?e.path(), error = %e, "skipping unreadable link");
                continue;
            }
            Err(e) => {
                let reason = e.to_string();
                return Err(AuditError::RunListing { path: root.to_path_buf(), reason });
            }
        };
        if !e.file_type().is_file() {
            continue;
        }
        let rel = e.path().strip_prefix(root).unwrap_or(e.path());
        let rel = rel.to_string_lossy().replace('\\', "/");
        v.push((e.into_path(), rel));
    }
    v.sort();
    Ok(v)
}

fn dangling(e: &walkdir::Error) -> bool {
    e.path().is_some_and(|p| p.symlink_metadata().is_ok() && p.metadata().is_err())
}

/// Absolute form of `p` with `.` dropped and `..` applied, without resolving
/// symlinks.
fn lexical_absolute(p: &Path) -> std::io::Result<PathBuf> {
    let joined = if p.is_absolute() { p.to_path_buf() } else { std::env::current_dir()?.join(p) };
    let mut out = PathBuf::new();
    for c in joined.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

impl RunFiles for RunDirectory {
    fn config_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.config.clone())
    }

    fn summary_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.summary.clone())
    }

    fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.manifest.clone())
    }

    fn raw_signal_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.raw_signal.clone())
    }

    fn read_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.reads.clone())
    }

    fn raw_signal_manifest_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.raw_signal_manifest.clone())
    }

    fn read_manifest_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.read_manifest.clone())
    }
}
