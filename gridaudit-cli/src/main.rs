use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gridaudit_core::checksum::ChecksumAlgorithm;
use gridaudit_core::config::AuditSettings;
use gridaudit_core::manifest::Manifest;
use gridaudit_core::remote::SnapshotStore;
use gridaudit_core::run::{RunDirectory, RunIdentity};
use gridaudit_core::{AuditReport, Auditor, Category, CheckReport};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Algo { Md5, Sha256, Blake3 }

impl From<Algo> for ChecksumAlgorithm {
    fn from(a: Algo) -> Self {
        match a {
            Algo::Md5 => ChecksumAlgorithm::Md5,
            Algo::Sha256 => ChecksumAlgorithm::Sha256,
            Algo::Blake3 => ChecksumAlgorithm::Blake3,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "gridaudit",
    version,
    about = "Audit archived GridION run output against manifests and the remote store"
)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Audit a run directory (<...>/<experiment>/<device>)
    Audit {
        source_dir: PathBuf,
        /// JSON export of the remote collection
        #[arg(long)] snapshot: PathBuf,
        /// TOML settings file; flags below override it
        #[arg(long)] config: Option<PathBuf>,
        #[arg(long)] dest_root: Option<String>,
        #[arg(long)] gridion_name: Option<String>,
        #[arg(long)] num_replicas: Option<usize>,
        /// Digest the manifests record
        #[arg(long, value_enum)] checksum: Option<Algo>,
        /// Digest the remote store records
        #[arg(long, value_enum)] remote_checksum: Option<Algo>,
        /// Directory holding the run's manifests, if not the run directory
        #[arg(long)] manifest_dir: Option<PathBuf>,
        #[arg(long)] workers: Option<usize>,
        #[arg(long)] progress_interval: Option<usize>,
        /// Run only these checks (repeatable), e.g. read_container
        #[arg(long)] only: Vec<String>,
        /// Print the full report as JSON
        #[arg(long, default_value_t = false)] json: bool,
    },
    /// Summarize a manifest file
    Manifest { path: PathBuf },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match cli.cmd {
        Cmd::Audit {
            source_dir, snapshot, config, dest_root, gridion_name, num_replicas, checksum,
            remote_checksum, manifest_dir, workers, progress_interval, only, json,
        } => {
            let mut settings = match &config {
                Some(p) => AuditSettings::from_file(p)?,
                None => AuditSettings::default(),
            };
            if let Some(v) = dest_root { settings.dest_root = v; }
            if let Some(v) = gridion_name { settings.gridion_name = v; }
            if let Some(v) = num_replicas { settings.num_replicas = v; }
            if let Some(v) = checksum { settings.checksum = v.into(); }
            if let Some(v) = remote_checksum { settings.remote_checksum = v.into(); }
            if let Some(v) = workers { settings.workers = v; }
            if let Some(v) = progress_interval { settings.progress_interval = v; }
            let only = only.iter().map(|s| s.parse::<Category>()).collect::<Result<Vec<_>, _>>()?;
            audit(&source_dir, &snapshot, manifest_dir.as_deref(), settings, &only, json)
        }
        Cmd::Manifest { path } => {
            manifest_summary(&path)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn audit(
    source_dir: &Path,
    snapshot: &Path,
    manifest_dir: Option<&Path>,
    settings: AuditSettings,
    only: &[Category],
    json: bool,
) -> Result<ExitCode> {
    let identity = RunIdentity::from_source_dir(source_dir)?;
    let run = RunDirectory::scan(&identity, &settings.layout, manifest_dir)
        .with_context(|| format!("scan {}", source_dir.display()))?;
    let store = SnapshotStore::load(snapshot)?;
    tracing::info!(objects = store.len(), snapshot = %snapshot.display(), "loaded remote snapshot");
    let checksummer = settings.checksum;
    let auditor = Auditor::new(identity, settings, run, store, checksummer)?;

    let report = if only.is_empty() {
        auditor.check_all_files()?
    } else {
        auditor.check_categories(only)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report);
    }
    Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn print_table(report: &AuditReport) {
    println!(
        "Run: {}/{} ({})",
        report.experiment_name,
        report.device_id,
        report.source_dir.display()
    );
    println!("{:<24} {:>10} {:>10} {:>8}", "check", "examined", "present", "errors");
    for CheckReport { category, counts, .. } in &report.checks {
        let name = category.as_str();
        println!(
            "{:<24} {:>10} {:>10} {:>8}",
            name, counts.examined, counts.present, counts.errors
        );
    }
    let t = report.totals();
    println!("{:<24} {:>10} {:>10} {:>8}", "total", t.examined, t.present, t.errors);
    for f in report.checks.iter().flat_map(|c| c.failures.iter()) {
        println!("FAIL {} {} [{}]: {}", f.category, f.item, f.error.kind(), f.error);
    }
    println!("{}", if report.is_clean() { "OK" } else { "ERRORS FOUND" });
}

fn manifest_summary(path: &Path) -> Result<()> {
    let m = Manifest::load(path)?;
    println!("Manifest: {}", path.display());
    println!("Entries: {}", m.len());
    println!("Containers: {}", m.container_paths().len());
    for c in m.container_paths() {
        println!("  {c}");
    }
    Ok(())
}
