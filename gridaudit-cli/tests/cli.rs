use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use gridaudit_core::checksum::{ChecksumAlgorithm, Checksummer};
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;

const COLL: &str = "/seq/ont/gridion/GXB01/exp1/GA10000";
const TAR: &str = "/seq/ont/gridion/GXB01/exp1/GA10000/fastq_0.tar";

fn md5(p: &Path) -> String {
    ChecksumAlgorithm::Md5.checksum(p).unwrap()
}

fn object(path: &str, checksum: &str, tags: &[(&str, &str)]) -> serde_json::Value {
    let mut all = vec![serde_json::json!({"attribute": "md5", "value": checksum})];
    all.extend(tags.iter().map(|(k, v)| serde_json::json!({"attribute": k, "value": v})));
    serde_json::json!({
        "path": path,
        "checksum": checksum,
        "replicas": [
            {"number": 0, "checksum": checksum, "valid": true},
            {"number": 1, "checksum": checksum, "valid": true}
        ],
        "tags": all,
    })
}

/// Run dir with one config file and one fastq, a long-form manifest, and a
/// snapshot describing a correct archive. Returns the source dir.
fn archived_run(td: &assert_fs::TempDir) -> std::path::PathBuf {
    let src = td.child("exp1/GA10000");
    src.child("pass").create_dir_all().unwrap();
    src.child("configuration.cfg").write_str("[protocol]\nkit=LSK109\n").unwrap();
    src.child("pass/q1.fastq").write_str("@r1\nACGT\n+\n!!!!\n").unwrap();
    let q1 = md5(src.child("pass/q1.fastq").path());
    let manifest = src.child("GA10000_fastq_manifest.txt");
    manifest.write_str(&format!("{TAR}\texp1/GA10000/pass/q1.fastq.bz2\t{q1}\n")).unwrap();

    let cfg_sum = md5(src.child("configuration.cfg").path());
    let snapshot = serde_json::json!({
        "objects": [
            object(&format!("{COLL}/configuration.cfg"), &cfg_sum, &[]),
            object(&format!("{COLL}/GA10000_fastq_manifest.txt"), &md5(manifest.path()), &[]),
            object(TAR, "ffff", &[("experiment_name", "exp1"), ("device_id", "GA10000")]),
        ]
    });
    td.child("snapshot.json").write_str(&snapshot.to_string()).unwrap();
    src.path().to_path_buf()
}

fn audit_cmd(td: &assert_fs::TempDir, src: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gridaudit").unwrap();
    cmd.args([
        "audit",
        src.to_str().unwrap(),
        "--snapshot",
        td.child("snapshot.json").path().to_str().unwrap(),
        "--gridion-name",
        "GXB01",
    ]);
    cmd
}

#[test]
fn clean_run_exits_zero() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    audit_cmd(&td, &src)
        .assert()
        .success()
        .stdout(predicate::str::contains("read_membership"))
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn errors_exit_one_and_are_listed() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    td.child("exp1/GA10000/pass/q1.fastq").write_str("@r1\nTTTT\n+\n!!!!\n").unwrap();
    audit_cmd(&td, &src)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("manifest_entry_missing"))
        .stdout(predicate::str::contains("ERRORS FOUND"));
}

#[test]
fn json_report_for_selected_checks() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    let out = audit_cmd(&td, &src)
        .args(["--only", "config", "--only", "read_container", "--json", "--num-replicas", "3"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["device_id"], "GA10000");
    assert_eq!(report["checks"].as_array().unwrap().len(), 2);
    assert_eq!(report["checks"][0]["category"], "config");
    assert_eq!(report["checks"][0]["failures"][0]["kind"], "insufficient_replicas");
    assert_eq!(report["totals"]["examined"], 2);
    assert_eq!(report["totals"]["errors"], 1);
}

#[test]
fn config_file_is_honoured() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    td.child("audit.toml").write_str("gridion_name = \"OTHER\"\nworkers = 2\n").unwrap();
    // The config points ancillary checks at another collection; the flag wins.
    Command::cargo_bin("gridaudit")
        .unwrap()
        .args([
            "audit",
            src.to_str().unwrap(),
            "--snapshot",
            td.child("snapshot.json").path().to_str().unwrap(),
            "--config",
            td.child("audit.toml").path().to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("object_missing"));
    audit_cmd(&td, &src)
        .args(["--config", td.child("audit.toml").path().to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn missing_source_dir_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    td.child("snapshot.json").write_str("{\"objects\": []}").unwrap();
    audit_cmd(&td, &td.path().join("exp/absent"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid source directory"));
}

#[test]
fn unknown_category_rejected() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    audit_cmd(&td, &src)
        .args(["--only", "fastq"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown category"));
}

#[test]
fn manifest_summary_lists_containers() {
    let td = assert_fs::TempDir::new().unwrap();
    let m = td.child("m.txt");
    m.write_str("/arch/a.tar\tx\t1\n/arch/b.tar\ty\t2\n/arch/a.tar\tz\t3\n").unwrap();
    Command::cargo_bin("gridaudit")
        .unwrap()
        .args(["manifest", m.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries: 3"))
        .stdout(predicate::str::contains("Containers: 2"));
}

#[test]
fn remote_checksum_flag_drives_ancillary_checks() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = archived_run(&td);
    audit_cmd(&td, &src)
        .args(["--remote-checksum", "sha256", "--only", "config", "--only", "read_membership"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("checksum_mismatch"))
        .stdout(predicate::str::contains("manifest_entry_missing").not());
}
