use gridaudit_core::manifest::Manifest;
use std::fs;

#[test]
fn load_tsv_manifest() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("GA1_fastq_manifest.txt");
    fs::write(
        &p,
        "/arch/fastq_0.tar\texp/GA1/pass/a.fastq.bz2\t11\n\
         /arch/fastq_0.tar\texp/GA1/pass/b.fastq.bz2\t22\n\
         /arch/fastq_1.tar\texp/GA1/fail/c.fastq.bz2\t33\n",
    )
    .unwrap();
    let m = Manifest::load(&p).unwrap();
    assert_eq!(m.len(), 3);
    assert_eq!(m.source_path(), p.as_path());
    assert_eq!(m.container_paths(), &["/arch/fastq_0.tar", "/arch/fastq_1.tar"]);
    let e = m.get_item("exp/GA1/fail/c.fastq.bz2").unwrap();
    assert_eq!(e.checksum, "33");
    assert_eq!(e.container_path, "/arch/fastq_1.tar");
}

#[test]
fn load_json_manifest() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("GA1_fast5_manifest.json");
    fs::write(
        &p,
        r#"[
  {"container_path": "/arch/fast5_0.tar", "logical_path": "reads/0/x.fast5", "checksum": "aa"},
  {"container_path": "/arch/fast5_0.tar", "logical_path": "reads/0/y.fast5", "checksum": "bb"}
]"#,
    )
    .unwrap();
    let m = Manifest::load(&p).unwrap();
    assert!(m.contains_item("reads/0/y.fast5"));
    assert_eq!(m.container_paths().len(), 1);
}

#[test]
fn empty_manifest_is_valid() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("empty_manifest.txt");
    fs::write(&p, "").unwrap();
    let m = Manifest::load(&p).unwrap();
    assert!(m.is_empty());
    assert!(m.container_paths().is_empty());
}

#[test]
fn unreadable_or_malformed_is_parse_error() {
    let td = tempfile::tempdir().unwrap();
    let missing = Manifest::load(&td.path().join("absent.txt")).unwrap_err();
    assert_eq!(missing.kind(), "manifest_parse");

    let p = td.path().join("bad.json");
    fs::write(&p, "{").unwrap();
    assert_eq!(Manifest::load(&p).unwrap_err().kind(), "manifest_parse");

    let p = td.path().join("dup.txt");
    fs::write(&p, "/a.tar\tx\t1\n/b.tar\tx\t2\n").unwrap();
    let err = Manifest::load(&p).unwrap_err();
    assert!(err.to_string().contains("duplicate"), "{err}");

    let p = td.path().join("empty_field.txt");
    fs::write(&p, "/a.tar\t\t1\n").unwrap();
    assert_eq!(Manifest::load(&p).unwrap_err().kind(), "manifest_parse");
}
