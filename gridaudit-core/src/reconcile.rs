//! Mapping a local file to the key it was archived under.
//!
//! Manifests written over the life of the instrument record paths in one of
//! two layouts: relative to the device directory (`sub/file.fastq`) or
//! relative to the parent of the experiment directory
//! (`exp/dev/sub/file.fastq`). Either may also carry a compressed-name suffix.
//! Nothing in a manifest says which layout it uses, so every candidate is
//! probed.

use crate::error::{AuditError, Result};
use crate::manifest::{Manifest, ManifestEntry};
use crate::run::RunIdentity;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PathReconciler {
    source_dir: PathBuf,
    canonical_dir: PathBuf,
    experiment_name: String,
    device_id: String,
    compressed_suffix: String,
}

/// The manifest entry a local file resolved to.
#[derive(Clone, Debug)]
pub struct Resolution<'m> {
    pub manifest: &'m Path,
    pub entry: &'m ManifestEntry,
}

impl PathReconciler {
    pub fn new(identity: &RunIdentity, compressed_suffix: &str) -> Self {
        Self {
            source_dir: identity.source_dir().to_path_buf(),
            canonical_dir: identity.canonical_dir().to_path_buf(),
            experiment_name: identity.experiment_name().to_string(),
            device_id: identity.device_id().to_string(),
            compressed_suffix: compressed_suffix.to_string(),
        }
    }

    /// Path of `local` relative to the source directory, `/`-separated.
    pub fn short_form(&self, local: &Path) -> Result<String> {
        let outside = || AuditError::PathOutsideSource {
            local: local.to_path_buf(),
            source_dir: self.source_dir.clone(),
        };
        let rel = match local
            .strip_prefix(&self.source_dir)
            .or_else(|_| local.strip_prefix(&self.canonical_dir))
        {
            Ok(rel) => rel.to_path_buf(),
            // Neither prefix matches as written; compare resolved paths.
            Err(_) => {
                let canon = std::fs::canonicalize(local).map_err(|_| outside())?;
                pathdiff::diff_paths(&canon, &self.canonical_dir).ok_or_else(outside)?
            }
        };
        let mut parts = vec![];
        for comp in rel.components() {
            match comp {
                Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        if parts.is_empty() {
            return Err(outside());
        }
        Ok(parts.join("/"))
    }

    pub fn long_form(&self, short: &str) -> String {
        format!("{}/{}/{}", self.experiment_name, self.device_id, short)
    }

    /// Keys to probe, in order: long, long + suffix, short, short + suffix.
    /// The suffix is not doubled if the file name already ends with it.
    pub fn candidates(&self, local: &Path) -> Result<Vec<String>> {
        let short = self.short_form(local)?;
        let long = self.long_form(&short);
        let mut out = Vec::with_capacity(4);
        for key in [long, short] {
            let suffix = &self.compressed_suffix;
            let suffixed = if suffix.is_empty() || key.ends_with(suffix.as_str()) {
                None
            } else {
                Some(format!("{key}{suffix}"))
            };
            out.push(key);
            out.extend(suffixed);
        }
        Ok(out)
    }

    /// Find the entry for `local` whose checksum equals `checksum`.
    ///
    /// Tie-break policy: manifests are tried in the order given and, within a
    /// manifest, candidates in [`candidates`](Self::candidates) order; the first
    /// hit wins. Identical content recorded in two manifests therefore
    /// resolves to the earlier one. This is an ordering rule, not a proof that
    /// the match is the right archive copy.
    pub fn resolve<'m>(
        &self,
        local: &Path,
        checksum: &str,
        manifests: &'m [Arc<Manifest>],
    ) -> Result<Resolution<'m>> {
        let candidates = self.candidates(local)?;
        let mut mismatched = vec![];
        for mf in manifests {
            for key in &candidates {
                let Ok(entry) = mf.get_item(key) else {
                    continue;
                };
                if entry.checksum == checksum {
                    return Ok(Resolution { manifest: mf.source_path(), entry });
                }
                mismatched.push(format!("{}:{}", mf.source_path().display(), key));
            }
        }
        Err(AuditError::ManifestEntryMissing {
            local: local.to_path_buf(),
            checksum: checksum.to_string(),
            candidates,
            mismatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use std::fs;

    fn setup() -> (tempfile::TempDir, PathReconciler, PathBuf) {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("exp1").join("dev1");
        fs::create_dir_all(dir.join("sub")).unwrap();
        let id = RunIdentity::from_source_dir(&dir).unwrap();
        let r = PathReconciler::new(&id, ".bz2");
        let local = id.source_dir().join("sub").join("file.fastq");
        fs::write(&local, b"reads").unwrap();
        (td, r, local)
    }

    fn manifest(name: &str, items: &[(&str, &str)]) -> Arc<Manifest> {
        let entries = items.iter().map(|(k, sum)| ManifestEntry {
            container_path: format!("/arch/{name}.tar"),
            logical_path: k.to_string(),
            checksum: sum.to_string(),
        });
        Arc::new(Manifest::from_entries(name, entries).unwrap())
    }

    #[test]
    fn candidate_order() {
        let (_td, r, local) = setup();
        assert_eq!(
            r.candidates(&local).unwrap(),
            vec![
                "exp1/dev1/sub/file.fastq",
                "exp1/dev1/sub/file.fastq.bz2",
                "sub/file.fastq",
                "sub/file.fastq.bz2"
            ]
        );
    }

    #[test]
    fn suffix_not_doubled() {
        let (_td, r, local) = setup();
        let gz = local.with_file_name("file.fastq.bz2");
        fs::write(&gz, b"x").unwrap();
        assert_eq!(
            r.candidates(&gz).unwrap(),
            vec!["exp1/dev1/sub/file.fastq.bz2", "sub/file.fastq.bz2"]
        );
    }

    #[test]
    fn long_form_with_suffix_resolves() {
        let (_td, r, local) = setup();
        let mfs = vec![manifest("m1", &[("exp1/dev1/sub/file.fastq.bz2", "abc123")])];
        let res = r.resolve(&local, "abc123", &mfs).unwrap();
        assert_eq!(res.entry.logical_path, "exp1/dev1/sub/file.fastq.bz2");
    }

    #[test]
    fn short_form_fallback_resolves() {
        let (_td, r, local) = setup();
        let mfs = vec![manifest("m1", &[("sub/file.fastq.bz2", "abc123")])];
        let res = r.resolve(&local, "abc123", &mfs).unwrap();
        assert_eq!(res.entry.logical_path, "sub/file.fastq.bz2");
    }

    #[test]
    fn checksum_must_match() {
        let (_td, r, local) = setup();
        let mfs = vec![manifest("m1", &[("sub/file.fastq.bz2", "other")])];
        match r.resolve(&local, "abc123", &mfs).unwrap_err() {
            AuditError::ManifestEntryMissing { candidates, mismatched, .. } => {
                assert_eq!(candidates.len(), 4);
                assert_eq!(mismatched, vec!["m1:sub/file.fastq.bz2".to_string()]);
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn first_manifest_wins_on_duplicates() {
        let (_td, r, local) = setup();
        let mfs = vec![
            manifest("m1", &[("sub/file.fastq.bz2", "abc123")]),
            manifest("m2", &[("exp1/dev1/sub/file.fastq.bz2", "abc123")]),
        ];
        let res = r.resolve(&local, "abc123", &mfs).unwrap();
        // m2 holds the long form, which is probed first, but m1 comes first.
        assert_eq!(res.manifest, Path::new("m1"));
    }

    #[test]
    fn outside_source_rejected() {
        let (td, r, _local) = setup();
        let stray = td.path().join("stray.fastq");
        fs::write(&stray, b"x").unwrap();
        assert_eq!(r.candidates(&stray).unwrap_err().kind(), "path_outside_source");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_source_dir_keeps_link_names() {
        let td = tempfile::tempdir().unwrap();
        let storage = td.path().join("storage").join("vol7").join("slotA");
        fs::create_dir_all(storage.join("sub")).unwrap();
        fs::write(storage.join("sub").join("file.fastq"), b"reads").unwrap();
        fs::create_dir_all(td.path().join("runs").join("exp1")).unwrap();
        let link = td.path().join("runs").join("exp1").join("GA10000");
        std::os::unix::fs::symlink(&storage, &link).unwrap();
        let id = RunIdentity::from_source_dir(&link).unwrap();
        let r = PathReconciler::new(&id, "");

        let want = vec!["exp1/GA10000/sub/file.fastq", "sub/file.fastq"];
        assert_eq!(r.candidates(&link.join("sub").join("file.fastq")).unwrap(), want);
        // Same file reached through the link target.
        assert_eq!(r.candidates(&storage.join("sub").join("file.fastq")).unwrap(), want);
    }

    proptest::proptest! {
        #[test]
        fn long_form_is_prefixed_short_form(
            segs in proptest::collection::vec("[a-z0-9_]{1,8}", 1..4)
        ) {
            let (_td, r, _local) = setup();
            let local = segs.iter().fold(r.source_dir.clone(), |p, s| p.join(s));
            let c = r.candidates(&local).unwrap();
            let short = segs.join("/");
            proptest::prop_assert_eq!(&c[2], &short);
            proptest::prop_assert_eq!(&c[0], &format!("exp1/dev1/{short}"));
            proptest::prop_assert!(c[1].ends_with(".bz2") && c[3].ends_with(".bz2"));
        }
    }
}
