use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_BUF: usize = 1 << 20;

/// Produces the digest of a local file as lower-case hex.
pub trait Checksummer: Send + Sync {
    fn checksum(&self, path: &Path) -> Result<String>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// The repository's native checksum.
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digest of an in-memory buffer.
    pub fn digest_bytes(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Md5 => hex::encode(md5::Md5::digest(bytes)),
            ChecksumAlgorithm::Sha256 => hex::encode(sha2::Sha256::digest(bytes)),
            ChecksumAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            other => Err(AuditError::Config(format!("unknown checksum algorithm {other:?}"))),
        }
    }
}

impl Checksummer for ChecksumAlgorithm {
    fn checksum(&self, path: &Path) -> Result<String> {
        let io_err = |source| AuditError::ChecksumCompute { path: path.to_path_buf(), source };
        let mut f = File::open(path).map_err(io_err)?;
        let mut buf = vec![0u8; READ_BUF];
        match self {
            ChecksumAlgorithm::Md5 => {
                let mut h = md5::Md5::new();
                stream(&mut f, &mut buf, |b| h.update(b)).map_err(io_err)?;
                Ok(hex::encode(h.finalize()))
            }
            ChecksumAlgorithm::Sha256 => {
                let mut h = sha2::Sha256::new();
                stream(&mut f, &mut buf, |b| h.update(b)).map_err(io_err)?;
                Ok(hex::encode(h.finalize()))
            }
            ChecksumAlgorithm::Blake3 => {
                let mut h = blake3::Hasher::new();
                stream(&mut f, &mut buf, |b| {
                    h.update(b);
                })
                .map_err(io_err)?;
                Ok(h.finalize().to_hex().to_string())
            }
        }
    }
}

fn stream(f: &mut File, buf: &mut [u8], mut sink: impl FnMut(&[u8])) -> std::io::Result<()> {
    loop {
        let n = f.read(buf)?;
        if n == 0 {
            return Ok(());
        }
        sink(&buf[..n]);
    }
}
