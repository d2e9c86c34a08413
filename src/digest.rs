//! Digest parsing and computation.
//!
//! Grounded on `ocipkg::digest::Digest`: a borrowed `algorithm:encoded` pair
//! validated against a regex at construction time. This version additionally
//! computes digests (the teacher leaves that to `sha2` call sites directly)
//! since the verification layer (C4) needs to hash streamed bytes.

use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};

lazy_static::lazy_static! {
    static ref ENCODED_RE: regex::Regex = regex::Regex::new(r"^[a-zA-Z0-9=_-]+$").unwrap();
    static ref ALGORITHM_RE: regex::Regex = regex::Regex::new(r"^[a-z0-9]+([+._-][a-z0-9]+)*$").unwrap();
}

pub const SHA256: &str = "sha256";

/// A parsed `<algorithm>:<encoded>` digest, as defined by the OCI image spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    pub fn parse(input: &str) -> Result<Self> {
        let mut iter = input.splitn(2, ':');
        match (iter.next(), iter.next()) {
            (Some(algorithm), Some(encoded)) if !algorithm.is_empty() && !encoded.is_empty() => {
                if !ALGORITHM_RE.is_match(algorithm) || !ENCODED_RE.is_match(encoded) {
                    return Err(Error::InvalidReference(format!("invalid digest: {input}")));
                }
                if algorithm == SHA256 && encoded.len() != 64 {
                    return Err(Error::InvalidReference(format!(
                        "sha256 digest must be 64 hex characters: {input}"
                    )));
                }
                Ok(Digest {
                    algorithm: algorithm.to_string(),
                    encoded: encoded.to_string(),
                })
            }
            _ => Err(Error::InvalidReference(format!("invalid digest: {input}"))),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn as_str(&self) -> String {
        format!("{}:{}", self.algorithm, self.encoded)
    }

    /// Fraction of path used under `blobs/<algo>/<encoded>` style layouts.
    pub fn as_path_fraction(&self) -> String {
        format!("{}/{}", self.algorithm, self.encoded)
    }

    /// The referrers tag derived from this digest: `<algo>-<hex>` (I4).
    pub fn as_referrers_tag(&self) -> String {
        format!("{}-{}", self.algorithm, self.encoded)
    }

    pub fn sha256_of(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Digest {
            algorithm: SHA256.to_string(),
            encoded: base16ct::lower::encode_string(&hash),
        }
    }

    /// The all-zero sha256 digest used by the referrers ping probe.
    pub fn zero_sha256() -> Self {
        Digest {
            algorithm: SHA256.to_string(),
            encoded: "0".repeat(64),
        }
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}
