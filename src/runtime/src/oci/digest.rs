//! Content digests (`algorithm:encoded`).

use std::fmt;
use std::str::FromStr;

use hoist_core::error::{PublishError, Result};
use sha2::{Digest as _, Sha256, Sha512};

/// A content-addressed identifier such as `sha256:e3b0c4...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| PublishError::InvalidReference {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| invalid("digest must have the form algorithm:hex"))?;

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
        {
            return Err(invalid("invalid digest algorithm"));
        }

        let expected_len = match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        };
        match expected_len {
            Some(len) => {
                if encoded.len() != len
                    || !encoded.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
                {
                    return Err(invalid(&format!(
                        "{} digest must be {} lowercase hex characters",
                        algorithm, len
                    )));
                }
            }
            None => {
                if encoded.is_empty()
                    || !encoded
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c))
                {
                    return Err(invalid("invalid digest encoding"));
                }
            }
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }

    /// sha256 digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            encoded: hex::encode(Sha256::digest(data)),
        }
    }

    /// sha512 digest of `data`.
    pub fn sha512(data: &[u8]) -> Self {
        Self {
            algorithm: "sha512".to_string(),
            encoded: hex::encode(Sha512::digest(data)),
        }
    }

    /// Digest of `data` computed with `algorithm`, if it is one we can compute.
    pub fn compute(algorithm: &str, data: &[u8]) -> Option<Self> {
        match algorithm {
            "sha256" => Some(Self::sha256(data)),
            "sha512" => Some(Self::sha512(data)),
            _ => None,
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Check `data` against this digest. sha256 and sha512 are verified
    /// locally; other algorithms are accepted as-is.
    pub fn verify(&self, data: &[u8]) -> bool {
        match Self::compute(&self.algorithm, data) {
            Some(computed) => computed == *self,
            None => true,
        }
    }

    /// First 12 characters of the encoded part, as shown in progress output.
    pub fn short(&self) -> &str {
        &self.encoded[..self.encoded.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
