//! Content digests.
//!
//! A [`ContentDigest`] is the primary key of every object and chunk in the
//! store. It pairs a 32-byte hash with the algorithm that produced it, so two
//! digests are equal only when both the algorithm and the bytes match.
//!
//! The canonical text form is `<algorithm>:<64 lowercase hex digits>`:
//!
//! ```text
//! blake3:af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of every supported digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Hash algorithm tag carried by every digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 (default)
    #[default]
    Blake3,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Canonical lowercase name used in the text form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            other => Err(DigestParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Errors from parsing the text form of a digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestParseError {
    /// Missing `algorithm:` prefix
    #[error("digest is missing the '<algorithm>:' prefix")]
    MissingAlgorithm,

    /// Algorithm name not recognised
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Hex part has the wrong length
    #[error("digest must be {expected} hex characters, got {actual}")]
    InvalidLength {
        /// Expected number of hex characters
        expected: usize,
        /// Actual number of hex characters
        actual: usize,
    },

    /// Hex part contains non-hex characters
    #[error("digest is not valid hex: {0}")]
    InvalidHex(String),
}

/// Immutable content fingerprint: algorithm tag plus 32 hash bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest {
    algorithm: HashAlgorithm,
    bytes: [u8; DIGEST_LEN],
}

impl ContentDigest {
    /// Build a digest from raw parts.
    #[must_use]
    pub const fn from_parts(algorithm: HashAlgorithm, bytes: [u8; DIGEST_LEN]) -> Self {
        Self { algorithm, bytes }
    }

    /// Hash `data` in one call.
    #[must_use]
    pub fn of(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = crate::Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Algorithm that produced this digest.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }

    /// Lowercase hex of the hash bytes, without the algorithm prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First 8 bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.bytes[..8])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({}:{})", self.algorithm, self.short())
    }
}

impl FromStr for ContentDigest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex_part) = s
            .split_once(':')
            .ok_or(DigestParseError::MissingAlgorithm)?;
        let algorithm = algo.parse::<HashAlgorithm>()?;

        if hex_part.len() != DIGEST_LEN * 2 {
            return Err(DigestParseError::InvalidLength {
                expected: DIGEST_LEN * 2,
                actual: hex_part.len(),
            });
        }

        // Canonical form is lowercase only
        if hex_part.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(DigestParseError::InvalidHex(hex_part.to_string()));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex_part, &mut bytes)
            .map_err(|e| DigestParseError::InvalidHex(e.to_string()))?;

        Ok(Self { algorithm, bytes })
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
