//! Incremental content hashing.
//!
//! Feeding bytes in any split produces the same digest as hashing the
//! concatenation in one call. `finalize` consumes the hasher, so a finished
//! state cannot be fed or finalized again.

use crate::digest::{ContentDigest, DIGEST_LEN, HashAlgorithm};
use sha2::Digest as _;
use std::io::{self, Read};

enum State {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

/// Incremental hash context
pub struct Hasher {
    state: State,
    algorithm: HashAlgorithm,
    bytes_hashed: u64,
}

impl Hasher {
    /// Create a fresh context for `algorithm`
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
        };
        Self {
            state,
            algorithm,
            bytes_hashed: 0,
        }
    }

    /// Feed bytes into the context
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        match &mut self.state {
            State::Blake3(h) => {
                h.update(data);
            }
            State::Sha256(h) => h.update(data),
        }
        self.bytes_hashed += data.len() as u64;
        self
    }

    /// Algorithm of this context
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Total bytes fed so far
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Finish hashing and produce the digest
    #[must_use]
    pub fn finalize(self) -> ContentDigest {
        let bytes: [u8; DIGEST_LEN] = match self.state {
            State::Blake3(h) => *h.finalize().as_bytes(),
            State::Sha256(h) => {
                let mut out = [0u8; DIGEST_LEN];
                out.copy_from_slice(&h.finalize());
                out
            }
        };
        ContentDigest::from_parts(self.algorithm, bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher")
            .field("algorithm", &self.algorithm)
            .field("bytes_hashed", &self.bytes_hashed)
            .finish()
    }
}

/// Reader adapter that hashes every byte passing through it.
///
/// Lets the chunk planner and the whole-object hasher consume one stream in a
/// single pass.
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashingReader<R> {
    /// Wrap `inner`, hashing with `algorithm`
    pub fn new(inner: R, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
        }
    }

    /// Bytes read (and hashed) so far
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Consume the reader and return the digest of everything read
    #[must_use]
    pub fn finalize(self) -> ContentDigest {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
