// File: hashtree-hash/src/lib.rs
//! Digest value type and the hash function injection point shared by the
//! dense and sparse trees.
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SHA256_LEN: usize = 32;
pub const SHA3_256_LEN: usize = 32;
pub const SHAKE256_384_LEN: usize = 48; // 384-bit output

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HashError {
    #[error("invalid digest length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex digest: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Output of a [`Hasher`]. Compared by raw bytes, printed as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn new(bytes: Vec<u8>) -> Self { Digest(bytes) }

    pub fn from_slice(bytes: &[u8]) -> Self { Digest(bytes.to_vec()) }

    /// Parse a hex digest (either case) and check it has `expected` bytes.
    pub fn from_hex(s: &str, expected: usize) -> Result<Self, HashError> {
        let bytes = hex::decode(s.trim())?;
        let d = Digest(bytes);
        d.check_len(expected)?;
        Ok(d)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn to_hex(&self) -> String { hex::encode(&self.0) }

    pub fn into_bytes(self) -> Vec<u8> { self.0 }

    pub fn check_len(&self, expected: usize) -> Result<(), HashError> {
        if self.0.len() != expected {
            return Err(HashError::InvalidLength { expected, got: self.0.len() });
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl<const N: usize> From<[u8; N]> for Digest {
    fn from(bytes: [u8; N]) -> Self { Digest(bytes.to_vec()) }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Fixed-output hash function injected into the trees.
///
/// `hash_pair` defaults to hashing the raw-byte concatenation `left || right`.
pub trait Hasher: Send + Sync {
    fn name(&self) -> &'static str;

    fn output_len(&self) -> usize;

    fn hash(&self, data: &[u8]) -> Digest;

    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut buf = Vec::with_capacity(left.len() + right.len());
        buf.extend_from_slice(left.as_bytes());
        buf.extend_from_slice(right.as_bytes());
        self.hash(&buf)
    }
}

impl<H: Hasher + ?Sized> Hasher for &H {
    fn name(&self) -> &'static str { (**self).name() }
    fn output_len(&self) -> usize { (**self).output_len() }
    fn hash(&self, data: &[u8]) -> Digest { (**self).hash(data) }
    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest { (**self).hash_pair(left, right) }
}

impl<H: Hasher + ?Sized> Hasher for Box<H> {
    fn name(&self) -> &'static str { (**self).name() }
    fn output_len(&self) -> usize { (**self).output_len() }
    fn hash(&self, data: &[u8]) -> Digest { (**self).hash(data) }
    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest { (**self).hash_pair(left, right) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha256;

impl Hasher for Sha256 {
    fn name(&self) -> &'static str { "sha256" }
    fn output_len(&self) -> usize { SHA256_LEN }

    #[inline]
    fn hash(&self, data: &[u8]) -> Digest {
        Digest(sha2::Sha256::digest(data).to_vec())
    }

    #[inline]
    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut hasher = sha2::Sha256::new();
        sha2::Digest::update(&mut hasher, left.as_bytes());
        sha2::Digest::update(&mut hasher, right.as_bytes());
        Digest(hasher.finalize().to_vec())
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha3_256;

impl Hasher for Sha3_256 {
    fn name(&self) -> &'static str { "sha3-256" }
    fn output_len(&self) -> usize { SHA3_256_LEN }

    #[inline]
    fn hash(&self, data: &[u8]) -> Digest {
        Digest(sha3::Sha3_256::digest(data).to_vec())
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Shake256_384;

impl Hasher for Shake256_384 {
    fn name(&self) -> &'static str { "shake256-384" }
    fn output_len(&self) -> usize { SHAKE256_384_LEN }

    #[inline]
    fn hash(&self, data: &[u8]) -> Digest {
        Digest(shake256_384(&[data]).to_vec())
    }

    #[inline]
    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest {
        Digest(shake256_384(&[left.as_bytes(), right.as_bytes()]).to_vec())
    }
}

#[inline]
fn shake256_384(parts: &[&[u8]]) -> [u8; SHAKE256_384_LEN] {
    let mut hasher = sha3::Shake256::default();
    for p in parts {
        hasher.update(p);
    }
    let mut xof = hasher.finalize_xof();
    let mut out = [0u8; SHAKE256_384_LEN];
    xof.read(&mut out);
    out
}

/// Runtime-selectable stock hash function, used by config files and the CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha3-256")]
    Sha3_256,
    #[serde(rename = "shake256-384")]
    Shake256_384,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [HashAlgorithm::Sha256, HashAlgorithm::Sha3_256, HashAlgorithm::Shake256_384];
}

impl Hasher for HashAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => Sha256.name(),
            HashAlgorithm::Sha3_256 => Sha3_256.name(),
            HashAlgorithm::Shake256_384 => Shake256_384.name(),
        }
    }

    fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => SHA256_LEN,
            HashAlgorithm::Sha3_256 => SHA3_256_LEN,
            HashAlgorithm::Shake256_384 => SHAKE256_384_LEN,
        }
    }

    fn hash(&self, data: &[u8]) -> Digest {
        match self {
            HashAlgorithm::Sha256 => Sha256.hash(data),
            HashAlgorithm::Sha3_256 => Sha3_256.hash(data),
            HashAlgorithm::Shake256_384 => Shake256_384.hash(data),
        }
    }

    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest {
        match self {
            HashAlgorithm::Sha256 => Sha256.hash_pair(left, right),
            HashAlgorithm::Sha3_256 => Sha3_256.hash_pair(left, right),
            HashAlgorithm::Shake256_384 => Shake256_384.hash_pair(left, right),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| HashError::UnknownAlgorithm(s.to_string()))
    }
}

/// Combines children by hashing the concatenated lowercase hex *text* of the
/// two digests instead of their raw bytes.
///
/// Only for reproducing roots computed by tools that pair hex strings; raw
/// pairing is the default everywhere else. Leaf hashing is unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HexPairing<H>(pub H);

impl<H: Hasher> Hasher for HexPairing<H> {
    /// `<inner>+hex`, so a hex-paired hasher never reports the raw name.
    fn name(&self) -> &'static str {
        match self.0.name() {
            "sha256" => "sha256+hex",
            "sha3-256" => "sha3-256+hex",
            "shake256-384" => "shake256-384+hex",
            _ => "hex-pairing",
        }
    }

    fn output_len(&self) -> usize { self.0.output_len() }

    fn hash(&self, data: &[u8]) -> Digest { self.0.hash(data) }

    fn hash_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut text = String::with_capacity(2 * (left.len() + right.len()));
        text.push_str(&left.to_hex());
        text.push_str(&right.to_hex());
        self.0.hash(text.as_bytes())
    }
}
