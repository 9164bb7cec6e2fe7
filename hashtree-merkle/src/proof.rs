// File: hashtree-merkle/src/proof.rs
//! Inclusion proofs for [`crate::HashTree`] and their byte encoding.
//!
//! Wire format: a `u32` little-endian step count, then for every step the
//! sibling digest (`L` bytes) followed by one side byte (`0` = left,
//! `1` = right). Steps run from the leaf up to the root.
use hashtree_hash::{Digest, Hasher};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MerkleError, MerkleResult};

/// Upper bound on proof steps accepted from untrusted input.
pub const MAX_PROOF_LEN: usize = 64;

const COUNT_LEN: usize = 4;

/// Position of the sibling relative to the node on the proven path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Sibling comes first: `H(sibling || current)`
    Left,
    /// Sibling comes second: `H(current || sibling)`
    Right,
}

impl Side {
    pub fn to_byte(self) -> u8 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn from_byte(b: u8) -> MerkleResult<Self> {
        match b {
            0 => Ok(Side::Left),
            1 => Ok(Side::Right),
            other => Err(MerkleError::MalformedProof(format!("invalid side tag {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Sibling path from one leaf to the root, leaf end first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    steps: Vec<ProofStep>,
}

impl Proof {
    pub fn new(steps: Vec<ProofStep>) -> Self { Self { steps } }

    pub fn steps(&self) -> &[ProofStep] { &self.steps }

    pub fn len(&self) -> usize { self.steps.len() }

    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn into_steps(self) -> Vec<ProofStep> { self.steps }

    /// Check the proof is usable with a hasher producing `digest_len` bytes.
    pub fn validate(&self, digest_len: usize) -> MerkleResult<()> {
        if self.steps.len() > MAX_PROOF_LEN {
            return Err(MerkleError::MalformedProof(format!(
                "{} steps exceeds limit of {MAX_PROOF_LEN}",
                self.steps.len()
            )));
        }
        for (level, step) in self.steps.iter().enumerate() {
            if step.sibling.len() != digest_len {
                return Err(MerkleError::MalformedProof(format!(
                    "sibling at level {level} is {} bytes, expected {digest_len}",
                    step.sibling.len()
                )));
            }
        }
        Ok(())
    }

    /// Fold the path over an already hashed leaf.
    pub fn compute_root_from_digest<H: Hasher + ?Sized>(&self, hasher: &H, leaf: &Digest) -> MerkleResult<Digest> {
        self.validate(hasher.output_len())?;
        let mut current = leaf.clone();
        for step in &self.steps {
            current = match step.side {
                Side::Right => hasher.hash_pair(&current, &step.sibling),
                Side::Left => hasher.hash_pair(&step.sibling, &current),
            };
        }
        Ok(current)
    }

    pub fn compute_root<H: Hasher + ?Sized>(&self, hasher: &H, leaf: &[u8]) -> MerkleResult<Digest> {
        self.compute_root_from_digest(hasher, &hasher.hash(leaf))
    }

    pub fn encoded_len(&self) -> usize {
        COUNT_LEN + self.steps.iter().map(|s| s.sibling.len() + 1).sum::<usize>()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.steps.len() as u32).to_le_bytes());
        for step in &self.steps {
            out.extend_from_slice(step.sibling.as_bytes());
            out.push(step.side.to_byte());
        }
        out
    }

    /// Decode a proof whose siblings are `digest_len` bytes each.
    pub fn from_bytes(bytes: &[u8], digest_len: usize) -> MerkleResult<Self> {
        if bytes.len() < COUNT_LEN {
            return Err(MerkleError::MalformedProof("missing step count".into()));
        }
        let (head, body) = bytes.split_at(COUNT_LEN);
        let mut count_bytes = [0u8; COUNT_LEN];
        count_bytes.copy_from_slice(head);
        let count = u32::from_le_bytes(count_bytes) as usize;
        if count > MAX_PROOF_LEN {
            return Err(MerkleError::MalformedProof(format!("{count} steps exceeds limit of {MAX_PROOF_LEN}")));
        }
        let stride = digest_len + 1;
        if body.len() != count * stride {
            return Err(MerkleError::MalformedProof(format!(
                "expected {} body bytes for {count} steps, got {}",
                count * stride,
                body.len()
            )));
        }
        let steps = body
            .chunks_exact(stride)
            .map(|chunk| {
                let side = Side::from_byte(chunk[digest_len])?;
                Ok(ProofStep { sibling: Digest::from_slice(&chunk[..digest_len]), side })
            })
            .collect::<MerkleResult<Vec<_>>>()?;
        Ok(Self { steps })
    }
}

/// Check that `leaf` hashes up to `trusted_root` along `proof`.
///
/// The leaf position is taken from the proof's side tags only. A well-formed
/// proof that does not reach the root yields `Ok(false)`.
pub fn verify_proof<H: Hasher + ?Sized>(hasher: &H, leaf: &[u8], proof: &Proof, trusted_root: &Digest) -> MerkleResult<bool> {
    verify_digest_proof(hasher, &hasher.hash(leaf), proof, trusted_root)
}

pub fn verify_digest_proof<H: Hasher + ?Sized>(
    hasher: &H,
    leaf: &Digest,
    proof: &Proof,
    trusted_root: &Digest,
) -> MerkleResult<bool> {
    let computed = proof.compute_root_from_digest(hasher, leaf).map_err(|e| {
        warn!(error = %e, "rejected proof");
        e
    })?;
    Ok(&computed == trusted_root)
}
