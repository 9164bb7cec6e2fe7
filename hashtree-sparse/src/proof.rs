use hashtree_hash::{Digest, Hasher};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SparseError, SparseResult};
use crate::check_index;

/// One sibling per level, leaf level first. Directions come from the index
/// bits, so no side tags are carried.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseProof {
    siblings: Vec<Digest>,
}

impl SparseProof {
    pub fn new(siblings: Vec<Digest>) -> Self { Self { siblings } }

    pub fn siblings(&self) -> &[Digest] { &self.siblings }

    pub fn len(&self) -> usize { self.siblings.len() }

    pub fn is_empty(&self) -> bool { self.siblings.is_empty() }

    /// Concatenated siblings, `depth * L` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.siblings.iter().flat_map(|d| d.as_bytes().iter().copied()).collect()
    }

    pub fn from_bytes(bytes: &[u8], depth: u32, digest_len: usize) -> SparseResult<Self> {
        let expected = depth as usize * digest_len;
        if digest_len == 0 || bytes.len() != expected {
            return Err(SparseError::MalformedProof(format!(
                "expected {expected} bytes for depth {depth}, got {}",
                bytes.len()
            )));
        }
        Ok(Self { siblings: bytes.chunks_exact(digest_len).map(Digest::from_slice).collect() })
    }

    fn validate(&self, depth: u32, digest_len: usize) -> SparseResult<()> {
        if self.siblings.len() != depth as usize {
            return Err(SparseError::MalformedProof(format!(
                "proof has {} siblings, tree depth is {depth}",
                self.siblings.len()
            )));
        }
        if let Some((level, d)) = self.siblings.iter().enumerate().find(|(_, d)| d.len() != digest_len) {
            return Err(SparseError::MalformedProof(format!(
                "sibling at level {level} is {} bytes, expected {digest_len}",
                d.len()
            )));
        }
        Ok(())
    }

    pub fn compute_root<H: Hasher + ?Sized>(&self, hasher: &H, depth: u32, index: u64, leaf: &Digest) -> SparseResult<Digest> {
        check_index(depth, index)?;
        self.validate(depth, hasher.output_len())?;
        let mut current = leaf.clone();
        let mut idx = index;
        for sibling in &self.siblings {
            current = if idx & 1 == 0 { hasher.hash_pair(&current, sibling) } else { hasher.hash_pair(sibling, &current) };
            idx >>= 1;
        }
        Ok(current)
    }
}

/// Check that `value` sits at `index` under `trusted_root`.
pub fn verify_proof<H: Hasher + ?Sized>(
    hasher: &H,
    depth: u32,
    index: u64,
    value: &[u8],
    proof: &SparseProof,
    trusted_root: &Digest,
) -> SparseResult<bool> {
    verify_digest_proof(hasher, depth, index, &hasher.hash(value), proof, trusted_root)
}

/// Same as [`verify_proof`] for an already hashed leaf. Passing the tree's
/// empty-leaf digest checks non-inclusion.
pub fn verify_digest_proof<H: Hasher + ?Sized>(
    hasher: &H,
    depth: u32,
    index: u64,
    leaf: &Digest,
    proof: &SparseProof,
    trusted_root: &Digest,
) -> SparseResult<bool> {
    match proof.compute_root(hasher, depth, index, leaf) {
        Ok(root) => Ok(&root == trusted_root),
        Err(e) => {
            warn!(error = %e, index, depth, "rejected sparse proof");
            Err(e)
        }
    }
}
