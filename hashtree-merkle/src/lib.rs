// File: hashtree-merkle/src/lib.rs
//! Dense binary Merkle tree over an ordered list of leaves.
//!
//! Nodes live in a level arena: `levels[0]` holds the leaf digests and the
//! last level holds only the root. Proofs are read off the arena by index.
use hashtree_hash::{Digest, Hasher};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub mod error;
pub mod proof;

pub use error::{MerkleError, MerkleResult};
pub use proof::{verify_digest_proof, verify_proof, Proof, ProofStep, Side, MAX_PROOF_LEN};

/// Levels at least this wide are hashed on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 12;

/// What happens to the last node of a level with an odd node count.
///
/// The two policies give different roots and proofs for the same leaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OddNodePolicy {
    /// Pair the node with itself: `H(n || n)`. Bitcoin-style; lets a list
    /// with its last element repeated produce the same root.
    #[default]
    Duplicate,
    /// Carry the node up to the next level unchanged.
    Promote,
}

impl fmt::Display for OddNodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OddNodePolicy::Duplicate => "duplicate",
            OddNodePolicy::Promote => "promote",
        })
    }
}

impl FromStr for OddNodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duplicate" => Ok(OddNodePolicy::Duplicate),
            "promote" => Ok(OddNodePolicy::Promote),
            other => Err(format!("unknown odd-node policy: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeOptions {
    pub odd_policy: OddNodePolicy,
    pub parallel_threshold: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self { odd_policy: OddNodePolicy::default(), parallel_threshold: DEFAULT_PARALLEL_THRESHOLD }
    }
}

#[derive(Clone, Debug)]
pub struct HashTree<H> {
    hasher: H,
    options: TreeOptions,
    /// Input leaves; absent when built from digests.
    leaves: Option<Vec<Vec<u8>>>,
    levels: Vec<Vec<Digest>>,
}

impl<H: Hasher> HashTree<H> {
    pub fn build<T: AsRef<[u8]> + Sync>(hasher: H, leaves: &[T]) -> MerkleResult<Self> {
        Self::build_with(hasher, leaves, TreeOptions::default())
    }

    pub fn build_with<T: AsRef<[u8]> + Sync>(hasher: H, leaves: &[T], options: TreeOptions) -> MerkleResult<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let digests: Vec<Digest> = if leaves.len() >= options.parallel_threshold {
            leaves.par_iter().map(|l| hasher.hash(l.as_ref())).collect()
        } else {
            leaves.iter().map(|l| hasher.hash(l.as_ref())).collect()
        };
        let levels = reduce(&hasher, digests, &options);
        let tree = Self {
            hasher,
            options,
            leaves: Some(leaves.iter().map(|l| l.as_ref().to_vec()).collect()),
            levels,
        };
        debug!(leaves = tree.leaf_count(), height = tree.height(), root = %tree.root(), "built hash tree");
        Ok(tree)
    }

    /// Build over leaves that are already hashed.
    pub fn from_leaf_digests(hasher: H, digests: Vec<Digest>, options: TreeOptions) -> MerkleResult<Self> {
        if digests.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let expected = hasher.output_len();
        if let Some((i, d)) = digests.iter().enumerate().find(|(_, d)| d.len() != expected) {
            return Err(MerkleError::InvalidDigestLength { index: i, expected, got: d.len() });
        }
        let levels = reduce(&hasher, digests, &options);
        let tree = Self { hasher, options, leaves: None, levels };
        debug!(leaves = tree.leaf_count(), height = tree.height(), root = %tree.root(), "built hash tree from digests");
        Ok(tree)
    }

    pub fn root(&self) -> &Digest {
        // `reduce` always ends on a single-node level
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize { self.levels[0].len() }

    /// Number of levels above the leaves.
    pub fn height(&self) -> usize { self.levels.len() - 1 }

    pub fn hasher(&self) -> &H { &self.hasher }

    pub fn options(&self) -> &TreeOptions { &self.options }

    pub fn leaves(&self) -> Option<&[Vec<u8>]> { self.leaves.as_deref() }

    pub fn leaf_digest(&self, index: usize) -> Option<&Digest> { self.levels[0].get(index) }

    pub fn level(&self, level: usize) -> Option<&[Digest]> { self.levels.get(level).map(Vec::as_slice) }

    /// Index of the first leaf equal to `leaf`.
    pub fn position_of(&self, leaf: &[u8]) -> Option<usize> {
        match &self.leaves {
            Some(leaves) => leaves.iter().position(|l| l.as_slice() == leaf),
            None => {
                let digest = self.hasher.hash(leaf);
                self.levels[0].iter().position(|d| *d == digest)
            }
        }
    }

    pub fn generate_proof(&self, index: usize) -> MerkleResult<Proof> {
        if index >= self.leaf_count() {
            return Err(MerkleError::IndexOutOfRange { index, len: self.leaf_count() });
        }
        let mut steps = Vec::with_capacity(self.height());
        let mut idx = index;
        for level in &self.levels[..self.height()] {
            let sib = idx ^ 1;
            match level.get(sib) {
                Some(sibling) => {
                    let side = if sib < idx { Side::Left } else { Side::Right };
                    steps.push(ProofStep { sibling: sibling.clone(), side });
                }
                // idx is the unpaired last node of this level
                None => {
                    if self.options.odd_policy == OddNodePolicy::Duplicate {
                        steps.push(ProofStep { sibling: level[idx].clone(), side: Side::Right });
                    }
                }
            }
            idx >>= 1;
        }
        debug!(index, steps = steps.len(), "generated proof");
        Ok(Proof::new(steps))
    }

    /// Verify `proof` for `leaf` against this tree's own root.
    pub fn verify(&self, leaf: &[u8], proof: &Proof) -> MerkleResult<bool> {
        verify_proof(&self.hasher, leaf, proof, self.root())
    }
}

fn reduce<H: Hasher>(hasher: &H, leaf_digests: Vec<Digest>, options: &TreeOptions) -> Vec<Vec<Digest>> {
    let mut levels = vec![leaf_digests];
    loop {
        let current = &levels[levels.len() - 1];
        if current.len() <= 1 {
            break;
        }
        let policy = options.odd_policy;
        // Each level is complete before the next one starts
        let next: Vec<Digest> = if current.len() >= options.parallel_threshold {
            current.par_chunks(2).map(|pair| combine(hasher, pair, policy)).collect()
        } else {
            current.chunks(2).map(|pair| combine(hasher, pair, policy)).collect()
        };
        levels.push(next);
    }
    levels
}

#[inline]
fn combine<H: Hasher>(hasher: &H, pair: &[Digest], policy: OddNodePolicy) -> Digest {
    match (pair, policy) {
        ([left, right], _) => hasher.hash_pair(left, right),
        ([single], OddNodePolicy::Duplicate) => hasher.hash_pair(single, single),
        ([single], OddNodePolicy::Promote) => single.clone(),
        _ => unreachable!("chunks(2) yields one or two nodes"),
    }
}
