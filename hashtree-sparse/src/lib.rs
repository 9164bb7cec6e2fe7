// File: hashtree-sparse/src/lib.rs
//! Fixed-depth, index-addressed Merkle tree.
//!
//! A tree of depth `d` has `2^d` leaf slots. Only digests that differ from
//! their level's default are stored; everything else is implied by the
//! per-level default table, so an unset slot costs nothing.
use hashtree_hash::{Digest, Hasher};
use std::collections::HashMap;
use tracing::{debug, trace};

pub mod error;
pub mod proof;
pub mod shared;

pub use error::{SparseError, SparseResult};
pub use proof::{verify_digest_proof, verify_proof, SparseProof};
pub use shared::SharedSparseTree;

/// Indices are `u64`, so 64 levels is the widest addressable tree.
pub const MAX_DEPTH: u32 = 64;

pub(crate) fn check_index(depth: u32, index: u64) -> SparseResult<()> {
    if depth < MAX_DEPTH && index >> depth != 0 {
        return Err(SparseError::IndexOutOfRange { index, depth });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeState {
    /// No update yet; every query answers with level defaults.
    Uninitialized,
    Populated,
}

#[derive(Clone, Debug)]
pub struct SparseIndexedTree<H> {
    hasher: H,
    depth: u32,
    /// `defaults[l]` is the digest of an empty subtree rooted at level `l`
    defaults: Vec<Digest>,
    nodes: HashMap<(u32, u64), Digest>,
    root: Digest,
    state: TreeState,
}

impl<H: Hasher> SparseIndexedTree<H> {
    /// Empty slots hold the digest of the empty byte string.
    pub fn new(hasher: H, depth: u32) -> SparseResult<Self> {
        let empty = hasher.hash(&[]);
        Self::with_empty_leaf(hasher, depth, empty)
    }

    /// Empty slots hold `empty_leaf` instead of `H("")`.
    pub fn with_empty_leaf(hasher: H, depth: u32, empty_leaf: Digest) -> SparseResult<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(SparseError::InvalidDepth { depth, max: MAX_DEPTH });
        }
        let expected = hasher.output_len();
        if empty_leaf.len() != expected {
            return Err(SparseError::InvalidDigestLength { expected, got: empty_leaf.len() });
        }
        let mut defaults = Vec::with_capacity(depth as usize + 1);
        defaults.push(empty_leaf);
        for level in 1..=depth as usize {
            let below = &defaults[level - 1];
            let d = hasher.hash_pair(below, below);
            defaults.push(d);
        }
        let root = defaults[depth as usize].clone();
        debug!(depth, root = %root, "created sparse tree");
        Ok(Self { hasher, depth, defaults, nodes: HashMap::new(), root, state: TreeState::Uninitialized })
    }

    pub fn depth(&self) -> u32 { self.depth }

    /// Number of leaf slots, `2^depth`.
    pub fn capacity(&self) -> u128 { 1u128 << self.depth }

    pub fn root(&self) -> &Digest { &self.root }

    pub fn state(&self) -> TreeState { self.state }

    pub fn hasher(&self) -> &H { &self.hasher }

    pub fn default_digest(&self, level: u32) -> Option<&Digest> { self.defaults.get(level as usize) }

    pub fn empty_leaf(&self) -> &Digest { &self.defaults[0] }

    /// Digest at `(level, index)`, falling back to the level default.
    pub fn get_node(&self, level: u32, index: u64) -> Option<&Digest> {
        if level > self.depth || check_index(self.depth - level, index).is_err() {
            return None;
        }
        Some(self.node(level, index))
    }

    #[inline]
    fn node(&self, level: u32, index: u64) -> &Digest {
        self.nodes.get(&(level, index)).unwrap_or(&self.defaults[level as usize])
    }

    pub fn leaf_digest(&self, index: u64) -> SparseResult<&Digest> {
        check_index(self.depth, index)?;
        Ok(self.node(0, index))
    }

    /// Whether the slot holds anything other than the empty leaf.
    pub fn is_set(&self, index: u64) -> SparseResult<bool> {
        check_index(self.depth, index)?;
        Ok(self.nodes.contains_key(&(0, index)))
    }

    /// Count of materialised (non-default) nodes across all levels.
    pub fn stored_nodes(&self) -> usize { self.nodes.len() }

    /// Set leaves in ascending index order.
    pub fn populated_leaves(&self) -> Vec<(u64, &Digest)> {
        let mut out: Vec<(u64, &Digest)> =
            self.nodes.iter().filter(|((level, _), _)| *level == 0).map(|((_, idx), d)| (*idx, d)).collect();
        out.sort_unstable_by_key(|(idx, _)| *idx);
        out
    }

    pub fn update(&mut self, index: u64, value: &[u8]) -> SparseResult<()> {
        check_index(self.depth, index)?;
        let leaf = self.hasher.hash(value);
        self.update_digest(index, leaf)
    }

    /// Point update with an already hashed leaf. Walks `depth` levels.
    pub fn update_digest(&mut self, index: u64, leaf: Digest) -> SparseResult<()> {
        check_index(self.depth, index)?;
        let expected = self.hasher.output_len();
        if leaf.len() != expected {
            return Err(SparseError::InvalidDigestLength { expected, got: leaf.len() });
        }
        let mut current = leaf;
        let mut idx = index;
        for level in 0..self.depth {
            self.store(level, idx, &current);
            let sibling = self.node(level, idx ^ 1);
            current = if idx & 1 == 0 {
                self.hasher.hash_pair(&current, sibling)
            } else {
                self.hasher.hash_pair(sibling, &current)
            };
            idx >>= 1;
        }
        self.store(self.depth, 0, &current);
        self.root = current;
        self.state = TreeState::Populated;
        trace!(index, root = %self.root, stored = self.nodes.len(), "sparse update");
        Ok(())
    }

    pub fn update_many<I, V>(&mut self, entries: I) -> SparseResult<()>
    where
        I: IntoIterator<Item = (u64, V)>,
        V: AsRef<[u8]>,
    {
        // Reject the whole batch before touching the tree
        let entries: Vec<(u64, V)> = entries.into_iter().collect();
        for (index, _) in &entries {
            check_index(self.depth, *index)?;
        }
        for (index, value) in entries {
            self.update(index, value.as_ref())?;
        }
        Ok(())
    }

    // A digest equal to the level default is never stored, and replaces any
    // entry written earlier.
    fn store(&mut self, level: u32, index: u64, digest: &Digest) {
        if *digest == self.defaults[level as usize] {
            self.nodes.remove(&(level, index));
        } else {
            self.nodes.insert((level, index), digest.clone());
        }
    }

    pub fn generate_proof(&self, index: u64) -> SparseResult<SparseProof> {
        check_index(self.depth, index)?;
        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut idx = index;
        for level in 0..self.depth {
            siblings.push(self.node(level, idx ^ 1).clone());
            idx >>= 1;
        }
        Ok(SparseProof::new(siblings))
    }

    /// Verify that `value` is stored at `index` under this tree's current root.
    pub fn verify(&self, index: u64, value: &[u8], proof: &SparseProof) -> SparseResult<bool> {
        verify_proof(&self.hasher, self.depth, index, value, proof, &self.root)
    }

    /// Verify that `index` holds the empty leaf under `trusted_root`.
    pub fn verify_non_inclusion(&self, index: u64, proof: &SparseProof, trusted_root: &Digest) -> SparseResult<bool> {
        verify_digest_proof(&self.hasher, self.depth, index, self.empty_leaf(), proof, trusted_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashtree_hash::{HashAlgorithm, Sha256, Sha3_256};
    use rand::{Rng, SeedableRng};

    // Recompute the root by hashing every slot of a small tree.
    fn dense_root<H: Hasher>(tree: &SparseIndexedTree<H>) -> Digest {
        let mut level: Vec<Digest> = (0..tree.capacity() as u64).map(|i| tree.leaf_digest(i).unwrap().clone()).collect();
        while level.len() > 1 {
            level = level.chunks(2).map(|p| tree.hasher().hash_pair(&p[0], &p[1])).collect();
        }
        level.remove(0)
    }

    #[test]
    fn depth_four_update_and_verify() {
        let mut tree = SparseIndexedTree::new(Sha256, 4).unwrap();
        tree.update(5, b"x").unwrap();
        let proof = tree.generate_proof(5).unwrap();
        assert_eq!(proof.len(), 4);
        assert!(verify_proof(&Sha256, 4, 5, b"x", &proof, tree.root()).unwrap());
        assert!(!verify_proof(&Sha256, 4, 5, b"y", &proof, tree.root()).unwrap());
        // Same proof, wrong slot
        assert!(!verify_proof(&Sha256, 4, 4, b"x", &proof, tree.root()).unwrap());
        assert_eq!(tree.root(), &dense_root(&tree));
    }

    #[test]
    fn defaults_chain_and_empty_root() {
        let tree = SparseIndexedTree::new(Sha256, 8).unwrap();
        assert_eq!(tree.state(), TreeState::Uninitialized);
        assert_eq!(tree.empty_leaf(), &Sha256.hash(b""));
        for level in 1..=8 {
            let below = tree.default_digest(level - 1).unwrap();
            assert_eq!(tree.default_digest(level).unwrap(), &Sha256.hash_pair(below, below));
        }
        assert_eq!(tree.root(), tree.default_digest(8).unwrap());
        assert_eq!(tree.stored_nodes(), 0);
        assert_eq!(tree.root(), &dense_root(&tree));
    }

    #[test]
    fn update_materialises_one_path() {
        let mut tree = SparseIndexedTree::new(Sha3_256, 16).unwrap();
        tree.update(1234, b"v").unwrap();
        assert_eq!(tree.state(), TreeState::Populated);
        // One leaf plus one node per level up to and including the root
        assert_eq!(tree.stored_nodes(), 17);
        assert_eq!(tree.get_node(16, 0), Some(tree.root()));
        assert_eq!(tree.get_node(0, 1235), tree.default_digest(0));
        assert_eq!(tree.get_node(17, 0), None);
        assert_eq!(tree.get_node(15, 2), None);
        assert_eq!(tree.populated_leaves(), vec![(1234, &Sha3_256.hash(b"v"))]);
    }

    #[test]
    fn update_is_idempotent() {
        let mut tree = SparseIndexedTree::new(Sha256, 10).unwrap();
        tree.update(77, b"same").unwrap();
        let root = tree.root().clone();
        let stored = tree.stored_nodes();
        tree.update(77, b"same").unwrap();
        assert_eq!(tree.root(), &root);
        assert_eq!(tree.stored_nodes(), stored);
    }

    #[test]
    fn writing_empty_value_clears_slot() {
        let mut tree = SparseIndexedTree::new(Sha256, 6).unwrap();
        let empty_root = tree.root().clone();
        tree.update(9, b"data").unwrap();
        assert!(tree.is_set(9).unwrap());
        tree.update(9, b"").unwrap();
        assert!(!tree.is_set(9).unwrap());
        assert_eq!(tree.root(), &empty_root);
        assert_eq!(tree.stored_nodes(), 0);
        // Back to level defaults, but an update did happen
        assert_eq!(tree.state(), TreeState::Populated);
    }

    #[test]
    fn random_updates_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for alg in HashAlgorithm::ALL {
            let mut tree = SparseIndexedTree::new(alg, 20).unwrap();
            let mut written = HashMap::new();
            for _ in 0..64 {
                let idx = rng.gen_range(0..1u64 << 20);
                let val: [u8; 8] = rng.gen();
                tree.update(idx, &val).unwrap();
                written.insert(idx, val);
            }
            for (idx, val) in &written {
                let proof = tree.generate_proof(*idx).unwrap();
                assert!(tree.verify(*idx, val, &proof).unwrap(), "{alg} {idx}");
            }
            assert_eq!(tree.populated_leaves().len(), written.len());
        }
    }

    #[test]
    fn matches_dense_recomputation() {
        let mut tree = SparseIndexedTree::new(Sha256, 5).unwrap();
        tree.update_many([(0u64, "a"), (31, "b"), (16, "c"), (17, "d")]).unwrap();
        assert_eq!(tree.root(), &dense_root(&tree));
        tree.update(16, b"c2").unwrap();
        assert_eq!(tree.root(), &dense_root(&tree));
    }

    #[test]
    fn non_inclusion_for_unset_slot() {
        let mut tree = SparseIndexedTree::new(Sha256, 12).unwrap();
        tree.update(100, b"present").unwrap();
        let proof = tree.generate_proof(101).unwrap();
        assert!(tree.verify_non_inclusion(101, &proof, tree.root()).unwrap());
        let proof = tree.generate_proof(100).unwrap();
        assert!(!tree.verify_non_inclusion(100, &proof, tree.root()).unwrap());
    }

    #[test]
    fn custom_empty_leaf() {
        let zero = Digest::new(vec![0u8; 32]);
        let tree = SparseIndexedTree::with_empty_leaf(Sha256, 3, zero.clone()).unwrap();
        assert_eq!(tree.empty_leaf(), &zero);
        assert_ne!(tree.root(), SparseIndexedTree::new(Sha256, 3).unwrap().root());
        assert_eq!(
            SparseIndexedTree::with_empty_leaf(Sha256, 3, Digest::new(vec![0u8; 4])).unwrap_err(),
            SparseError::InvalidDigestLength { expected: 32, got: 4 }
        );
    }

    #[test]
    fn stale_proof_fails_after_sibling_update() {
        let mut tree = SparseIndexedTree::new(Sha256, 8).unwrap();
        tree.update(2, b"two").unwrap();
        let old = tree.generate_proof(2).unwrap();
        tree.update(3, b"three").unwrap();
        assert!(!tree.verify(2, b"two", &old).unwrap());
        let fresh = tree.generate_proof(2).unwrap();
        assert!(tree.verify(2, b"two", &fresh).unwrap());
    }

    #[test]
    fn bounds_and_depth_checks() {
        let mut tree = SparseIndexedTree::new(Sha256, 4).unwrap();
        assert_eq!(tree.update(16, b"x").unwrap_err(), SparseError::IndexOutOfRange { index: 16, depth: 4 });
        assert!(tree.generate_proof(16).is_err());
        assert!(tree.leaf_digest(u64::MAX).is_err());
        assert_eq!(tree.state(), TreeState::Uninitialized);
        assert!(matches!(SparseIndexedTree::new(Sha256, 0), Err(SparseError::InvalidDepth { depth: 0, .. })));
        assert!(matches!(SparseIndexedTree::new(Sha256, 65), Err(SparseError::InvalidDepth { depth: 65, .. })));

        let mut wide = SparseIndexedTree::new(Sha256, 64).unwrap();
        assert_eq!(wide.capacity(), 1u128 << 64);
        wide.update(u64::MAX, b"edge").unwrap();
        let proof = wide.generate_proof(u64::MAX).unwrap();
        assert!(wide.verify(u64::MAX, b"edge", &proof).unwrap());
    }

    #[test]
    fn batch_with_bad_index_changes_nothing() {
        let mut tree = SparseIndexedTree::new(Sha256, 4).unwrap();
        let root = tree.root().clone();
        let err = tree.update_many([(3u64, "a"), (99, "b")]).unwrap_err();
        assert_eq!(err, SparseError::IndexOutOfRange { index: 99, depth: 4 });
        assert_eq!(tree.root(), &root);
        assert_eq!(tree.state(), TreeState::Uninitialized);
        assert_eq!(tree.stored_nodes(), 0);

        tree.update(1, b"kept").unwrap();
        let root = tree.root().clone();
        let stored = tree.stored_nodes();
        assert!(tree.update_many([(2u64, "b"), (16, "c")]).is_err());
        assert_eq!(tree.root(), &root);
        assert_eq!(tree.stored_nodes(), stored);
        assert!(!tree.is_set(2).unwrap());
    }

    #[test]
    fn malformed_proofs_rejected() {
        let mut tree = SparseIndexedTree::new(Sha256, 4).unwrap();
        tree.update(5, b"x").unwrap();
        let proof = tree.generate_proof(5).unwrap();

        let short = SparseProof::new(proof.siblings()[..3].to_vec());
        assert!(matches!(tree.verify(5, b"x", &short), Err(SparseError::MalformedProof(_))));

        let mut sibs = proof.siblings().to_vec();
        sibs[1] = Digest::new(vec![1u8; 20]);
        assert!(matches!(tree.verify(5, b"x", &SparseProof::new(sibs)), Err(SparseError::MalformedProof(_))));

        assert!(matches!(
            verify_proof(&Sha256, 4, 99, b"x", &proof, tree.root()),
            Err(SparseError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn tampered_sibling_fails() {
        let mut tree = SparseIndexedTree::new(Sha256, 6).unwrap();
        tree.update(13, b"v").unwrap();
        let proof = tree.generate_proof(13).unwrap();
        for level in 0..proof.len() {
            let mut sibs = proof.siblings().to_vec();
            let mut bytes = sibs[level].as_bytes().to_vec();
            bytes[0] ^= 0xff;
            sibs[level] = Digest::new(bytes);
            assert!(!tree.verify(13, b"v", &SparseProof::new(sibs)).unwrap(), "level {level}");
        }
    }

    #[test]
    fn proof_bytes_layout() {
        let mut tree = SparseIndexedTree::new(Sha256, 7).unwrap();
        tree.update(3, b"q").unwrap();
        let proof = tree.generate_proof(3).unwrap();
        let bytes = proof.to_bytes();
        assert_eq!(bytes.len(), 7 * 32);
        assert_eq!(&bytes[..32], proof.siblings()[0].as_bytes());
        assert_eq!(SparseProof::from_bytes(&bytes, 7, 32).unwrap(), proof);
        assert!(SparseProof::from_bytes(&bytes, 6, 32).is_err());
        assert!(SparseProof::from_bytes(&bytes[1..], 7, 32).is_err());
    }
}
