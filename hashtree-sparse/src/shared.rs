//! A sparse tree behind a read/write lock.
//!
//! Updates are serialised through the write lock; proofs and root reads share
//! the read lock and may run in parallel with each other.
use std::sync::Arc;

use hashtree_hash::{Digest, Hasher};
use parking_lot::RwLock;

use crate::error::SparseResult;
use crate::proof::SparseProof;
use crate::SparseIndexedTree;

#[derive(Debug)]
pub struct SharedSparseTree<H> {
    inner: Arc<RwLock<SparseIndexedTree<H>>>,
}

impl<H> Clone for SharedSparseTree<H> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<H: Hasher> SharedSparseTree<H> {
    pub fn new(tree: SparseIndexedTree<H>) -> Self {
        Self { inner: Arc::new(RwLock::new(tree)) }
    }

    /// Apply one update and return the root it produced.
    pub fn update(&self, index: u64, value: &[u8]) -> SparseResult<Digest> {
        let mut tree = self.inner.write();
        tree.update(index, value)?;
        Ok(tree.root().clone())
    }

    /// Proof together with the root it was taken against.
    pub fn generate_proof(&self, index: u64) -> SparseResult<(SparseProof, Digest)> {
        let tree = self.inner.read();
        let proof = tree.generate_proof(index)?;
        Ok((proof, tree.root().clone()))
    }

    pub fn root(&self) -> Digest { self.inner.read().root().clone() }

    pub fn depth(&self) -> u32 { self.inner.read().depth() }

    /// Run `f` against the tree under the read lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&SparseIndexedTree<H>) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<H: Hasher + Clone> SharedSparseTree<H> {
    pub fn snapshot(&self) -> SparseIndexedTree<H> { self.inner.read().clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify_proof;
    use hashtree_hash::Sha256;
    use std::thread;

    #[test]
    fn concurrent_writers_match_sequential() {
        let shared = SharedSparseTree::new(SparseIndexedTree::new(Sha256, 16).unwrap());
        thread::scope(|s| {
            for t in 0..4u64 {
                let shared = shared.clone();
                s.spawn(move || {
                    for i in 0..50u64 {
                        let idx = t * 1000 + i;
                        shared.update(idx, &idx.to_le_bytes()).unwrap();
                    }
                });
            }
        });

        let mut seq = SparseIndexedTree::new(Sha256, 16).unwrap();
        for t in 0..4u64 {
            for i in 0..50u64 {
                let idx = t * 1000 + i;
                seq.update(idx, &idx.to_le_bytes()).unwrap();
            }
        }
        assert_eq!(&shared.root(), seq.root());
        assert_eq!(shared.with_tree(|t| t.populated_leaves().len()), 200);
    }

    #[test]
    fn readers_get_consistent_proof_and_root() {
        let shared = SharedSparseTree::new(SparseIndexedTree::new(Sha256, 10).unwrap());
        shared.update(7, b"seven").unwrap();
        thread::scope(|s| {
            let writer = shared.clone();
            s.spawn(move || {
                for i in 100..200u64 {
                    writer.update(i, b"noise").unwrap();
                }
            });
            for _ in 0..3 {
                let reader = shared.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        let (proof, root) = reader.generate_proof(7).unwrap();
                        assert!(verify_proof(&Sha256, 10, 7, b"seven", &proof, &root).unwrap());
                    }
                });
            }
        });
    }

    #[test]
    fn snapshot_is_detached() {
        let shared = SharedSparseTree::new(SparseIndexedTree::new(Sha256, 4).unwrap());
        let root = shared.update(1, b"a").unwrap();
        let snap = shared.snapshot();
        shared.update(2, b"b").unwrap();
        assert_eq!(snap.root(), &root);
        assert_ne!(shared.root(), root);
        assert_eq!(shared.depth(), 4);
    }
}
