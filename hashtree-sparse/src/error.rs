//! Error types for sparse tree operations.

use thiserror::Error;

pub type SparseResult<T> = Result<T, SparseError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SparseError {
    #[error("tree depth must be between 1 and {max}, got {depth}")]
    InvalidDepth { depth: u32, max: u32 },

    #[error("index {index} out of range for depth {depth}")]
    IndexOutOfRange { index: u64, depth: u32 },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("invalid digest length: expected {expected}, got {got}")]
    InvalidDigestLength { expected: usize, got: usize },
}
