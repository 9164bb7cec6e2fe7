use thiserror::Error;

pub type MerkleResult<T> = Result<T, MerkleError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// A tree needs at least one leaf
    #[error("cannot build a tree from zero leaves")]
    EmptyInput,

    #[error("leaf index out of range: {index} >= {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("leaf digest {index} is {got} bytes, expected {expected}")]
    InvalidDigestLength { index: usize, expected: usize, got: usize },

    /// Wrong step count, wrong digest size or an unknown side tag
    #[error("malformed proof: {0}")]
    MalformedProof(String),
}
