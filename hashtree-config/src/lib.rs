use hashtree_hash::HashAlgorithm;
use hashtree_merkle::{OddNodePolicy, TreeOptions, DEFAULT_PARALLEL_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SPARSE_DEPTH: u32 = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading params file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing params: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid params: {0}")]
    Invalid(String),
}

/// How sibling digests are joined before hashing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairEncoding {
    /// `H(left || right)` over raw digest bytes
    #[default]
    Raw,
    /// `H(hex(left) || hex(right))` over lowercase hex text
    Hex,
}

/// Tree parameters. Every field is optional so a file only needs to name what
/// it overrides.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// Hash function: "sha256", "sha3-256" or "shake256-384"
    pub hash: Option<HashAlgorithm>,
    pub pair_encoding: Option<PairEncoding>,
    /// Dense trees: "duplicate" or "promote"
    pub odd_policy: Option<OddNodePolicy>,
    /// Dense trees: hash a level in parallel once it has this many nodes
    pub parallel_threshold: Option<usize>,
    /// Sparse trees: number of levels above the leaves
    pub sparse_depth: Option<u32>,
}

impl Params {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let txt = std::fs::read_to_string(path)?;
        load_params_toml(&txt)
    }

    pub fn hash(&self) -> HashAlgorithm { self.hash.unwrap_or_default() }

    pub fn pair_encoding(&self) -> PairEncoding { self.pair_encoding.unwrap_or_default() }

    pub fn sparse_depth(&self) -> u32 { self.sparse_depth.unwrap_or(DEFAULT_SPARSE_DEPTH) }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            odd_policy: self.odd_policy.unwrap_or_default(),
            parallel_threshold: self.parallel_threshold.unwrap_or(DEFAULT_PARALLEL_THRESHOLD),
        }
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: Params) -> Params {
        Params {
            hash: self.hash.or(other.hash),
            pair_encoding: self.pair_encoding.or(other.pair_encoding),
            odd_policy: self.odd_policy.or(other.odd_policy),
            parallel_threshold: self.parallel_threshold.or(other.parallel_threshold),
            sparse_depth: self.sparse_depth.or(other.sparse_depth),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(d) = self.sparse_depth {
            if d == 0 || d > 64 {
                return Err(ConfigError::Invalid(format!("sparse_depth must be in 1..=64, got {d}")));
            }
        }
        if self.parallel_threshold == Some(0) {
            return Err(ConfigError::Invalid("parallel_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parse tree parameters from TOML text
pub fn load_params_toml(input: &str) -> Result<Params, ConfigError> {
    let params = toml::from_str::<Params>(input)?;
    params.validate()?;
    Ok(params)
}
