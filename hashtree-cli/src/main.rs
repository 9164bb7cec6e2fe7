// File: hashtree-cli/src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hashtree_config::{self as config, PairEncoding, Params};
use hashtree_hash::{Digest, HashAlgorithm, Hasher, HexPairing};
use hashtree_merkle::{HashTree, OddNodePolicy, Proof};
use hashtree_sparse::{SparseIndexedTree, SparseProof};
use serde::{Deserialize, Serialize};
use std::{fs, io::Read, path::Path, path::PathBuf};
use tracing::{debug, info, Level};

const FILE_VERSION: u8 = 1;

#[derive(Parser)]
#[command(name = "hashtree", version, about = "Merkle tree roots and inclusion proofs")]
struct Cli {
    /// Log tree construction and proof details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Optional params file (toml); its values take precedence over flags
    #[arg(long, global = true)]
    params: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Clone, Default)]
struct HashArgs {
    /// sha256, sha3-256 or shake256-384
    #[arg(long)]
    hash: Option<HashAlgorithm>,
    /// Pair children as hex text instead of raw bytes
    #[arg(long)]
    hex_pairing: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the root of a dense tree with one leaf per input line
    Root {
        /// Leaf file, or "-" for stdin
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        hash: HashArgs,
        /// duplicate or promote
        #[arg(long)]
        odd: Option<OddNodePolicy>,
    },
    /// Write an inclusion proof for one line of the input
    Prove {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        index: usize,
        #[arg(long, default_value = "proof.bin")]
        out: PathBuf,
        #[command(flatten)]
        hash: HashArgs,
        #[arg(long)]
        odd: Option<OddNodePolicy>,
    },
    /// Verify a dense proof file for a leaf
    Verify {
        #[arg(long, default_value = "proof.bin")]
        proof: PathBuf,
        #[arg(long, conflicts_with = "leaf_hex", required_unless_present = "leaf_hex")]
        leaf: Option<String>,
        /// Leaf bytes given as hex, for leaves that are not text
        #[arg(long)]
        leaf_hex: Option<String>,
        /// Trusted root hex; defaults to the root recorded in the proof file
        #[arg(long)]
        root: Option<String>,
    },
    /// Build a sparse tree from INDEX=VALUE assignments and prove one slot
    SparseProve {
        #[arg(long)]
        depth: Option<u32>,
        /// Assignment INDEX=VALUE, repeatable
        #[arg(long = "set")]
        set: Vec<String>,
        #[arg(long)]
        index: u64,
        #[arg(long, default_value = "sparse-proof.bin")]
        out: PathBuf,
        #[command(flatten)]
        hash: HashArgs,
    },
    /// Verify a sparse proof file for a value, or for an empty slot
    SparseVerify {
        #[arg(long, default_value = "sparse-proof.bin")]
        proof: PathBuf,
        #[arg(long, conflicts_with = "absent", required_unless_present = "absent")]
        value: Option<String>,
        /// Check that the slot was never set
        #[arg(long)]
        absent: bool,
        #[arg(long)]
        root: Option<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct DenseProofFile {
    version: u8,
    hash: HashAlgorithm,
    pair_encoding: PairEncoding,
    odd_policy: OddNodePolicy,
    leaf_count: usize,
    index: usize,
    root: Digest,
    /// Proof in its wire encoding
    proof: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct SparseProofFile {
    version: u8,
    hash: HashAlgorithm,
    pair_encoding: PairEncoding,
    depth: u32,
    index: u64,
    root: Digest,
    proof: Vec<u8>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let file_params = match &cli.params {
        Some(p) => Params::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => Params::default(),
    };

    match cli.cmd {
        Cmd::Root { input, hash, odd } => {
            let params = file_params.or(flag_params(&hash, odd, None));
            let leaves = read_leaves(&input)?;
            let tree = build_dense(&params, &leaves)?;
            println!("root={}", tree.root());
            println!("leaves={} height={}", tree.leaf_count(), tree.height());
        }
        Cmd::Prove { input, index, out, hash, odd } => {
            let params = file_params.or(flag_params(&hash, odd, None));
            let leaves = read_leaves(&input)?;
            let file = prove_dense(&params, &leaves, index)?;
            write_file(&out, &file)?;
            println!("wrote {}", out.display());
            println!("root={} proof={}", file.root, hex::encode(&file.proof));
        }
        Cmd::Verify { proof, leaf, leaf_hex, root } => {
            let file: DenseProofFile = read_file(&proof)?;
            let leaf = match (leaf, leaf_hex) {
                (_, Some(h)) => hex::decode(h.trim()).context("parsing --leaf-hex")?,
                (Some(text), None) => text.into_bytes(),
                (None, None) => bail!("one of --leaf or --leaf-hex is required"),
            };
            let ok = verify_dense(&file, &leaf, root.as_deref())?;
            println!("{}", if ok { "valid" } else { "invalid" });
        }
        Cmd::SparseProve { depth, set, index, out, hash } => {
            let params = file_params.or(flag_params(&hash, None, depth));
            let entries = set.iter().map(|s| parse_assignment(s)).collect::<Result<Vec<_>>>()?;
            let file = prove_sparse(&params, &entries, index)?;
            write_file(&out, &file)?;
            println!("wrote {}", out.display());
            println!("root={} depth={}", file.root, file.depth);
        }
        Cmd::SparseVerify { proof, value, absent, root } => {
            let file: SparseProofFile = read_file(&proof)?;
            let claim = if absent { None } else { value.as_deref().map(str::as_bytes) };
            let ok = verify_sparse(&file, claim, root.as_deref())?;
            println!("{}", if ok { "valid" } else { "invalid" });
        }
    }
    Ok(())
}

fn flag_params(hash: &HashArgs, odd: Option<OddNodePolicy>, depth: Option<u32>) -> Params {
    Params {
        hash: hash.hash,
        pair_encoding: hash.hex_pairing.then_some(PairEncoding::Hex),
        odd_policy: odd,
        sparse_depth: depth,
        ..Params::default()
    }
}

fn make_hasher(alg: HashAlgorithm, enc: PairEncoding) -> Box<dyn Hasher> {
    match enc {
        PairEncoding::Raw => Box::new(alg),
        PairEncoding::Hex => Box::new(HexPairing(alg)),
    }
}

/// Leaves are raw bytes; only `\n` (with an optional `\r` before it) separates them.
fn read_leaves(input: &Path) -> Result<Vec<Vec<u8>>> {
    let buf = if input.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        buf
    } else {
        fs::read(input).with_context(|| format!("reading {}", input.display()))?
    };
    Ok(split_lines(&buf))
}

fn split_lines(buf: &[u8]) -> Vec<Vec<u8>> {
    if buf.is_empty() {
        return Vec::new();
    }
    let body = buf.strip_suffix(b"\n").unwrap_or(buf);
    body.split(|b| *b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l).to_vec()).collect()
}

fn build_dense(params: &Params, leaves: &[Vec<u8>]) -> Result<HashTree<Box<dyn Hasher>>> {
    params.validate()?;
    let hasher = make_hasher(params.hash(), params.pair_encoding());
    info!(hash = %params.hash(), leaves = leaves.len(), "building dense tree");
    Ok(HashTree::build_with(hasher, leaves, params.tree_options())?)
}

fn prove_dense(params: &Params, leaves: &[Vec<u8>], index: usize) -> Result<DenseProofFile> {
    let tree = build_dense(params, leaves)?;
    let proof = tree.generate_proof(index)?;
    Ok(DenseProofFile {
        version: FILE_VERSION,
        hash: params.hash(),
        pair_encoding: params.pair_encoding(),
        odd_policy: tree.options().odd_policy,
        leaf_count: tree.leaf_count(),
        index,
        root: tree.root().clone(),
        proof: proof.to_bytes(),
    })
}

fn verify_dense(file: &DenseProofFile, leaf: &[u8], root_hex: Option<&str>) -> Result<bool> {
    check_version(file.version)?;
    if file.index >= file.leaf_count {
        bail!("proof file claims leaf {} of a {}-leaf tree", file.index, file.leaf_count);
    }
    let hasher = make_hasher(file.hash, file.pair_encoding);
    let proof = Proof::from_bytes(&file.proof, hasher.output_len())?;
    let root = trusted_root(&file.root, root_hex, hasher.output_len())?;
    debug!(index = file.index, leaf_count = file.leaf_count, steps = proof.len(), "verifying dense proof");
    Ok(hashtree_merkle::verify_proof(&hasher, leaf, &proof, &root)?)
}

fn parse_assignment(s: &str) -> Result<(u64, Vec<u8>)> {
    let Some((idx, value)) = s.split_once('=') else {
        bail!("expected INDEX=VALUE, got {s:?}");
    };
    let idx = idx.trim().parse::<u64>().with_context(|| format!("bad index in {s:?}"))?;
    Ok((idx, value.as_bytes().to_vec()))
}

fn prove_sparse(params: &Params, entries: &[(u64, Vec<u8>)], index: u64) -> Result<SparseProofFile> {
    params.validate()?;
    let hasher = make_hasher(params.hash(), params.pair_encoding());
    let mut tree = SparseIndexedTree::new(hasher, params.sparse_depth())?;
    tree.update_many(entries.iter().map(|(i, v)| (*i, v.as_slice())))?;
    info!(depth = tree.depth(), set = tree.populated_leaves().len(), "built sparse tree");
    let proof = tree.generate_proof(index)?;
    Ok(SparseProofFile {
        version: FILE_VERSION,
        hash: params.hash(),
        pair_encoding: params.pair_encoding(),
        depth: tree.depth(),
        index,
        root: tree.root().clone(),
        proof: proof.to_bytes(),
    })
}

/// `value == None` checks that the slot is empty.
fn verify_sparse(file: &SparseProofFile, value: Option<&[u8]>, root_hex: Option<&str>) -> Result<bool> {
    check_version(file.version)?;
    let hasher = make_hasher(file.hash, file.pair_encoding);
    let proof = SparseProof::from_bytes(&file.proof, file.depth, hasher.output_len())?;
    let root = trusted_root(&file.root, root_hex, hasher.output_len())?;
    let leaf = hasher.hash(value.unwrap_or_default());
    debug!(index = file.index, depth = file.depth, absent = value.is_none(), "verifying sparse proof");
    Ok(hashtree_sparse::verify_digest_proof(&hasher, file.depth, file.index, &leaf, &proof, &root)?)
}

fn trusted_root(recorded: &Digest, root_hex: Option<&str>, len: usize) -> Result<Digest> {
    match root_hex {
        Some(h) => Ok(Digest::from_hex(h, len).context("parsing --root")?),
        None => Ok(recorded.clone()),
    }
}

fn check_version(v: u8) -> Result<()> {
    if v != FILE_VERSION {
        bail!("unsupported proof file version {v}");
    }
    Ok(())
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    bincode::serialize_into(&mut f, value).context("encoding proof file")?;
    Ok(())
}

fn read_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let f = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(bincode::deserialize_from(f).context("decoding proof file")?)
}
