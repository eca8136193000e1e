//! Merkle tree hashing with a single canonical pairing rule
//!
//! Pairing rule (sorted pair): an inner node is
//! `H(0x01 || min(a, b) || max(a, b))`, comparing the two child digests
//! bytewise. Proofs therefore carry sibling digests only, no left/right
//! flags, which matches the `[String!]` sibling list of the proof contract.
//! Leaves are `H(0x00 || tx_hash || payload)`; the prefixes keep a leaf from
//! ever being reinterpreted as an inner node.

use crate::config::HashAlgorithm;
use crate::types::Digest;

use sha2::Sha256;
use sha3::{Keccak256, Sha3_256};

/// Deepest proof accepted (a tree of 2^64 leaves)
pub const MAX_PROOF_DEPTH: usize = 64;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Configured hashing primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hasher {
    algorithm: HashAlgorithm,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash the concatenation of `parts`
    pub fn digest(&self, parts: &[&[u8]]) -> Digest {
        match self.algorithm {
            HashAlgorithm::Keccak256 => run::<Keccak256>(parts),
            HashAlgorithm::Sha3_256 => run::<Sha3_256>(parts),
            HashAlgorithm::Sha256 => run::<Sha256>(parts),
        }
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

fn run<D: sha3::Digest>(parts: &[&[u8]]) -> Digest {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    let output = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&output[..32]);
    Digest(bytes)
}

/// Leaf digest of an event: transaction hash plus opaque payload
pub fn leaf_hash(hasher: &Hasher, tx_hash: &[u8], payload: &[u8]) -> Digest {
    hasher.digest(&[&[LEAF_PREFIX], tx_hash, payload])
}

/// Combine two children under the sorted-pair rule
pub fn hash_pair(hasher: &Hasher, a: &Digest, b: &Digest) -> Digest {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    hasher.digest(&[&[NODE_PREFIX], lo.as_bytes(), hi.as_bytes()])
}

/// Fold a leaf with its siblings, leaf to root
pub fn compute_root(hasher: &Hasher, leaf: Digest, siblings: &[Digest]) -> Digest {
    siblings
        .iter()
        .fold(leaf, |current, sibling| hash_pair(hasher, &current, sibling))
}

/// Root of a leaf set; an odd node at any level is paired with itself
pub fn root_of(hasher: &Hasher, leaves: &[Digest]) -> Option<Digest> {
    if leaves.is_empty() {
        return None;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(hasher, &level);
    }
    level.first().copied()
}

/// Sibling path for the leaf at `index`
pub fn proof_for(hasher: &Hasher, leaves: &[Digest], index: usize) -> Option<Vec<Digest>> {
    if index >= leaves.len() {
        return None;
    }

    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut index = index;

    while level.len() > 1 {
        let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
        // Last node of an odd level is its own sibling
        proof.push(*level.get(sibling).unwrap_or(&level[index]));
        level = next_level(hasher, &level);
        index /= 2;
    }

    Some(proof)
}

fn next_level(hasher: &Hasher, level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            hash_pair(hasher, left, right)
        })
        .collect()
}
