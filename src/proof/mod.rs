//! Foreign-chain event proofs
//!
//! This module provides:
//! - The stored proof record and its submission input
//! - Merkle hashing under one canonical pairing rule
//! - The pure verifier applying confirmation-depth and expiry policy

pub mod merkle;
pub mod verifier;

pub use merkle::Hasher;
pub use verifier::{ProofVerifier, VerificationPolicy};

use crate::types::Digest;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of verifying a proof against a chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationResult {
    Valid,
    Invalid,
    InsufficientConfirmations,
    Expired,
    MalformedProof,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid)
    }

    /// Results that no amount of waiting will turn into `Valid`
    pub fn is_final_failure(&self) -> bool {
        matches!(
            self,
            VerificationResult::Invalid
                | VerificationResult::MalformedProof
                | VerificationResult::Expired
        )
    }

    /// Get result name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            VerificationResult::Valid => "VALID",
            VerificationResult::Invalid => "INVALID",
            VerificationResult::InsufficientConfirmations => "INSUFFICIENT_CONFIRMATIONS",
            VerificationResult::Expired => "EXPIRED",
            VerificationResult::MalformedProof => "MALFORMED_PROOF",
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current head of a chain as read from its oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub chain_id: u64,
    pub height: u64,
}

/// Proof submission as received from a caller
///
/// Byte fields stay hex strings here: shape problems are a verification
/// outcome (`MALFORMED_PROOF`), not an input rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInput {
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_hash: String,
    pub payload: String,
    pub merkle_root: String,
    pub merkle_proof: Vec<String>,
    #[serde(default)]
    pub tree_depth: Option<u32>,
    /// Transfer whose deposit this proof authorizes
    #[serde(default)]
    pub transfer_id: Option<String>,
}

/// Stored proof record
///
/// Holds only the inputs; the verification result is recomputed from them
/// and the current chain head whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainProof {
    pub proof_id: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_hash: String,
    pub payload: String,
    pub merkle_root: String,
    pub merkle_proof: Vec<String>,
    pub tree_depth: Option<u32>,
    pub transfer_id: Option<String>,
    pub timestamp: u64,
}

impl CrossChainProof {
    pub fn from_input(input: ProofInput, timestamp: u64) -> Self {
        Self {
            proof_id: uuid::Uuid::new_v4().to_string(),
            chain_id: input.chain_id,
            block_number: input.block_number,
            transaction_hash: input.transaction_hash,
            payload: input.payload,
            merkle_root: input.merkle_root,
            merkle_proof: input.merkle_proof,
            tree_depth: input.tree_depth,
            transfer_id: input.transfer_id,
            timestamp,
        }
    }

    /// Digest binding every verification input, used as a transfer's proof hash
    pub fn digest(&self, hasher: &Hasher) -> Digest {
        let chain_id = self.chain_id.to_be_bytes();
        let block_number = self.block_number.to_be_bytes();

        let mut parts: Vec<Vec<u8>> = vec![chain_id.to_vec(), block_number.to_vec()];
        for field in [&self.transaction_hash, &self.payload, &self.merkle_root] {
            parts.push(length_prefixed(field));
        }
        for sibling in &self.merkle_proof {
            parts.push(length_prefixed(sibling));
        }

        let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        hasher.digest(&refs)
    }
}

fn length_prefixed(field: &str) -> Vec<u8> {
    let normalized = field.trim().to_ascii_lowercase();
    let mut out = (normalized.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(normalized.as_bytes());
    out
}

/// Proof as returned to callers, with its freshly computed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofView {
    #[serde(flatten)]
    pub proof: CrossChainProof,
    pub verification_result: VerificationResult,
    pub head_height: u64,
}

/// Verification outcomes announced for one chain's proofs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStats {
    pub chain_id: u64,
    pub total: u64,
    pub valid: u64,
    /// Still short of confirmations when announced
    pub pending: u64,
    /// Invalid, malformed or expired
    pub failed: u64,
}

impl VerificationStats {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            ..Self::default()
        }
    }

    pub fn record(&mut self, result: VerificationResult) {
        self.total += 1;
        match result {
            VerificationResult::Valid => self.valid += 1,
            VerificationResult::InsufficientConfirmations => self.pending += 1,
            _ => self.failed += 1,
        }
    }
}
