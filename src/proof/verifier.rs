//! Proof verification against a chain head
//!
//! Verification is a pure function of the stored proof inputs, the chain's
//! policy and the head height passed in. Nothing here reads a chain.

use super::merkle::{self, Hasher, MAX_PROOF_DEPTH};
use super::{ChainHead, CrossChainProof, ProofView, VerificationResult};
use crate::config::ChainConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::types::{decode_hex, Digest};

use std::collections::HashMap;
use tracing::debug;

/// Confirmation and expiry policy for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Blocks that must sit on top of the proven block
    pub required_confirmations: u64,
    /// Proofs further than this many blocks behind the head are expired
    pub validity_window_blocks: u64,
}

impl From<&ChainConfig> for VerificationPolicy {
    fn from(config: &ChainConfig) -> Self {
        Self {
            required_confirmations: config.confirmation_blocks,
            validity_window_blocks: config.proof_validity_blocks,
        }
    }
}

/// Decoded proof fields that passed the shape checks
struct ParsedProof {
    leaf: Digest,
    root: Digest,
    siblings: Vec<Digest>,
}

#[derive(Debug, Clone)]
pub struct ProofVerifier {
    hasher: Hasher,
    policies: HashMap<u64, VerificationPolicy>,
}

impl ProofVerifier {
    pub fn new(hasher: Hasher) -> Self {
        Self {
            hasher,
            policies: HashMap::new(),
        }
    }

    /// Build a verifier covering every enabled chain
    pub fn from_chains<'a>(
        hasher: Hasher,
        chains: impl IntoIterator<Item = &'a ChainConfig>,
    ) -> Self {
        let policies = chains
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| (c.chain_id, VerificationPolicy::from(c)))
            .collect();
        Self { hasher, policies }
    }

    pub fn with_policy(mut self, chain_id: u64, policy: VerificationPolicy) -> Self {
        self.policies.insert(chain_id, policy);
        self
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn policy(&self, chain_id: u64) -> Option<&VerificationPolicy> {
        self.policies.get(&chain_id)
    }

    /// Verify a proof against the given head of its chain
    ///
    /// Errors only when the request itself is wrong (unknown chain, or a head
    /// read from a different chain). Every problem with the proof is a result.
    pub fn verify(
        &self,
        proof: &CrossChainProof,
        head: ChainHead,
    ) -> SettlementResult<VerificationResult> {
        let policy = self
            .policies
            .get(&proof.chain_id)
            .ok_or(SettlementError::ChainNotFound {
                chain_id: proof.chain_id,
            })?;

        if head.chain_id != proof.chain_id {
            return Err(SettlementError::Validation(format!(
                "head of chain {} supplied for a proof on chain {}",
                head.chain_id, proof.chain_id
            )));
        }

        let parsed = match self.parse(proof) {
            Some(parsed) => parsed,
            None => return Ok(VerificationResult::MalformedProof),
        };

        let computed = merkle::compute_root(&self.hasher, parsed.leaf, &parsed.siblings);
        if computed != parsed.root {
            debug!(
                "Proof {} root mismatch: computed {}, claimed {}",
                proof.proof_id, computed, parsed.root
            );
            return Ok(VerificationResult::Invalid);
        }

        let confirmations = head.height.saturating_sub(proof.block_number);
        if head.height < proof.block_number || confirmations < policy.required_confirmations {
            return Ok(VerificationResult::InsufficientConfirmations);
        }

        if confirmations > policy.validity_window_blocks {
            return Ok(VerificationResult::Expired);
        }

        Ok(VerificationResult::Valid)
    }

    /// Verify and package the proof with its result for callers
    pub fn view(&self, proof: &CrossChainProof, head: ChainHead) -> SettlementResult<ProofView> {
        let verification_result = self.verify(proof, head)?;
        Ok(ProofView {
            proof: proof.clone(),
            verification_result,
            head_height: head.height,
        })
    }

    fn parse(&self, proof: &CrossChainProof) -> Option<ParsedProof> {
        let tx_hash = Digest::from_slice(&decode_hex(&proof.transaction_hash)?)?;
        let payload = decode_hex(&proof.payload)?;
        if payload.is_empty() {
            return None;
        }
        let root = Digest::from_slice(&decode_hex(&proof.merkle_root)?)?;

        if proof.merkle_proof.len() > MAX_PROOF_DEPTH {
            return None;
        }
        if let Some(depth) = proof.tree_depth {
            if depth as usize != proof.merkle_proof.len() {
                return None;
            }
        }

        let siblings = proof
            .merkle_proof
            .iter()
            .map(|s| decode_hex(s).and_then(|bytes| Digest::from_slice(&bytes)))
            .collect::<Option<Vec<_>>>()?;

        let leaf = merkle::leaf_hash(&self.hasher, tx_hash.as_bytes(), &payload);

        // A proof without siblings only stands for a single-leaf tree
        if siblings.is_empty() && leaf != root {
            return None;
        }

        Some(ParsedProof {
            leaf,
            root,
            siblings,
        })
    }
}
