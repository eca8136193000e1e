//! Error types for the settlement engine

use crate::proof::VerificationResult;
use thiserror::Error;

/// Main error type for settlement operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Swap {swap_id} not found")]
    SwapNotFound { swap_id: String },

    #[error("Transfer {transfer_id} not found")]
    TransferNotFound { transfer_id: String },

    #[error("Proof {proof_id} not found")]
    ProofNotFound { proof_id: String },

    #[error("Swap proposal {proposal_id} not found")]
    ProposalNotFound { proposal_id: String },

    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: String, action: String },

    #[error("Cannot {action} while in state {state}")]
    StateConflict { state: String, action: String },

    #[error("Secret does not match the stored secret hash")]
    InvalidSecret,

    #[error("Swap expired at {expires_at}")]
    Expired { expires_at: u64 },

    #[error("Swap does not expire until {expires_at}")]
    NotYetExpired { expires_at: u64 },

    #[error("Stale event from chain {chain_id} at block {block_number}, already applied block {applied}")]
    StaleEvent {
        chain_id: u64,
        block_number: u64,
        applied: u64,
    },

    #[error("Proof {proof_id} failed verification: {result}")]
    VerificationFailure {
        proof_id: String,
        result: VerificationResult,
    },

    #[error("Chain read error for chain {chain_id}: {message}")]
    ExternalRead { chain_id: u64, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Finality not reached for tx {tx_hash} on chain {chain_id}")]
    FinalityNotReached { chain_id: u64, tx_hash: String },

    #[error("Version conflict writing {entity_id}: expected {expected}, found {found}")]
    VersionConflict {
        entity_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Check if error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::ExternalRead { .. }
                | SettlementError::Timeout { .. }
                | SettlementError::FinalityNotReached { .. }
        )
    }

    /// Check if error was raised before any state was read or written
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SettlementError::Validation(_)
                | SettlementError::ChainNotFound { .. }
                | SettlementError::Unauthorized { .. }
        )
    }

    /// Check if error is a rejected state transition
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            SettlementError::StateConflict { .. }
                | SettlementError::InvalidSecret
                | SettlementError::Expired { .. }
                | SettlementError::NotYetExpired { .. }
                | SettlementError::StaleEvent { .. }
                | SettlementError::VersionConflict { .. }
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::Config(_) => "config",
            SettlementError::Validation(_)
            | SettlementError::ChainNotFound { .. }
            | SettlementError::Unauthorized { .. } => "validation",
            SettlementError::SwapNotFound { .. }
            | SettlementError::TransferNotFound { .. }
            | SettlementError::ProofNotFound { .. }
            | SettlementError::ProposalNotFound { .. } => "not_found",
            SettlementError::StateConflict { .. }
            | SettlementError::StaleEvent { .. }
            | SettlementError::VersionConflict { .. } => "state_conflict",
            SettlementError::InvalidSecret => "invalid_secret",
            SettlementError::Expired { .. } => "expired",
            SettlementError::NotYetExpired { .. } => "not_yet_expired",
            SettlementError::VerificationFailure { .. } => "verification_failure",
            SettlementError::ExternalRead { .. }
            | SettlementError::Timeout { .. }
            | SettlementError::FinalityNotReached { .. } => "external_read",
            SettlementError::Internal(_) => "internal",
        }
    }
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
