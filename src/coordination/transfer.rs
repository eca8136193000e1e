//! Cross-chain transfer lifecycle
//!
//! `PENDING -> IN_PROGRESS -> COMPLETED`, with `FAILED` and `REFUNDED` as
//! the other terminal states. A transfer only leaves `PENDING` on a deposit
//! proof that verified `VALID`, and the digest of that proof is pinned as
//! the transfer's proof hash from then on.

use super::Transition;
use crate::error::{SettlementError, SettlementResult};
use crate::proof::VerificationResult;
use crate::tx::ActionIntent;
use crate::types::{require_non_empty, Amount, Digest, EventCursor};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Refunded,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Refunded
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::InProgress => "IN_PROGRESS",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied transfer parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub sender: String,
    pub recipient: String,
    pub amount: Amount,
    pub token_address: String,
}

/// Execution data of a confirmed on-chain action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_hash: String,
    pub gas_used: u64,
    pub fees: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTransfer {
    pub transfer_id: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub sender: String,
    pub recipient: String,
    pub amount: Amount,
    pub token_address: String,
    pub timestamp: u64,
    pub status: TransferStatus,
    pub proof_hash: Option<Digest>,
    pub gas_used: Option<u64>,
    pub tx_hash: Option<String>,
    pub fees: Option<Amount>,
    /// Deposit proof still short of confirmations
    pub pending_proof_id: Option<String>,
    /// Proof that moved the transfer to `IN_PROGRESS`, re-checked while in flight
    pub deposit_proof_id: Option<String>,
    pub verification_attempts: u32,
    pub failure_reason: Option<String>,
    pub refund_requested: bool,
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub cursor: EventCursor,
}

impl CrossChainTransfer {
    /// Record a new transfer awaiting its deposit proof
    pub fn initiate(
        transfer_id: String,
        request: TransferRequest,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        require_non_empty("sender", &request.sender)?;
        require_non_empty("recipient", &request.recipient)?;
        require_non_empty("token address", &request.token_address)?;
        if request.from_chain_id == request.to_chain_id {
            return Err(SettlementError::Validation(format!(
                "transfer origin and destination are both chain {}",
                request.from_chain_id
            )));
        }
        if request.amount.is_zero() {
            return Err(SettlementError::Validation(
                "transfer amount must be positive".to_string(),
            ));
        }

        let transfer = CrossChainTransfer {
            transfer_id,
            from_chain_id: request.from_chain_id,
            to_chain_id: request.to_chain_id,
            sender: request.sender,
            recipient: request.recipient,
            amount: request.amount,
            token_address: request.token_address,
            timestamp: now,
            status: TransferStatus::Pending,
            proof_hash: None,
            gas_used: None,
            tx_hash: None,
            fees: None,
            pending_proof_id: None,
            deposit_proof_id: None,
            verification_attempts: 0,
            failure_reason: None,
            refund_requested: false,
            completed_at: None,
            cursor: EventCursor::default(),
        };

        Ok(Transition::new(transfer, Vec::new()))
    }

    /// Apply the verification result of a deposit proof
    ///
    /// `VALID` starts the transfer; `INSUFFICIENT_CONFIRMATIONS` parks the
    /// proof for re-checking as the origin chain advances. Anything else is
    /// a verification failure and leaves the transfer untouched.
    pub fn on_deposit_proof(
        &self,
        proof_id: &str,
        proof_chain_id: u64,
        proof_hash: Digest,
        result: VerificationResult,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::Pending {
            return Err(self.conflict("apply a deposit proof"));
        }
        if proof_chain_id != self.from_chain_id {
            return Err(SettlementError::Validation(format!(
                "deposit proof is from chain {}, transfer originates on chain {}",
                proof_chain_id, self.from_chain_id
            )));
        }

        let mut next = self.clone();
        match result {
            VerificationResult::Valid => {
                next.status = TransferStatus::InProgress;
                next.proof_hash = Some(proof_hash);
                next.pending_proof_id = None;
                next.deposit_proof_id = Some(proof_id.to_string());
                next.failure_reason = None;

                let release = ActionIntent::ReleaseTransfer {
                    transfer_id: self.transfer_id.clone(),
                    chain_id: self.to_chain_id,
                    recipient: self.recipient.clone(),
                    token_address: self.token_address.clone(),
                    amount: self.amount,
                    proof_hash: proof_hash.to_hex(),
                };
                Ok(Transition::new(next, vec![release]))
            }
            VerificationResult::InsufficientConfirmations => {
                next.pending_proof_id = Some(proof_id.to_string());
                Ok(Transition::new(next, Vec::new()))
            }
            other => Err(SettlementError::VerificationFailure {
                proof_id: proof_id.to_string(),
                result: other,
            }),
        }
    }

    /// Stop waiting on a parked deposit proof that can no longer verify
    pub fn abandon_pending_proof(
        &self,
        result: VerificationResult,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::Pending || self.pending_proof_id.is_none() {
            return Err(self.conflict("abandon a pending proof"));
        }

        let mut next = self.clone();
        next.pending_proof_id = None;
        next.failure_reason = Some(format!("deposit proof resolved to {}", result));
        Ok(Transition::new(next, Vec::new()))
    }

    /// Record one re-check of the deposit proof of an in-flight transfer
    ///
    /// `included` is whether the deposit transaction still has a successful
    /// receipt on the origin chain.
    pub fn recheck(
        &self,
        result: VerificationResult,
        included: bool,
        refund_on_failure: bool,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::InProgress || self.refund_requested {
            return Err(self.conflict("re-check the deposit proof"));
        }

        let mut counted = self.clone();
        counted.verification_attempts += 1;

        let reason = match (result, included) {
            (VerificationResult::Invalid | VerificationResult::MalformedProof, _) => {
                format!("deposit proof re-checked as {}", result)
            }
            (_, false) => "deposit transaction no longer included on origin chain".to_string(),
            _ => return Ok(Transition::new(counted, Vec::new())),
        };

        counted.fail(reason, refund_on_failure, now)
    }

    /// Destination release confirmed: record execution and complete
    pub fn release_confirmed(
        &self,
        receipt: ExecutionReceipt,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::InProgress || self.refund_requested {
            return Err(self.conflict("complete"));
        }
        if self.proof_hash.is_none() {
            return Err(SettlementError::Internal(format!(
                "transfer {} in progress without a proof hash",
                self.transfer_id
            )));
        }

        let mut next = self.clone();
        next.status = TransferStatus::Completed;
        next.gas_used = Some(receipt.gas_used);
        next.tx_hash = Some(receipt.tx_hash);
        next.fees = Some(receipt.fees);
        next.completed_at = Some(now);
        Ok(Transition::new(next, Vec::new()))
    }

    /// Destination release reverted
    pub fn release_reverted(
        &self,
        receipt: ExecutionReceipt,
        refund_on_failure: bool,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::InProgress || self.refund_requested {
            return Err(self.conflict("record a reverted release"));
        }

        let mut next = self.clone();
        next.gas_used = Some(receipt.gas_used);
        next.tx_hash = Some(receipt.tx_hash.clone());
        next.fees = Some(receipt.fees);
        next.fail(
            format!("release {} reverted on chain {}", receipt.tx_hash, self.to_chain_id),
            refund_on_failure,
            now,
        )
    }

    /// Origin refund confirmed after a failure
    pub fn refund_confirmed(
        &self,
        receipt: ExecutionReceipt,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::InProgress || !self.refund_requested {
            return Err(self.conflict("confirm a refund"));
        }

        let mut next = self.clone();
        next.status = TransferStatus::Refunded;
        next.tx_hash = Some(receipt.tx_hash);
        next.gas_used = Some(receipt.gas_used);
        next.fees = Some(receipt.fees);
        next.completed_at = Some(now);
        Ok(Transition::new(next, Vec::new()))
    }

    /// Origin refund reverted: nothing left to try
    pub fn refund_failed(
        &self,
        receipt: ExecutionReceipt,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        if self.status != TransferStatus::InProgress || !self.refund_requested {
            return Err(self.conflict("record a failed refund"));
        }

        let mut next = self.clone();
        next.status = TransferStatus::Failed;
        next.failure_reason = Some(format!(
            "refund {} reverted on chain {}",
            receipt.tx_hash, self.from_chain_id
        ));
        next.tx_hash = Some(receipt.tx_hash);
        next.completed_at = Some(now);
        Ok(Transition::new(next, Vec::new()))
    }

    /// Whether the engine should still re-check the deposit proof
    pub fn wants_recheck(&self, max_attempts: u32) -> bool {
        self.status == TransferStatus::InProgress
            && !self.refund_requested
            && self.verification_attempts < max_attempts
    }

    fn fail(
        mut self,
        reason: String,
        refund_on_failure: bool,
        now: u64,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        self.failure_reason = Some(reason);

        if !refund_on_failure {
            self.status = TransferStatus::Failed;
            self.completed_at = Some(now);
            return Ok(Transition::new(self, Vec::new()));
        }

        self.refund_requested = true;
        let refund = ActionIntent::RefundTransfer {
            transfer_id: self.transfer_id.clone(),
            chain_id: self.from_chain_id,
            sender: self.sender.clone(),
            token_address: self.token_address.clone(),
            amount: self.amount,
        };
        Ok(Transition::new(self, vec![refund]))
    }

    fn conflict(&self, action: &str) -> SettlementError {
        let state = if self.refund_requested && !self.status.is_terminal() {
            format!("{} (refund requested)", self.status)
        } else {
            self.status.to_string()
        };
        SettlementError::StateConflict {
            state,
            action: action.to_string(),
        }
    }
}
