//! Hash-timelock atomic swap state machine
//!
//! Every method takes a snapshot and returns the next snapshot plus the
//! on-chain actions it requires. Nothing is written here: the registry
//! applies the result under the swap's lock, or discards it on rejection.

use super::Transition;
use crate::config::TimelockMode;
use crate::error::{SettlementError, SettlementResult};
use crate::proof::Hasher;
use crate::tx::ActionIntent;
use crate::types::{decode_hex, require_non_empty, Asset, Digest, EventCursor};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Initiated,
    Deposited,
    Redeemed,
    Refunded,
    Expired,
    Cancelled,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwapStatus::Initiated | SwapStatus::Deposited)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SwapStatus::Initiated => "INITIATED",
            SwapStatus::Deposited => "DEPOSITED",
            SwapStatus::Redeemed => "REDEEMED",
            SwapStatus::Refunded => "REFUNDED",
            SwapStatus::Expired => "EXPIRED",
            SwapStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an initiator proposes when opening a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTerms {
    pub initiator: String,
    pub initiator_chain_id: u64,
    pub participant_chain_id: u64,
    pub initiator_asset: Asset,
    pub participant_asset: Asset,
    pub secret_hash: Digest,
    /// Absolute expiry: unix seconds or block height, per deployment
    pub timelock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwap {
    pub swap_id: String,
    pub initiator: String,
    pub participant: Option<String>,
    /// Only this address may join, when the swap came from an accepted proposal
    #[serde(default)]
    pub reserved_participant: Option<String>,
    pub initiator_chain_id: u64,
    pub participant_chain_id: u64,
    pub initiator_asset: Asset,
    pub participant_asset: Asset,
    pub status: SwapStatus,
    pub secret_hash: Digest,
    pub timelock: u64,
    pub created_at: u64,
    pub expires_at: u64,
    /// Preimage, revealed by redemption
    pub secret: Option<String>,
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub cursor: EventCursor,
}

/// Convert a timelock into an absolute unix expiry
///
/// In block-height mode the distance to the timelock height is converted
/// with the initiator chain's average block time, rounding up.
pub fn resolve_expiry(
    mode: TimelockMode,
    timelock: u64,
    now: u64,
    head_height: u64,
    block_time_ms: u64,
) -> SettlementResult<u64> {
    let expires_at = match mode {
        TimelockMode::Timestamp => timelock,
        TimelockMode::BlockHeight => {
            if timelock <= head_height {
                return Err(SettlementError::Validation(format!(
                    "timelock height {} is not above the current head {}",
                    timelock, head_height
                )));
            }
            let millis = (timelock - head_height).saturating_mul(block_time_ms);
            now.saturating_add((millis + 999) / 1000)
        }
    };

    if expires_at <= now {
        return Err(SettlementError::Validation(format!(
            "timelock expires at {}, not after creation at {}",
            expires_at, now
        )));
    }
    Ok(expires_at)
}

impl AtomicSwap {
    /// Open a swap in `INITIATED`, requesting the initiator's lock
    pub fn initiate(
        swap_id: String,
        terms: SwapTerms,
        now: u64,
        expires_at: u64,
    ) -> SettlementResult<Transition<AtomicSwap>> {
        require_non_empty("initiator", &terms.initiator)?;
        require_non_empty("initiator token address", &terms.initiator_asset.token_address)?;
        require_non_empty(
            "participant token address",
            &terms.participant_asset.token_address,
        )?;
        if terms.initiator_chain_id == terms.participant_chain_id {
            return Err(SettlementError::Validation(format!(
                "both swap legs are on chain {}",
                terms.initiator_chain_id
            )));
        }
        if terms.initiator_asset.amount.is_zero() || terms.participant_asset.amount.is_zero() {
            return Err(SettlementError::Validation(
                "swap amounts must be positive".to_string(),
            ));
        }
        if expires_at <= now {
            return Err(SettlementError::Validation(format!(
                "expiry {} is not after creation {}",
                expires_at, now
            )));
        }

        let swap = AtomicSwap {
            swap_id,
            initiator: terms.initiator,
            participant: None,
            reserved_participant: None,
            initiator_chain_id: terms.initiator_chain_id,
            participant_chain_id: terms.participant_chain_id,
            initiator_asset: terms.initiator_asset,
            participant_asset: terms.participant_asset,
            status: SwapStatus::Initiated,
            secret_hash: terms.secret_hash,
            timelock: terms.timelock,
            created_at: now,
            expires_at,
            secret: None,
            completed_at: None,
            cursor: EventCursor::default(),
        };

        let lock = ActionIntent::LockAsset {
            swap_id: swap.swap_id.clone(),
            chain_id: swap.initiator_chain_id,
            owner: swap.initiator.clone(),
            asset: swap.initiator_asset.clone(),
            secret_hash: swap.secret_hash.to_hex(),
            expires_at: swap.expires_at,
        };

        Ok(Transition::new(swap, vec![lock]))
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Counterparty joins and locks the participant asset
    pub fn participate(&self, participant: &str, now: u64) -> SettlementResult<Transition<AtomicSwap>> {
        require_non_empty("participant", participant)?;

        if self.status != SwapStatus::Initiated || self.participant.is_some() {
            return Err(self.conflict("participate"));
        }
        if now >= self.expires_at {
            return Err(SettlementError::StateConflict {
                state: "EXPIRED".to_string(),
                action: "participate".to_string(),
            });
        }
        if participant.eq_ignore_ascii_case(&self.initiator) {
            return Err(SettlementError::Validation(
                "initiator cannot participate in its own swap".to_string(),
            ));
        }
        if let Some(reserved) = &self.reserved_participant {
            if !participant.eq_ignore_ascii_case(reserved) {
                return Err(SettlementError::Unauthorized {
                    caller: participant.to_string(),
                    action: format!("join swap {} reserved for {}", self.swap_id, reserved),
                });
            }
        }

        let mut next = self.clone();
        next.participant = Some(participant.to_string());
        next.status = SwapStatus::Deposited;

        let lock = ActionIntent::LockAsset {
            swap_id: self.swap_id.clone(),
            chain_id: self.participant_chain_id,
            owner: participant.to_string(),
            asset: self.participant_asset.clone(),
            secret_hash: self.secret_hash.to_hex(),
            expires_at: self.expires_at,
        };

        Ok(Transition::new(next, vec![lock]))
    }

    /// Reveal the preimage and release both legs crosswise
    ///
    /// Checks run in order: status, expiry, secret.
    pub fn redeem(
        &self,
        secret: &str,
        hasher: &Hasher,
        now: u64,
    ) -> SettlementResult<Transition<AtomicSwap>> {
        let preimage = decode_hex(secret)
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| SettlementError::Validation("secret must be non-empty hex".to_string()))?;

        if self.status != SwapStatus::Deposited {
            return Err(self.conflict("redeem"));
        }
        if self.is_expired(now) {
            return Err(SettlementError::Expired {
                expires_at: self.expires_at,
            });
        }
        if hasher.digest(&[preimage.as_slice()]) != self.secret_hash {
            return Err(SettlementError::InvalidSecret);
        }

        let participant = self.participant.clone().ok_or_else(|| {
            SettlementError::Internal(format!("swap {} deposited without participant", self.swap_id))
        })?;
        let revealed = format!("0x{}", hex::encode(&preimage));

        let mut next = self.clone();
        next.status = SwapStatus::Redeemed;
        next.secret = Some(revealed.clone());
        next.completed_at = Some(now);

        let intents = vec![
            ActionIntent::ReleaseAsset {
                swap_id: self.swap_id.clone(),
                chain_id: self.participant_chain_id,
                recipient: self.initiator.clone(),
                asset: self.participant_asset.clone(),
                secret: revealed.clone(),
            },
            ActionIntent::ReleaseAsset {
                swap_id: self.swap_id.clone(),
                chain_id: self.initiator_chain_id,
                recipient: participant,
                asset: self.initiator_asset.clone(),
                secret: revealed,
            },
        ];

        Ok(Transition::new(next, intents))
    }

    /// Return every locked leg once the timelock has passed
    pub fn refund(&self, now: u64) -> SettlementResult<Transition<AtomicSwap>> {
        if self.status.is_terminal() {
            return Err(self.conflict("refund"));
        }
        if !self.is_expired(now) {
            return Err(SettlementError::NotYetExpired {
                expires_at: self.expires_at,
            });
        }

        let mut next = self.clone();
        next.status = SwapStatus::Refunded;
        next.completed_at = Some(now);

        Ok(Transition::new(next, self.return_intents()))
    }

    /// Initiator aborts before anyone joined
    pub fn cancel(&self, caller: &str, now: u64) -> SettlementResult<Transition<AtomicSwap>> {
        if !caller.eq_ignore_ascii_case(&self.initiator) {
            return Err(SettlementError::Unauthorized {
                caller: caller.to_string(),
                action: format!("cancel swap {}", self.swap_id),
            });
        }
        if self.status != SwapStatus::Initiated || self.participant.is_some() {
            return Err(self.conflict("cancel"));
        }
        if self.is_expired(now) {
            return Err(SettlementError::StateConflict {
                state: "EXPIRED".to_string(),
                action: "cancel".to_string(),
            });
        }

        let mut next = self.clone();
        next.status = SwapStatus::Cancelled;
        next.completed_at = Some(now);

        Ok(Transition::new(next, self.return_intents()))
    }

    /// Passive expiry, recognized when a read observes the timelock passed
    ///
    /// Returns `None` when the swap is terminal or still live.
    pub fn observe_expiry(&self, now: u64) -> Option<Transition<AtomicSwap>> {
        if self.status.is_terminal() || !self.is_expired(now) {
            return None;
        }

        let mut next = self.clone();
        next.status = SwapStatus::Expired;
        next.completed_at = Some(now);

        Some(Transition::new(next, self.return_intents()))
    }

    /// Whether `address` is either side of the swap
    pub fn involves(&self, address: &str) -> bool {
        self.initiator.eq_ignore_ascii_case(address)
            || self
                .participant
                .as_deref()
                .map(|p| p.eq_ignore_ascii_case(address))
                .unwrap_or(false)
    }

    fn return_intents(&self) -> Vec<ActionIntent> {
        let mut intents = vec![ActionIntent::ReturnAsset {
            swap_id: self.swap_id.clone(),
            chain_id: self.initiator_chain_id,
            owner: self.initiator.clone(),
            asset: self.initiator_asset.clone(),
        }];

        if let Some(participant) = &self.participant {
            intents.push(ActionIntent::ReturnAsset {
                swap_id: self.swap_id.clone(),
                chain_id: self.participant_chain_id,
                owner: participant.clone(),
                asset: self.participant_asset.clone(),
            });
        }

        intents
    }

    fn conflict(&self, action: &str) -> SettlementError {
        SettlementError::StateConflict {
            state: self.status.to_string(),
            action: action.to_string(),
        }
    }
}
