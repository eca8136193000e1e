//! On-chain actions requested by the state machines
//!
//! The engine never signs or broadcasts. A transition yields intents that
//! describe what must be submitted, on which chain, for whom.

use crate::types::{Amount, Asset};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionIntent {
    /// Lock a swap leg in the chain's hash-timelock contract
    LockAsset {
        swap_id: String,
        chain_id: u64,
        owner: String,
        asset: Asset,
        secret_hash: String,
        expires_at: u64,
    },
    /// Release a locked swap leg to its counterparty
    ReleaseAsset {
        swap_id: String,
        chain_id: u64,
        recipient: String,
        asset: Asset,
        secret: String,
    },
    /// Hand a locked swap leg back to whoever locked it
    ReturnAsset {
        swap_id: String,
        chain_id: u64,
        owner: String,
        asset: Asset,
    },
    /// Pay out a transfer on its destination chain
    ReleaseTransfer {
        transfer_id: String,
        chain_id: u64,
        recipient: String,
        token_address: String,
        amount: Amount,
        proof_hash: String,
    },
    /// Give a failed transfer back to its sender on the origin chain
    RefundTransfer {
        transfer_id: String,
        chain_id: u64,
        sender: String,
        token_address: String,
        amount: Amount,
    },
}

impl ActionIntent {
    /// Chain the action must be submitted to
    pub fn chain_id(&self) -> u64 {
        match self {
            ActionIntent::LockAsset { chain_id, .. }
            | ActionIntent::ReleaseAsset { chain_id, .. }
            | ActionIntent::ReturnAsset { chain_id, .. }
            | ActionIntent::ReleaseTransfer { chain_id, .. }
            | ActionIntent::RefundTransfer { chain_id, .. } => *chain_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionIntent::LockAsset { .. } => "lock_asset",
            ActionIntent::ReleaseAsset { .. } => "release_asset",
            ActionIntent::ReturnAsset { .. } => "return_asset",
            ActionIntent::ReleaseTransfer { .. } => "release_transfer",
            ActionIntent::RefundTransfer { .. } => "refund_transfer",
        }
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on chain {}", self.name(), self.chain_id())
    }
}
