//! Settlement coordination
//!
//! This module provides:
//! 1. The atomic swap state machine (hash-timelock protocol)
//! 2. Swap proposals addressed to one counterparty
//! 3. The cross-chain transfer state machine
//! 4. The engine that drives both from chain-head notifications

pub mod engine;
pub mod proposal;
pub mod swap;
pub mod transfer;

pub use engine::{CoordinationEngine, EngineEvent};
pub use proposal::{ProposalStatus, SwapProposal};
pub use swap::{resolve_expiry, AtomicSwap, SwapStatus, SwapTerms};
pub use transfer::{CrossChainTransfer, ExecutionReceipt, TransferRequest, TransferStatus};

use crate::tx::ActionIntent;

/// Result of an accepted transition: the next snapshot and what must happen on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<T> {
    pub next: T,
    pub intents: Vec<ActionIntent>,
}

impl<T> Transition<T> {
    pub fn new(next: T, intents: Vec<ActionIntent>) -> Self {
        Self { next, intents }
    }
}
