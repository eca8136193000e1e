//! Cross-chain settlement engine
//!
//! Hash-timelock atomic swaps, bridge transfers gated on foreign-chain
//! merkle proofs, and gas quoting for the two legs of a bridge operation.
//! State machines are pure; the registry is their single writer and the
//! emission point for domain events.

pub mod api;
pub mod chain;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod proof;
pub mod service;
pub mod state;
pub mod tx;
pub mod types;

pub use error::{SettlementError, SettlementResult};
pub use service::{BatchVerification, SettlementService, WalletInfo};
