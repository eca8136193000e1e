//! Read-only chain capability used by the settlement core

use crate::error::{SettlementError, SettlementResult};
use crate::types::Amount;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: Amount,
}

impl TxReceipt {
    /// Fee paid, in wei
    pub fn fees(&self) -> Amount {
        Amount::from(self.effective_gas_price.as_u256() * self.gas_used)
    }
}

/// Native balance and nonce of an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Amount,
    pub nonce: u64,
}

/// Per-chain read access, dispatched on chain id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainOracle: Send + Sync {
    /// Current head height
    async fn head_height(&self, chain_id: u64) -> SettlementResult<u64>;

    /// Receipt for a transaction, `None` while it is not mined
    async fn receipt(&self, chain_id: u64, tx_hash: &str) -> SettlementResult<Option<TxReceipt>>;

    async fn account(&self, chain_id: u64, address: &str) -> SettlementResult<AccountState>;
}

/// Run `op` until it succeeds, fails permanently, or retries run out
///
/// Only retryable errors are retried; the delay doubles per attempt.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> SettlementResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SettlementResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt.min(16)));
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation, attempt, max_retries, e, delay
                );
                crate::metrics::record_oracle_retry(operation);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn read_error(chain_id: u64, e: impl std::fmt::Display) -> SettlementError {
    SettlementError::ExternalRead {
        chain_id,
        message: e.to_string(),
    }
}
