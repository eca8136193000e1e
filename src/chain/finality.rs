//! Confirmation depth tracking for executed transactions
//!
//! Different chains have different finality models:
//! - Ethereum: probabilistic, 32 blocks for practical finality
//! - Polygon: probabilistic, 128 blocks
//! - Arbitrum / Optimism / Base: soft finality from the sequencer
//! - Avalanche: instant finality (1 block)

use super::oracle::{ChainOracle, TxReceipt};
use crate::error::{SettlementError, SettlementResult};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Confirms that executed transactions are mined, successful or not, and buried
pub struct FinalityTracker {
    oracle: Arc<dyn ChainOracle>,
    /// Delay between head reads while waiting
    poll_interval: Duration,
    /// Give up waiting after this long
    timeout: Duration,
}

impl FinalityTracker {
    pub fn new(oracle: Arc<dyn ChainOracle>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            oracle,
            poll_interval,
            timeout,
        }
    }

    /// Number of blocks on top of `block_number`
    pub async fn confirmations(&self, chain_id: u64, block_number: u64) -> SettlementResult<u64> {
        let head = self.oracle.head_height(chain_id).await?;
        Ok(head.saturating_sub(block_number))
    }

    /// Receipt of `tx_hash` once it has `required` confirmations
    ///
    /// Fails with a retryable `FinalityNotReached` while the transaction is
    /// unmined or too shallow.
    pub async fn confirmed_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
        required: u64,
    ) -> SettlementResult<TxReceipt> {
        let not_reached = || SettlementError::FinalityNotReached {
            chain_id,
            tx_hash: tx_hash.to_string(),
        };

        let receipt = self
            .oracle
            .receipt(chain_id, tx_hash)
            .await?
            .ok_or_else(not_reached)?;

        let confirmations = self.confirmations(chain_id, receipt.block_number).await?;
        if confirmations < required {
            debug!(
                "Transaction {} has {} / {} confirmations on chain {}",
                tx_hash, confirmations, required, chain_id
            );
            return Err(not_reached());
        }

        info!(
            "Transaction {} final on chain {} ({} confirmations)",
            tx_hash, chain_id, confirmations
        );
        Ok(receipt)
    }

    /// Poll until `tx_hash` is final or the timeout passes
    pub async fn wait_for_confirmations(
        &self,
        chain_id: u64,
        tx_hash: &str,
        required: u64,
    ) -> SettlementResult<TxReceipt> {
        let wait = async {
            loop {
                match self.confirmed_receipt(chain_id, tx_hash, required).await {
                    Ok(receipt) => return Ok(receipt),
                    Err(e) if e.is_retryable() => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| SettlementError::Timeout {
                operation: format!("finality of {} on chain {}", tx_hash, chain_id),
            })?
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon mainnet
        137 => 128,
        // BNB Smart Chain
        56 => 15,
        // Arbitrum, Optimism, Base
        42161 | 10 | 8453 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Default conservative
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::oracle::MockChainOracle;
    use crate::types::Amount;

    fn receipt(block_number: u64) -> TxReceipt {
        TxReceipt {
            tx_hash: "0xabc".to_string(),
            block_number,
            success: true,
            gas_used: 50_000,
            effective_gas_price: Amount::from_u128(1),
        }
    }

    fn tracker(oracle: MockChainOracle, timeout: Duration) -> FinalityTracker {
        FinalityTracker::new(Arc::new(oracle), Duration::from_millis(5), timeout)
    }

    #[tokio::test]
    async fn test_shallow_receipt_is_not_final() {
        let mut oracle = MockChainOracle::new();
        oracle
            .expect_receipt()
            .returning(|_, _| Ok(Some(receipt(100))));
        oracle.expect_head_height().returning(|_| Ok(103));

        let tracker = tracker(oracle, Duration::from_secs(1));
        let err = tracker.confirmed_receipt(1, "0xabc", 6).await.unwrap_err();
        assert!(matches!(err, SettlementError::FinalityNotReached { .. }));
        assert!(err.is_retryable());

        assert_eq!(tracker.confirmed_receipt(1, "0xabc", 3).await.unwrap().block_number, 100);
    }

    #[tokio::test]
    async fn test_wait_until_final() {
        let mut oracle = MockChainOracle::new();
        oracle
            .expect_receipt()
            .returning(|_, _| Ok(Some(receipt(100))));
        let mut seq = mockall::Sequence::new();
        oracle
            .expect_head_height()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(101));
        oracle
            .expect_head_height()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(110));

        let tracker = tracker(oracle, Duration::from_secs(5));
        let receipt = tracker.wait_for_confirmations(1, "0xabc", 6).await.unwrap();
        assert!(receipt.success);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let mut oracle = MockChainOracle::new();
        oracle.expect_receipt().returning(|_, _| Ok(None));

        let tracker = tracker(oracle, Duration::from_millis(30));
        assert!(matches!(
            tracker.wait_for_confirmations(1, "0xabc", 1).await,
            Err(SettlementError::Timeout { .. })
        ));
    }

    #[test]
    fn test_recommended_confirmations() {
        assert_eq!(recommended_confirmations(137), 128);
        assert_eq!(recommended_confirmations(43114), 1);
    }
}
