//! Gas estimation and optimization for cross-chain bridge operations
//!
//! A bridge operation costs two transactions: the lock on the origin chain
//! and the release on the destination chain. Each leg is quoted twice:
//!
//! - baseline: configured gas price plus the price buffer, times the
//!   buffered gas limit of a standalone transaction
//! - optimized: on EIP-1559 chains the max fee that still confirms within
//!   `target_blocks` (base fee grown 12.5% per block, plus priority fee),
//!   capped at the baseline price; the fixed per-transaction gas is
//!   amortized across `batch_size` operations
//!
//! Both quotes are pure functions of configuration, so repeated calls
//! return identical results.

use crate::config::{ChainConfig, GasConfig, GasPriceStrategy};
use crate::error::{SettlementError, SettlementResult};
use crate::types::Amount;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Intrinsic gas of any transaction
pub const BASE_TX_GAS: u64 = 21_000;
/// Gas per non-zero calldata byte
pub const CALLDATA_GAS_PER_BYTE: u64 = 16;

/// Execution gas of the origin-chain lock call
const LOCK_OP_GAS: u64 = 65_000;
/// Execution gas of the destination release call, proof check included
const RELEASE_OP_GAS: u64 = 90_000;
/// selector + token, amount, recipient, destination chain
const LOCK_CALLDATA_BYTES: u64 = 4 + 32 * 4;
/// selector + transfer fields + root + an 8-deep sibling list
const RELEASE_CALLDATA_BYTES: u64 = 4 + 32 * 6 + 32 * 8;

/// Gas price representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Price charged per unit of gas in the worst case
    pub fn effective(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Which half of the bridge operation a leg pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    OriginLock,
    DestinationRelease,
}

/// Quote for one transaction of the bridge operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasLeg {
    pub chain_id: u64,
    pub role: LegRole,
    pub baseline_gas_limit: u64,
    pub gas_limit: u64,
    pub baseline_gas_price: Amount,
    pub gas_price: Amount,
    pub max_fee_per_gas: Option<Amount>,
    pub max_priority_fee_per_gas: Option<Amount>,
    pub baseline_cost: Amount,
    pub optimized_cost: Amount,
}

/// Computed quote; never persisted
///
/// The top-level limit and price describe the origin lock, the transaction
/// the caller submits. Costs are totals over both legs, in wei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasOptimization {
    pub from_chain: u64,
    pub to_chain: u64,
    pub amount: Amount,
    pub gas_limit: u64,
    pub gas_price: Amount,
    pub max_fee_per_gas: Option<Amount>,
    pub max_priority_fee_per_gas: Option<Amount>,
    pub estimated_cost: Amount,
    pub optimized_cost: Amount,
    pub savings: Amount,
    /// Savings as a percentage of the estimated cost, two decimals
    pub savings_percentage: f64,
    pub legs: Vec<GasLeg>,
}

/// Gas estimator for bridge operations
#[derive(Debug, Clone)]
pub struct GasEstimator {
    config: GasConfig,
    chains: HashMap<u64, ChainConfig>,
}

impl GasEstimator {
    /// Create a new gas estimator over the enabled chains
    pub fn new<'a>(config: GasConfig, chains: impl IntoIterator<Item = &'a ChainConfig>) -> Self {
        let chains = chains
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| (c.chain_id, c.clone()))
            .collect();
        Self { config, chains }
    }

    /// Quote a transfer of `amount` from `from_chain` to `to_chain`
    pub fn optimize(
        &self,
        from_chain: u64,
        to_chain: u64,
        amount: &str,
    ) -> SettlementResult<GasOptimization> {
        let amount = Amount::parse(amount)?;
        if from_chain == to_chain {
            return Err(SettlementError::Validation(format!(
                "origin and destination chain are both {}",
                from_chain
            )));
        }

        let origin = self.chain(from_chain)?;
        let destination = self.chain(to_chain)?;

        let legs = vec![
            self.quote_leg(origin, LegRole::OriginLock),
            self.quote_leg(destination, LegRole::DestinationRelease),
        ];

        let estimated = legs
            .iter()
            .fold(U256::zero(), |acc, leg| acc + leg.baseline_cost.as_u256());
        let optimized = legs
            .iter()
            .fold(U256::zero(), |acc, leg| acc + leg.optimized_cost.as_u256());

        // Each leg is already clamped, the sum can only be lower
        let optimized = optimized.min(estimated);
        let savings = estimated - optimized;
        let savings_percentage = percentage(savings, estimated);

        debug!(
            "Gas quote {} -> {}: estimated {} optimized {} ({}%)",
            from_chain, to_chain, estimated, optimized, savings_percentage
        );

        let lock = &legs[0];
        Ok(GasOptimization {
            from_chain,
            to_chain,
            amount,
            gas_limit: lock.gas_limit,
            gas_price: lock.gas_price,
            max_fee_per_gas: lock.max_fee_per_gas,
            max_priority_fee_per_gas: lock.max_priority_fee_per_gas,
            estimated_cost: estimated.into(),
            optimized_cost: optimized.into(),
            savings: savings.into(),
            savings_percentage,
            legs,
        })
    }

    fn chain(&self, chain_id: u64) -> SettlementResult<&ChainConfig> {
        self.chains
            .get(&chain_id)
            .ok_or(SettlementError::ChainNotFound { chain_id })
    }

    fn quote_leg(&self, chain: &ChainConfig, role: LegRole) -> GasLeg {
        let (op_gas, calldata) = match role {
            LegRole::OriginLock => (LOCK_OP_GAS, LOCK_CALLDATA_BYTES),
            LegRole::DestinationRelease => (RELEASE_OP_GAS, RELEASE_CALLDATA_BYTES),
        };
        let execution = op_gas + calldata * CALLDATA_GAS_PER_BYTE;

        let baseline_limit = self.buffer_limit(BASE_TX_GAS + execution);
        let batch = self.config.batch_size.max(1);
        let amortized_base = (BASE_TX_GAS + batch - 1) / batch;
        let gas_limit = self.buffer_limit(amortized_base + execution).min(baseline_limit);

        let baseline_price = self.buffer_price(U256::from(chain.gas_price_wei));
        let price = self.optimized_price(chain, baseline_price);
        let optimized_price = price.effective().min(baseline_price);

        let baseline_cost = Self::calculate_cost(
            U256::from(baseline_limit),
            &GasPrice::Legacy(baseline_price),
        );
        let optimized_cost =
            Self::calculate_cost(U256::from(gas_limit), &GasPrice::Legacy(optimized_price))
                .min(baseline_cost);

        let (max_fee, max_priority) = match price {
            GasPrice::Legacy(_) => (None, None),
            GasPrice::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => (
                Some(Amount::from(optimized_price)),
                Some(Amount::from(max_priority_fee_per_gas.min(optimized_price))),
            ),
        };

        GasLeg {
            chain_id: chain.chain_id,
            role,
            baseline_gas_limit: baseline_limit,
            gas_limit,
            baseline_gas_price: baseline_price.into(),
            gas_price: optimized_price.into(),
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
            baseline_cost: baseline_cost.into(),
            optimized_cost: optimized_cost.into(),
        }
    }

    /// Fee-market price for EIP-1559 chains, the baseline price otherwise
    fn optimized_price(&self, chain: &ChainConfig, baseline_price: U256) -> GasPrice {
        match (chain.gas_price_strategy, chain.base_fee_wei) {
            (GasPriceStrategy::Eip1559, Some(base_fee)) => {
                // Base fee can rise at most 12.5% per block
                let mut bound = U256::from(base_fee);
                for _ in 0..self.config.target_blocks {
                    if bound >= baseline_price {
                        break;
                    }
                    bound = bound.saturating_add(bound.saturating_add(U256::from(7)) / 8);
                }
                let priority = U256::from(chain.priority_fee_wei.unwrap_or(0));
                let max_fee = bound.saturating_add(priority).min(baseline_price);
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority.min(max_fee),
                }
            }
            _ => GasPrice::Legacy(baseline_price),
        }
    }

    fn buffer_limit(&self, gas: u64) -> u64 {
        gas + gas * self.config.gas_limit_buffer_percent / 100
    }

    fn buffer_price(&self, price: U256) -> U256 {
        price + price * self.config.gas_price_buffer_percent / 100
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        gas_limit * gas_price.effective()
    }
}

/// `part / whole` as a percentage with two decimals, 0 when `whole` is 0
fn percentage(part: U256, whole: U256) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    let basis_points = (part.min(whole) * U256::from(10_000u64)) / whole;
    basis_points.low_u64() as f64 / 100.0
}
