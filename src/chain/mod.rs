//! Chain module - read access to every configured chain
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - The chain oracle capability the settlement core reads through
//! - Head polling listeners feeding the coordination engine
//! - Confirmation depth tracking

pub mod finality;
pub mod listener;
pub mod oracle;
pub mod provider;

pub use finality::{recommended_confirmations, FinalityTracker};
pub use listener::ChainListener;
pub use oracle::{with_retry, AccountState, ChainOracle, TxReceipt};
pub use provider::ChainProvider;

use crate::config::Settings;
use crate::coordination::EngineEvent;
use crate::error::{SettlementError, SettlementResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
    max_retries: u32,
    retry_delay: Duration,
    poll_interval: Duration,
    /// Shutdown signal
    shutdown: Arc<RwLock<bool>>,
}

impl ChainManager {
    /// Create a provider for every enabled chain
    pub fn new(settings: &Settings) -> SettlementResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            let recommended = recommended_confirmations(chain_config.chain_id);
            if chain_config.confirmation_blocks < recommended {
                warn!(
                    "Chain {} requires {} confirmations, below the recommended {}",
                    name, chain_config.confirmation_blocks, recommended
                );
            }

            let provider = ChainProvider::new(chain_config.clone())?;
            providers.insert(chain_config.chain_id, Arc::new(provider));
        }

        Ok(Self {
            providers,
            max_retries: settings.engine.max_retries,
            retry_delay: Duration::from_millis(settings.engine.retry_delay_ms),
            poll_interval: Duration::from_millis(settings.engine.poll_interval_ms),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Spawn one head listener per chain, all feeding `engine_tx`
    pub fn spawn_listeners(
        self: &Arc<Self>,
        engine_tx: mpsc::Sender<EngineEvent>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for chain_id in self.connected_chains() {
            let oracle: Arc<dyn ChainOracle> = self.clone();
            let listener = ChainListener::new(chain_id, oracle, engine_tx.clone(), self.poll_interval);
            let shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                listener.listen(shutdown).await;
            }));
        }

        handles
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> SettlementResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(SettlementError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<Arc<ChainProvider>> =
            self.providers.iter().map(|e| e.value().clone()).collect();

        let checks = providers.into_iter().map(|provider| async move {
            let healthy = provider.health_check().await;
            if !healthy {
                error!("Chain {} is unreachable", provider.chain_id());
            }
            crate::metrics::record_chain_health(provider.chain_id(), healthy);
            (provider.chain_id(), healthy)
        });

        let mut results = futures::future::join_all(checks).await;
        results.sort_unstable_by_key(|(chain_id, _)| *chain_id);
        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.providers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Stop all chain listeners
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Chain manager stopped");
    }
}

#[async_trait]
impl ChainOracle for ChainManager {
    async fn head_height(&self, chain_id: u64) -> SettlementResult<u64> {
        let provider = self.get_provider(chain_id)?;
        with_retry("head_height", self.max_retries, self.retry_delay, || {
            provider.get_block_number()
        })
        .await
    }

    async fn receipt(&self, chain_id: u64, tx_hash: &str) -> SettlementResult<Option<TxReceipt>> {
        let provider = self.get_provider(chain_id)?;
        with_retry("receipt", self.max_retries, self.retry_delay, || {
            provider.get_transaction_receipt(tx_hash)
        })
        .await
    }

    async fn account(&self, chain_id: u64, address: &str) -> SettlementResult<AccountState> {
        let provider = self.get_provider(chain_id)?;
        with_retry("account", self.max_retries, self.retry_delay, || {
            provider.get_account(address)
        })
        .await
    }
}
