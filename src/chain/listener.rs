//! Chain head listener with bounded HTTP polling

use super::oracle::ChainOracle;
use crate::coordination::EngineEvent;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Follows the head of one chain and reports advances to the engine
pub struct ChainListener {
    chain_id: u64,
    oracle: Arc<dyn ChainOracle>,
    engine_tx: mpsc::Sender<EngineEvent>,
    poll_interval: Duration,
    /// Highest head forwarded so far
    last_head: RwLock<u64>,
    /// Whether the last read succeeded
    connected: RwLock<Option<bool>>,
}

impl ChainListener {
    pub fn new(
        chain_id: u64,
        oracle: Arc<dyn ChainOracle>,
        engine_tx: mpsc::Sender<EngineEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chain_id,
            oracle,
            engine_tx,
            poll_interval,
            last_head: RwLock::new(0),
            connected: RwLock::new(None),
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Main polling loop; returns when the engine stops receiving or on shutdown
    pub async fn listen(&self, shutdown: Arc<RwLock<bool>>) {
        info!(
            "Polling chain {} every {:?}",
            self.chain_id, self.poll_interval
        );

        loop {
            if *shutdown.read().await {
                break;
            }

            if !self.poll_once().await {
                info!("Engine channel closed, stopping listener for chain {}", self.chain_id);
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Read the head once and forward what changed
    ///
    /// Returns `false` once the engine side of the channel is gone.
    pub async fn poll_once(&self) -> bool {
        match self.oracle.head_height(self.chain_id).await {
            Ok(height) => {
                crate::metrics::record_head_height(self.chain_id, height);
                if !self.set_connected(true).await {
                    return false;
                }

                let mut last = self.last_head.write().await;
                // Duplicate and out-of-order head reads are dropped here
                if height <= *last {
                    return true;
                }
                *last = height;
                drop(last);

                debug!("Chain {}: head advanced to {}", self.chain_id, height);
                self.send(EngineEvent::HeadAdvanced {
                    chain_id: self.chain_id,
                    height,
                })
                .await
            }
            Err(e) => {
                warn!("Failed to read head of chain {}: {}", self.chain_id, e);
                self.set_connected(false).await
            }
        }
    }

    /// Report connectivity changes only
    async fn set_connected(&self, connected: bool) -> bool {
        let mut state = self.connected.write().await;
        if *state == Some(connected) {
            return true;
        }
        *state = Some(connected);
        drop(state);

        crate::metrics::record_chain_health(self.chain_id, connected);
        let head_height = if connected {
            Some(*self.last_head.read().await)
        } else {
            None
        };
        self.send(EngineEvent::ChainStatus {
            chain_id: self.chain_id,
            connected,
            head_height,
        })
        .await
    }

    async fn send(&self, event: EngineEvent) -> bool {
        self.engine_tx.send(event).await.is_ok()
    }
}
