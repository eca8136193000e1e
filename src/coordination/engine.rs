//! Coordination engine driving transfers from chain-head progress
//!
//! Listeners report head advances; the engine re-verifies the proofs that
//! transfers wait on or rely on, and applies the resulting transitions
//! through the registry. Swaps need no driving: their only timeout is
//! evaluated lazily when they are read or acted upon.

use super::transfer::{CrossChainTransfer, TransferStatus};
use crate::chain::ChainOracle;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::SettlementResult;
use crate::proof::{ChainHead, ProofVerifier, VerificationResult};
use crate::state::Registry;
use crate::types::BlockRef;

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Notifications consumed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A chain's head moved forward
    HeadAdvanced { chain_id: u64, height: u64 },
    /// A chain became reachable or unreachable
    ChainStatus {
        chain_id: u64,
        connected: bool,
        head_height: Option<u64>,
    },
}

/// Cross-chain coordination engine
pub struct CoordinationEngine {
    registry: Arc<Registry>,
    oracle: Arc<dyn ChainOracle>,
    verifier: Arc<ProofVerifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    event_rx: Mutex<mpsc::Receiver<EngineEvent>>,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl CoordinationEngine {
    pub fn new(
        registry: Arc<Registry>,
        oracle: Arc<dyn ChainOracle>,
        verifier: Arc<ProofVerifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        event_rx: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        Self {
            registry,
            oracle,
            verifier,
            clock,
            config,
            event_rx: Mutex::new(event_rx),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main coordination loop
    pub async fn run(&self) -> SettlementResult<()> {
        let mut event_rx = self.event_rx.lock().await;

        // Fallback sweep for chains whose listener is quiet
        let mut process_interval = interval(Duration::from_millis(self.config.poll_interval_ms));

        // Cleanup interval
        let mut cleanup_interval = interval(Duration::from_secs(300));

        info!("Coordination engine started ({})", self.config.instance_id);

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("All listeners gone");
                            break;
                        }
                    }
                }

                _ = process_interval.tick() => {
                    if let Err(e) = self.process_pending().await {
                        error!("Error processing pending transfers: {}", e);
                    }
                }

                _ = cleanup_interval.tick() => {
                    self.cleanup();
                }
            }
        }

        info!("Coordination engine stopped");
        Ok(())
    }

    async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::HeadAdvanced { chain_id, height } => {
                if let Err(e) = self.on_head(ChainHead { chain_id, height }).await {
                    error!("Error handling head {} of chain {}: {}", height, chain_id, e);
                }
            }
            EngineEvent::ChainStatus {
                chain_id,
                connected,
                head_height,
            } => {
                if connected {
                    info!("Chain {} reachable", chain_id);
                } else {
                    warn!("Chain {} unreachable", chain_id);
                }
                self.registry
                    .publish_chain_status(chain_id, connected, head_height);
            }
        }
    }

    /// Re-check every transfer originating on `head.chain_id`
    ///
    /// Returns the number of transitions applied.
    pub async fn on_head(&self, head: ChainHead) -> SettlementResult<usize> {
        let transfers: Vec<CrossChainTransfer> = self
            .registry
            .transfers()
            .await?
            .into_iter()
            .filter(|t| t.from_chain_id == head.chain_id)
            .collect();

        let mut applied = 0;
        for transfer in transfers {
            let outcome = if transfer.pending_proof_id.is_some() {
                self.advance_parked(&transfer, head).await
            } else if transfer.wants_recheck(self.config.max_reverification_attempts) {
                self.recheck_in_flight(&transfer, head).await
            } else {
                Ok(false)
            };

            match outcome {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) if e.is_state_conflict() => {
                    debug!("Transfer {} moved on meanwhile: {}", transfer.transfer_id, e);
                }
                Err(e) => warn!("Failed to re-check transfer {}: {}", transfer.transfer_id, e),
            }
        }

        Ok(applied)
    }

    /// Parked deposit proof: see whether it has enough confirmations now
    async fn advance_parked(
        &self,
        transfer: &CrossChainTransfer,
        head: ChainHead,
    ) -> SettlementResult<bool> {
        let proof_id = match (&transfer.pending_proof_id, transfer.status) {
            (Some(id), TransferStatus::Pending) => id.clone(),
            _ => return Ok(false),
        };

        let proof = self.registry.proof(&proof_id).await?;
        let view = self.verifier.view(&proof, head)?;
        let result = view.verification_result;
        if result == VerificationResult::InsufficientConfirmations {
            return Ok(false);
        }

        let digest = proof.digest(self.verifier.hasher());
        // Ordered by the deposit's block, as when the proof was submitted
        let at = Some(BlockRef {
            chain_id: proof.chain_id,
            block_number: proof.block_number,
        });

        if result.is_valid() {
            self.registry
                .apply_transfer(&transfer.transfer_id, at, |t| {
                    t.on_deposit_proof(&proof_id, proof.chain_id, digest, result)
                })
                .await?;
        } else {
            self.registry
                .apply_transfer(&transfer.transfer_id, at, |t| t.abandon_pending_proof(result))
                .await?;
        }
        self.registry.publish_proof_verified(view);
        Ok(true)
    }

    /// In-flight transfer: the deposit must still verify and still be mined
    async fn recheck_in_flight(
        &self,
        transfer: &CrossChainTransfer,
        head: ChainHead,
    ) -> SettlementResult<bool> {
        let proof_id = match &transfer.deposit_proof_id {
            Some(id) => id.clone(),
            None => return Ok(false),
        };

        let proof = self.registry.proof(&proof_id).await?;
        let result = self.verifier.verify(&proof, head)?;
        // A failed read is not evidence of a reorg; try again next head
        let included = self
            .oracle
            .receipt(head.chain_id, &proof.transaction_hash)
            .await?
            .map(|receipt| receipt.success)
            .unwrap_or(false);

        let now = self.clock.now();
        let refund = self.config.refund_on_failure;
        let at = Some(BlockRef {
            chain_id: head.chain_id,
            block_number: head.height,
        });

        let transition = self
            .registry
            .apply_transfer(&transfer.transfer_id, at, |t| {
                t.recheck(result, included, refund, now)
            })
            .await?;

        if transition.next.status != transfer.status || transition.next.refund_requested {
            warn!(
                "Transfer {} failed re-verification: {}",
                transfer.transfer_id,
                transition.next.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
        Ok(true)
    }

    /// Read heads for chains with waiting transfers and process them
    async fn process_pending(&self) -> SettlementResult<()> {
        let chains: BTreeSet<u64> = self
            .registry
            .transfers()
            .await?
            .iter()
            .filter(|t| {
                t.pending_proof_id.is_some()
                    || t.wants_recheck(self.config.max_reverification_attempts)
            })
            .map(|t| t.from_chain_id)
            .collect();

        for chain_id in chains {
            match self.oracle.head_height(chain_id).await {
                Ok(height) => {
                    self.on_head(ChainHead { chain_id, height }).await?;
                }
                Err(e) => warn!("Skipping chain {} this round: {}", chain_id, e),
            }
        }
        Ok(())
    }

    fn cleanup(&self) {
        let pruned = self.registry.prune_locks();
        if pruned > 0 {
            debug!("Pruned {} idle entity locks", pruned);
        }
    }

    /// Stop the engine
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
