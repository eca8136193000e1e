//! Domain events and their outbound broadcast channel
//!
//! Every accepted write in the registry emits exactly one event. Delivery to
//! subscribers (websockets, queues) is the consumer's business; events are
//! dropped when nobody listens.

use crate::coordination::{AtomicSwap, CrossChainTransfer, SwapStatus, TransferStatus};
use crate::proof::ProofView;
use crate::tx::ActionIntent;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// Maps to the `atomicSwapUpdated` subscription
    SwapUpdated {
        swap: AtomicSwap,
        previous: Option<SwapStatus>,
        intents: Vec<ActionIntent>,
    },

    /// Maps to the `crossChainTransferUpdated` subscription
    TransferUpdated {
        transfer: CrossChainTransfer,
        previous: Option<TransferStatus>,
        intents: Vec<ActionIntent>,
    },

    /// Maps to the `crossChainProofVerified` subscription
    ProofVerified { proof: ProofView },

    /// Maps to the `chainStatusUpdated` subscription
    ChainStatusUpdated {
        chain_id: u64,
        connected: bool,
        head_height: Option<u64>,
    },
}

impl DomainEvent {
    /// Id of the entity the event is about
    pub fn entity_id(&self) -> String {
        match self {
            DomainEvent::SwapUpdated { swap, .. } => swap.swap_id.clone(),
            DomainEvent::TransferUpdated { transfer, .. } => transfer.transfer_id.clone(),
            DomainEvent::ProofVerified { proof } => proof.proof.proof_id.clone(),
            DomainEvent::ChainStatusUpdated { chain_id, .. } => chain_id.to_string(),
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::SwapUpdated { .. } => "swap_updated",
            DomainEvent::TransferUpdated { .. } => "transfer_updated",
            DomainEvent::ProofVerified { .. } => "proof_verified",
            DomainEvent::ChainStatusUpdated { .. } => "chain_status_updated",
        }
    }

    /// Whether the event represents a status change rather than a field update
    pub fn is_status_change(&self) -> bool {
        match self {
            DomainEvent::SwapUpdated { swap, previous, .. } => *previous != Some(swap.status),
            DomainEvent::TransferUpdated {
                transfer, previous, ..
            } => *previous != Some(transfer.status),
            _ => true,
        }
    }
}

/// Broadcast channel for domain events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: DomainEvent) -> usize {
        let name = event.name();
        crate::metrics::record_event_published(name);

        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for {} event", name);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(
            bus.publish(DomainEvent::ChainStatusUpdated {
                chain_id: 1,
                connected: true,
                head_height: Some(10),
            }),
            0
        );

        let mut rx = bus.subscribe();
        let delivered = bus.publish(DomainEvent::ChainStatusUpdated {
            chain_id: 137,
            connected: false,
            head_height: None,
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "chain_status_updated");
        assert_eq!(event.entity_id(), "137");
    }
}
