//! Registry of swaps, transfers and proofs
//!
//! Sole writer of entity state. Transitions for one id are serialized by a
//! per-id async lock held from the read of the snapshot until the new state
//! (or the rejection) is settled, so concurrent attempts on one swap see
//! each other's outcome. Different ids proceed in parallel.

use super::store::{EntityStore, InMemoryStore, Versioned};
use crate::coordination::{AtomicSwap, CrossChainTransfer, SwapProposal, Transition};
use crate::error::{SettlementError, SettlementResult};
use crate::events::{DomainEvent, EventBus};
use crate::proof::{CrossChainProof, ProofView, VerificationStats};
use crate::tx::ActionIntent;
use crate::types::{BlockRef, EventCursor};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Entity kinds whose state the registry owns
pub trait Tracked: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn status_name(&self) -> &'static str;
    fn cursor_mut(&mut self) -> &mut EventCursor;
    fn cursor(&self) -> &EventCursor;
    fn not_found(id: &str) -> SettlementError;
    fn updated(&self, previous: Option<&Self>, intents: Vec<ActionIntent>) -> DomainEvent;
}

impl Tracked for AtomicSwap {
    const KIND: &'static str = "swap";

    fn id(&self) -> &str {
        &self.swap_id
    }

    fn status_name(&self) -> &'static str {
        self.status.name()
    }

    fn cursor_mut(&mut self) -> &mut EventCursor {
        &mut self.cursor
    }

    fn cursor(&self) -> &EventCursor {
        &self.cursor
    }

    fn not_found(id: &str) -> SettlementError {
        SettlementError::SwapNotFound {
            swap_id: id.to_string(),
        }
    }

    fn updated(&self, previous: Option<&Self>, intents: Vec<ActionIntent>) -> DomainEvent {
        DomainEvent::SwapUpdated {
            swap: self.clone(),
            previous: previous.map(|p| p.status),
            intents,
        }
    }
}

impl Tracked for CrossChainTransfer {
    const KIND: &'static str = "transfer";

    fn id(&self) -> &str {
        &self.transfer_id
    }

    fn status_name(&self) -> &'static str {
        self.status.name()
    }

    fn cursor_mut(&mut self) -> &mut EventCursor {
        &mut self.cursor
    }

    fn cursor(&self) -> &EventCursor {
        &self.cursor
    }

    fn not_found(id: &str) -> SettlementError {
        SettlementError::TransferNotFound {
            transfer_id: id.to_string(),
        }
    }

    fn updated(&self, previous: Option<&Self>, intents: Vec<ActionIntent>) -> DomainEvent {
        DomainEvent::TransferUpdated {
            transfer: self.clone(),
            previous: previous.map(|p| p.status),
            intents,
        }
    }
}

pub struct Registry {
    swaps: Arc<dyn EntityStore<AtomicSwap>>,
    transfers: Arc<dyn EntityStore<CrossChainTransfer>>,
    proofs: Arc<dyn EntityStore<CrossChainProof>>,
    proposals: Arc<dyn EntityStore<SwapProposal>>,
    /// Announced verification outcomes per chain
    verification_stats: DashMap<u64, VerificationStats>,
    /// Per-id transition locks, keyed `<kind>:<id>`
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Active chain per address, set by `switchChain`
    sessions: DashMap<String, u64>,
    events: EventBus,
}

impl Registry {
    pub fn new(
        swaps: Arc<dyn EntityStore<AtomicSwap>>,
        transfers: Arc<dyn EntityStore<CrossChainTransfer>>,
        proofs: Arc<dyn EntityStore<CrossChainProof>>,
        proposals: Arc<dyn EntityStore<SwapProposal>>,
        events: EventBus,
    ) -> Self {
        Self {
            swaps,
            transfers,
            proofs,
            proposals,
            verification_stats: DashMap::new(),
            locks: DashMap::new(),
            sessions: DashMap::new(),
            events,
        }
    }

    /// Registry over fresh in-memory stores
    pub fn in_memory(events: EventBus) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            events,
        )
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ---- swaps ----

    pub async fn create_swap(
        &self,
        transition: Transition<AtomicSwap>,
    ) -> SettlementResult<Transition<AtomicSwap>> {
        self.create(self.swaps.as_ref(), transition).await
    }

    pub async fn swap(&self, swap_id: &str) -> SettlementResult<AtomicSwap> {
        self.get(self.swaps.as_ref(), swap_id).await
    }

    pub async fn swaps(&self) -> SettlementResult<Vec<AtomicSwap>> {
        self.all(self.swaps.as_ref()).await
    }

    /// Evaluate and persist a swap transition under the swap's lock
    pub async fn apply_swap<F>(
        &self,
        swap_id: &str,
        at: Option<BlockRef>,
        transition: F,
    ) -> SettlementResult<Transition<AtomicSwap>>
    where
        F: FnOnce(&AtomicSwap) -> SettlementResult<Transition<AtomicSwap>>,
    {
        self.apply(self.swaps.as_ref(), swap_id, at, |s| transition(s).map(Some))
            .await
    }

    /// Persist a transition only if `observe` finds one, else return the swap as is
    pub async fn observe_swap<F>(&self, swap_id: &str, observe: F) -> SettlementResult<AtomicSwap>
    where
        F: FnOnce(&AtomicSwap) -> Option<Transition<AtomicSwap>>,
    {
        self.apply(self.swaps.as_ref(), swap_id, None, |s| Ok(observe(s)))
            .await
            .map(|t| t.next)
    }

    // ---- transfers ----

    pub async fn create_transfer(
        &self,
        transition: Transition<CrossChainTransfer>,
    ) -> SettlementResult<Transition<CrossChainTransfer>> {
        self.create(self.transfers.as_ref(), transition).await
    }

    pub async fn transfer(&self, transfer_id: &str) -> SettlementResult<CrossChainTransfer> {
        self.get(self.transfers.as_ref(), transfer_id).await
    }

    pub async fn transfers(&self) -> SettlementResult<Vec<CrossChainTransfer>> {
        self.all(self.transfers.as_ref()).await
    }

    /// Evaluate and persist a transfer transition under the transfer's lock
    pub async fn apply_transfer<F>(
        &self,
        transfer_id: &str,
        at: Option<BlockRef>,
        transition: F,
    ) -> SettlementResult<Transition<CrossChainTransfer>>
    where
        F: FnOnce(&CrossChainTransfer) -> SettlementResult<Transition<CrossChainTransfer>>,
    {
        self.apply(self.transfers.as_ref(), transfer_id, at, |t| {
            transition(t).map(Some)
        })
        .await
    }

    // ---- proofs ----

    /// Store a submitted proof; proofs are immutable once stored
    pub async fn save_proof(&self, proof: CrossChainProof) -> SettlementResult<CrossChainProof> {
        let proof_id = proof.proof_id.clone();
        let stored = self.proofs.insert(&proof_id, proof).await?;
        Ok(stored.value)
    }

    pub async fn proof(&self, proof_id: &str) -> SettlementResult<CrossChainProof> {
        self.proofs
            .load(proof_id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| SettlementError::ProofNotFound {
                proof_id: proof_id.to_string(),
            })
    }

    /// Store a deposit proof and apply it to its transfer in one step
    ///
    /// Runs under the transfer's lock. The proof is stored and its
    /// verification announced only when the transfer accepts it, or rejects
    /// it as a verification failure (returned as `Ok(None)`). Any other
    /// rejection leaves neither the proof nor an event behind.
    pub async fn apply_deposit_proof<F>(
        &self,
        proof: CrossChainProof,
        view: ProofView,
        at: BlockRef,
        transition: F,
    ) -> SettlementResult<Option<Transition<CrossChainTransfer>>>
    where
        F: FnOnce(&CrossChainTransfer) -> SettlementResult<Transition<CrossChainTransfer>>,
    {
        let transfer_id = proof.transfer_id.clone().ok_or_else(|| {
            SettlementError::Validation(format!("proof {} names no transfer", proof.proof_id))
        })?;
        let store = self.transfers.as_ref();
        let lock = self.lock_for(CrossChainTransfer::KIND, &transfer_id);
        let _guard = lock.lock().await;

        let current = store
            .load(&transfer_id)
            .await?
            .ok_or_else(|| CrossChainTransfer::not_found(&transfer_id))?;
        let outcome = Self::evaluate(&current.value, Some(&at), |t| transition(t).map(Some));

        match outcome {
            Ok(Some(accepted)) => {
                self.save_proof(proof).await?;
                self.publish_proof_verified(view);
                self.commit(store, current, Some(&at), accepted)
                    .await
                    .map(Some)
            }
            Ok(None) => Ok(None),
            Err(SettlementError::VerificationFailure { .. }) => {
                self.save_proof(proof).await?;
                self.publish_proof_verified(view);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn publish_proof_verified(&self, view: ProofView) {
        crate::metrics::record_proof_verified(view.verification_result.name());
        self.verification_stats
            .entry(view.proof.chain_id)
            .or_insert_with(|| VerificationStats::new(view.proof.chain_id))
            .record(view.verification_result);
        self.events.publish(DomainEvent::ProofVerified { proof: view });
    }

    /// Outcomes announced so far for proofs from `chain_id`
    pub fn verification_stats(&self, chain_id: u64) -> VerificationStats {
        self.verification_stats
            .get(&chain_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| VerificationStats::new(chain_id))
    }

    pub fn publish_chain_status(&self, chain_id: u64, connected: bool, head_height: Option<u64>) {
        self.events.publish(DomainEvent::ChainStatusUpdated {
            chain_id,
            connected,
            head_height,
        });
    }

    // ---- proposals ----

    pub async fn create_proposal(&self, proposal: SwapProposal) -> SettlementResult<SwapProposal> {
        let proposal_id = proposal.proposal_id.clone();
        let stored = self.proposals.insert(&proposal_id, proposal).await?;
        info!(
            "Created swap proposal {} for {}",
            proposal_id, stored.value.participant
        );
        Ok(stored.value)
    }

    pub async fn proposal(&self, proposal_id: &str) -> SettlementResult<SwapProposal> {
        self.proposals
            .load(proposal_id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| SettlementError::ProposalNotFound {
                proposal_id: proposal_id.to_string(),
            })
    }

    pub async fn proposals(&self) -> SettlementResult<Vec<SwapProposal>> {
        Ok(self
            .proposals
            .list()
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// Accept a proposal and create the swap it opens, under the proposal's lock
    ///
    /// A rejected acceptance stores neither the swap nor the accepted proposal.
    pub async fn accept_proposal<F>(
        &self,
        proposal_id: &str,
        accept: F,
    ) -> SettlementResult<(SwapProposal, Transition<AtomicSwap>)>
    where
        F: FnOnce(&SwapProposal) -> SettlementResult<(SwapProposal, Transition<AtomicSwap>)>,
    {
        let lock = self.lock_for("proposal", proposal_id);
        let _guard = lock.lock().await;

        let Versioned { version, value } =
            self.proposals
                .load(proposal_id)
                .await?
                .ok_or_else(|| SettlementError::ProposalNotFound {
                    proposal_id: proposal_id.to_string(),
                })?;

        let (accepted, opened) = accept(&value).map_err(|e| {
            debug!("Rejected acceptance of proposal {}: {}", proposal_id, e);
            crate::metrics::record_rejected_transition("proposal", e.kind());
            e
        })?;

        let created = self.create(self.swaps.as_ref(), opened).await?;
        let stored = self.proposals.store(proposal_id, version, accepted).await?;
        info!(
            "Proposal {} accepted, opened swap {}",
            proposal_id, created.next.swap_id
        );

        Ok((stored.value, created))
    }

    // ---- sessions ----

    pub fn set_active_chain(&self, address: &str, chain_id: u64) -> Option<u64> {
        self.sessions.insert(address.to_ascii_lowercase(), chain_id)
    }

    pub fn active_chain(&self, address: &str) -> Option<u64> {
        self.sessions
            .get(&address.to_ascii_lowercase())
            .map(|entry| *entry.value())
    }

    /// Drop lock entries nobody is holding or waiting on
    pub fn prune_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    // ---- generic plumbing ----

    fn lock_for(&self, kind: &str, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(format!("{}:{}", kind, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn create<T: Tracked>(
        &self,
        store: &dyn EntityStore<T>,
        transition: Transition<T>,
    ) -> SettlementResult<Transition<T>> {
        let Transition { next, intents } = transition;
        let id = next.id().to_string();
        let stored = store.insert(&id, next).await?;

        info!("Created {} {} ({})", T::KIND, stored.value.id(), stored.value.status_name());
        crate::metrics::record_transition(T::KIND, stored.value.status_name());
        self.events.publish(stored.value.updated(None, intents.clone()));

        Ok(Transition::new(stored.value, intents))
    }

    async fn get<T: Tracked>(&self, store: &dyn EntityStore<T>, id: &str) -> SettlementResult<T> {
        store
            .load(id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| T::not_found(id))
    }

    async fn all<T: Tracked>(&self, store: &dyn EntityStore<T>) -> SettlementResult<Vec<T>> {
        Ok(store.list().await?.into_iter().map(|v| v.value).collect())
    }

    async fn apply<T, F>(
        &self,
        store: &dyn EntityStore<T>,
        id: &str,
        at: Option<BlockRef>,
        transition: F,
    ) -> SettlementResult<Transition<T>>
    where
        T: Tracked,
        F: FnOnce(&T) -> SettlementResult<Option<Transition<T>>>,
    {
        let lock = self.lock_for(T::KIND, id);
        let _guard = lock.lock().await;

        let current = store.load(id).await?.ok_or_else(|| T::not_found(id))?;
        match Self::evaluate(&current.value, at.as_ref(), transition)? {
            Some(transition) => self.commit(store, current, at.as_ref(), transition).await,
            None => Ok(Transition::new(current.value, Vec::new())),
        }
    }

    /// Check the event is not stale and run the transition; persists nothing
    fn evaluate<T, F>(
        value: &T,
        at: Option<&BlockRef>,
        transition: F,
    ) -> SettlementResult<Option<Transition<T>>>
    where
        T: Tracked,
        F: FnOnce(&T) -> SettlementResult<Option<Transition<T>>>,
    {
        if let Some(at) = at {
            if let Err(e) = value.cursor().admit(at) {
                warn!("Rejected stale event for {} {}: {}", T::KIND, value.id(), e);
                crate::metrics::record_rejected_transition(T::KIND, e.kind());
                return Err(e);
            }
        }

        transition(value).map_err(|e| {
            debug!("Rejected transition on {} {}: {}", T::KIND, value.id(), e);
            crate::metrics::record_rejected_transition(T::KIND, e.kind());
            e
        })
    }

    /// Persist an accepted transition over `current` and announce it
    async fn commit<T: Tracked>(
        &self,
        store: &dyn EntityStore<T>,
        current: Versioned<T>,
        at: Option<&BlockRef>,
        transition: Transition<T>,
    ) -> SettlementResult<Transition<T>> {
        let Versioned { version, value } = current;
        let Transition { mut next, intents } = transition;
        let id = value.id().to_string();

        if let Some(at) = at {
            next.cursor_mut().record(at);
        }

        let stored = store.store(&id, version, next).await?;
        let next = stored.value;

        if next.status_name() != value.status_name() {
            info!(
                "{} {}: {} -> {}",
                T::KIND,
                id,
                value.status_name(),
                next.status_name()
            );
            crate::metrics::record_transition(T::KIND, next.status_name());
        }
        for intent in &intents {
            debug!("{} {} requests {}", T::KIND, id, intent);
        }

        self.events.publish(next.updated(Some(&value), intents.clone()));

        Ok(Transition::new(next, intents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::swap::tests::{terms, SECRET, START};
    use crate::coordination::SwapStatus;
    use crate::proof::{Hasher, VerificationResult};

    async fn registry_with_swap() -> (Arc<Registry>, String) {
        let registry = Arc::new(Registry::in_memory(EventBus::new(64)));
        let hasher = Hasher::default();
        let created = AtomicSwap::initiate(
            "swap-1".to_string(),
            terms(&hasher, START + 3600),
            START,
            START + 3600,
        )
        .unwrap();
        registry.create_swap(created).await.unwrap();
        registry
            .apply_swap("swap-1", None, |s| s.participate("0xbbbb", START + 10))
            .await
            .unwrap();
        (registry, "swap-1".to_string())
    }

    #[tokio::test]
    async fn test_rejection_leaves_state_unchanged() {
        let (registry, id) = registry_with_swap().await;
        let mut rx = registry.events().subscribe();
        let hasher = Hasher::default();

        let err = registry
            .apply_swap(&id, None, |s| s.redeem(SECRET, &hasher, START + 3700))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Expired { .. }));

        let swap = registry.swap(&id).await.unwrap();
        assert_eq!(swap.status, SwapStatus::Deposited);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accepted_transition_emits_event() {
        let (registry, id) = registry_with_swap().await;
        let mut rx = registry.events().subscribe();
        let hasher = Hasher::default();

        registry
            .apply_swap(&id, None, |s| s.redeem(SECRET, &hasher, START + 100))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            DomainEvent::SwapUpdated {
                swap,
                previous,
                intents,
            } => {
                assert_eq!(swap.status, SwapStatus::Redeemed);
                assert_eq!(previous, Some(SwapStatus::Deposited));
                assert_eq!(intents.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_redeem_and_refund_settle_once() {
        let hasher = Hasher::default();

        // At the expiry instant redeem is allowed and refund is not; one
        // second later only refund is. Race both at each instant.
        for now in [START + 3600, START + 3601] {
            let (registry, id) = registry_with_swap().await;

            let redeem = {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    registry
                        .apply_swap(&id, None, |s| s.redeem(SECRET, &hasher, now))
                        .await
                })
            };
            let refund = {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move { registry.apply_swap(&id, None, |s| s.refund(now)).await })
            };

            let outcomes = [redeem.await.unwrap().is_ok(), refund.await.unwrap().is_ok()];
            assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

            let status = registry.swap(&id).await.unwrap().status;
            assert!(matches!(status, SwapStatus::Redeemed | SwapStatus::Refunded));
        }
    }

    #[tokio::test]
    async fn test_stale_events_rejected() {
        let (registry, id) = registry_with_swap().await;
        let at = |block_number| {
            Some(BlockRef {
                chain_id: 137,
                block_number,
            })
        };

        // Record block 50 through a no-op transition carrying a block ref
        registry
            .apply_swap(&id, at(50), |s| Ok(Transition::new(s.clone(), Vec::new())))
            .await
            .unwrap();

        let stale = registry
            .apply_swap(&id, at(49), |s| s.refund(START + 9999))
            .await
            .unwrap_err();
        assert!(matches!(stale, SettlementError::StaleEvent { applied: 50, .. }));
        assert_eq!(
            registry.swap(&id).await.unwrap().status,
            SwapStatus::Deposited
        );
    }

    #[tokio::test]
    async fn test_observe_persists_expiry_once() {
        let (registry, id) = registry_with_swap().await;

        let live = registry
            .observe_swap(&id, |s| s.observe_expiry(START + 100))
            .await
            .unwrap();
        assert_eq!(live.status, SwapStatus::Deposited);

        let mut rx = registry.events().subscribe();
        let expired = registry
            .observe_swap(&id, |s| s.observe_expiry(START + 4000))
            .await
            .unwrap();
        assert_eq!(expired.status, SwapStatus::Expired);
        assert!(rx.try_recv().is_ok());

        registry
            .observe_swap(&id, |s| s.observe_expiry(START + 5000))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sessions_and_lock_pruning() {
        let (registry, _) = registry_with_swap().await;
        assert_eq!(registry.set_active_chain("0xABC", 1), None);
        assert_eq!(registry.set_active_chain("0xabc", 137), Some(1));
        assert_eq!(registry.active_chain("0xAbC"), Some(137));

        assert_eq!(registry.prune_locks(), 1);
        assert!(matches!(
            registry.swap("missing").await,
            Err(SettlementError::SwapNotFound { .. })
        ));
    }

    async fn registry_with_transfer() -> Arc<Registry> {
        let registry = Arc::new(Registry::in_memory(EventBus::new(64)));
        let transfer = CrossChainTransfer::initiate(
            "t-1".to_string(),
            crate::coordination::TransferRequest {
                from_chain_id: 1,
                to_chain_id: 137,
                sender: "0xsender".to_string(),
                recipient: "0xrecipient".to_string(),
                amount: crate::types::Amount::from_u128(10),
                token_address: "0xtoken".to_string(),
            },
            0,
        )
        .unwrap();
        registry.create_transfer(transfer).await.unwrap();
        registry
    }

    fn deposit(result: VerificationResult) -> (CrossChainProof, ProofView, BlockRef) {
        let mut input = crate::proof::verifier::tests::proof_input(&Hasher::default(), 1, 700, 4, 0);
        input.transfer_id = Some("t-1".to_string());
        let proof = CrossChainProof::from_input(input, 0);
        let view = ProofView {
            proof: proof.clone(),
            verification_result: result,
            head_height: 720,
        };
        let at = BlockRef {
            chain_id: 1,
            block_number: 700,
        };
        (proof, view, at)
    }

    #[tokio::test]
    async fn test_deposit_proof_stored_with_accepted_transition() {
        let registry = registry_with_transfer().await;
        let mut rx = registry.events().subscribe();
        let (proof, view, at) = deposit(VerificationResult::Valid);
        let proof_id = proof.proof_id.clone();

        let applied = registry
            .apply_deposit_proof(proof, view, at, |t| {
                t.on_deposit_proof(&proof_id, 1, Default::default(), VerificationResult::Valid)
            })
            .await
            .unwrap();

        assert!(applied.is_some());
        assert!(registry.proof(&proof_id).await.is_ok());
        assert!(matches!(rx.try_recv(), Ok(DomainEvent::ProofVerified { .. })));
        assert!(matches!(rx.try_recv(), Ok(DomainEvent::TransferUpdated { .. })));
    }

    #[tokio::test]
    async fn test_refused_deposit_proof_is_not_stored() {
        let registry = registry_with_transfer().await;
        registry
            .apply_transfer(
                "t-1",
                Some(BlockRef {
                    chain_id: 1,
                    block_number: 710,
                }),
                |t| Ok(Transition::new(t.clone(), Vec::new())),
            )
            .await
            .unwrap();

        let mut rx = registry.events().subscribe();
        let (proof, view, at) = deposit(VerificationResult::Valid);
        let proof_id = proof.proof_id.clone();

        let err = registry
            .apply_deposit_proof(proof, view, at, |t| {
                t.on_deposit_proof(&proof_id, 1, Default::default(), VerificationResult::Valid)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::StaleEvent { applied: 710, .. }));
        assert!(matches!(
            registry.proof(&proof_id).await,
            Err(SettlementError::ProofNotFound { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_deposit_proof_is_kept_for_inspection() {
        let registry = registry_with_transfer().await;
        let mut rx = registry.events().subscribe();
        let (proof, view, at) = deposit(VerificationResult::Invalid);
        let proof_id = proof.proof_id.clone();

        let applied = registry
            .apply_deposit_proof(proof, view, at, |t| {
                t.on_deposit_proof(&proof_id, 1, Default::default(), VerificationResult::Invalid)
            })
            .await
            .unwrap();

        assert!(applied.is_none());
        assert!(registry.proof(&proof_id).await.is_ok());
        assert!(matches!(rx.try_recv(), Ok(DomainEvent::ProofVerified { .. })));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            registry.transfer("t-1").await.unwrap().status,
            crate::coordination::TransferStatus::Pending
        );
    }
}
