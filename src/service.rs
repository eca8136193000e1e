//! Settlement service: the queries and mutations callers drive the engine with
//!
//! Reads evaluate swap expiry lazily and recompute proof results against the
//! current head. Writes validate their input before touching the registry and
//! go through it for every state change.

use crate::chain::{ChainOracle, FinalityTracker, TxReceipt};
use crate::clock::Clock;
use crate::config::{ChainConfig, NativeCurrency, Settings, TimelockMode};
use crate::coordination::{
    resolve_expiry, AtomicSwap, CrossChainTransfer, ExecutionReceipt, SwapProposal, SwapStatus,
    SwapTerms, TransferRequest, TransferStatus, Transition,
};
use crate::error::{SettlementError, SettlementResult};
use crate::proof::{
    ChainHead, CrossChainProof, Hasher, ProofInput, ProofVerifier, ProofView, VerificationStats,
};
use crate::state::Registry;
use crate::tx::{GasEstimator, GasOptimization};
use crate::types::{require_non_empty, Amount, BlockRef, Page};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Native balance of an address on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub chain_id: u64,
    pub balance: Amount,
    pub nonce: u64,
    pub native_currency: NativeCurrency,
}

/// Most proofs accepted in one batch submission
pub const MAX_PROOF_BATCH: usize = 64;

/// Per-proof outcome of a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchVerification {
    Verified { proof: ProofView },
    Rejected { error: String, message: String },
}

impl From<SettlementResult<ProofView>> for BatchVerification {
    fn from(result: SettlementResult<ProofView>) -> Self {
        match result {
            Ok(proof) => BatchVerification::Verified { proof },
            Err(e) => BatchVerification::Rejected {
                error: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

pub struct SettlementService {
    registry: Arc<Registry>,
    oracle: Arc<dyn ChainOracle>,
    verifier: Arc<ProofVerifier>,
    gas: GasEstimator,
    finality: FinalityTracker,
    clock: Arc<dyn Clock>,
    /// Enabled chains, ordered by chain id
    chains: Vec<ChainConfig>,
    timelock_mode: TimelockMode,
    refund_on_failure: bool,
}

impl SettlementService {
    pub fn new(
        settings: &Settings,
        registry: Arc<Registry>,
        oracle: Arc<dyn ChainOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut chains: Vec<ChainConfig> = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, c)| c.clone())
            .collect();
        chains.sort_by_key(|c| c.chain_id);

        let hasher = Hasher::new(settings.engine.hash_algorithm);
        let verifier = Arc::new(ProofVerifier::from_chains(hasher, &chains));
        let gas = GasEstimator::new(settings.gas.clone(), &chains);
        let finality = FinalityTracker::new(
            oracle.clone(),
            Duration::from_millis(settings.engine.poll_interval_ms),
            Duration::from_secs(settings.engine.confirmation_timeout_secs),
        );

        Self {
            registry,
            oracle,
            verifier,
            gas,
            finality,
            clock,
            chains,
            timelock_mode: settings.engine.timelock_mode,
            refund_on_failure: settings.engine.refund_on_failure,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn verifier(&self) -> &Arc<ProofVerifier> {
        &self.verifier
    }

    fn chain(&self, chain_id: u64) -> SettlementResult<&ChainConfig> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or(SettlementError::ChainNotFound { chain_id })
    }

    async fn head(&self, chain_id: u64) -> SettlementResult<ChainHead> {
        let height = self.oracle.head_height(chain_id).await?;
        Ok(ChainHead { chain_id, height })
    }

    // ---- queries ----

    pub fn supported_chains(&self) -> &[ChainConfig] {
        &self.chains
    }

    pub async fn wallet_info(&self, address: &str, chain_id: u64) -> SettlementResult<WalletInfo> {
        require_non_empty("address", address)?;
        let chain = self.chain(chain_id)?;
        let account = self.oracle.account(chain_id, address).await?;

        Ok(WalletInfo {
            address: address.to_string(),
            chain_id,
            balance: account.balance,
            nonce: account.nonce,
            native_currency: chain.native_currency.clone(),
        })
    }

    pub async fn cross_chain_transfer(&self, transfer_id: &str) -> SettlementResult<CrossChainTransfer> {
        require_non_empty("transfer id", transfer_id)?;
        self.registry.transfer(transfer_id).await
    }

    /// Transfers, newest first
    pub async fn cross_chain_transfers(
        &self,
        status: Option<TransferStatus>,
        page: Page,
    ) -> SettlementResult<Vec<CrossChainTransfer>> {
        let mut transfers: Vec<CrossChainTransfer> = self
            .registry
            .transfers()
            .await?
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        transfers.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        Ok(page.apply(transfers))
    }

    /// Stored proof with its result recomputed against the current head
    pub async fn cross_chain_proof(&self, proof_id: &str) -> SettlementResult<ProofView> {
        require_non_empty("proof id", proof_id)?;
        let proof = self.registry.proof(proof_id).await?;
        let head = self.head(proof.chain_id).await?;
        self.verifier.view(&proof, head)
    }

    pub async fn atomic_swap(&self, swap_id: &str) -> SettlementResult<AtomicSwap> {
        require_non_empty("swap id", swap_id)?;
        let now = self.clock.now();
        self.registry
            .observe_swap(swap_id, |s| s.observe_expiry(now))
            .await
    }

    /// Swaps, newest first, optionally limited to one party's
    pub async fn atomic_swaps(
        &self,
        status: Option<SwapStatus>,
        address: Option<&str>,
        page: Page,
    ) -> SettlementResult<Vec<AtomicSwap>> {
        let now = self.clock.now();
        let mut swaps = Vec::new();
        for swap in self.registry.swaps().await? {
            let swap = if swap.observe_expiry(now).is_some() {
                self.registry
                    .observe_swap(&swap.swap_id, |s| s.observe_expiry(now))
                    .await?
            } else {
                swap
            };
            if status.map_or(false, |s| swap.status != s) {
                continue;
            }
            if address.map_or(false, |a| !swap.involves(a)) {
                continue;
            }
            swaps.push(swap);
        }

        swaps.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.swap_id.cmp(&b.swap_id))
        });
        Ok(page.apply(swaps))
    }

    pub fn optimize_gas(
        &self,
        from_chain: u64,
        to_chain: u64,
        amount: &str,
    ) -> SettlementResult<GasOptimization> {
        self.gas.optimize(from_chain, to_chain, amount)
    }

    // ---- transfer mutations ----

    pub async fn initiate_cross_chain_transfer(
        &self,
        request: TransferRequest,
    ) -> SettlementResult<CrossChainTransfer> {
        self.chain(request.from_chain_id)?;
        self.chain(request.to_chain_id)?;

        let transition = CrossChainTransfer::initiate(
            Uuid::new_v4().to_string(),
            request,
            self.clock.now(),
        )?;
        let created = self.registry.create_transfer(transition).await?;
        Ok(created.next)
    }

    /// Record the on-chain execution that settles an in-flight transfer
    ///
    /// The transaction is the destination release, or the origin refund once
    /// one was requested. Its receipt must reach the chain's confirmation
    /// depth; with `wait` the call polls for it, otherwise a shallow or
    /// missing receipt is a retryable error.
    pub async fn complete_cross_chain_transfer(
        &self,
        transfer_id: &str,
        tx_hash: &str,
        wait: bool,
    ) -> SettlementResult<CrossChainTransfer> {
        require_non_empty("transfer id", transfer_id)?;
        require_non_empty("transaction hash", tx_hash)?;

        let transfer = self.registry.transfer(transfer_id).await?;
        if transfer.status != TransferStatus::InProgress {
            return Err(SettlementError::StateConflict {
                state: transfer.status.to_string(),
                action: "complete".to_string(),
            });
        }

        let chain_id = if transfer.refund_requested {
            transfer.from_chain_id
        } else {
            transfer.to_chain_id
        };
        let required = self.chain(chain_id)?.confirmation_blocks;

        let receipt: TxReceipt = if wait {
            self.finality
                .wait_for_confirmations(chain_id, tx_hash, required)
                .await?
        } else {
            self.finality
                .confirmed_receipt(chain_id, tx_hash, required)
                .await?
        };

        let execution = ExecutionReceipt {
            tx_hash: receipt.tx_hash.clone(),
            gas_used: receipt.gas_used,
            fees: receipt.fees(),
        };
        let at = Some(BlockRef {
            chain_id,
            block_number: receipt.block_number,
        });
        let now = self.clock.now();
        let refund_on_failure = self.refund_on_failure;
        let success = receipt.success;

        let settled = self
            .registry
            .apply_transfer(transfer_id, at, |t| {
                match (t.refund_requested, success) {
                    (false, true) => t.release_confirmed(execution, now),
                    (false, false) => t.release_reverted(execution, refund_on_failure, now),
                    (true, true) => t.refund_confirmed(execution, now),
                    (true, false) => t.refund_failed(execution, now),
                }
            })
            .await?;

        Ok(settled.next)
    }

    /// Store and verify a foreign-chain proof
    ///
    /// A proof linked to a transfer is applied to it as its deposit proof,
    /// ordered by the block the deposit was mined in. A result that blocks
    /// the transfer is reported in the returned view, not as an error. When
    /// the transfer refuses the proof outright, nothing is stored.
    pub async fn verify_cross_chain_proof(&self, input: ProofInput) -> SettlementResult<ProofView> {
        self.check_proof_input(&input).await?;
        let head = self.head(input.chain_id).await?;
        self.submit_proof(input, head).await
    }

    /// Verify several proofs, each on its own
    ///
    /// Every chain head is read once for the whole batch. One proof's
    /// rejection does not affect the others.
    pub async fn verify_cross_chain_proofs(
        &self,
        inputs: Vec<ProofInput>,
    ) -> SettlementResult<Vec<BatchVerification>> {
        if inputs.is_empty() || inputs.len() > MAX_PROOF_BATCH {
            return Err(SettlementError::Validation(format!(
                "a batch holds 1 to {} proofs, got {}",
                MAX_PROOF_BATCH,
                inputs.len()
            )));
        }

        let mut heads: BTreeMap<u64, SettlementResult<ChainHead>> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(inputs.len());
        for input in inputs {
            let outcome = self.batch_item(input, &mut heads).await;
            outcomes.push(BatchVerification::from(outcome));
        }

        let verified = outcomes
            .iter()
            .filter(|o| matches!(o, BatchVerification::Verified { .. }))
            .count();
        info!("Batch of {} proofs: {} verified", outcomes.len(), verified);
        Ok(outcomes)
    }

    async fn batch_item(
        &self,
        input: ProofInput,
        heads: &mut BTreeMap<u64, SettlementResult<ChainHead>>,
    ) -> SettlementResult<ProofView> {
        self.check_proof_input(&input).await?;
        let head = match heads.get(&input.chain_id) {
            Some(head) => head.clone(),
            None => {
                let head = self.head(input.chain_id).await;
                heads.insert(input.chain_id, head.clone());
                head
            }
        }?;
        self.submit_proof(input, head).await
    }

    /// Verification outcomes announced so far for a chain's proofs
    pub fn verification_stats(&self, chain_id: u64) -> SettlementResult<VerificationStats> {
        self.chain(chain_id)?;
        Ok(self.registry.verification_stats(chain_id))
    }

    async fn check_proof_input(&self, input: &ProofInput) -> SettlementResult<()> {
        if self.verifier.policy(input.chain_id).is_none() {
            return Err(SettlementError::ChainNotFound {
                chain_id: input.chain_id,
            });
        }

        if let Some(transfer_id) = &input.transfer_id {
            let transfer = self.registry.transfer(transfer_id).await?;
            if transfer.from_chain_id != input.chain_id {
                return Err(SettlementError::Validation(format!(
                    "proof is from chain {}, transfer {} originates on chain {}",
                    input.chain_id, transfer_id, transfer.from_chain_id
                )));
            }
        }
        Ok(())
    }

    async fn submit_proof(&self, input: ProofInput, head: ChainHead) -> SettlementResult<ProofView> {
        let proof = CrossChainProof::from_input(input, self.clock.now());
        let view = self.verifier.view(&proof, head)?;
        info!(
            "Proof {} on chain {}: {} at head {}",
            proof.proof_id, proof.chain_id, view.verification_result, head.height
        );

        let transfer_id = match proof.transfer_id.clone() {
            Some(id) => id,
            None => {
                self.registry.save_proof(proof).await?;
                self.registry.publish_proof_verified(view.clone());
                return Ok(view);
            }
        };

        let digest = proof.digest(self.verifier.hasher());
        let result = view.verification_result;
        let proof_id = proof.proof_id.clone();
        let at = BlockRef {
            chain_id: proof.chain_id,
            block_number: proof.block_number,
        };

        let applied = self
            .registry
            .apply_deposit_proof(proof, view.clone(), at, |t| {
                t.on_deposit_proof(&proof_id, at.chain_id, digest, result)
            })
            .await?;
        if applied.is_none() {
            warn!(
                "Transfer {} blocked: proof {} is {}",
                transfer_id, proof_id, result
            );
        }

        Ok(view)
    }

    // ---- swap mutations ----

    pub async fn initiate_atomic_swap(&self, terms: SwapTerms) -> SettlementResult<AtomicSwap> {
        let initiator_chain = self.chain(terms.initiator_chain_id)?;
        self.chain(terms.participant_chain_id)?;

        let now = self.clock.now();
        let head_height = match self.timelock_mode {
            TimelockMode::Timestamp => 0,
            TimelockMode::BlockHeight => self.oracle.head_height(initiator_chain.chain_id).await?,
        };
        let expires_at = resolve_expiry(
            self.timelock_mode,
            terms.timelock,
            now,
            head_height,
            initiator_chain.block_time_ms,
        )?;

        let transition = AtomicSwap::initiate(Uuid::new_v4().to_string(), terms, now, expires_at)?;
        let created = self.registry.create_swap(transition).await?;
        Ok(created.next)
    }

    pub async fn participate_atomic_swap(
        &self,
        swap_id: &str,
        participant: &str,
    ) -> SettlementResult<AtomicSwap> {
        let now = self.clock.now();
        self.transition_swap(swap_id, |s| s.participate(participant, now))
            .await
    }

    pub async fn redeem_atomic_swap(&self, swap_id: &str, secret: &str) -> SettlementResult<AtomicSwap> {
        let now = self.clock.now();
        let hasher = self.verifier.hasher();
        self.transition_swap(swap_id, |s| s.redeem(secret, hasher, now))
            .await
    }

    pub async fn refund_atomic_swap(&self, swap_id: &str) -> SettlementResult<AtomicSwap> {
        let now = self.clock.now();
        self.transition_swap(swap_id, |s| s.refund(now)).await
    }

    pub async fn cancel_atomic_swap(&self, swap_id: &str, caller: &str) -> SettlementResult<AtomicSwap> {
        require_non_empty("caller", caller)?;
        let now = self.clock.now();
        self.transition_swap(swap_id, |s| s.cancel(caller, now)).await
    }

    async fn transition_swap<F>(&self, swap_id: &str, transition: F) -> SettlementResult<AtomicSwap>
    where
        F: FnOnce(&AtomicSwap) -> SettlementResult<Transition<AtomicSwap>>,
    {
        require_non_empty("swap id", swap_id)?;
        let applied = self.registry.apply_swap(swap_id, None, transition).await?;
        Ok(applied.next)
    }

    // ---- swap proposals ----

    /// Offer swap terms to one counterparty; nothing is locked yet
    pub async fn create_swap_proposal(
        &self,
        proposer: &str,
        terms: SwapTerms,
        participant: &str,
    ) -> SettlementResult<SwapProposal> {
        self.chain(terms.initiator_chain_id)?;
        self.chain(terms.participant_chain_id)?;

        let proposal = SwapProposal::create(
            Uuid::new_v4().to_string(),
            proposer,
            terms,
            participant,
            self.clock.now(),
        )?;
        self.registry.create_proposal(proposal).await
    }

    /// The addressed counterparty accepts, opening the proposed swap
    pub async fn accept_swap_proposal(
        &self,
        proposal_id: &str,
        accepter: &str,
    ) -> SettlementResult<AtomicSwap> {
        require_non_empty("proposal id", proposal_id)?;
        require_non_empty("accepter", accepter)?;

        let proposal = self.registry.proposal(proposal_id).await?;
        let initiator_chain = self.chain(proposal.terms.initiator_chain_id)?;
        let now = self.clock.now();
        let head_height = match self.timelock_mode {
            TimelockMode::Timestamp => 0,
            TimelockMode::BlockHeight => self.oracle.head_height(initiator_chain.chain_id).await?,
        };
        let expires_at = resolve_expiry(
            self.timelock_mode,
            proposal.terms.timelock,
            now,
            head_height,
            initiator_chain.block_time_ms,
        )?;

        let swap_id = Uuid::new_v4().to_string();
        let (_, opened) = self
            .registry
            .accept_proposal(proposal_id, |p| p.accept(accepter, swap_id, now, expires_at))
            .await?;
        Ok(opened.next)
    }

    pub async fn swap_proposal(&self, proposal_id: &str) -> SettlementResult<SwapProposal> {
        require_non_empty("proposal id", proposal_id)?;
        self.registry.proposal(proposal_id).await
    }

    /// Proposals, newest first, optionally limited to one party's
    pub async fn swap_proposals(
        &self,
        address: Option<&str>,
        page: Page,
    ) -> SettlementResult<Vec<SwapProposal>> {
        let mut proposals: Vec<SwapProposal> = self
            .registry
            .proposals()
            .await?
            .into_iter()
            .filter(|p| {
                address.map_or(true, |a| {
                    p.terms.initiator.eq_ignore_ascii_case(a) || p.participant.eq_ignore_ascii_case(a)
                })
            })
            .collect();
        proposals.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.proposal_id.cmp(&b.proposal_id))
        });
        Ok(page.apply(proposals))
    }

    // ---- session ----

    /// Make `chain_id` the address's active chain and describe the wallet there
    pub async fn switch_chain(&self, address: &str, chain_id: u64) -> SettlementResult<WalletInfo> {
        require_non_empty("address", address)?;
        self.chain(chain_id)?;

        let wallet = self.wallet_info(address, chain_id).await?;
        if let Some(previous) = self.registry.set_active_chain(address, chain_id) {
            info!("{} switched from chain {} to {}", address, previous, chain_id);
        }
        Ok(wallet)
    }

    pub fn active_chain(&self, address: &str) -> Option<u64> {
        self.registry.active_chain(address)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::oracle::MockChainOracle;
    use crate::chain::AccountState;
    use crate::clock::ManualClock;
    use crate::coordination::swap::tests::{terms, SECRET, START};
    use crate::events::EventBus;
    use crate::proof::verifier::tests::proof_input;
    use crate::proof::VerificationResult;

    fn settings() -> Settings {
        Settings::parse(crate::config::tests::SAMPLE).unwrap()
    }

    fn service(oracle: MockChainOracle) -> (SettlementService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let registry = Arc::new(Registry::in_memory(EventBus::new(64)));
        let service = SettlementService::new(&settings(), registry, Arc::new(oracle), clock.clone());
        (service, clock)
    }

    fn request() -> TransferRequest {
        TransferRequest {
            from_chain_id: 1,
            to_chain_id: 137,
            sender: "0xsender".to_string(),
            recipient: "0xrecipient".to_string(),
            amount: Amount::parse("250000000000000000000").unwrap(),
            token_address: "0xtoken".to_string(),
        }
    }

    #[tokio::test]
    async fn test_swap_timelock_scenario() {
        let (service, clock) = service(MockChainOracle::new());
        let hasher = Hasher::default();

        let swap = service
            .initiate_atomic_swap(terms(&hasher, START + 3600))
            .await
            .unwrap();
        assert_eq!(swap.status, SwapStatus::Initiated);
        assert_eq!(swap.expires_at, START + 3600);

        clock.set(START + 10);
        let joined = service
            .participate_atomic_swap(&swap.swap_id, "0xbbbb")
            .await
            .unwrap();
        assert_eq!(joined.status, SwapStatus::Deposited);

        clock.set(START + 3700);
        let err = service
            .redeem_atomic_swap(&swap.swap_id, SECRET)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Expired { .. }));
        assert_eq!(
            service.registry().swap(&swap.swap_id).await.unwrap().status,
            SwapStatus::Deposited
        );

        clock.set(START + 100);
        let redeemed = service.redeem_atomic_swap(&swap.swap_id, SECRET).await.unwrap();
        assert_eq!(redeemed.status, SwapStatus::Redeemed);
        assert_eq!(redeemed.secret.as_deref(), Some(SECRET));
    }

    #[tokio::test]
    async fn test_reads_observe_expiry() {
        let (service, clock) = service(MockChainOracle::new());
        let hasher = Hasher::default();
        let swap = service
            .initiate_atomic_swap(terms(&hasher, START + 60))
            .await
            .unwrap();

        clock.set(START + 61);
        let listed = service
            .atomic_swaps(Some(SwapStatus::Expired), Some("0xAAAA"), Page::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let err = service.refund_atomic_swap(&swap.swap_id).await.unwrap_err();
        assert!(err.is_state_conflict());
    }

    #[tokio::test]
    async fn test_unknown_chain_rejected_before_mutation() {
        let (service, _) = service(MockChainOracle::new());
        let mut bad = request();
        bad.to_chain_id = 56;

        assert!(matches!(
            service.initiate_cross_chain_transfer(bad).await,
            Err(SettlementError::ChainNotFound { chain_id: 56 })
        ));
        assert!(service
            .cross_chain_transfers(None, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_deposit_proof_drives_transfer() {
        let mut oracle = MockChainOracle::new();
        let mut seq = mockall::Sequence::new();
        oracle
            .expect_head_height()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1_002));
        oracle
            .expect_head_height()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1_010));
        let (service, _) = service(oracle);

        let transfer = service.initiate_cross_chain_transfer(request()).await.unwrap();
        let mut input = proof_input(&Hasher::default(), 1, 1_000, 4, 1);
        input.transfer_id = Some(transfer.transfer_id.clone());

        let parked = service.verify_cross_chain_proof(input.clone()).await.unwrap();
        assert_eq!(
            parked.verification_result,
            VerificationResult::InsufficientConfirmations
        );
        let waiting = service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
        assert_eq!(waiting.pending_proof_id.as_deref(), Some(parked.proof.proof_id.as_str()));

        let valid = service.verify_cross_chain_proof(input).await.unwrap();
        assert_eq!(valid.verification_result, VerificationResult::Valid);
        let started = service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
        assert_eq!(started.status, TransferStatus::InProgress);
        assert_eq!(started.deposit_proof_id, Some(valid.proof.proof_id.clone()));
        assert_eq!(started.cursor.last_applied(1), Some(1_000));
    }

    #[tokio::test]
    async fn test_refused_proof_leaves_no_trace() {
        let mut oracle = MockChainOracle::new();
        let mut seq = mockall::Sequence::new();
        oracle
            .expect_head_height()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1_010));
        // A lagging provider answers the resubmission
        oracle
            .expect_head_height()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1_008));
        let (service, _) = service(oracle);

        let transfer = service.initiate_cross_chain_transfer(request()).await.unwrap();
        let mut input = proof_input(&Hasher::default(), 1, 1_000, 4, 1);
        input.transfer_id = Some(transfer.transfer_id.clone());

        let first = service.verify_cross_chain_proof(input.clone()).await.unwrap();
        assert_eq!(first.verification_result, VerificationResult::Valid);

        let mut rx = service.registry().events().subscribe();
        let err = service.verify_cross_chain_proof(input).await.unwrap_err();
        assert!(
            matches!(err, SettlementError::StateConflict { .. }),
            "unexpected error {:?}",
            err
        );
        assert!(rx.try_recv().is_err());

        let unchanged = service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
        assert_eq!(unchanged.status, TransferStatus::InProgress);
        assert_eq!(unchanged.deposit_proof_id, Some(first.proof.proof_id));
    }

    #[tokio::test]
    async fn test_invalid_proof_surfaces_in_view() {
        let mut oracle = MockChainOracle::new();
        oracle.expect_head_height().returning(|_| Ok(1_100));
        let (service, _) = service(oracle);

        let transfer = service.initiate_cross_chain_transfer(request()).await.unwrap();
        let mut input = proof_input(&Hasher::default(), 1, 1_000, 4, 1);
        input.transfer_id = Some(transfer.transfer_id.clone());
        input.merkle_root = crate::types::Digest([0xee; 32]).to_hex();

        let view = service.verify_cross_chain_proof(input).await.unwrap();
        assert_eq!(view.verification_result, VerificationResult::Invalid);
        assert_eq!(
            service
                .cross_chain_transfer(&transfer.transfer_id)
                .await
                .unwrap()
                .status,
            TransferStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_batch_reads_each_head_once() {
        let mut oracle = MockChainOracle::new();
        oracle
            .expect_head_height()
            .withf(|chain_id| *chain_id == 1)
            .times(1)
            .returning(|_| Ok(1_010));
        let (service, _) = service(oracle);
        let hasher = Hasher::default();

        let outcomes = service
            .verify_cross_chain_proofs(vec![
                proof_input(&hasher, 1, 1_000, 4, 1),
                proof_input(&hasher, 56, 1_000, 4, 1),
                proof_input(&hasher, 1, 1_009, 4, 2),
            ])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        match &outcomes[0] {
            BatchVerification::Verified { proof } => {
                assert_eq!(proof.verification_result, VerificationResult::Valid)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        match &outcomes[1] {
            BatchVerification::Rejected { error, .. } => assert_eq!(error, "validation"),
            other => panic!("unexpected outcome {:?}", other),
        }
        match &outcomes[2] {
            BatchVerification::Verified { proof } => assert_eq!(
                proof.verification_result,
                VerificationResult::InsufficientConfirmations
            ),
            other => panic!("unexpected outcome {:?}", other),
        }

        let stats = service.verification_stats(1).unwrap();
        assert_eq!((stats.total, stats.valid, stats.pending, stats.failed), (2, 1, 1, 0));
        assert!(matches!(
            service.verification_stats(56),
            Err(SettlementError::ChainNotFound { chain_id: 56 })
        ));
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let (service, _) = service(MockChainOracle::new());
        let input = proof_input(&Hasher::default(), 1, 1_000, 4, 1);

        let empty = service.verify_cross_chain_proofs(Vec::new()).await.unwrap_err();
        assert!(empty.is_validation());
        let oversized = service
            .verify_cross_chain_proofs(vec![input; MAX_PROOF_BATCH + 1])
            .await
            .unwrap_err();
        assert!(oversized.is_validation());
        assert_eq!(service.verification_stats(1).unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_proposal_opens_reserved_swap() {
        let (service, clock) = service(MockChainOracle::new());
        let hasher = Hasher::default();

        let proposal = service
            .create_swap_proposal("0xaaaa", terms(&hasher, START + 3600), "0xbbbb")
            .await
            .unwrap();
        assert_eq!(
            service
                .swap_proposals(Some("0xBBBB"), Page::default())
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(service
            .swap_proposals(Some("0xcccc"), Page::default())
            .await
            .unwrap()
            .is_empty());

        clock.set(START + 5);
        let stranger = service
            .accept_swap_proposal(&proposal.proposal_id, "0xcccc")
            .await
            .unwrap_err();
        assert!(matches!(stranger, SettlementError::Unauthorized { .. }));

        let swap = service
            .accept_swap_proposal(&proposal.proposal_id, "0xbbbb")
            .await
            .unwrap();
        assert_eq!(swap.status, SwapStatus::Initiated);
        assert_eq!(swap.reserved_participant.as_deref(), Some("0xbbbb"));

        let stored = service.swap_proposal(&proposal.proposal_id).await.unwrap();
        assert_eq!(stored.swap_id.as_deref(), Some(swap.swap_id.as_str()));
        let again = service
            .accept_swap_proposal(&proposal.proposal_id, "0xbbbb")
            .await
            .unwrap_err();
        assert!(again.is_state_conflict());
        assert_eq!(
            service
                .atomic_swaps(None, None, Page::default())
                .await
                .unwrap()
                .len(),
            1
        );

        let err = service
            .participate_atomic_swap(&swap.swap_id, "0xcccc")
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Unauthorized { .. }));
        assert!(matches!(
            service.swap_proposal("missing").await,
            Err(SettlementError::ProposalNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_waits_for_destination_depth() {
        let mut oracle = MockChainOracle::new();
        oracle.expect_head_height().returning(|chain_id| {
            Ok(if chain_id == 1 { 1_010 } else { 5_000 })
        });
        oracle.expect_receipt().returning(|chain_id, tx_hash| {
            assert_eq!(chain_id, 137);
            Ok(Some(TxReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: 4_900,
                success: true,
                gas_used: 100_000,
                effective_gas_price: Amount::from_u128(30),
            }))
        });
        let (service, _) = service(oracle);

        let transfer = service.initiate_cross_chain_transfer(request()).await.unwrap();
        let err = service
            .complete_cross_chain_transfer(&transfer.transfer_id, "0xrelease", false)
            .await
            .unwrap_err();
        assert!(err.is_state_conflict());

        let mut input = proof_input(&Hasher::default(), 1, 1_000, 4, 1);
        input.transfer_id = Some(transfer.transfer_id.clone());
        service.verify_cross_chain_proof(input).await.unwrap();

        // Polygon requires 128 confirmations; 4_900 under head 5_000 has 100
        let shallow = service
            .complete_cross_chain_transfer(&transfer.transfer_id, "0xrelease", false)
            .await
            .unwrap_err();
        assert!(shallow.is_retryable());
    }

    #[tokio::test]
    async fn test_wallet_info_and_switch_chain() {
        let mut oracle = MockChainOracle::new();
        oracle.expect_account().returning(|_, _| {
            Ok(AccountState {
                balance: Amount::from_u128(5),
                nonce: 3,
            })
        });
        let (service, _) = service(oracle);

        let wallet = service.switch_chain("0xWallet", 137).await.unwrap();
        assert_eq!(wallet.native_currency.symbol, "POL");
        assert_eq!(wallet.nonce, 3);
        assert_eq!(service.active_chain("0xwallet"), Some(137));

        assert!(service.switch_chain("0xwallet", 56).await.is_err());
        assert_eq!(service.active_chain("0xwallet"), Some(137));
    }

    #[tokio::test]
    async fn test_optimize_gas_bounds() {
        let (service, _) = service(MockChainOracle::new());
        let quote = service.optimize_gas(1, 137, "1000").unwrap();
        assert!(quote.optimized_cost <= quote.estimated_cost);
        assert!((0.0..=100.0).contains(&quote.savings_percentage));
        assert_eq!(service.supported_chains().len(), 2);
    }
}
