//! End-to-end settlement flows through the service, engine and HTTP API

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

use xchain_settlement::api::{self, AppState};
use xchain_settlement::chain::{AccountState, ChainOracle, TxReceipt};
use xchain_settlement::clock::{Clock, ManualClock};
use xchain_settlement::config::Settings;
use xchain_settlement::coordination::{
    CoordinationEngine, SwapStatus, SwapTerms, TransferRequest, TransferStatus,
};
use xchain_settlement::events::{DomainEvent, EventBus};
use xchain_settlement::proof::{merkle, ChainHead, Hasher, ProofInput, VerificationResult};
use xchain_settlement::state::Registry;
use xchain_settlement::tx::ActionIntent;
use xchain_settlement::types::{decode_hex, Amount, Asset, Digest, Page};
use xchain_settlement::{SettlementError, SettlementService};

const START: u64 = 1_700_000_000;
const SECRET: &str = "0x70726f6f662d6f662d7365637265";

const CONFIG: &str = r#"
[engine]
instance_id = "flow-test"
poll_interval_ms = 10
max_retries = 2
retry_delay_ms = 1
health_check_interval_secs = 30
max_reverification_attempts = 2
refund_on_failure = true
confirmation_timeout_secs = 2

[api]
host = "127.0.0.1"
port = 0

[metrics]
enabled = false
port = 0

[chains.origin]
chain_id = 1
name = "Origin"
rpc_urls = ["http://127.0.0.1:1"]
bridge_address = "0x00000000000000000000000000000000000000b1"
gas_price_wei = 20000000000
block_time_ms = 12000
native_currency = { name = "Ether", symbol = "ETH", decimals = 18 }
confirmation_blocks = 6
proof_validity_blocks = 500
gas_price_strategy = "eip1559"
base_fee_wei = 10000000000
priority_fee_wei = 1000000000
max_gas_price_gwei = 200
enabled = true

[chains.destination]
chain_id = 10
name = "Destination"
rpc_urls = ["http://127.0.0.1:2"]
bridge_address = "0x00000000000000000000000000000000000000b2"
gas_price_wei = 1000000000
block_time_ms = 2000
native_currency = { name = "Ether", symbol = "ETH", decimals = 18 }
confirmation_blocks = 3
proof_validity_blocks = 1000
gas_price_strategy = "legacy"
max_gas_price_gwei = 50
enabled = true
"#;

/// Scripted chains: heads and receipts set by the test
#[derive(Default)]
struct ScriptedChains {
    heads: DashMap<u64, u64>,
    receipts: DashMap<(u64, String), TxReceipt>,
}

impl ScriptedChains {
    fn set_head(&self, chain_id: u64, height: u64) {
        self.heads.insert(chain_id, height);
    }

    fn mine(&self, chain_id: u64, tx_hash: &str, block_number: u64, success: bool) {
        self.receipts.insert(
            (chain_id, tx_hash.to_string()),
            TxReceipt {
                tx_hash: tx_hash.to_string(),
                block_number,
                success,
                gas_used: 80_000,
                effective_gas_price: Amount::from_u128(2_000_000_000),
            },
        );
    }

    fn drop_receipt(&self, chain_id: u64, tx_hash: &str) {
        self.receipts.remove(&(chain_id, tx_hash.to_string()));
    }
}

#[async_trait]
impl ChainOracle for ScriptedChains {
    async fn head_height(&self, chain_id: u64) -> Result<u64, SettlementError> {
        self.heads
            .get(&chain_id)
            .map(|h| *h)
            .ok_or(SettlementError::ExternalRead {
                chain_id,
                message: "no head".to_string(),
            })
    }

    async fn receipt(&self, chain_id: u64, tx_hash: &str) -> Result<Option<TxReceipt>, SettlementError> {
        Ok(self
            .receipts
            .get(&(chain_id, tx_hash.to_string()))
            .map(|r| r.clone()))
    }

    async fn account(&self, _chain_id: u64, _address: &str) -> Result<AccountState, SettlementError> {
        Ok(AccountState {
            balance: Amount::parse("1000000000000000000").unwrap(),
            nonce: 7,
        })
    }
}

struct Harness {
    settings: Settings,
    chains: Arc<ScriptedChains>,
    clock: Arc<ManualClock>,
    registry: Arc<Registry>,
    service: Arc<SettlementService>,
}

impl Harness {
    fn new() -> Self {
        let settings = Settings::parse(CONFIG).unwrap();
        let chains = Arc::new(ScriptedChains::default());
        let clock = Arc::new(ManualClock::new(START));
        let registry = Arc::new(Registry::in_memory(EventBus::new(256)));
        let service = Arc::new(SettlementService::new(
            &settings,
            registry.clone(),
            chains.clone(),
            clock.clone(),
        ));
        Self {
            settings,
            chains,
            clock,
            registry,
            service,
        }
    }

    fn engine(&self) -> CoordinationEngine {
        let (_tx, rx) = mpsc::channel(8);
        let clock: Arc<dyn Clock> = self.clock.clone();
        CoordinationEngine::new(
            self.registry.clone(),
            self.chains.clone(),
            self.service.verifier().clone(),
            clock,
            self.settings.engine.clone(),
            rx,
        )
    }
}

/// Proof of the third of five bridge events mined in `block_number`
fn deposit_proof(block_number: u64, transfer_id: &str) -> ProofInput {
    let hasher = Hasher::default();
    let payload = format!("deposit:{}", transfer_id).into_bytes();
    let txs: Vec<[u8; 32]> = (0..5u8).map(|i| [0x40 + i; 32]).collect();
    let leaves: Vec<Digest> = txs
        .iter()
        .map(|tx| merkle::leaf_hash(&hasher, tx, &payload))
        .collect();
    let root = merkle::root_of(&hasher, &leaves).unwrap();
    let siblings = merkle::proof_for(&hasher, &leaves, 2).unwrap();

    ProofInput {
        chain_id: 1,
        block_number,
        transaction_hash: format!("0x{}", hex::encode(txs[2])),
        payload: format!("0x{}", hex::encode(&payload)),
        merkle_root: root.to_hex(),
        merkle_proof: siblings.iter().map(Digest::to_hex).collect(),
        tree_depth: Some(siblings.len() as u32),
        transfer_id: Some(transfer_id.to_string()),
    }
}

fn transfer_request() -> TransferRequest {
    TransferRequest {
        from_chain_id: 1,
        to_chain_id: 10,
        sender: "0xsender".to_string(),
        recipient: "0xrecipient".to_string(),
        amount: Amount::parse("123456789012345678901234567890").unwrap(),
        token_address: "0xtoken".to_string(),
    }
}

fn swap_terms(timelock: u64) -> SwapTerms {
    let secret = decode_hex(SECRET).unwrap();
    SwapTerms {
        initiator: "0xAlice".to_string(),
        initiator_chain_id: 1,
        participant_chain_id: 10,
        initiator_asset: Asset {
            token_address: "0xweth".to_string(),
            amount: Amount::from_u128(5_000_000_000_000_000_000),
            decimals: 18,
        },
        participant_asset: Asset {
            token_address: "0xusdc".to_string(),
            amount: Amount::from_u128(9_000_000_000),
            decimals: 6,
        },
        secret_hash: Hasher::default().digest(&[secret.as_slice()]),
        timelock,
    }
}

#[tokio::test]
async fn transfer_settles_after_deposit_confirms() {
    let h = Harness::new();
    let mut events = h.registry.events().subscribe();
    let engine = h.engine();

    let transfer = h
        .service
        .initiate_cross_chain_transfer(transfer_request())
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(transfer.amount.to_string(), "123456789012345678901234567890");

    // Deposit mined at 200, head one block later
    let proof = deposit_proof(200, &transfer.transfer_id);
    h.chains.mine(1, &proof.transaction_hash, 200, true);
    h.chains.set_head(1, 201);

    let view = h.service.verify_cross_chain_proof(proof).await.unwrap();
    assert_eq!(
        view.verification_result,
        VerificationResult::InsufficientConfirmations
    );

    // Head reaches six confirmations: the engine picks up the parked proof
    h.chains.set_head(1, 206);
    let applied = engine
        .on_head(ChainHead {
            chain_id: 1,
            height: 206,
        })
        .await
        .unwrap();
    assert_eq!(applied, 1);

    let in_flight = h.service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
    assert_eq!(in_flight.status, TransferStatus::InProgress);
    assert!(in_flight.proof_hash.is_some());

    // Re-verification while in flight keeps it going
    h.chains.set_head(1, 210);
    engine
        .on_head(ChainHead {
            chain_id: 1,
            height: 210,
        })
        .await
        .unwrap();
    let rechecked = h.service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
    assert_eq!(rechecked.status, TransferStatus::InProgress);
    assert_eq!(rechecked.verification_attempts, 1);

    // Destination release mined and buried
    h.chains.mine(10, "0xrelease", 50, true);
    h.chains.set_head(10, 60);
    h.clock.advance(120);
    let done = h
        .service
        .complete_cross_chain_transfer(&transfer.transfer_id, "0xrelease", true)
        .await
        .unwrap();
    assert_eq!(done.status, TransferStatus::Completed);
    assert_eq!(done.gas_used, Some(80_000));
    assert_eq!(done.fees.unwrap().to_string(), "160000000000000");
    assert_eq!(done.proof_hash, in_flight.proof_hash);
    assert_eq!(done.completed_at, Some(START + 120));

    let mut saw_release_intent = false;
    let mut saw_proof = false;
    while let Ok(event) = events.try_recv() {
        match event {
            DomainEvent::TransferUpdated { intents, .. } => {
                saw_release_intent |= intents
                    .iter()
                    .any(|i| matches!(i, ActionIntent::ReleaseTransfer { chain_id: 10, .. }));
            }
            DomainEvent::ProofVerified { .. } => saw_proof = true,
            _ => {}
        }
    }
    assert!(saw_release_intent);
    assert!(saw_proof);
}

#[tokio::test]
async fn reorged_deposit_is_refunded() {
    let h = Harness::new();
    let engine = h.engine();

    let transfer = h
        .service
        .initiate_cross_chain_transfer(transfer_request())
        .await
        .unwrap();
    let proof = deposit_proof(300, &transfer.transfer_id);
    let deposit_tx = proof.transaction_hash.clone();
    h.chains.mine(1, &deposit_tx, 300, true);
    h.chains.set_head(1, 320);

    let view = h.service.verify_cross_chain_proof(proof).await.unwrap();
    assert_eq!(view.verification_result, VerificationResult::Valid);

    // The deposit disappears from the origin chain
    h.chains.drop_receipt(1, &deposit_tx);
    engine
        .on_head(ChainHead {
            chain_id: 1,
            height: 321,
        })
        .await
        .unwrap();

    let failing = h.service.cross_chain_transfer(&transfer.transfer_id).await.unwrap();
    assert_eq!(failing.status, TransferStatus::InProgress);
    assert!(failing.refund_requested);

    // A release can no longer settle it; the origin refund does
    h.chains.mine(1, "0xrefund", 322, true);
    h.chains.set_head(1, 330);
    let refunded = h
        .service
        .complete_cross_chain_transfer(&transfer.transfer_id, "0xrefund", false)
        .await
        .unwrap();
    assert_eq!(refunded.status, TransferStatus::Refunded);
}

#[tokio::test]
async fn swap_lifecycle_and_expiry() {
    let h = Harness::new();

    let swap = h
        .service
        .initiate_atomic_swap(swap_terms(START + 3600))
        .await
        .unwrap();
    assert_eq!(swap.status, SwapStatus::Initiated);

    h.clock.set(START + 10);
    h.service
        .participate_atomic_swap(&swap.swap_id, "0xBob")
        .await
        .unwrap();

    let wrong = h
        .service
        .redeem_atomic_swap(&swap.swap_id, "0x00")
        .await
        .unwrap_err();
    assert_eq!(wrong, SettlementError::InvalidSecret);

    let early = h.service.refund_atomic_swap(&swap.swap_id).await.unwrap_err();
    assert!(matches!(early, SettlementError::NotYetExpired { .. }));

    let redeemed = h
        .service
        .redeem_atomic_swap(&swap.swap_id, SECRET)
        .await
        .unwrap();
    assert_eq!(redeemed.status, SwapStatus::Redeemed);

    // Exactly one terminal state: a later refund is a conflict
    h.clock.set(START + 7200);
    assert!(h
        .service
        .refund_atomic_swap(&swap.swap_id)
        .await
        .unwrap_err()
        .is_state_conflict());
    assert_eq!(
        h.service.atomic_swap(&swap.swap_id).await.unwrap().status,
        SwapStatus::Redeemed
    );

    // An unjoined swap past its timelock reads as expired
    let idle = h
        .service
        .initiate_atomic_swap(swap_terms(START + 7300))
        .await
        .unwrap();
    h.clock.set(START + 7301);
    let mine = h
        .service
        .atomic_swaps(None, Some("0xalice"), Page::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(
        h.service.atomic_swap(&idle.swap_id).await.unwrap().status,
        SwapStatus::Expired
    );
}

#[tokio::test]
async fn only_initiator_cancels_before_join() {
    let h = Harness::new();
    let swap = h
        .service
        .initiate_atomic_swap(swap_terms(START + 600))
        .await
        .unwrap();

    let err = h
        .service
        .cancel_atomic_swap(&swap.swap_id, "0xmallory")
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Unauthorized { .. }));

    let cancelled = h
        .service
        .cancel_atomic_swap(&swap.swap_id, "0xalice")
        .await
        .unwrap();
    assert_eq!(cancelled.status, SwapStatus::Cancelled);

    assert!(h
        .service
        .participate_atomic_swap(&swap.swap_id, "0xbob")
        .await
        .unwrap_err()
        .is_state_conflict());
}

#[tokio::test]
async fn http_surface_maps_errors() {
    let h = Harness::new();
    let app = api::router(AppState {
        service: h.service.clone(),
        chain_manager: None,
    });

    let response = app
        .clone()
        .oneshot(Request::get("/swaps/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::get("/gas?from_chain=1&to_chain=10&amount=1000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let quote: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(quote["from_chain"], 1);
    assert!(quote["legs"].as_array().unwrap().len() == 2);

    let response = app
        .clone()
        .oneshot(
            Request::post("/transfers")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "from_chain_id": 1,
                        "to_chain_id": 1,
                        "sender": "0xs",
                        "recipient": "0xr",
                        "amount": "5",
                        "token_address": "0xt"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn proposal_accepted_over_http() {
    let h = Harness::new();
    let app = api::router(AppState {
        service: h.service.clone(),
        chain_manager: None,
    });
    let post = |uri: &str, body: serde_json::Value| {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(post(
            "/proposals",
            serde_json::json!({
                "proposer": "0xalice",
                "participant": "0xbob",
                "terms": serde_json::to_value(swap_terms(START + 3600)).unwrap(),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let proposal: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(proposal["status"], "OPEN");
    let accept_uri = format!("/proposals/{}/accept", proposal["proposal_id"].as_str().unwrap());

    let response = app
        .clone()
        .oneshot(post(&accept_uri, serde_json::json!({ "address": "0xmallory" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post(&accept_uri, serde_json::json!({ "address": "0xBob" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let swap: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(swap["status"], "INITIATED");
    assert_eq!(swap["reserved_participant"], "0xbob");

    let response = app
        .clone()
        .oneshot(post(&accept_uri, serde_json::json!({ "address": "0xbob" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post("/proofs/batch", serde_json::json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::get("/chains/1/verification-stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["total"], 0);
}
