//! HTTP API: health plus a JSON rendition of the settlement service

use crate::chain::ChainManager;
use crate::config::{ApiConfig, ChainConfig};
use crate::coordination::{SwapStatus, SwapTerms, TransferRequest, TransferStatus};
use crate::error::{SettlementError, SettlementResult};
use crate::proof::ProofInput;
use crate::service::SettlementService;
use crate::types::Page;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SettlementService>,
    pub chain_manager: Option<Arc<ChainManager>>,
}

/// Build the router over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/chains/:chain_id/verification-stats", get(get_verification_stats))
        .route("/wallets/:chain_id/:address", get(get_wallet))
        .route("/transfers", get(list_transfers).post(initiate_transfer))
        .route("/transfers/:id", get(get_transfer))
        .route("/transfers/:id/complete", post(complete_transfer))
        .route("/proofs", post(verify_proof))
        .route("/proofs/batch", post(verify_proof_batch))
        .route("/proofs/:id", get(get_proof))
        .route("/swaps", get(list_swaps).post(initiate_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/participate", post(participate_swap))
        .route("/swaps/:id/redeem", post(redeem_swap))
        .route("/swaps/:id/refund", post(refund_swap))
        .route("/swaps/:id/cancel", post(cancel_swap))
        .route("/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/:id", get(get_proposal))
        .route("/proposals/:id/accept", post(accept_proposal))
        .route("/gas", get(optimize_gas))
        .route("/session/chain", post(switch_chain))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> SettlementResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SettlementError::Config(format!("cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SettlementError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// Error response mapped from the error taxonomy
pub struct ApiError(SettlementError);

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SettlementError::SwapNotFound { .. }
            | SettlementError::TransferNotFound { .. }
            | SettlementError::ProofNotFound { .. }
            | SettlementError::ProposalNotFound { .. } => StatusCode::NOT_FOUND,
            SettlementError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            SettlementError::VerificationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_state_conflict() => StatusCode::CONFLICT,
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - every configured chain answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = match &state.chain_manager {
        Some(manager) => manager.health_check().await,
        None => Vec::new(),
    };
    let ready = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            details: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> Json<Vec<ChainConfig>> {
    Json(state.service.supported_chains().to_vec())
}

async fn get_wallet(
    State(state): State<AppState>,
    Path((chain_id, address)): Path<(u64, String)>,
) -> impl IntoResponse {
    state
        .service
        .wallet_info(&address, chain_id)
        .await
        .map(Json)
        .map_err(ApiError)
}

// ---- transfers ----

#[derive(Debug, Deserialize)]
struct TransferQuery {
    status: Option<TransferStatus>,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_transfers(
    State(state): State<AppState>,
    Query(query): Query<TransferQuery>,
) -> impl IntoResponse {
    state
        .service
        .cross_chain_transfers(query.status, page(query.offset, query.limit))
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn initiate_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> impl IntoResponse {
    state
        .service
        .initiate_cross_chain_transfer(request)
        .await
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(ApiError)
}

async fn get_transfer(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state
        .service
        .cross_chain_transfer(&id)
        .await
        .map(Json)
        .map_err(ApiError)
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    tx_hash: String,
    #[serde(default)]
    wait: bool,
}

async fn complete_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> impl IntoResponse {
    state
        .service
        .complete_cross_chain_transfer(&id, &body.tx_hash, body.wait)
        .await
        .map(Json)
        .map_err(ApiError)
}

// ---- proofs ----

async fn verify_proof(
    State(state): State<AppState>,
    Json(input): Json<ProofInput>,
) -> impl IntoResponse {
    state
        .service
        .verify_cross_chain_proof(input)
        .await
        .map(|view| (StatusCode::CREATED, Json(view)))
        .map_err(ApiError)
}

async fn verify_proof_batch(
    State(state): State<AppState>,
    Json(inputs): Json<Vec<ProofInput>>,
) -> impl IntoResponse {
    state
        .service
        .verify_cross_chain_proofs(inputs)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn get_verification_stats(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> impl IntoResponse {
    state
        .service
        .verification_stats(chain_id)
        .map(Json)
        .map_err(ApiError)
}

async fn get_proof(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state
        .service
        .cross_chain_proof(&id)
        .await
        .map(Json)
        .map_err(ApiError)
}

// ---- swaps ----

#[derive(Debug, Deserialize)]
struct SwapQuery {
    status: Option<SwapStatus>,
    address: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

fn page(offset: Option<usize>, limit: Option<usize>) -> Page {
    let default = Page::default();
    Page {
        offset: offset.unwrap_or(default.offset),
        limit: limit.unwrap_or(default.limit),
    }
}

async fn list_swaps(
    State(state): State<AppState>,
    Query(query): Query<SwapQuery>,
) -> impl IntoResponse {
    state
        .service
        .atomic_swaps(
            query.status,
            query.address.as_deref(),
            page(query.offset, query.limit),
        )
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn initiate_swap(
    State(state): State<AppState>,
    Json(terms): Json<SwapTerms>,
) -> impl IntoResponse {
    state
        .service
        .initiate_atomic_swap(terms)
        .await
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(ApiError)
}

async fn get_swap(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state
        .service
        .atomic_swap(&id)
        .await
        .map(Json)
        .map_err(ApiError)
}

#[derive(Debug, Deserialize)]
struct PartyRequest {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RedeemRequest {
    secret: String,
}

async fn participate_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PartyRequest>,
) -> impl IntoResponse {
    state
        .service
        .participate_atomic_swap(&id, &body.address)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn redeem_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RedeemRequest>,
) -> impl IntoResponse {
    state
        .service
        .redeem_atomic_swap(&id, &body.secret)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn refund_swap(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state
        .service
        .refund_atomic_swap(&id)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn cancel_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PartyRequest>,
) -> impl IntoResponse {
    state
        .service
        .cancel_atomic_swap(&id, &body.address)
        .await
        .map(Json)
        .map_err(ApiError)
}

// ---- proposals ----

#[derive(Debug, Deserialize)]
struct ProposalQuery {
    address: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ProposalRequest {
    proposer: String,
    participant: String,
    terms: SwapTerms,
}

async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ProposalQuery>,
) -> impl IntoResponse {
    state
        .service
        .swap_proposals(query.address.as_deref(), page(query.offset, query.limit))
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn create_proposal(
    State(state): State<AppState>,
    Json(body): Json<ProposalRequest>,
) -> impl IntoResponse {
    state
        .service
        .create_swap_proposal(&body.proposer, body.terms, &body.participant)
        .await
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(ApiError)
}

async fn get_proposal(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state
        .service
        .swap_proposal(&id)
        .await
        .map(Json)
        .map_err(ApiError)
}

async fn accept_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PartyRequest>,
) -> impl IntoResponse {
    state
        .service
        .accept_swap_proposal(&id, &body.address)
        .await
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(ApiError)
}

// ---- gas and session ----

#[derive(Debug, Deserialize)]
struct GasQuery {
    from_chain: u64,
    to_chain: u64,
    amount: String,
}

async fn optimize_gas(
    State(state): State<AppState>,
    Query(query): Query<GasQuery>,
) -> impl IntoResponse {
    state
        .service
        .optimize_gas(query.from_chain, query.to_chain, &query.amount)
        .map(Json)
        .map_err(ApiError)
}

#[derive(Debug, Deserialize)]
struct SwitchChainRequest {
    address: String,
    chain_id: u64,
}

async fn switch_chain(
    State(state): State<AppState>,
    Json(body): Json<SwitchChainRequest>,
) -> impl IntoResponse {
    state
        .service
        .switch_chain(&body.address, body.chain_id)
        .await
        .map(Json)
        .map_err(ApiError)
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::VerificationResult;

    fn status_of(e: SettlementError) -> StatusCode {
        ApiError(e).status()
    }

    #[test]
    fn test_error_taxonomy_maps_to_status() {
        assert_eq!(
            status_of(SettlementError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SettlementError::ChainNotFound { chain_id: 5 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SettlementError::SwapNotFound {
                swap_id: "x".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SettlementError::ProposalNotFound {
                proposal_id: "x".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(SettlementError::InvalidSecret), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SettlementError::VerificationFailure {
                proof_id: "p".into(),
                result: VerificationResult::Invalid,
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SettlementError::ExternalRead {
                chain_id: 1,
                message: "down".into(),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
