//! HTTP API for session setup, attestation exchange and health checks

use crate::attestation::Attestation;
use crate::chain::{ChainManager, ExecutionOutcome};
use crate::config::{ApiConfig, Settings};
use crate::error::{VesError, VesResult};
use crate::intent::ChainDns;
use crate::session::{SessionId, SessionRegistry};
use crate::state::StateType;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub chain_manager: Arc<ChainManager>,
    pub dns: Arc<dyn ChainDns>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/sessions", post(open_session))
        .route("/sessions/:id", get(get_session).delete(close_session))
        .route("/sessions/:id/approve", post(approve_session))
        .route("/sessions/:id/execute", post(execute_session))
        .route(
            "/sessions/:id/transactions/:idx/attestations",
            post(receive_attestation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> VesResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VesError::Internal(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| VesError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// `VesError` rendered as a JSON error body
pub struct ApiError(VesError);

impl From<VesError> for ApiError {
    fn from(e: VesError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            VesError::SessionNotFound { .. } | VesError::TransactionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            VesError::Initialize(_) | VesError::Generation(_) => StatusCode::BAD_REQUEST,
            VesError::DecodeFail(_)
            | VesError::Verification { .. }
            | VesError::AttestationMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VesError::InvalidStateTransition { .. }
            | VesError::StateConflict { .. }
            | VesError::DependencyPending { .. }
            | VesError::SessionNotApproved { .. } => StatusCode::CONFLICT,
            VesError::SessionAllocation { .. } => StatusCode::SERVICE_UNAVAILABLE,
            VesError::ChainConnection { .. }
            | VesError::UnlockFailed { .. }
            | VesError::Ledger(_) => StatusCode::BAD_GATEWAY,
            VesError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - every configured chain answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.chain_manager.health_check().await;
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
            sessions: state.registry.len(),
            details: chain_health
                .into_iter()
                .map(|(domain, healthy)| ChainHealth {
                    chain: domain.to_string(),
                    healthy,
                })
                .collect(),
        }),
    )
}

async fn open_session(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> ApiResult<Value> {
    let session = state.registry.open_session(&document)?;
    Ok(Json(json!({
        "session_id": session.id(),
        "transaction_intents": session.intents().dictize(),
    })))
}

async fn approve_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Value> {
    state.registry.approve_session(session_id, body.approved)?;
    Ok(Json(json!({
        "session_id": session_id,
        "approved": body.approved,
    })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Value> {
    Ok(Json(state.registry.session(session_id)?.summary()?))
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Value> {
    state.registry.close_session(session_id)?;
    Ok(Json(json!({ "session_id": session_id, "closed": true })))
}

async fn receive_attestation(
    State(state): State<AppState>,
    Path((session_id, tx_index)): Path<(SessionId, u64)>,
    Json(body): Json<AttestationRequest>,
) -> ApiResult<AttestationResponse> {
    let bytes = hex::decode(body.attestation.trim_start_matches("0x"))
        .map_err(|e| VesError::DecodeFail(format!("attestation is not hex: {}", e)))?;
    let attestation = state
        .registry
        .receive(&bytes, session_id, tx_index, body.state)?;
    Ok(Json(AttestationResponse::new(&attestation)))
}

async fn execute_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Vec<ExecutionSummary>> {
    let session = state.registry.session(session_id)?;
    if !session.is_approved() {
        return Err(VesError::SessionNotApproved { session_id }.into());
    }
    let mut executor = state
        .chain_manager
        .executor(&state.settings, state.dns.clone());
    let outcomes = executor.execute_all(session.intents()).await?;
    Ok(Json(outcomes.iter().map(ExecutionSummary::from).collect()))
}

// Request and response types

#[derive(Deserialize)]
struct ApproveRequest {
    approved: bool,
}

#[derive(Deserialize)]
struct AttestationRequest {
    state: StateType,
    /// Hex encoded wire bytes
    attestation: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AttestationResponse {
    pub session_id: SessionId,
    pub tx_index: u64,
    pub state: StateType,
    pub signers: Vec<String>,
    pub hash: String,
    pub requires_countersign: bool,
}

impl AttestationResponse {
    fn new(attestation: &Attestation) -> Self {
        let content = attestation.content();
        Self {
            session_id: content.session_id,
            tx_index: content.transaction_id,
            state: content.state,
            signers: attestation
                .signatures()
                .iter()
                .map(|entry| to_checksum(&entry.signer, None))
                .collect(),
            hash: format!("{:?}", attestation.hash()),
            requires_countersign: content.state.requires_countersign(),
        }
    }
}

#[derive(Serialize)]
struct ExecutionSummary {
    name: String,
    tx_hash: Option<String>,
    contract_address: Option<String>,
}

impl From<&ExecutionOutcome> for ExecutionSummary {
    fn from(outcome: &ExecutionOutcome) -> Self {
        Self {
            name: outcome.name.clone(),
            tx_hash: outcome.tx_hash.map(|h| format!("{:?}", h)),
            contract_address: outcome.contract_address.map(|a| to_checksum(&a, None)),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    sessions: usize,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: String,
    healthy: bool,
}
