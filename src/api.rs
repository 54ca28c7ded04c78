//! JSON HTTP API
//!
//! Routes over the node facade and the mining pool. Validation failures come
//! back as `{error, code}` bodies with a 4xx status; storage failures as 503.

use crate::ledger::TransactionRecord;
use crate::node::{BlockId, Node, SubmitBlockRequest, SubmitOutcome, SubmitStatus};
use crate::transaction::Transaction;
use crate::worker::{PoolStatus, WorkerPool};
use crate::{Address, Amount, Error, Hash256};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub node: Node,
    pub pool: Arc<WorkerPool>,
    /// Reward address used by `/miner/start` when the request names none
    pub default_miner: Option<Address>,
}

/// Error body returned by every failing route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Library error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PersistenceFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidState { .. } => StatusCode::CONFLICT,
            e if e.is_stale() => StatusCode::CONFLICT,
            e if e.is_rejection() => StatusCode::BAD_REQUEST,
            Error::Config { .. } | Error::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.category().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningTaskQuery {
    pub miner_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: Address,
    pub balance: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub address: Address,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    pub id: Hash256,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMiningRequest {
    #[serde(default)]
    pub miner_address: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MinerControlResponse {
    pub running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub height: u64,
    pub mining: bool,
}

/// Build the API router
pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/mining-task", get(get_mining_task))
        .route("/submit-block", post(submit_block))
        .route("/balance/{address}", get(get_balance))
        .route("/history/{address}", get(get_history))
        .route("/block/{id}", get(get_block))
        .route("/tx/{id}", get(get_transaction))
        .route("/transactions", post(submit_transaction))
        .route("/chain", get(get_chain))
        .route("/chain-stats", get(get_chain_stats))
        .route("/miner-stats", get(get_miner_stats))
        .route("/miner/start", post(start_mining))
        .route("/miner/stop", post(stop_mining))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_address(raw: &str) -> ApiResult<Address> {
    Ok(raw.parse::<Address>()?)
}

async fn get_mining_task(
    State(state): State<AppState>,
    Query(query): Query<MiningTaskQuery>,
) -> ApiResult<impl IntoResponse> {
    let miner = parse_address(&query.miner_address)?;
    Ok(Json(state.node.get_mining_task(&miner)?))
}

async fn submit_block(
    State(state): State<AppState>,
    Json(request): Json<SubmitBlockRequest>,
) -> (StatusCode, Json<SubmitOutcome>) {
    let outcome = state.node.submit_block(request).await;
    let status = match (outcome.status, outcome.code.as_deref()) {
        (SubmitStatus::Accepted, _) => StatusCode::OK,
        (_, Some("persistence_failure")) => StatusCode::SERVICE_UNAVAILABLE,
        (_, Some("duplicate_hash" | "link_broken")) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(outcome))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let address = parse_address(&address)?;
    let balance = state.node.get_balance(&address);
    Ok(Json(BalanceResponse { address, balance }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let address = parse_address(&address)?;
    let transactions = state.node.get_history(&address);
    Ok(Json(HistoryResponse {
        address,
        transactions,
    }))
}

async fn get_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: BlockId = id.parse().map_err(|_| Error::not_found(format!("block {}", id)))?;
    Ok(Json(state.node.get_block(id)?))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TransactionRecord>> {
    let id: Hash256 = id
        .parse()
        .map_err(|_| Error::not_found(format!("transaction {}", id)))?;
    Ok(Json(state.node.get_transaction(&id)?))
}

async fn submit_transaction(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> ApiResult<(StatusCode, Json<SubmittedTransaction>)> {
    let id = state.node.submit_transaction(tx)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmittedTransaction {
            id,
            status: "pending".to_string(),
        }),
    ))
}

async fn get_chain(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.chain())
}

async fn get_chain_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.stats())
}

async fn get_miner_stats(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.pool.status())
}

async fn start_mining(
    State(state): State<AppState>,
    Json(request): Json<StartMiningRequest>,
) -> ApiResult<Json<MinerControlResponse>> {
    let miner = request
        .miner_address
        .or_else(|| state.default_miner.clone())
        .ok_or_else(|| Error::config("minerAddress is required"))?;
    state.pool.start(miner).await?;
    Ok(Json(MinerControlResponse { running: true }))
}

async fn stop_mining(State(state): State<AppState>) -> ApiResult<Json<MinerControlResponse>> {
    if !state.pool.stop().await {
        return Err(Error::invalid_state("mining pool is not running").into());
    }
    Ok(Json(MinerControlResponse { running: false }))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        height: state.node.ledger().height(),
        mining: state.pool.is_running(),
    })
}
