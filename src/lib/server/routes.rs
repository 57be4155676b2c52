use std::sync::Arc;

use alloy::primitives::{Address, U256};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::domain::commitment::Commitment;
use crate::domain::field::FieldElement;
use crate::domain::nullifier::NullifierHash;
use crate::pool::{Pool, PoolStatus, QueryError, RootSnapshot};
use crate::registry::PoolRegistry;

/// Shared application state for axum route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PoolRegistry>,
}

impl AppState {
    fn pool(&self, address: &str) -> Result<Arc<Pool>, AppError> {
        let address = parse_address(address)?;
        self.registry
            .get(&address)
            .ok_or_else(|| AppError::NotFound(format!("unknown pool {address}")))
    }
}

// ── Response types ──

/// Response for GET /pool/{address}/path/{leafIndex}.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
    pub path_elements: Vec<FieldElement>,
    pub path_indices: Vec<u8>,
    pub root: FieldElement,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NullifierResponse {
    pub is_spent: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositResponse {
    pub leaf_index: u64,
    pub timestamp: u64,
    pub block_number: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootKnownResponse {
    pub is_known: bool,
}

// ── Route handlers ──

/// GET /health: phase and health of every pool.
pub async fn health_handler(State(state): State<AppState>) -> Json<Vec<PoolStatus>> {
    Json(state.registry.statuses().await)
}

/// GET /pool/{address}/root/latest
pub async fn latest_root_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<RootSnapshot>, AppError> {
    let pool = state.pool(&address)?;
    Ok(Json(pool.latest_root().await?))
}

/// GET /pool/{address}/path/{leafIndex}: sibling path against the current root.
pub async fn path_handler(
    State(state): State<AppState>,
    Path((address, leaf_index)): Path<(String, String)>,
) -> Result<Json<PathResponse>, AppError> {
    let pool = state.pool(&address)?;
    let index = parse_leaf_index(&leaf_index)?;
    let path = pool.path(index).await?;
    Ok(Json(PathResponse {
        path_elements: path.path_elements,
        path_indices: path.path_indices,
        root: path.root,
    }))
}

/// GET /pool/{address}/nullifier/{hash}
pub async fn nullifier_handler(
    State(state): State<AppState>,
    Path((address, hash)): Path<(String, String)>,
) -> Result<Json<NullifierResponse>, AppError> {
    let pool = state.pool(&address)?;
    let nullifier: NullifierHash = hash
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid nullifier hash: {e}")))?;
    Ok(Json(NullifierResponse {
        is_spent: pool.is_spent(&nullifier).await,
    }))
}

/// GET /pool/{address}/deposit/{commitment}
pub async fn deposit_handler(
    State(state): State<AppState>,
    Path((address, commitment)): Path<(String, String)>,
) -> Result<Json<DepositResponse>, AppError> {
    let pool = state.pool(&address)?;
    let commitment: Commitment = commitment
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid commitment: {e}")))?;
    let record = pool
        .deposit(&commitment)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no deposit with commitment {commitment}")))?;
    Ok(Json(DepositResponse {
        leaf_index: record.leaf_index,
        timestamp: record.timestamp,
        block_number: record.block_number,
    }))
}

/// GET /pool/{address}/root/{root}/known: is `root` in the recent-root window?
pub async fn root_known_handler(
    State(state): State<AppState>,
    Path((address, root)): Path<(String, String)>,
) -> Result<Json<RootKnownResponse>, AppError> {
    let pool = state.pool(&address)?;
    let root: FieldElement = root
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid root: {e}")))?;
    Ok(Json(RootKnownResponse {
        is_known: pool.is_known_root(&root).await,
    }))
}

// ── Error handling ──

/// Application error type that maps to HTTP status codes.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    /// The data exists on-chain but isn't indexed yet; retry later.
    Unavailable(String),
    Internal(String),
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        match &e {
            QueryError::IndexOutOfBounds { .. } => AppError::NotFound(e.to_string()),
            QueryError::NotYetSynced { .. } => AppError::Unavailable(e.to_string()),
            QueryError::Tree(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

// ── Helpers ──

fn parse_address(s: &str) -> Result<Address, AppError> {
    s.parse()
        .map_err(|e| AppError::BadRequest(format!("invalid pool address {s}: {e}")))
}

/// Leaf indices are `uint256` on-chain. Anything past `u64` can't be a real leaf.
fn parse_leaf_index(s: &str) -> Result<u64, AppError> {
    let value: U256 = s
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid leaf index {s}: {e}")))?;
    u64::try_from(value)
        .map_err(|_| AppError::NotFound(format!("leaf index {value} out of bounds")))
}
