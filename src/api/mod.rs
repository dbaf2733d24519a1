//! HTTP API for health checks, balances, transfers and portfolio operations

use crate::arbitrage::{ArbitrageEngine, ArbitrageOutcome};
use crate::balance::BalanceAggregator;
use crate::config::ApiConfig;
use crate::context::{OperationContext, OrchestratorContext};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::fanout::OutcomeView;
use crate::rebalance::{RebalancePlan, RebalanceReport, RebalancingPlanner};
use crate::state::{TransferStats, TransferStore};
use crate::transfer::{LockId, TransferIntent, TransferOrchestrator, TransferRecord};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<OrchestratorContext>,
    pub transfers: Arc<TransferOrchestrator>,
    pub balances: Arc<BalanceAggregator>,
    pub store: Arc<dyn TransferStore>,
    pub arbitrage: Arc<ArbitrageEngine>,
    pub rebalancer: Arc<RebalancingPlanner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/balances/:address", get(get_balances))
        .route("/transfers", post(create_transfer))
        .route("/transfers/stats", get(get_stats))
        .route("/transfers/stuck", get(get_stuck))
        .route("/transfers/:lock_id", get(get_transfer))
        .route("/transfers/:lock_id/retry", post(retry_mint))
        .route("/transfers/:lock_id/resolve", post(resolve_transfer))
        .route("/arbitrage", post(run_arbitrage))
        .route("/rebalance/plan", post(plan_rebalance))
        .route("/rebalance", post(run_rebalance))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> OrchestratorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Orchestrator errors mapped onto HTTP statuses
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::TransferNotFound(_) | OrchestratorError::UnknownChain { .. } => {
                StatusCode::NOT_FOUND
            }
            OrchestratorError::InvalidTransfer(_)
            | OrchestratorError::InvalidAllocation(_)
            | OrchestratorError::InvalidPlan(_)
            | OrchestratorError::InvalidStateTransition { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::MintInFlight { .. } => StatusCode::CONFLICT,
            OrchestratorError::ChainConnection { .. }
            | OrchestratorError::Transaction { .. }
            | OrchestratorError::PhaseFailure { .. }
            | OrchestratorError::PartialFanOutFailure { .. }
            | OrchestratorError::ArbitrageAborted { .. }
            | OrchestratorError::ReconciliationRequired { .. } => StatusCode::BAD_GATEWAY,
            OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::WalletUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                retryable: self.0.is_retryable(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store, wallet and every chain
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();
    let wallet_ok = state.ctx.wallet.is_connected().await;

    let chain_health = state.ctx.connections.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let ready = store_ok && wallet_ok && chains_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            store: store_ok,
            wallet: wallet_ok,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Registered chains with their connection state
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.ctx.connections.connected_chains();
    let chains = state
        .ctx
        .registry
        .endpoints()
        .map(|endpoint| ChainInfo {
            chain_id: endpoint.id,
            name: endpoint.name.clone(),
            currency_symbol: endpoint.currency_symbol.clone(),
            explorer_url: endpoint.explorer_url.clone(),
            connected: connected.contains(&endpoint.id),
        })
        .collect();
    Json(ChainsResponse { chains })
}

async fn get_balances(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = address.parse::<Address>().map_err(|e| {
        OrchestratorError::InvalidTransfer(format!("invalid address {}: {}", address, e))
    })?;

    let outcomes = state.balances.get_all_balances(address).await;
    let total = BalanceAggregator::total(&outcomes);
    let chains = outcomes.iter().map(OutcomeView::from).collect();

    Ok(Json(BalancesResponse {
        address,
        total,
        chains,
    })
    .into_response())
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<TransferStats>, ApiError> {
    Ok(Json(state.transfers.stats().await?))
}

async fn get_stuck(State(state): State<AppState>) -> Result<Json<Vec<TransferRecord>>, ApiError> {
    Ok(Json(state.transfers.stuck_transfers().await?))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(lock_id): Path<String>,
) -> Result<Json<TransferRecord>, ApiError> {
    let lock_id = lock_id.parse::<LockId>()?;
    let record = state
        .transfers
        .get_transfer(&lock_id)
        .await?
        .ok_or_else(|| OrchestratorError::TransferNotFound(lock_id.to_string()))?;
    Ok(Json(record))
}

async fn retry_mint(
    State(state): State<AppState>,
    Path(lock_id): Path<String>,
) -> Result<Json<TransferRecord>, ApiError> {
    let lock_id = lock_id.parse::<LockId>()?;
    Ok(Json(state.transfers.retry_mint(lock_id).await?))
}

async fn create_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferRecord>, ApiError> {
    let intent = TransferIntent::new(
        &state.ctx.registry,
        request.from_chain,
        request.to_chain,
        request.amount,
        request.recipient,
    )?;
    let record = state
        .transfers
        .cross_chain_transfer(intent, &OperationContext::new())
        .await?;
    Ok(Json(record))
}

async fn resolve_transfer(
    State(state): State<AppState>,
    Path(lock_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<TransferRecord>, ApiError> {
    let lock_id = lock_id.parse::<LockId>()?;
    Ok(Json(
        state.transfers.resolve_manually(lock_id, &request.note).await?,
    ))
}

async fn run_arbitrage(
    State(state): State<AppState>,
    Json(request): Json<ArbitrageRequest>,
) -> Result<Json<ArbitrageOutcome>, ApiError> {
    let outcome = state
        .arbitrage
        .execute_arbitrage(request.token, request.amount, &OperationContext::new())
        .await?;
    Ok(Json(outcome))
}

async fn plan_rebalance(
    State(state): State<AppState>,
    Json(request): Json<RebalanceRequest>,
) -> Result<Json<RebalancePlan>, ApiError> {
    let plan = state
        .rebalancer
        .plan_rebalance(&request.targets, request.total)
        .await?;
    Ok(Json(plan))
}

async fn run_rebalance(
    State(state): State<AppState>,
    Json(request): Json<RebalanceRequest>,
) -> Result<Json<RebalanceReport>, ApiError> {
    let report = state
        .rebalancer
        .rebalance_portfolio(&request.targets, request.total, &OperationContext::new())
        .await?;
    Ok(Json(report))
}

// Request types

#[derive(Deserialize)]
struct TransferRequest {
    from_chain: u64,
    to_chain: u64,
    amount: Decimal,
    recipient: Address,
}

#[derive(Deserialize)]
struct ResolveRequest {
    note: String,
}

#[derive(Deserialize)]
struct ArbitrageRequest {
    token: Address,
    amount: Decimal,
}

/// Target percentages keyed by chain id, and the portfolio total they apply to
#[derive(Deserialize)]
struct RebalanceRequest {
    targets: BTreeMap<u64, Decimal>,
    total: Decimal,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    retryable: bool,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    wallet: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainInfo {
    chain_id: u64,
    name: String,
    currency_symbol: String,
    explorer_url: String,
    connected: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainInfo>,
}

#[derive(Serialize)]
struct BalancesResponse<'a> {
    address: Address,
    total: Decimal,
    chains: Vec<OutcomeView<'a, crate::balance::Balance>>,
}
