use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::health::HealthState;
use crate::cache::Cache;
use crate::error::{AppError, Result};
use crate::pipeline::{Mode, ModeManager};
use crate::query::{parse_duration, QueryMerger};

#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryMerger>,
    pub mode: Arc<ModeManager>,
    pub health: Arc<HealthState>,
    pub cache: Arc<dyn Cache>,
    pub pool: SqlitePool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/mode/:mode", post(post_mode))
        .route("/prices/:metric/:symbol", get(get_price))
        .route("/prices/:metric/:exchange/:symbol", get(get_price_for_exchange))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct PriceQuery {
    pub period: Option<String>,
}

#[derive(Serialize)]
struct PriceResponse {
    exchange: String,
    symbol: String,
    price: f64,
    timestamp: i64,
}

#[derive(Serialize)]
struct HealthResponse {
    mode: String,
    adapters_connected: bool,
    fatal_adapters: u64,
    last_snapshot_at_ms: i64,
    cache_healthy: bool,
    store_healthy: bool,
}

#[derive(Serialize)]
struct ModeResponse {
    mode: String,
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        mode: state.mode.current_mode().await.to_string(),
        adapters_connected: state.health.adapters_connected(),
        fatal_adapters: state.health.fatal_adapters(),
        last_snapshot_at_ms: state.health.last_snapshot_at_ms(),
        cache_healthy: state.cache.check_health(),
        store_healthy: crate::store::check_health(&state.pool).await,
    })
}

async fn post_mode(
    State(state): State<ApiState>,
    Path(mode): Path<String>,
) -> Result<Json<ModeResponse>> {
    let target = Mode::from_str(&mode)?;
    state.mode.switch_mode(target).await?;
    Ok(Json(ModeResponse { mode: target.to_string() }))
}

async fn get_price(
    State(state): State<ApiState>,
    Path((metric, symbol)): Path<(String, String)>,
    Query(params): Query<PriceQuery>,
) -> Result<Json<PriceResponse>> {
    resolve_price(&state, &metric, crate::config::ALL_EXCHANGE, &symbol, params.period).await
}

async fn get_price_for_exchange(
    State(state): State<ApiState>,
    Path((metric, exchange, symbol)): Path<(String, String, String)>,
    Query(params): Query<PriceQuery>,
) -> Result<Json<PriceResponse>> {
    resolve_price(&state, &metric, &exchange, &symbol, params.period).await
}

async fn resolve_price(
    state: &ApiState,
    metric: &str,
    exchange: &str,
    symbol: &str,
    period: Option<String>,
) -> Result<Json<PriceResponse>> {
    let period = period.map(|p| parse_duration(&p)).transpose()?;

    let (price, timestamp) = match metric {
        "latest" => {
            if period.is_some() {
                return Err(AppError::BadRequest("latest does not accept a period".to_string()));
            }
            let entry = state.query.latest(exchange, symbol).await?;
            (entry.price, entry.event_ts)
        }
        "average" => (state.query.average(exchange, symbol, period).await?, crate::types::now_ms()),
        "lowest" => (state.query.minimum(exchange, symbol, period).await?, crate::types::now_ms()),
        "highest" => (state.query.maximum(exchange, symbol, period).await?, crate::types::now_ms()),
        other => return Err(AppError::BadRequest(format!("unknown metric: {other}"))),
    };

    Ok(Json(PriceResponse { exchange: exchange.to_string(), symbol: symbol.to_string(), price, timestamp }))
}
