use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::metrics;
use crate::supervisor::{Supervisor, SupervisorStats};

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: f64,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_stats(State(supervisor): State<Arc<Supervisor>>) -> Json<SupervisorStats> {
    Json(supervisor.get_stats().await)
}

pub async fn get_metrics() -> Json<crate::metrics::MetricsSnapshot> {
    Json(metrics::snapshot())
}

pub async fn get_price(
    Path(symbol): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<PriceResponse>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let price = supervisor
        .get_last_price(&symbol)
        .ok_or_else(|| AppError::NotFound(symbol.clone()))?;
    Ok(Json(PriceResponse { symbol, price }))
}

pub async fn get_depth(
    Path(symbol): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<crate::tick::DepthPayload>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let depth = supervisor
        .get_depth(&symbol)
        .ok_or_else(|| AppError::NotFound(symbol))?;
    Ok(Json(depth))
}

pub async fn get_trades(
    Path(symbol): Path<String>,
    Query(query): Query<LimitQuery>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<Vec<crate::tick::Tick>>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let trades = supervisor
        .get_recent_trades(&symbol, limit)
        .ok_or_else(|| AppError::NotFound(symbol))?;
    Ok(Json(trades))
}

pub async fn get_kline(
    Path((symbol, interval)): Path<(String, String)>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<crate::tick::Tick>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let kline = supervisor
        .get_kline(&symbol, &interval)
        .ok_or_else(|| AppError::NotFound(format!("{symbol}/{interval}")))?;
    Ok(Json(kline))
}

pub async fn get_mark_price(
    Path(symbol): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<crate::tick::Tick>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let mark_price = supervisor
        .get_mark_price(&symbol)
        .ok_or_else(|| AppError::NotFound(symbol))?;
    Ok(Json(mark_price))
}

pub async fn get_liquidations(
    Path(symbol): Path<String>,
    Query(query): Query<LimitQuery>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<Vec<crate::tick::Tick>>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let liquidations = supervisor
        .get_recent_liquidations(&symbol, limit)
        .ok_or_else(|| AppError::NotFound(symbol))?;
    Ok(Json(liquidations))
}
