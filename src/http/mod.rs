//! REST surface over the supervisor's caches, plus health and `/metrics`.

pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::supervisor::Supervisor;

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/stats", get(routes::get_stats))
        .route("/metrics", get(routes::get_metrics))
        .route("/price/:symbol", get(routes::get_price))
        .route("/depth/:symbol", get(routes::get_depth))
        .route("/trades/:symbol", get(routes::get_trades))
        .route("/kline/:symbol/:interval", get(routes::get_kline))
        .route("/markprice/:symbol", get(routes::get_mark_price))
        .route("/liquidations/:symbol", get(routes::get_liquidations))
        .with_state(supervisor)
}
