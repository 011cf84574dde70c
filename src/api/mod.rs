pub mod devices;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod participants;
pub mod relationships;
pub mod rollups;

use crate::compile::RollupCompiler;
use crate::domain::{Day, ParticipantId, YearMonth};
use crate::error::AppError;
use crate::orchestration::Ledger;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub compiler: RollupCompiler,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, compiler: RollupCompiler) -> Self {
        Self { ledger, compiler }
    }
}

pub(crate) fn parse_participant(raw: &str) -> Result<ParticipantId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("participant id must not be empty".to_string()));
    }
    Ok(ParticipantId::new(trimmed))
}

pub(crate) fn parse_period(raw: &str) -> Result<YearMonth, AppError> {
    raw.parse::<YearMonth>()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

pub(crate) fn parse_day(raw: Option<&str>) -> Result<Day, AppError> {
    match raw {
        None | Some("") => Ok(Day::today()),
        Some(s) => s.parse::<Day>().map_err(|e| AppError::BadRequest(e.to_string())),
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/participants", post(participants::register_participant))
        .route("/v1/participants/:id", get(participants::get_participant))
        .route(
            "/v1/participants/:id/subordinates",
            get(participants::get_subordinates),
        )
        .route("/v1/relationships", post(relationships::reassign))
        .route(
            "/v1/relationships/:shop_id",
            get(relationships::get_history).delete(relationships::end_relationship),
        )
        .route(
            "/v1/relationships/:shop_id/resolve",
            get(relationships::resolve_sponsor),
        )
        .route(
            "/v1/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route(
            "/v1/orders/:id",
            get(orders::get_order)
                .put(orders::update_order)
                .delete(orders::delete_order),
        )
        .route("/v1/orders/:id/status", post(orders::set_order_status))
        .route("/v1/bulk/order-status", post(orders::bulk_set_order_status))
        .route(
            "/v1/device-sales",
            get(devices::list_device_sales).post(devices::record_device_sale),
        )
        .route("/v1/device-statistics", get(devices::device_statistics))
        .route(
            "/v1/device-sales/:id",
            get(devices::get_device_sale)
                .put(devices::update_device_sale)
                .delete(devices::delete_device_sale),
        )
        .route("/v1/accumulators/:sponsor_id", get(devices::get_accumulator))
        .route(
            "/v1/accumulators/:sponsor_id/audit",
            get(devices::audit_accumulator),
        )
        .route(
            "/v1/accumulators/:sponsor_id/rebuild",
            post(devices::rebuild_accumulator),
        )
        .route(
            "/v1/accumulators/:sponsor_id/simulate",
            get(devices::simulate_tier_change),
        )
        .route("/v1/product-metrics", post(metrics::create_product_metric))
        .route(
            "/v1/product-metrics/:id",
            axum::routing::put(metrics::update_product_metric)
                .delete(metrics::delete_product_metric),
        )
        .route(
            "/v1/cohorts/:table/:entity_id/:period",
            get(metrics::get_cohort),
        )
        .route(
            "/v1/cohorts/:table/:entity_id/:period/verify",
            get(metrics::verify_cohort),
        )
        .route(
            "/v1/cohorts/:table/:entity_id/:period/rebalance",
            post(metrics::rebalance_cohort),
        )
        .route("/v1/rollups/periods/:period", get(rollups::list_rollups))
        .route(
            "/v1/rollups/periods/:period/compile",
            post(rollups::compile_period),
        )
        .route(
            "/v1/rollups/periods/:period/export",
            get(rollups::export_rollups),
        )
        .route(
            "/v1/rollups/sponsors/:sponsor_id/:period",
            get(rollups::get_rollup),
        )
        .layer(cors)
        .with_state(state)
}
