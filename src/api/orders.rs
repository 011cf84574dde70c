use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::domain::{CommissionStatus, ListFilter, Order, OrderRequest, RecordId};
use crate::error::AppError;
use crate::orchestration::BulkStatusOutcome;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: CommissionStatus,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusChange {
    pub order_ids: Vec<RecordId>,
    pub status: CommissionStatus,
}

pub async fn list_orders(
    Query(filter): Query<ListFilter>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.ledger.list_orders(&filter).await?))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.ledger.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.ledger.order(&RecordId::new(id)).await?))
}

pub async fn update_order(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.ledger.update_order(&RecordId::new(id), request).await?))
}

pub async fn delete_order(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.ledger.delete_order(&RecordId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_order_status(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .ledger
            .set_order_status(&RecordId::new(id), change.status)
            .await?,
    ))
}

/// Per-order failures come back in the body; the request itself still succeeds.
pub async fn bulk_set_order_status(
    State(state): State<AppState>,
    Json(change): Json<BulkStatusChange>,
) -> Result<Json<BulkStatusOutcome>, AppError> {
    Ok(Json(
        state
            .ledger
            .bulk_set_order_status(&change.order_ids, change.status)
            .await?,
    ))
}
