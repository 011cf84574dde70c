use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{parse_participant, AppState};
use crate::domain::{
    Day, DeviceAccumulatorSnapshot, DeviceSale, DeviceSaleRequest, DeviceStatistics, ListFilter,
    RecordId,
};
use crate::engine::TierProjection;
use crate::error::AppError;
use crate::orchestration::{AccumulatorAudit, DeviceSaleOutcome};

#[derive(Debug, Deserialize)]
pub struct SimulateQuery {
    pub additional: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub from: Option<Day>,
    #[serde(default)]
    pub to: Option<Day>,
}

pub async fn list_device_sales(
    Query(filter): Query<ListFilter>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DeviceSale>>, AppError> {
    Ok(Json(state.ledger.list_device_sales(&filter).await?))
}

pub async fn device_statistics(
    Query(params): Query<StatisticsQuery>,
    State(state): State<AppState>,
) -> Result<Json<DeviceStatistics>, AppError> {
    Ok(Json(state.ledger.device_statistics(params.from, params.to).await?))
}

pub async fn record_device_sale(
    State(state): State<AppState>,
    Json(request): Json<DeviceSaleRequest>,
) -> Result<(StatusCode, Json<DeviceSaleOutcome>), AppError> {
    let outcome = state.ledger.record_device_sale(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_device_sale(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeviceSale>, AppError> {
    Ok(Json(state.ledger.device_sale(&RecordId::new(id)).await?))
}

pub async fn update_device_sale(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<DeviceSaleRequest>,
) -> Result<Json<DeviceSaleOutcome>, AppError> {
    Ok(Json(
        state
            .ledger
            .update_device_sale(&RecordId::new(id), request)
            .await?,
    ))
}

/// Returns the accumulator after the sale's effect was reversed.
pub async fn delete_device_sale(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeviceAccumulatorSnapshot>, AppError> {
    Ok(Json(state.ledger.delete_device_sale(&RecordId::new(id)).await?))
}

pub async fn get_accumulator(
    Path(sponsor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeviceAccumulatorSnapshot>, AppError> {
    let sponsor_id = parse_participant(&sponsor_id)?;
    Ok(Json(state.ledger.accumulator(&sponsor_id).await?))
}

pub async fn audit_accumulator(
    Path(sponsor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccumulatorAudit>, AppError> {
    let sponsor_id = parse_participant(&sponsor_id)?;
    Ok(Json(state.ledger.audit_accumulator(&sponsor_id).await?))
}

pub async fn rebuild_accumulator(
    Path(sponsor_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeviceAccumulatorSnapshot>, AppError> {
    let sponsor_id = parse_participant(&sponsor_id)?;
    Ok(Json(state.ledger.rebuild_accumulator(&sponsor_id).await?))
}

pub async fn simulate_tier_change(
    Path(sponsor_id): Path<String>,
    Query(params): Query<SimulateQuery>,
    State(state): State<AppState>,
) -> Result<Json<TierProjection>, AppError> {
    let sponsor_id = parse_participant(&sponsor_id)?;
    Ok(Json(
        state
            .ledger
            .simulate_tier_change(&sponsor_id, params.additional)
            .await?,
    ))
}
