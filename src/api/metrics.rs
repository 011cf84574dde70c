use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{parse_participant, parse_period, AppState};
use crate::domain::{CohortKey, ProductMetricRequest, RatioRecord, RatioTable, RecordId};
use crate::error::AppError;
use crate::orchestration::{CohortVerification, RebalanceOutcome};

fn cohort_key(table: &str, entity_id: &str, period: &str) -> Result<CohortKey, AppError> {
    let table = table.parse::<RatioTable>().map_err(AppError::BadRequest)?;
    Ok(CohortKey::new(
        table,
        parse_participant(entity_id)?,
        parse_period(period)?,
    ))
}

pub async fn create_product_metric(
    State(state): State<AppState>,
    Json(request): Json<ProductMetricRequest>,
) -> Result<(StatusCode, Json<RebalanceOutcome>), AppError> {
    let outcome = state.ledger.create_product_metric(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn update_product_metric(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ProductMetricRequest>,
) -> Result<Json<RebalanceOutcome>, AppError> {
    Ok(Json(
        state
            .ledger
            .update_product_metric(&RecordId::new(id), request)
            .await?,
    ))
}

pub async fn delete_product_metric(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RebalanceOutcome>, AppError> {
    Ok(Json(
        state.ledger.delete_product_metric(&RecordId::new(id)).await?,
    ))
}

pub async fn get_cohort(
    Path((table, entity_id, period)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Vec<RatioRecord>>, AppError> {
    let key = cohort_key(&table, &entity_id, &period)?;
    Ok(Json(state.ledger.cohort(&key).await?))
}

pub async fn verify_cohort(
    Path((table, entity_id, period)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<CohortVerification>, AppError> {
    let key = cohort_key(&table, &entity_id, &period)?;
    Ok(Json(state.ledger.verify_cohort(&key).await?))
}

pub async fn rebalance_cohort(
    Path((table, entity_id, period)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<RebalanceOutcome>, AppError> {
    let key = cohort_key(&table, &entity_id, &period)?;
    Ok(Json(state.ledger.rebalance(&key).await?))
}
