use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use super::{parse_participant, parse_period, AppState};
use crate::domain::MonthlyRollup;
use crate::error::AppError;

pub async fn compile_period(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MonthlyRollup>>, AppError> {
    let period = parse_period(&period)?;
    Ok(Json(state.compiler.compile_period(period).await?))
}

pub async fn list_rollups(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MonthlyRollup>>, AppError> {
    let period = parse_period(&period)?;
    Ok(Json(state.compiler.list(period).await?))
}

/// Accepts `YYYY-MM` or `YYYYMM`; a canonical row wins over a compact one.
pub async fn get_rollup(
    Path((sponsor_id, period)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<MonthlyRollup>, AppError> {
    let sponsor_id = parse_participant(&sponsor_id)?;
    let period = parse_period(&period)?;
    Ok(Json(state.compiler.lookup(&sponsor_id, period).await?))
}

pub async fn export_rollups(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let period = parse_period(&period)?;
    let body = state.compiler.export_csv(period).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body))
}
