use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{parse_day, parse_participant, AppState};
use crate::domain::{Participant, ShopRelationship};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<String>,
}

pub async fn register_participant(
    State(state): State<AppState>,
    Json(participant): Json<Participant>,
) -> Result<(StatusCode, Json<Participant>), AppError> {
    let registered = state.ledger.register_participant(participant).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn get_participant(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Participant>, AppError> {
    let id = parse_participant(&id)?;
    Ok(Json(state.ledger.participant(&id).await?))
}

/// Shops under a sponsor on `as_of` (defaults to today).
pub async fn get_subordinates(
    Path(id): Path<String>,
    Query(params): Query<AsOfQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ShopRelationship>>, AppError> {
    let id = parse_participant(&id)?;
    let as_of = parse_day(params.as_of.as_deref())?;
    Ok(Json(state.ledger.subordinates(&id, as_of).await?))
}
