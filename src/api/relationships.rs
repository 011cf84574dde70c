use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_day, parse_participant, AppState};
use crate::domain::{Day, ParticipantId, RelationshipRequest, ShopRelationship};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EndQuery {
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub shop_id: ParticipantId,
    pub date: Day,
    pub relationship: Option<ShopRelationship>,
}

pub async fn reassign(
    State(state): State<AppState>,
    Json(request): Json<RelationshipRequest>,
) -> Result<(StatusCode, Json<ShopRelationship>), AppError> {
    let relationship = state.ledger.reassign(request).await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

pub async fn end_relationship(
    Path(shop_id): Path<String>,
    Query(params): Query<EndQuery>,
    State(state): State<AppState>,
) -> Result<Json<ShopRelationship>, AppError> {
    let shop_id = parse_participant(&shop_id)?;
    let end_date = parse_day(params.end_date.as_deref())?;
    Ok(Json(state.ledger.end_relationship(&shop_id, end_date).await?))
}

pub async fn get_history(
    Path(shop_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ShopRelationship>>, AppError> {
    let shop_id = parse_participant(&shop_id)?;
    Ok(Json(state.ledger.history(&shop_id).await?))
}

pub async fn resolve_sponsor(
    Path(shop_id): Path<String>,
    Query(params): Query<DateQuery>,
    State(state): State<AppState>,
) -> Result<Json<ResolveResponse>, AppError> {
    let shop_id = parse_participant(&shop_id)?;
    let date = parse_day(params.date.as_deref())?;
    let relationship = state.ledger.resolve(&shop_id, date).await?;
    Ok(Json(ResolveResponse {
        shop_id,
        date,
        relationship,
    }))
}
