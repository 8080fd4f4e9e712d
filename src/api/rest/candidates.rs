use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::candidate::{Candidate, CandidateType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/candidates", post(add_candidate))
        .route("/candidates/:kind/:id", delete(remove_candidate))
        .route("/candidates/:kind/:id/match", post(match_candidate))
}

#[derive(Deserialize)]
pub struct AddCandidateRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CandidateType,
    #[serde(default)]
    pub ride_types: Vec<String>,
    pub position: GeoPoint,
    pub order_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct MatchRequest {
    pub order_id: Uuid,
    pub position: GeoPoint,
    #[serde(default)]
    pub ride_types: Vec<String>,
}

#[derive(Serialize)]
pub struct MatchResponse {
    pub order_id: Uuid,
    pub driver_id: Option<String>,
}

async fn add_candidate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddCandidateRequest>,
) -> Result<Json<Candidate>, AppError> {
    let candidate = Candidate {
        id: payload.id,
        kind: payload.kind,
        ride_types: payload.ride_types,
        position: payload.position,
        joined_at: Utc::now(),
        order_id: payload.order_id,
    };

    state.matching.add_candidate(candidate.clone()).await?;
    Ok(Json(candidate))
}

async fn remove_candidate(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(CandidateType, String)>,
) -> Result<StatusCode, AppError> {
    if state.matching.remove_candidate(&id, kind).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("{kind} candidate {id} not found")))
    }
}

/// Tries to pair passenger `:id` with a driver right away.
async fn match_candidate(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(CandidateType, String)>,
    Json(payload): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let candidate = Candidate {
        id,
        kind,
        ride_types: payload.ride_types,
        position: payload.position,
        joined_at: Utc::now(),
        order_id: Some(payload.order_id),
    };

    let driver_id = state.matching.try_immediate_match(&candidate).await?;
    Ok(Json(MatchResponse {
        order_id: payload.order_id,
        driver_id,
    }))
}
