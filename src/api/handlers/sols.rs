//! Sol lifecycle handlers: create, list, join, activate.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::app::{AppState, AuthUser};
use crate::domain::{
    AppError, CreateSolRequest, PaginatedResponse, PaginationParams, ParticipantInfo,
    Participation, Sol,
};

/// Create a sol; the creator takes the first rotation slot
pub async fn create_sol_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateSolRequest>,
) -> Result<(StatusCode, Json<Sol>), AppError> {
    let sol = state.service.create_sol(&auth, &payload).await?;
    Ok((StatusCode::CREATED, Json(sol)))
}

/// List sols with cursor pagination
pub async fn list_sols_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Sol>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let sols = state
        .service
        .list_sols(limit, params.cursor.as_deref())
        .await?;
    Ok(Json(sols))
}

/// Fetch one sol by id
pub async fn get_sol_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Sol>, AppError> {
    let sol = state.service.get_sol(id).await?;
    Ok(Json(sol))
}

/// Join an open sol
pub async fn join_sol_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Participation>), AppError> {
    let participation = state.service.join_sol(&auth, id).await?;
    Ok((StatusCode::CREATED, Json(participation)))
}

/// Participants in rotation order
pub async fn list_participants_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ParticipantInfo>>, AppError> {
    let participants = state.service.list_participants(&auth, id).await?;
    Ok(Json(participants))
}

/// Lock membership and start the first tour
pub async fn activate_sol_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Sol>, AppError> {
    let sol = state.service.activate_sol(&auth, id).await?;
    Ok(Json(sol))
}
