//! Registration, login, and current-user handlers.

use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode};

use crate::app::{AppState, AuthUser};
use crate::domain::{AppError, LoginRequest, RegisterRequest, TokenResponse, UserProfile};

/// Create a member account
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    let profile = state.service.register(&payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Exchange credentials for a bearer token
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let response = state.service.login(&payload).await?;
    Ok(Json(response))
}

/// Profile of the authenticated caller
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserProfile>, AppError> {
    let profile = state.service.profile(auth.id).await?;
    Ok(Json(profile))
}
