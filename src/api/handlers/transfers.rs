//! Payout transfer handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::app::{AppState, AuthUser};
use crate::domain::{AppError, Transfer};

/// Payout transfers of a sol
pub async fn list_transfers_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(sol_id): Path<Uuid>,
) -> Result<Json<Vec<Transfer>>, AppError> {
    let transfers = state.service.list_transfers(&auth, sol_id).await?;
    Ok(Json(transfers))
}

/// Admin marks a payout as disbursed
pub async fn complete_transfer_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    let transfer = state.service.complete_transfer(&auth, id).await?;
    Ok(Json(transfer))
}
