//! Ledger export and audit trail handlers.

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::{AppState, AuthUser};
use crate::domain::{AppError, AuditLog};

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}

/// Ledger as CSV
pub async fn csv_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(sol_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.service.sol_report_csv(&auth, sol_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"sol-{sol_id}.csv\""),
            ),
        ],
        bytes,
    ))
}

/// Ledger as PDF
pub async fn pdf_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(sol_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.service.sol_report_pdf(&auth, sol_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"sol-{sol_id}.pdf\""),
            ),
        ],
        bytes,
    ))
}

/// Admin view of recent administrative actions
pub async fn audit_log_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<AuditQuery>,
) -> Result<axum::Json<Vec<AuditLog>>, AppError> {
    let logs = state.service.list_audit(&auth, query.limit).await?;
    Ok(axum::Json(logs))
}
