//! HTTP request handlers.

use axum::{Json, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::domain::{AppError, DatabaseError, ErrorDetail, ErrorResponse, GatewayError};

pub mod auth;
pub mod health;
pub mod payments;
pub mod reports;
pub mod sols;
pub mod transfers;

pub use auth::{login_handler, me_handler, register_handler};
pub use health::{
    health_check_handler, liveness_handler, metrics_handler, readiness_handler,
};
pub use payments::{
    create_payment_handler, list_payments_handler, reject_payment_handler,
    upload_receipt_handler, validate_payment_handler, webhook_handler,
};
pub use reports::{audit_log_handler, csv_report_handler, pdf_report_handler};
pub use sols::{
    activate_sol_handler, create_sol_handler, get_sol_handler, join_sol_handler,
    list_participants_handler, list_sols_handler,
};
pub use transfers::{complete_transfer_handler, list_transfers_handler};

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) | DatabaseError::PoolExhausted(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Gateway(gw_err) => match gw_err {
                GatewayError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "gateway_error",
                    self.to_string(),
                ),
                GatewayError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                GatewayError::InvalidSignature => (
                    StatusCode::UNAUTHORIZED,
                    "invalid_signature",
                    self.to_string(),
                ),
                GatewayError::SessionRejected(_) => (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error",
                    self.to_string(),
                ),
                GatewayError::Request(_) => (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(_) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "forbidden", self.to_string())
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                error!(error = ?self, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationError;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(AppError::Database(DatabaseError::NotFound("x".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Database(DatabaseError::Duplicate("x".into()))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Validation(ValidationError::MissingField(
                "f".into()
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::Authentication("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::Authorization("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::InvalidSignature)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::Connection("x".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_internal_error_is_not_leaked() {
        let response = AppError::Internal("secret connection string".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Body is generic; details stay in the log.
    }
}
