//! Contribution handlers: creation, receipt upload, webhook, admin review.

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::verify_webhook_signature;
use crate::app::{AppState, AuthUser};
use crate::domain::{
    AppError, CreatePaymentRequest, Payment, PaymentResponse, RejectPaymentRequest, TourOutcome,
    ValidationError, WebhookEvent,
};

/// Header carrying the hex HMAC-SHA256 of the webhook body.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub tour: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ReviewedPayment {
    pub payment: Payment,
    pub tour: TourOutcome,
}

/// Open a contribution for the caller on the sol's current tour
pub async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    let response = state.service.create_payment(&auth, &payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Attach a proof-of-payment file to a receipt payment
pub async fn upload_receipt_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Payment>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .ok_or_else(|| {
                AppError::Validation(ValidationError::InvalidField {
                    field: "file".to_string(),
                    message: "file field needs a filename".to_string(),
                })
            })?
            .to_string();
        let data = field.bytes().await.map_err(multipart_error)?;

        let payment = state
            .service
            .attach_receipt(&auth, id, &filename, &data)
            .await?;
        return Ok(Json(payment));
    }

    Err(AppError::Validation(ValidationError::MissingField(
        "file".to_string(),
    )))
}

/// Payment gateway webhook. The body is authenticated with an HMAC-SHA256
/// signature before it is even parsed.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TourOutcome>, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_webhook_signature(&state.webhook_secret, &body, signature)?;

    let event: WebhookEvent = serde_json::from_slice(&body)?;
    let outcome = state.service.handle_webhook(&event).await?;
    Ok(Json(outcome))
}

/// Admin approval of an uploaded receipt
pub async fn validate_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewedPayment>, AppError> {
    let (payment, tour) = state.service.validate_payment(&auth, id).await?;
    Ok(Json(ReviewedPayment { payment, tour }))
}

/// Admin rejection of an uploaded receipt
pub async fn reject_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    use validator::Validate;
    payload.validate()?;
    let payment = state
        .service
        .reject_payment(&auth, id, &payload.reason)
        .await?;
    Ok(Json(payment))
}

/// Payments of a sol, optionally narrowed to one tour
pub async fn list_payments_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(sol_id): Path<Uuid>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let payments = state.service.list_payments(&auth, sol_id, query.tour).await?;
    Ok(Json(payments))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(ValidationError::InvalidFormat(format!(
        "malformed multipart body: {e}"
    )))
}
