//! Application service layer.
//!
//! Orchestrates operations between the database, the payment gateway, the
//! receipt store and the mailer through their trait abstractions.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::app::auth::{self, AuthTokens, AuthUser};
use crate::app::reports;
use crate::app::tour::TourEngine;
use crate::domain::{
    AppError, AuditLog, CreatePaymentRequest, CreateSolRequest, Database, DatabaseError,
    HealthResponse, HealthStatus, LoginRequest, Mailer, NewAuditLog, NewPayment, NewSol, NewUser,
    PaginatedResponse, ParticipantInfo, Participation, Payment, PaymentGateway, PaymentMethod,
    PaymentResponse, PaymentStatus, ReceiptStore, RegisterRequest, Sol, SolStatus, TokenResponse,
    TourOutcome, Transfer, User, UserProfile, ValidationError, WebhookEvent,
};

/// Maximum accepted receipt upload, in bytes.
pub const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024;

/// Maximum notification attempts before a transfer is marked failed.
pub const MAX_NOTIFY_ATTEMPTS: i32 = 5;

const ALLOWED_RECEIPT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pdf"];

pub struct AppService {
    db: Arc<dyn Database>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    receipts: Arc<dyn ReceiptStore>,
    tokens: Arc<AuthTokens>,
    tour_engine: TourEngine,
}

impl AppService {
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        receipts: Arc<dyn ReceiptStore>,
        tokens: Arc<AuthTokens>,
    ) -> Self {
        let tour_engine = TourEngine::new(Arc::clone(&db));
        Self {
            db,
            gateway,
            mailer,
            receipts,
            tokens,
            tour_engine,
        }
    }

    // --- auth --------------------------------------------------------------

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AppError> {
        request.validate()?;

        if self
            .db
            .get_user_by_email(&request.email.to_lowercase())
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "email {} is already registered",
                request.email
            )));
        }

        let password_hash = auth::hash_password(&request.password)?;
        let user = self
            .db
            .create_user(&NewUser {
                email: request.email.to_lowercase(),
                password_hash,
                full_name: request.full_name.clone(),
                phone: request.phone.clone(),
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        Ok(UserProfile::from(&user))
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, AppError> {
        request.validate()?;

        let user = self
            .db
            .get_user_by_email(&request.email.to_lowercase())
            .await?
            .ok_or_else(|| AppError::Authentication("invalid credentials".to_string()))?;

        if !auth::verify_password(&request.password, &user.password_hash)? {
            warn!(user_id = %user.id, "login failed: bad password");
            return Err(AppError::Authentication("invalid credentials".to_string()));
        }

        let token = self.tokens.issue(user.id, user.role)?;
        Ok(TokenResponse {
            token,
            expires_in: self.tokens.ttl_secs(),
            user: UserProfile::from(&user),
        })
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        let user = self.require_user(user_id).await?;
        Ok(UserProfile::from(&user))
    }

    // --- sols ----------------------------------------------------------------

    /// Create a sol; the creator becomes the first participant
    /// (rotation_order 1).
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_sol(
        &self,
        caller: &AuthUser,
        request: &CreateSolRequest,
    ) -> Result<Sol, AppError> {
        request.validate()?;

        let sol = self
            .db
            .create_sol(&NewSol {
                name: request.name.clone(),
                description: request.description.clone(),
                amount: request.amount,
                currency: request.currency.to_uppercase(),
                frequency: request.frequency,
                max_participants: request.max_participants,
                created_by: caller.id,
            })
            .await?;

        self.db.create_participation(sol.id, caller.id, 1).await?;

        info!(sol_id = %sol.id, "sol created");
        Ok(sol)
    }

    pub async fn get_sol(&self, sol_id: Uuid) -> Result<Sol, AppError> {
        self.db
            .get_sol(sol_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(sol_id.to_string())))
    }

    pub async fn list_sols(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Sol>, AppError> {
        self.db.list_sols(limit, cursor).await
    }

    /// Join an open sol; the next rotation slot is assigned.
    #[instrument(skip(self))]
    pub async fn join_sol(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
    ) -> Result<Participation, AppError> {
        let sol = self.get_sol(sol_id).await?;

        if sol.status != SolStatus::Open {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "sol_id".to_string(),
                message: "sol is no longer open for members".to_string(),
            }));
        }

        if self
            .db
            .get_participation(sol_id, caller.id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("already a member of this sol".to_string()));
        }

        let count = self.db.count_participants(sol_id).await?;
        if count >= sol.max_participants as i64 {
            return Err(AppError::Conflict("sol is full".to_string()));
        }

        // The unique (sol_id, rotation_order) constraint backstops two
        // concurrent joins grabbing the same slot.
        let participation = self
            .db
            .create_participation(sol_id, caller.id, count as i32 + 1)
            .await?;

        info!(sol_id = %sol_id, user_id = %caller.id, order = participation.rotation_order, "member joined sol");
        Ok(participation)
    }

    pub async fn list_participants(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
    ) -> Result<Vec<ParticipantInfo>, AppError> {
        self.require_member_or_admin(caller, sol_id).await?;
        self.db.list_participants(sol_id).await
    }

    /// Lock membership and start tour 1. Creator or admin only.
    #[instrument(skip(self))]
    pub async fn activate_sol(&self, caller: &AuthUser, sol_id: Uuid) -> Result<Sol, AppError> {
        let sol = self.get_sol(sol_id).await?;

        if sol.created_by != caller.id && !caller.is_admin() {
            return Err(AppError::Authorization(
                "only the sol creator or an admin can activate it".to_string(),
            ));
        }

        let count = self.db.count_participants(sol_id).await?;
        if count < 2 {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "sol_id".to_string(),
                message: "a sol needs at least 2 participants to start".to_string(),
            }));
        }

        let activated = self
            .db
            .activate_sol(sol_id)
            .await?
            .ok_or_else(|| AppError::Conflict("sol is not open".to_string()))?;

        self.audit(caller.id, "sol.activate", "sol", sol_id, None)
            .await;
        info!(sol_id = %sol_id, participants = count, "sol activated");
        Ok(activated)
    }

    // --- payments --------------------------------------------------------

    /// Open a contribution for the sol's current tour. Card payments get a
    /// checkout session at the gateway; receipt payments await an upload.
    #[instrument(skip(self, request), fields(sol_id = %request.sol_id, method = ?request.method))]
    pub async fn create_payment(
        &self,
        caller: &AuthUser,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentResponse, AppError> {
        let sol = self.get_sol(request.sol_id).await?;

        if sol.status != SolStatus::Active {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "sol_id".to_string(),
                message: "sol is not collecting contributions".to_string(),
            }));
        }

        self.db
            .get_participation(sol.id, caller.id)
            .await?
            .ok_or_else(|| {
                AppError::Authorization("not a participant of this sol".to_string())
            })?;

        let tour = sol.current_tour;
        if let Some(existing) = self.db.find_live_payment(sol.id, caller.id, tour).await? {
            return Err(AppError::Conflict(format!(
                "a {} payment already exists for tour {tour}",
                existing.status
            )));
        }

        let payment = self
            .db
            .create_payment(&NewPayment {
                sol_id: sol.id,
                user_id: caller.id,
                tour,
                amount: sol.amount,
                method: request.method,
                checkout_session_id: None,
            })
            .await?;

        if request.method == PaymentMethod::Card {
            let description = format!("{} - tour {tour}", sol.name);
            let session = match self
                .gateway
                .create_checkout_session(payment.id, sol.amount, &sol.currency, &description)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    // A pending card payment without a session can never be
                    // validated by a webhook. Free the slot so the member
                    // can retry once the gateway recovers.
                    self.db
                        .update_payment_status(
                            payment.id,
                            PaymentStatus::Rejected,
                            None,
                            Some("checkout session could not be created"),
                        )
                        .await?;
                    return Err(e);
                }
            };
            let payment = self
                .db
                .update_payment_session(payment.id, &session.session_id)
                .await?;
            info!(payment_id = %payment.id, session = %session.session_id, "checkout session created");
            return Ok(PaymentResponse {
                payment,
                checkout_url: Some(session.url),
            });
        }

        Ok(PaymentResponse {
            payment,
            checkout_url: None,
        })
    }

    /// Attach an uploaded receipt to a pending or rejected payment.
    #[instrument(skip(self, data), fields(payment_id = %payment_id, size = data.len()))]
    pub async fn attach_receipt(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<Payment, AppError> {
        let payment = self.require_payment(payment_id).await?;

        if payment.user_id != caller.id {
            return Err(AppError::Authorization(
                "receipt can only be uploaded by the payer".to_string(),
            ));
        }
        if payment.method != PaymentMethod::Receipt {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "payment_id".to_string(),
                message: "card payments do not take receipt uploads".to_string(),
            }));
        }
        if !matches!(
            payment.status,
            PaymentStatus::Pending | PaymentStatus::Uploaded | PaymentStatus::Rejected
        ) {
            return Err(AppError::Conflict(format!(
                "payment is {} and no longer accepts a receipt",
                payment.status
            )));
        }
        if payment.status == PaymentStatus::Rejected {
            // The member may have opened a replacement payment since the
            // rejection; reviving this one would leave two live payments
            // for the same tour.
            if let Some(replacement) = self
                .db
                .find_live_payment(payment.sol_id, payment.user_id, payment.tour)
                .await?
            {
                return Err(AppError::Conflict(format!(
                    "a {} payment already replaced this one for tour {}",
                    replacement.status, payment.tour
                )));
            }
        }

        if data.is_empty() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "file".to_string(),
            )));
        }
        if data.len() > MAX_RECEIPT_BYTES {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "file".to_string(),
                message: format!("receipt exceeds {} bytes", MAX_RECEIPT_BYTES),
            }));
        }
        let extension = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        if !ALLOWED_RECEIPT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "file".to_string(),
                message: "receipt must be a jpg, png or pdf".to_string(),
            }));
        }

        let path = self.receipts.save(payment_id, filename, data).await?;
        self.db.set_payment_receipt(payment_id, &path).await?;
        let updated = self
            .db
            .update_payment_status(payment_id, PaymentStatus::Uploaded, None, None)
            .await?;

        info!(payment_id = %payment_id, path = %path, "receipt uploaded");
        Ok(updated)
    }

    /// Gateway webhook: a completed checkout session validates its payment
    /// and runs the tour engine. Unknown sessions and event types are
    /// acknowledged without effect so the gateway stops retrying.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<TourOutcome, AppError> {
        if event.event_type != WebhookEvent::CHECKOUT_COMPLETED {
            return Ok(TourOutcome::AlreadyAdvanced);
        }

        let Some(payment) = self.db.get_payment_by_session(&event.session_id).await? else {
            warn!(session = %event.session_id, "webhook for unknown checkout session");
            return Ok(TourOutcome::AlreadyAdvanced);
        };

        if payment.status != PaymentStatus::Pending {
            // Gateway retries are expected; the first delivery won.
            return Ok(TourOutcome::AlreadyAdvanced);
        }

        self.db
            .update_payment_status(payment.id, PaymentStatus::Validated, None, None)
            .await?;
        metrics::counter!("payments_validated_total").increment(1);
        info!(payment_id = %payment.id, "card payment validated via webhook");

        self.tour_engine.check_and_advance(payment.sol_id).await
    }

    /// Admin approval of an uploaded receipt.
    #[instrument(skip(self))]
    pub async fn validate_payment(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
    ) -> Result<(Payment, TourOutcome), AppError> {
        caller.require_admin()?;
        let payment = self.require_payment(payment_id).await?;

        if payment.status != PaymentStatus::Uploaded {
            return Err(AppError::Conflict(format!(
                "only uploaded payments can be validated (payment is {})",
                payment.status
            )));
        }

        let updated = self
            .db
            .update_payment_status(payment_id, PaymentStatus::Validated, Some(caller.id), None)
            .await?;
        metrics::counter!("payments_validated_total").increment(1);

        self.audit(
            caller.id,
            "payment.validate",
            "payment",
            payment_id,
            Some(serde_json::json!({ "sol_id": payment.sol_id, "tour": payment.tour })),
        )
        .await;

        let outcome = self.tour_engine.check_and_advance(payment.sol_id).await?;
        Ok((updated, outcome))
    }

    /// Admin rejection of an uploaded receipt; the member may re-upload.
    #[instrument(skip(self, reason))]
    pub async fn reject_payment(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Payment, AppError> {
        caller.require_admin()?;
        let payment = self.require_payment(payment_id).await?;

        if !matches!(
            payment.status,
            PaymentStatus::Pending | PaymentStatus::Uploaded
        ) {
            return Err(AppError::Conflict(format!(
                "payment is {} and cannot be rejected",
                payment.status
            )));
        }

        let updated = self
            .db
            .update_payment_status(
                payment_id,
                PaymentStatus::Rejected,
                Some(caller.id),
                Some(reason),
            )
            .await?;

        self.audit(
            caller.id,
            "payment.reject",
            "payment",
            payment_id,
            Some(serde_json::json!({ "reason": reason })),
        )
        .await;
        Ok(updated)
    }

    pub async fn list_payments(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
        tour: Option<i32>,
    ) -> Result<Vec<Payment>, AppError> {
        self.require_member_or_admin(caller, sol_id).await?;
        self.db.list_payments(sol_id, tour).await
    }

    // --- transfers ---------------------------------------------------------

    pub async fn list_transfers(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
    ) -> Result<Vec<Transfer>, AppError> {
        self.require_member_or_admin(caller, sol_id).await?;
        self.db.list_transfers(sol_id).await
    }

    /// Admin marks the payout as disbursed to the beneficiary.
    #[instrument(skip(self))]
    pub async fn complete_transfer(
        &self,
        caller: &AuthUser,
        transfer_id: Uuid,
    ) -> Result<Transfer, AppError> {
        caller.require_admin()?;

        let transfer = self
            .db
            .complete_transfer(transfer_id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(transfer_id.to_string()))
            })?;

        self.audit(
            caller.id,
            "transfer.complete",
            "transfer",
            transfer_id,
            Some(serde_json::json!({ "sol_id": transfer.sol_id, "tour": transfer.tour })),
        )
        .await;
        Ok(transfer)
    }

    /// Worker entry point: deliver due payout notifications.
    /// Returns the number of transfers processed.
    pub async fn process_pending_notifications(&self, batch_size: i64) -> Result<u64, AppError> {
        let pending = self.db.get_pending_notifications(batch_size).await?;
        let mut processed = 0u64;

        for transfer in pending {
            match self.notify_beneficiary(&transfer).await {
                Ok(()) => {
                    self.db.mark_transfer_notified(transfer.id).await?;
                    metrics::counter!("payout_notifications_sent_total").increment(1);
                    processed += 1;
                }
                Err(e) => {
                    // Exponential backoff: 1, 2, 4, 8... minutes per attempt.
                    let delay_mins = 1i64 << transfer.notify_attempts.min(6);
                    let next = chrono::Utc::now() + chrono::Duration::minutes(delay_mins);
                    warn!(transfer_id = %transfer.id, error = ?e, "payout notification failed");
                    self.db
                        .record_notify_failure(
                            transfer.id,
                            &e.to_string(),
                            next,
                            MAX_NOTIFY_ATTEMPTS,
                        )
                        .await?;
                }
            }
        }

        Ok(processed)
    }

    async fn notify_beneficiary(&self, transfer: &Transfer) -> Result<(), AppError> {
        let beneficiary = self.require_user(transfer.beneficiary_id).await?;
        let sol = self.get_sol(transfer.sol_id).await?;

        let subject = format!("Your sol payout is ready: {}", sol.name);
        let body = format!(
            "Hello {},\n\nTour {} of \"{}\" is complete. A payout of {} {} \
             is on its way to you.\n\n— Sol Numérique",
            beneficiary.full_name,
            transfer.tour,
            sol.name,
            format_minor_units(transfer.amount),
            sol.currency,
        );

        self.mailer.send(&beneficiary.email, &subject, &body).await
    }

    // --- reports & audit ---------------------------------------------------

    pub async fn sol_report_csv(&self, caller: &AuthUser, sol_id: Uuid) -> Result<Vec<u8>, AppError> {
        let input = self.collect_report_input(caller, sol_id).await?;
        reports::render_csv(&input)
    }

    pub async fn sol_report_pdf(&self, caller: &AuthUser, sol_id: Uuid) -> Result<Vec<u8>, AppError> {
        let input = self.collect_report_input(caller, sol_id).await?;
        reports::render_pdf(&input)
    }

    async fn collect_report_input(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
    ) -> Result<reports::ReportInput, AppError> {
        self.require_member_or_admin(caller, sol_id).await?;
        let sol = self.get_sol(sol_id).await?;
        let participants = self.db.list_participants(sol_id).await?;
        let payments = self.db.list_payments(sol_id, None).await?;
        let transfers = self.db.list_transfers(sol_id).await?;
        Ok(reports::ReportInput {
            sol,
            participants,
            payments,
            transfers,
        })
    }

    pub async fn list_audit(&self, caller: &AuthUser, limit: i64) -> Result<Vec<AuditLog>, AppError> {
        caller.require_admin()?;
        self.db.list_audit(limit.clamp(1, 500)).await
    }

    // --- health ------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let gateway_health = match self.gateway.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Gateway health check failed");
                HealthStatus::Unhealthy
            }
        };

        HealthResponse::new(db_health, gateway_health)
    }

    // --- helpers -----------------------------------------------------------

    async fn require_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(user_id.to_string())))
    }

    async fn require_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.db
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))
    }

    async fn require_member_or_admin(
        &self,
        caller: &AuthUser,
        sol_id: Uuid,
    ) -> Result<(), AppError> {
        if caller.is_admin() {
            return Ok(());
        }
        self.db
            .get_participation(sol_id, caller.id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::Authorization("not a participant of this sol".to_string()))
    }

    /// Audit failures are logged, never surfaced: the action itself succeeded.
    async fn audit(
        &self,
        actor_id: Uuid,
        action: &str,
        entity: &str,
        entity_id: Uuid,
        detail: Option<serde_json::Value>,
    ) {
        let entry = NewAuditLog {
            actor_id,
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            detail,
        };
        if let Err(e) = self.db.record_audit(&entry).await {
            warn!(action, error = ?e, "failed to record audit log");
        }
    }
}

/// "12345" cents → "123.45".
fn format_minor_units(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SolFrequency, TransferStatus};
    use crate::test_utils::test_service;

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "longenough".to_string(),
            full_name: "Test User".to_string(),
            phone: None,
        }
    }

    fn sol_request() -> CreateSolRequest {
        CreateSolRequest {
            name: "Sol Test".to_string(),
            description: None,
            amount: 2_500,
            currency: "htg".to_string(),
            frequency: SolFrequency::Weekly,
            max_participants: 3,
        }
    }

    async fn register_and_auth(service: &AppService, email: &str) -> AuthUser {
        let profile = service.register(&register_request(email)).await.unwrap();
        AuthUser {
            id: profile.id,
            role: profile.role,
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (service, _, _, _, _) = test_service();

        let profile = service
            .register(&register_request("anne@example.com"))
            .await
            .unwrap();
        assert_eq!(profile.email, "anne@example.com");

        let token = service
            .login(&LoginRequest {
                email: "anne@example.com".to_string(),
                password: "longenough".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(token.user.id, profile.id);
        assert!(!token.token.is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let (service, _, _, _, _) = test_service();

        service
            .register(&register_request("anne@example.com"))
            .await
            .unwrap();
        let result = service.register(&register_request("anne@example.com")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let (service, _, _, _, _) = test_service();
        service
            .register(&register_request("anne@example.com"))
            .await
            .unwrap();

        let result = service
            .login(&LoginRequest {
                email: "anne@example.com".to_string(),
                password: "wrong-password".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_create_sol_auto_joins_creator() {
        let (service, db, _, _, _) = test_service();
        let creator = register_and_auth(&service, "creator@example.com").await;

        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();
        assert_eq!(sol.currency, "HTG");
        assert_eq!(sol.status, SolStatus::Open);

        let participation = db.get_participation(sol.id, creator.id).await.unwrap();
        assert_eq!(participation.unwrap().rotation_order, 1);
    }

    #[tokio::test]
    async fn test_join_full_sol_is_rejected() {
        let (service, _, _, _, _) = test_service();
        let creator = register_and_auth(&service, "creator@example.com").await;
        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();

        let b = register_and_auth(&service, "b@example.com").await;
        let c = register_and_auth(&service, "c@example.com").await;
        let d = register_and_auth(&service, "d@example.com").await;

        service.join_sol(&b, sol.id).await.unwrap();
        service.join_sol(&c, sol.id).await.unwrap();

        // max_participants is 3; the creator plus two joiners fills it.
        let result = service.join_sol(&d, sol.id).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_join_twice_is_rejected() {
        let (service, _, _, _, _) = test_service();
        let creator = register_and_auth(&service, "creator@example.com").await;
        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();

        let result = service.join_sol(&creator, sol.id).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_activate_requires_two_participants() {
        let (service, _, _, _, _) = test_service();
        let creator = register_and_auth(&service, "creator@example.com").await;
        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();

        let result = service.activate_sol(&creator, sol.id).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_activate_by_stranger_is_denied() {
        let (service, _, _, _, _) = test_service();
        let creator = register_and_auth(&service, "creator@example.com").await;
        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();
        let other = register_and_auth(&service, "other@example.com").await;
        service.join_sol(&other, sol.id).await.unwrap();

        let result = service.activate_sol(&other, sol.id).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    async fn active_sol_with_members(
        service: &AppService,
    ) -> (Sol, AuthUser, AuthUser) {
        let creator = register_and_auth(service, "creator@example.com").await;
        let sol = service.create_sol(&creator, &sol_request()).await.unwrap();
        let member = register_and_auth(service, "member@example.com").await;
        service.join_sol(&member, sol.id).await.unwrap();
        let sol = service.activate_sol(&creator, sol.id).await.unwrap();
        (sol, creator, member)
    }

    #[tokio::test]
    async fn test_card_payment_creates_checkout_session() {
        let (service, _, gateway, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Card,
                },
            )
            .await
            .unwrap();

        assert!(response.checkout_url.is_some());
        assert!(response.payment.checkout_session_id.is_some());
        assert_eq!(gateway.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_payment_for_tour_conflicts() {
        let (service, _, _, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let request = CreatePaymentRequest {
            sol_id: sol.id,
            method: PaymentMethod::Receipt,
        };
        service.create_payment(&creator, &request).await.unwrap();
        let result = service.create_payment(&creator, &request).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_non_participant_cannot_pay() {
        let (service, _, _, _, _) = test_service();
        let (sol, _, _) = active_sol_with_members(&service).await;
        let stranger = register_and_auth(&service, "stranger@example.com").await;

        let result = service
            .create_payment(
                &stranger,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_receipt_upload_moves_payment_to_uploaded() {
        let (service, _, _, _, receipts) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();

        let updated = service
            .attach_receipt(&creator, response.payment.id, "recu.jpg", b"fake image bytes")
            .await
            .unwrap();

        assert_eq!(updated.status, PaymentStatus::Uploaded);
        assert!(updated.receipt_path.is_some());
        assert_eq!(receipts.stored_count(), 1);
    }

    #[tokio::test]
    async fn test_receipt_upload_rejects_bad_extension() {
        let (service, _, _, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();

        let result = service
            .attach_receipt(&creator, response.payment.id, "recu.exe", b"bytes")
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_receipt_upload_by_other_member_is_denied() {
        let (service, _, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();

        let result = service
            .attach_receipt(&member, response.payment.id, "recu.jpg", b"bytes")
            .await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_validate_payment_requires_admin() {
        let (service, _, _, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();

        let result = service.validate_payment(&creator, response.payment.id).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_rejected_receipt_can_be_reuploaded() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(creator.id).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();
        let payment_id = response.payment.id;

        service
            .attach_receipt(&creator, payment_id, "recu.jpg", b"blurry")
            .await
            .unwrap();
        let rejected = service
            .reject_payment(&admin, payment_id, "unreadable receipt")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("unreadable receipt")
        );

        let retried = service
            .attach_receipt(&creator, payment_id, "recu2.jpg", b"sharp")
            .await
            .unwrap();
        assert_eq!(retried.status, PaymentStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_gateway_failure_frees_the_payment_slot() {
        let (service, db, gateway, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;
        let request = CreatePaymentRequest {
            sol_id: sol.id,
            method: PaymentMethod::Card,
        };

        gateway.set_failing(true);
        let result = service.create_payment(&creator, &request).await;
        assert!(matches!(result, Err(AppError::Gateway(_))));

        // The aborted attempt must not hold the (sol, member, tour) slot.
        let leftover = db
            .find_live_payment(sol.id, creator.id, sol.current_tour)
            .await
            .unwrap();
        assert!(leftover.is_none());

        gateway.set_failing(false);
        let retried = service.create_payment(&creator, &request).await.unwrap();
        assert!(retried.checkout_url.is_some());
    }

    #[tokio::test]
    async fn test_rejected_receipt_cannot_revive_after_replacement() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;
        let request = CreatePaymentRequest {
            sol_id: sol.id,
            method: PaymentMethod::Receipt,
        };

        let first = service.create_payment(&creator, &request).await.unwrap();
        service
            .attach_receipt(&creator, first.payment.id, "recu.jpg", b"blurry")
            .await
            .unwrap();
        service
            .reject_payment(&admin, first.payment.id, "unreadable receipt")
            .await
            .unwrap();

        // A replacement payment takes the tour slot; re-uploading against
        // the rejected one must not yield a second live payment.
        let second = service.create_payment(&creator, &request).await.unwrap();
        let result = service
            .attach_receipt(&creator, first.payment.id, "recu2.jpg", b"sharp")
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let live = db
            .find_live_payment(sol.id, creator.id, sol.current_tour)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.id, second.payment.id);
    }

    #[tokio::test]
    async fn test_validated_payment_cannot_be_rejected() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        let response = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();
        service
            .attach_receipt(&creator, response.payment.id, "recu.jpg", b"bytes")
            .await
            .unwrap();
        service
            .validate_payment(&admin, response.payment.id)
            .await
            .unwrap();

        let result = service
            .reject_payment(&admin, response.payment.id, "too late")
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_webhook_validates_and_advances() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        // Member pays by receipt, admin validates it.
        let member_payment = service
            .create_payment(
                &member,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();
        service
            .attach_receipt(&member, member_payment.payment.id, "recu.png", b"bytes")
            .await
            .unwrap();
        let (_, outcome) = service
            .validate_payment(&admin, member_payment.payment.id)
            .await
            .unwrap();
        assert_eq!(outcome, TourOutcome::NotComplete { missing: 1 });

        // Creator pays by card; the webhook closes the tour.
        let card = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Card,
                },
            )
            .await
            .unwrap();
        let session_id = card.payment.checkout_session_id.unwrap();

        let outcome = service
            .handle_webhook(&WebhookEvent {
                event_type: WebhookEvent::CHECKOUT_COMPLETED.to_string(),
                session_id: session_id.clone(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, TourOutcome::Advanced { .. }));

        // Replayed webhook is a no-op.
        let replay = service
            .handle_webhook(&WebhookEvent {
                event_type: WebhookEvent::CHECKOUT_COMPLETED.to_string(),
                session_id,
            })
            .await
            .unwrap();
        assert_eq!(replay, TourOutcome::AlreadyAdvanced);
    }

    #[tokio::test]
    async fn test_webhook_unknown_session_is_acknowledged() {
        let (service, _, _, _, _) = test_service();
        let outcome = service
            .handle_webhook(&WebhookEvent {
                event_type: WebhookEvent::CHECKOUT_COMPLETED.to_string(),
                session_id: "cs_unknown".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, TourOutcome::AlreadyAdvanced);
    }

    #[tokio::test]
    async fn test_pending_notifications_sent_and_marked() {
        let (service, db, _, mailer, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        // Close tour 1 entirely through receipts.
        for caller in [&creator, &member] {
            let payment = service
                .create_payment(
                    caller,
                    &CreatePaymentRequest {
                        sol_id: sol.id,
                        method: PaymentMethod::Receipt,
                    },
                )
                .await
                .unwrap();
            service
                .attach_receipt(caller, payment.payment.id, "recu.jpg", b"bytes")
                .await
                .unwrap();
            service
                .validate_payment(&admin, payment.payment.id)
                .await
                .unwrap();
        }

        let processed = service.process_pending_notifications(10).await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(mailer.sent().len(), 1);
        assert!(mailer.sent()[0].subject.contains("payout"));

        let transfers = db.list_transfers(sol.id).await.unwrap();
        assert_eq!(transfers[0].status, TransferStatus::Notified);

        // Nothing left to process.
        let processed = service.process_pending_notifications(10).await.unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn test_notification_failure_backs_off() {
        let (service, db, _, mailer, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        for caller in [&creator, &member] {
            let payment = service
                .create_payment(
                    caller,
                    &CreatePaymentRequest {
                        sol_id: sol.id,
                        method: PaymentMethod::Receipt,
                    },
                )
                .await
                .unwrap();
            service
                .attach_receipt(caller, payment.payment.id, "recu.jpg", b"bytes")
                .await
                .unwrap();
            service
                .validate_payment(&admin, payment.payment.id)
                .await
                .unwrap();
        }

        mailer.set_failing(true);
        let processed = service.process_pending_notifications(10).await.unwrap();
        assert_eq!(processed, 0);

        let transfers = db.list_transfers(sol.id).await.unwrap();
        assert_eq!(transfers[0].notify_attempts, 1);
        assert!(transfers[0].next_attempt_at.is_some());
        assert!(transfers[0].last_error.is_some());
        assert_eq!(transfers[0].status, TransferStatus::Pending);

        // Backoff keeps it out of the next poll.
        let processed = service.process_pending_notifications(10).await.unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn test_reports_denied_to_strangers() {
        let (service, _, _, _, _) = test_service();
        let (sol, _, _) = active_sol_with_members(&service).await;
        let stranger = register_and_auth(&service, "stranger@example.com").await;

        let result = service.sol_report_csv(&stranger, sol.id).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_csv_report_contains_ledger() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        let payment = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();
        service
            .attach_receipt(&creator, payment.payment.id, "recu.jpg", b"bytes")
            .await
            .unwrap();
        service
            .validate_payment(&admin, payment.payment.id)
            .await
            .unwrap();

        let csv_bytes = service.sol_report_csv(&creator, sol.id).await.unwrap();
        let text = String::from_utf8(csv_bytes).unwrap();
        assert!(text.contains("tour"));
        assert!(text.contains("creator@example.com"));
        assert!(text.contains("validated"));
    }

    #[tokio::test]
    async fn test_pdf_report_renders() {
        let (service, _, _, _, _) = test_service();
        let (sol, creator, _) = active_sol_with_members(&service).await;

        let pdf_bytes = service.sol_report_pdf(&creator, sol.id).await.unwrap();
        assert!(pdf_bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_audit_trail_records_admin_actions() {
        let (service, db, _, _, _) = test_service();
        let (sol, creator, member) = active_sol_with_members(&service).await;
        let admin = db.promote_to_admin(member.id).await;

        let payment = service
            .create_payment(
                &creator,
                &CreatePaymentRequest {
                    sol_id: sol.id,
                    method: PaymentMethod::Receipt,
                },
            )
            .await
            .unwrap();
        service
            .attach_receipt(&creator, payment.payment.id, "recu.jpg", b"bytes")
            .await
            .unwrap();
        service
            .validate_payment(&admin, payment.payment.id)
            .await
            .unwrap();

        let logs = service.list_audit(&admin, 50).await.unwrap();
        // sol.activate + payment.validate
        assert!(logs.iter().any(|l| l.action == "payment.validate"));
        assert!(logs.iter().any(|l| l.action == "sol.activate"));

        let denied = service.list_audit(&creator, 50).await;
        assert!(matches!(denied, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_health_check_degraded_when_gateway_down() {
        let (service, _, gateway, _, _) = test_service();
        gateway.set_healthy(false);

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.database, HealthStatus::Healthy);
        assert_eq!(health.gateway, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(12345), "123.45");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(100), "1.00");
    }
}
