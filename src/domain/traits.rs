//! Domain traits defining contracts for persistence and external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::AppError;
use super::types::{
    AuditLog, CheckoutSession, PaginatedResponse, ParticipantInfo, Participation, Payment,
    PaymentMethod, PaymentStatus, Sol, Transfer, User,
};

/// Fields needed to insert a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
}

/// Fields needed to insert a new sol row.
#[derive(Debug, Clone)]
pub struct NewSol {
    pub name: String,
    pub description: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub frequency: super::types::SolFrequency,
    pub max_participants: i32,
    pub created_by: Uuid,
}

/// Fields needed to insert a new payment row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub sol_id: Uuid,
    pub user_id: Uuid,
    pub tour: i32,
    pub amount: i64,
    pub method: PaymentMethod,
    pub checkout_session_id: Option<String>,
}

/// Fields needed to insert a new audit log row.
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub actor_id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: Uuid,
    pub detail: Option<serde_json::Value>,
}

/// Persistence contract for the whole application.
///
/// The Postgres implementation lives in `infra::database`; an in-memory
/// mock lives in `test_utils`.
#[async_trait]
pub trait Database: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    // --- users -----------------------------------------------------------

    async fn create_user(&self, data: &NewUser) -> Result<User, AppError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;

    // --- sols ------------------------------------------------------------

    async fn create_sol(&self, data: &NewSol) -> Result<Sol, AppError>;
    async fn get_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError>;
    async fn list_sols(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Sol>, AppError>;

    /// Move a sol from `open` to `active` with `current_tour = 1`.
    /// Returns the updated sol, or `None` if the sol was not open
    /// (already active/completed, or missing).
    async fn activate_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError>;

    /// Compare-and-swap advance of the rotation index.
    ///
    /// Increments `current_tour` only if it still equals `from_tour` and the
    /// sol is active; completes the sol when the final tour was just paid
    /// out. Returns `true` iff this call performed the advance, which is the
    /// guard against two concurrent validations double-advancing a round.
    async fn advance_tour(&self, id: Uuid, from_tour: i32) -> Result<bool, AppError>;

    // --- participations --------------------------------------------------

    async fn create_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        rotation_order: i32,
    ) -> Result<Participation, AppError>;
    async fn get_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participation>, AppError>;
    async fn list_participants(&self, sol_id: Uuid) -> Result<Vec<ParticipantInfo>, AppError>;
    async fn count_participants(&self, sol_id: Uuid) -> Result<i64, AppError>;

    // --- payments --------------------------------------------------------

    async fn create_payment(&self, data: &NewPayment) -> Result<Payment, AppError>;
    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError>;
    async fn get_payment_by_session(&self, session_id: &str)
    -> Result<Option<Payment>, AppError>;
    async fn list_payments(
        &self,
        sol_id: Uuid,
        tour: Option<i32>,
    ) -> Result<Vec<Payment>, AppError>;

    /// The member's live (non-rejected) payment for one tour, if any.
    async fn find_live_payment(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        tour: i32,
    ) -> Result<Option<Payment>, AppError>;

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        validated_by: Option<Uuid>,
        rejection_reason: Option<&str>,
    ) -> Result<Payment, AppError>;

    async fn set_payment_receipt(&self, id: Uuid, path: &str) -> Result<Payment, AppError>;

    /// Attach the gateway checkout session to a freshly created card payment.
    async fn update_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<Payment, AppError>;

    /// Number of `validated` payments for one tour of a sol.
    async fn count_validated_payments(&self, sol_id: Uuid, tour: i32) -> Result<i64, AppError>;

    /// Flip a tour's `validated` payments to `completed` after payout.
    async fn complete_tour_payments(&self, sol_id: Uuid, tour: i32) -> Result<u64, AppError>;

    // --- transfers -------------------------------------------------------

    async fn create_transfer(
        &self,
        sol_id: Uuid,
        tour: i32,
        beneficiary_id: Uuid,
        amount: i64,
    ) -> Result<Transfer, AppError>;
    async fn get_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError>;
    async fn list_transfers(&self, sol_id: Uuid) -> Result<Vec<Transfer>, AppError>;

    /// Mark funds disbursed. Returns the updated transfer, or `None` if the
    /// transfer does not exist.
    async fn complete_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError>;

    /// Transfers whose payout notification is still due.
    async fn get_pending_notifications(&self, limit: i64) -> Result<Vec<Transfer>, AppError>;
    async fn mark_transfer_notified(&self, id: Uuid) -> Result<(), AppError>;

    /// Record a failed notification attempt; flips the transfer to `failed`
    /// once `max_attempts` is reached.
    async fn record_notify_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<(), AppError>;

    // --- audit -----------------------------------------------------------

    async fn record_audit(&self, entry: &NewAuditLog) -> Result<AuditLog, AppError>;
    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLog>, AppError>;
}

/// Card-payment processor contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Check gateway connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Create a hosted checkout session for one contribution.
    async fn create_checkout_session(
        &self,
        payment_id: Uuid,
        amount: i64,
        currency: &str,
        description: &str,
    ) -> Result<CheckoutSession, AppError>;
}

/// Outbound email contract.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Storage contract for uploaded payment receipts.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Persist receipt bytes and return the storage path.
    async fn save(
        &self,
        payment_id: Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<String, AppError>;

    /// Read back a stored receipt.
    async fn load(&self, path: &str) -> Result<Vec<u8>, AppError>;
}
