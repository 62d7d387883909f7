use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Role attached to a user account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered account. `password_hash` never leaves the domain layer;
/// API responses use [`UserProfile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Lifecycle of a sol. `current_tour` is 0 while `Open`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SolStatus {
    Open,
    Active,
    Completed,
}

impl SolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolStatus::Open => "open",
            SolStatus::Active => "active",
            SolStatus::Completed => "completed",
        }
    }
}

impl FromStr for SolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SolStatus::Open),
            "active" => Ok(SolStatus::Active),
            "completed" => Ok(SolStatus::Completed),
            other => Err(format!("unknown sol status: {other}")),
        }
    }
}

impl fmt::Display for SolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contribution cadence of a sol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SolFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl SolFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolFrequency::Weekly => "weekly",
            SolFrequency::Biweekly => "biweekly",
            SolFrequency::Monthly => "monthly",
        }
    }
}

impl FromStr for SolFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(SolFrequency::Weekly),
            "biweekly" => Ok(SolFrequency::Biweekly),
            "monthly" => Ok(SolFrequency::Monthly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// A rotating savings group. `amount` is the per-member contribution per
/// tour, in minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sol {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub frequency: SolFrequency,
    pub max_participants: i32,
    pub current_tour: i32,
    pub status: SolStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sol {
    /// Pool received by the beneficiary of one tour.
    pub fn pot_for(&self, participant_count: i64) -> i64 {
        self.amount * participant_count
    }
}

/// Membership of a user in a sol. `rotation_order` is 1-based and decides
/// which tour pays out to this member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participation {
    pub id: Uuid,
    pub sol_id: Uuid,
    pub user_id: Uuid,
    pub rotation_order: i32,
    pub joined_at: DateTime<Utc>,
}

/// Participant row enriched with profile fields for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub rotation_order: i32,
    pub joined_at: DateTime<Utc>,
}

/// How a contribution is collected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Receipt,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Receipt => "receipt",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "receipt" => Ok(PaymentMethod::Receipt),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contribution lifecycle.
///
/// `Pending` → `Uploaded` (receipt attached) → `Validated` / `Rejected`,
/// and `Validated` → `Completed` once the tour pays out. Card payments go
/// straight from `Pending` to `Validated` on the gateway webhook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Uploaded,
    Validated,
    Rejected,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Uploaded => "uploaded",
            PaymentStatus::Validated => "validated",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Completed => "completed",
        }
    }

    /// Whether this payment still counts towards the current tour
    /// (i.e. blocks the member from opening another one).
    pub fn is_live(&self) -> bool {
        !matches!(self, PaymentStatus::Rejected)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "uploaded" => Ok(PaymentStatus::Uploaded),
            "validated" => Ok(PaymentStatus::Validated),
            "rejected" => Ok(PaymentStatus::Rejected),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member's contribution record for one tour of a sol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub sol_id: Uuid,
    pub user_id: Uuid,
    pub tour: i32,
    pub amount: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub receipt_path: Option<String>,
    pub rejection_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payout notification/disbursement state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Notified,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Notified => "notified",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "notified" => Ok(TransferStatus::Notified),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout record created when a tour closes. One per (sol, tour).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub id: Uuid,
    pub sol_id: Uuid,
    pub tour: i32,
    pub beneficiary_id: Uuid,
    pub amount: i64,
    pub status: TransferStatus,
    pub notify_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of an administrative action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: Uuid,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSolRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
    #[validate(length(min = 3, max = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    pub frequency: SolFrequency,
    #[validate(range(min = 2, max = 100))]
    pub max_participants: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub sol_id: Uuid,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RejectPaymentRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Issued on successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
    pub user: UserProfile,
}

/// Returned when a payment is opened. `checkout_url` is set for card
/// payments only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

/// A checkout session created at the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Event delivered by the payment gateway webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
}

impl WebhookEvent {
    pub const CHECKOUT_COMPLETED: &'static str = "checkout.session.completed";
}

/// Outcome of running the tour engine after a validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TourOutcome {
    /// Contributions are still missing for the current tour.
    NotComplete { missing: i64 },
    /// This call advanced the rotation and created the payout transfer.
    Advanced {
        transfer: Transfer,
        sol_completed: bool,
    },
    /// A concurrent validation advanced the tour first.
    AlreadyAdvanced,
}

/// Cursor-paginated response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }
}

/// Query parameters for cursor pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub gateway: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn new(database: HealthStatus, gateway: HealthStatus) -> Self {
        let status = match (&database, &gateway) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            // The gateway being down degrades service but requests still work.
            (HealthStatus::Healthy, _) => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        Self {
            status,
            database,
            gateway,
            timestamp: Utc::now(),
        }
    }
}

/// JSON error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

/// Error envelope for rate-limited requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    pub retry_after: u64,
}
