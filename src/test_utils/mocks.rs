//! In-memory mock implementations of the domain traits.
//!
//! The mocks keep the same observable semantics as the Postgres client,
//! including the compare-and-swap tour advance: all state changes happen
//! under one lock, so concurrent callers see exactly one winner.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app::AuthUser;
use crate::domain::{
    AppError, AuditLog, CheckoutSession, Database, DatabaseError, ExternalServiceError,
    GatewayError, Mailer, NewAuditLog, NewPayment, NewSol, NewUser, PaginatedResponse,
    ParticipantInfo, Participation, Payment, PaymentGateway, PaymentStatus, ReceiptStore, Role,
    Sol, SolStatus, Transfer, TransferStatus, User,
};

#[derive(Default)]
struct MockState {
    users: HashMap<Uuid, User>,
    sols: HashMap<Uuid, Sol>,
    participations: Vec<Participation>,
    payments: HashMap<Uuid, Payment>,
    transfers: HashMap<Uuid, Transfer>,
    audit: Vec<AuditLog>,
}

/// In-memory [`Database`] with Postgres-equivalent semantics.
#[derive(Default)]
pub struct MockDatabase {
    state: Mutex<MockState>,
    healthy: AtomicBool,
}

impl MockDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Test helper: flip a user to the admin role and return their identity.
    pub async fn promote_to_admin(&self, user_id: Uuid) -> AuthUser {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .expect("promote_to_admin: unknown user");
        user.role = Role::Admin;
        AuthUser {
            id: user_id,
            role: Role::Admin,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Database(DatabaseError::Connection(
                "mock database down".to_string(),
            )))
        }
    }

    // --- users -------------------------------------------------------------

    async fn create_user(&self, data: &NewUser) -> Result<User, AppError> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.email == data.email) {
            return Err(AppError::Database(DatabaseError::Duplicate(
                data.email.clone(),
            )));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: data.email.clone(),
            password_hash: data.password_hash.clone(),
            full_name: data.full_name.clone(),
            phone: data.phone.clone(),
            role: Role::Member,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    // --- sols --------------------------------------------------------------

    async fn create_sol(&self, data: &NewSol) -> Result<Sol, AppError> {
        let now = Utc::now();
        let sol = Sol {
            id: Uuid::new_v4(),
            name: data.name.clone(),
            description: data.description.clone(),
            amount: data.amount,
            currency: data.currency.clone(),
            frequency: data.frequency,
            max_participants: data.max_participants,
            current_tour: 0,
            status: SolStatus::Open,
            created_by: data.created_by,
            created_at: now,
            updated_at: now,
        };
        self.lock().sols.insert(sol.id, sol.clone());
        Ok(sol)
    }

    async fn get_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError> {
        Ok(self.lock().sols.get(&id).cloned())
    }

    async fn list_sols(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Sol>, AppError> {
        let limit = limit.clamp(1, 100) as usize;
        let state = self.lock();

        let mut sols: Vec<Sol> = state.sols.values().cloned().collect();
        sols.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let start = match cursor {
            Some(cursor_str) => {
                let cursor_id: Uuid = cursor_str.parse().map_err(|_| {
                    AppError::Validation(crate::domain::ValidationError::InvalidField {
                        field: "cursor".to_string(),
                        message: "Invalid cursor".to_string(),
                    })
                })?;
                match sols.iter().position(|s| s.id == cursor_id) {
                    Some(pos) => pos + 1,
                    None => {
                        return Err(AppError::Validation(
                            crate::domain::ValidationError::InvalidField {
                                field: "cursor".to_string(),
                                message: "Invalid cursor".to_string(),
                            },
                        ));
                    }
                }
            }
            None => 0,
        };

        let remaining = &sols[start.min(sols.len())..];
        let has_more = remaining.len() > limit;
        let items: Vec<Sol> = remaining.iter().take(limit).cloned().collect();
        let next_cursor = if has_more {
            items.last().map(|s| s.id.to_string())
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    async fn activate_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError> {
        let mut state = self.lock();
        let Some(sol) = state.sols.get_mut(&id) else {
            return Ok(None);
        };
        if sol.status != SolStatus::Open {
            return Ok(None);
        }
        sol.status = SolStatus::Active;
        sol.current_tour = 1;
        sol.updated_at = Utc::now();
        Ok(Some(sol.clone()))
    }

    async fn advance_tour(&self, id: Uuid, from_tour: i32) -> Result<bool, AppError> {
        // Single lock over check and mutation: one winner, like the
        // conditional UPDATE in Postgres.
        let mut state = self.lock();
        let participant_count = state
            .participations
            .iter()
            .filter(|p| p.sol_id == id)
            .count() as i32;

        let Some(sol) = state.sols.get_mut(&id) else {
            return Ok(false);
        };
        if sol.status != SolStatus::Active || sol.current_tour != from_tour {
            return Ok(false);
        }

        sol.current_tour += 1;
        if sol.current_tour > participant_count {
            sol.status = SolStatus::Completed;
        }
        sol.updated_at = Utc::now();
        Ok(true)
    }

    // --- participations ------------------------------------------------------

    async fn create_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        rotation_order: i32,
    ) -> Result<Participation, AppError> {
        let mut state = self.lock();
        let taken = state.participations.iter().any(|p| {
            p.sol_id == sol_id && (p.user_id == user_id || p.rotation_order == rotation_order)
        });
        if taken {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "participation {sol_id}/{user_id}"
            ))));
        }
        let participation = Participation {
            id: Uuid::new_v4(),
            sol_id,
            user_id,
            rotation_order,
            joined_at: Utc::now(),
        };
        state.participations.push(participation.clone());
        Ok(participation)
    }

    async fn get_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participation>, AppError> {
        Ok(self
            .lock()
            .participations
            .iter()
            .find(|p| p.sol_id == sol_id && p.user_id == user_id)
            .cloned())
    }

    async fn list_participants(&self, sol_id: Uuid) -> Result<Vec<ParticipantInfo>, AppError> {
        let state = self.lock();
        let mut participants: Vec<ParticipantInfo> = state
            .participations
            .iter()
            .filter(|p| p.sol_id == sol_id)
            .map(|p| {
                let user = state.users.get(&p.user_id);
                ParticipantInfo {
                    user_id: p.user_id,
                    email: user.map(|u| u.email.clone()).unwrap_or_default(),
                    full_name: user.map(|u| u.full_name.clone()).unwrap_or_default(),
                    rotation_order: p.rotation_order,
                    joined_at: p.joined_at,
                }
            })
            .collect();
        participants.sort_by_key(|p| p.rotation_order);
        Ok(participants)
    }

    async fn count_participants(&self, sol_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .participations
            .iter()
            .filter(|p| p.sol_id == sol_id)
            .count() as i64)
    }

    // --- payments ------------------------------------------------------------

    async fn create_payment(&self, data: &NewPayment) -> Result<Payment, AppError> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            sol_id: data.sol_id,
            user_id: data.user_id,
            tour: data.tour,
            amount: data.amount,
            method: data.method,
            status: PaymentStatus::Pending,
            checkout_session_id: data.checkout_session_id.clone(),
            receipt_path: None,
            rejection_reason: None,
            validated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn get_payment_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn list_payments(
        &self,
        sol_id: Uuid,
        tour: Option<i32>,
    ) -> Result<Vec<Payment>, AppError> {
        let state = self.lock();
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.sol_id == sol_id && tour.is_none_or(|t| p.tour == t))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.tour, p.created_at));
        Ok(payments)
    }

    async fn find_live_payment(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        tour: i32,
    ) -> Result<Option<Payment>, AppError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| {
                p.sol_id == sol_id
                    && p.user_id == user_id
                    && p.tour == tour
                    && p.status.is_live()
            })
            .cloned())
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        validated_by: Option<Uuid>,
        rejection_reason: Option<&str>,
    ) -> Result<Payment, AppError> {
        let mut state = self.lock();
        let current = state
            .payments
            .get(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?
            .clone();
        // Mirrors the partial unique index on live (sol, user, tour) rows:
        // an update may not produce a second live payment for the key.
        if status.is_live()
            && state.payments.values().any(|p| {
                p.id != id
                    && p.sol_id == current.sol_id
                    && p.user_id == current.user_id
                    && p.tour == current.tour
                    && p.status.is_live()
            })
        {
            return Err(AppError::Database(DatabaseError::Duplicate(
                "duplicate key value violates unique constraint \
                 \"idx_payments_live_one_per_tour\""
                    .to_string(),
            )));
        }
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        payment.status = status;
        if validated_by.is_some() {
            payment.validated_by = validated_by;
        }
        payment.rejection_reason = rejection_reason.map(str::to_string);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn set_payment_receipt(&self, id: Uuid, path: &str) -> Result<Payment, AppError> {
        let mut state = self.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        payment.receipt_path = Some(path.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn update_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<Payment, AppError> {
        let mut state = self.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        payment.checkout_session_id = Some(session_id.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn count_validated_payments(&self, sol_id: Uuid, tour: i32) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| {
                p.sol_id == sol_id && p.tour == tour && p.status == PaymentStatus::Validated
            })
            .count() as i64)
    }

    async fn complete_tour_payments(&self, sol_id: Uuid, tour: i32) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut completed = 0u64;
        for payment in state.payments.values_mut() {
            if payment.sol_id == sol_id
                && payment.tour == tour
                && payment.status == PaymentStatus::Validated
            {
                payment.status = PaymentStatus::Completed;
                payment.updated_at = Utc::now();
                completed += 1;
            }
        }
        Ok(completed)
    }

    // --- transfers -----------------------------------------------------------

    async fn create_transfer(
        &self,
        sol_id: Uuid,
        tour: i32,
        beneficiary_id: Uuid,
        amount: i64,
    ) -> Result<Transfer, AppError> {
        let mut state = self.lock();
        if state
            .transfers
            .values()
            .any(|t| t.sol_id == sol_id && t.tour == tour)
        {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "transfer {sol_id}/{tour}"
            ))));
        }
        let now = Utc::now();
        let transfer = Transfer {
            id: Uuid::new_v4(),
            sol_id,
            tour,
            beneficiary_id,
            amount,
            status: TransferStatus::Pending,
            notify_attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError> {
        Ok(self.lock().transfers.get(&id).cloned())
    }

    async fn list_transfers(&self, sol_id: Uuid) -> Result<Vec<Transfer>, AppError> {
        let mut transfers: Vec<Transfer> = self
            .lock()
            .transfers
            .values()
            .filter(|t| t.sol_id == sol_id)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.tour);
        Ok(transfers)
    }

    async fn complete_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError> {
        let mut state = self.lock();
        let Some(transfer) = state.transfers.get_mut(&id) else {
            return Ok(None);
        };
        transfer.status = TransferStatus::Completed;
        transfer.updated_at = Utc::now();
        Ok(Some(transfer.clone()))
    }

    async fn get_pending_notifications(&self, limit: i64) -> Result<Vec<Transfer>, AppError> {
        let now = Utc::now();
        let mut due: Vec<Transfer> = self
            .lock()
            .transfers
            .values()
            .filter(|t| {
                t.status == TransferStatus::Pending
                    && t.next_attempt_at.is_none_or(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.created_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_transfer_notified(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock();
        let transfer = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        transfer.status = TransferStatus::Notified;
        transfer.updated_at = Utc::now();
        Ok(())
    }

    async fn record_notify_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<(), AppError> {
        let mut state = self.lock();
        let transfer = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        transfer.notify_attempts += 1;
        transfer.last_error = Some(error.to_string());
        transfer.next_attempt_at = Some(next_attempt_at);
        if transfer.notify_attempts >= max_attempts {
            transfer.status = TransferStatus::Failed;
        }
        transfer.updated_at = Utc::now();
        Ok(())
    }

    // --- audit ---------------------------------------------------------------

    async fn record_audit(&self, entry: &NewAuditLog) -> Result<AuditLog, AppError> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            actor_id: entry.actor_id,
            action: entry.action.clone(),
            entity: entry.entity.clone(),
            entity_id: entry.entity_id,
            detail: entry.detail.clone(),
            created_at: Utc::now(),
        };
        self.lock().audit.push(log.clone());
        Ok(log)
    }

    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLog>, AppError> {
        let state = self.lock();
        Ok(state
            .audit
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// In-memory [`PaymentGateway`] that records created sessions.
#[derive(Default)]
pub struct MockPaymentGateway {
    sessions: Mutex<Vec<CheckoutSession>>,
    healthy: AtomicBool,
    failing: AtomicBool,
}

impl MockPaymentGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<CheckoutSession> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Gateway(GatewayError::Connection(
                "mock gateway down".to_string(),
            )))
        }
    }

    async fn create_checkout_session(
        &self,
        payment_id: Uuid,
        _amount: i64,
        _currency: &str,
        _description: &str,
    ) -> Result<CheckoutSession, AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Gateway(GatewayError::SessionRejected(
                "mock gateway refusing sessions".to_string(),
            )));
        }
        let session = CheckoutSession {
            session_id: format!("cs_{payment_id}"),
            url: format!("https://checkout.example.com/pay/cs_{payment_id}"),
        };
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

/// One message accepted by [`MockMailer`].
#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// In-memory [`Mailer`] that records sent messages.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl MockMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                "mock mail provider down".to_string(),
            )));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// In-memory [`ReceiptStore`].
#[derive(Default)]
pub struct MockReceiptStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockReceiptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl ReceiptStore for MockReceiptStore {
    async fn save(
        &self,
        payment_id: Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<String, AppError> {
        let extension = filename.rsplit('.').next().unwrap_or("bin").to_lowercase();
        let path = format!("{payment_id}.{extension}");
        self.files
            .lock()
            .unwrap()
            .insert(path.clone(), data.to_vec());
        Ok(path)
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>, AppError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                AppError::ExternalService(ExternalServiceError::Storage(format!(
                    "no receipt at {path}"
                )))
            })
    }
}
