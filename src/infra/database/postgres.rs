//! PostgreSQL database client implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, AuditLog, Database, DatabaseError, NewAuditLog, NewPayment, NewSol, NewUser,
    PaginatedResponse, ParticipantInfo, Participation, Payment, PaymentStatus, Sol, Transfer,
    User, ValidationError,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

const USER_COLUMNS: &str =
    "id, email, password_hash, full_name, phone, role, created_at, updated_at";
const SOL_COLUMNS: &str = "id, name, description, amount, currency, frequency, max_participants, \
     current_tour, status, created_by, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, sol_id, user_id, tour, amount, method, status, \
     checkout_session_id, receipt_path, rejection_reason, validated_by, created_at, updated_at";
const TRANSFER_COLUMNS: &str = "id, sol_id, tour, beneficiary_id, amount, status, \
     notify_attempts, next_attempt_at, last_error, created_at, updated_at";

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, AppError> {
        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            full_name: row.get("full_name"),
            phone: row.get("phone"),
            role: parse_status(row, "role")?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_sol(row: &sqlx::postgres::PgRow) -> Result<Sol, AppError> {
        Ok(Sol {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            frequency: parse_status(row, "frequency")?,
            max_participants: row.get("max_participants"),
            current_tour: row.get("current_tour"),
            status: parse_status(row, "status")?,
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_participation(row: &sqlx::postgres::PgRow) -> Participation {
        Participation {
            id: row.get("id"),
            sol_id: row.get("sol_id"),
            user_id: row.get("user_id"),
            rotation_order: row.get("rotation_order"),
            joined_at: row.get("joined_at"),
        }
    }

    fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, AppError> {
        Ok(Payment {
            id: row.get("id"),
            sol_id: row.get("sol_id"),
            user_id: row.get("user_id"),
            tour: row.get("tour"),
            amount: row.get("amount"),
            method: parse_status(row, "method")?,
            status: parse_status(row, "status")?,
            checkout_session_id: row.get("checkout_session_id"),
            receipt_path: row.get("receipt_path"),
            rejection_reason: row.get("rejection_reason"),
            validated_by: row.get("validated_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<Transfer, AppError> {
        Ok(Transfer {
            id: row.get("id"),
            sol_id: row.get("sol_id"),
            tour: row.get("tour"),
            beneficiary_id: row.get("beneficiary_id"),
            amount: row.get("amount"),
            status: parse_status(row, "status")?,
            notify_attempts: row.get("notify_attempts"),
            next_attempt_at: row.get("next_attempt_at"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_audit(row: &sqlx::postgres::PgRow) -> Result<AuditLog, AppError> {
        let detail: Option<String> = row.get("detail");
        let detail = detail
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| AppError::Serialization(e.to_string()))?;

        Ok(AuditLog {
            id: row.get("id"),
            actor_id: row.get("actor_id"),
            action: row.get("action"),
            entity: row.get("entity"),
            entity_id: row.get("entity_id"),
            detail,
            created_at: row.get("created_at"),
        })
    }
}

/// Parse a TEXT status column strictly: unknown values are a data bug, not
/// something to paper over with a default.
fn parse_status<T: std::str::FromStr<Err = String>>(
    row: &sqlx::postgres::PgRow,
    column: &str,
) -> Result<T, AppError> {
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|e: String| AppError::Database(DatabaseError::Query(format!(
            "corrupt value in column '{column}': {e}"
        ))))
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::Query(e.to_string()))
}

#[async_trait]
impl Database for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    // --- users -------------------------------------------------------------

    #[instrument(skip(self, data), fields(email = %data.email))]
    async fn create_user(&self, data: &NewUser) -> Result<User, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (id, email, password_hash, full_name, phone, role) \
             VALUES ($1, $2, $3, $4, $5, 'member') \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&data.email)
        .bind(&data.password_hash)
        .bind(&data.full_name)
        .bind(&data.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::row_to_user(&row)
    }

    #[instrument(skip(self))]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    // --- sols --------------------------------------------------------------

    #[instrument(skip(self, data), fields(name = %data.name))]
    async fn create_sol(&self, data: &NewSol) -> Result<Sol, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO sols (id, name, description, amount, currency, frequency, \
                               max_participants, current_tour, status, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 'open', $8) \
             RETURNING {SOL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.amount)
        .bind(&data.currency)
        .bind(data.frequency.as_str())
        .bind(data.max_participants)
        .bind(data.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::row_to_sol(&row)
    }

    #[instrument(skip(self))]
    async fn get_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError> {
        let row = sqlx::query(&format!("SELECT {SOL_COLUMNS} FROM sols WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.as_ref().map(Self::row_to_sol).transpose()
    }

    #[instrument(skip(self))]
    async fn list_sols(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Sol>, AppError> {
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more rows
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_str) => {
                let cursor_id: Uuid = cursor_str.parse().map_err(|_| {
                    AppError::Validation(ValidationError::InvalidField {
                        field: "cursor".to_string(),
                        message: "Invalid cursor".to_string(),
                    })
                })?;

                let cursor_row = sqlx::query("SELECT created_at FROM sols WHERE id = $1")
                    .bind(cursor_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(query_error)?;

                let cursor_created_at: DateTime<Utc> = match cursor_row {
                    Some(row) => row.get("created_at"),
                    None => {
                        return Err(AppError::Validation(ValidationError::InvalidField {
                            field: "cursor".to_string(),
                            message: "Invalid cursor".to_string(),
                        }));
                    }
                };

                sqlx::query(&format!(
                    "SELECT {SOL_COLUMNS} FROM sols \
                     WHERE (created_at, id) < ($1, $2) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $3"
                ))
                .bind(cursor_created_at)
                .bind(cursor_id)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?
            }
            None => sqlx::query(&format!(
                "SELECT {SOL_COLUMNS} FROM sols \
                 ORDER BY created_at DESC, id DESC \
                 LIMIT $1"
            ))
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?,
        };

        let has_more = rows.len() > limit as usize;
        let items: Vec<Sol> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_sol)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            items.last().map(|sol| sol.id.to_string())
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn activate_sol(&self, id: Uuid) -> Result<Option<Sol>, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE sols \
             SET status = 'active', current_tour = 1, updated_at = NOW() \
             WHERE id = $1 AND status = 'open' \
             RETURNING {SOL_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_sol).transpose()
    }

    #[instrument(skip(self))]
    async fn advance_tour(&self, id: Uuid, from_tour: i32) -> Result<bool, AppError> {
        // The conditional UPDATE is the concurrency guard: of two racing
        // callers only one matches `current_tour = from_tour`.
        let result = sqlx::query(
            "UPDATE sols \
             SET current_tour = current_tour + 1, \
                 status = CASE \
                     WHEN current_tour + 1 > (SELECT COUNT(*) FROM participations p \
                                              WHERE p.sol_id = sols.id) \
                     THEN 'completed' ELSE status END, \
                 updated_at = NOW() \
             WHERE id = $1 AND current_tour = $2 AND status = 'active'",
        )
        .bind(id)
        .bind(from_tour)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() == 1)
    }

    // --- participations ----------------------------------------------------

    #[instrument(skip(self))]
    async fn create_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        rotation_order: i32,
    ) -> Result<Participation, AppError> {
        let row = sqlx::query(
            "INSERT INTO participations (id, sol_id, user_id, rotation_order) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, sol_id, user_id, rotation_order, joined_at",
        )
        .bind(Uuid::new_v4())
        .bind(sol_id)
        .bind(user_id)
        .bind(rotation_order)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(Self::row_to_participation(&row))
    }

    #[instrument(skip(self))]
    async fn get_participation(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participation>, AppError> {
        let row = sqlx::query(
            "SELECT id, sol_id, user_id, rotation_order, joined_at \
             FROM participations WHERE sol_id = $1 AND user_id = $2",
        )
        .bind(sol_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.as_ref().map(Self::row_to_participation))
    }

    #[instrument(skip(self))]
    async fn list_participants(&self, sol_id: Uuid) -> Result<Vec<ParticipantInfo>, AppError> {
        let rows = sqlx::query(
            "SELECT p.user_id, u.email, u.full_name, p.rotation_order, p.joined_at \
             FROM participations p \
             JOIN users u ON u.id = p.user_id \
             WHERE p.sol_id = $1 \
             ORDER BY p.rotation_order ASC",
        )
        .bind(sol_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows
            .iter()
            .map(|row| ParticipantInfo {
                user_id: row.get("user_id"),
                email: row.get("email"),
                full_name: row.get("full_name"),
                rotation_order: row.get("rotation_order"),
                joined_at: row.get("joined_at"),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn count_participants(&self, sol_id: Uuid) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM participations WHERE sol_id = $1")
            .bind(sol_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(row.get("n"))
    }

    // --- payments ----------------------------------------------------------

    #[instrument(skip(self, data), fields(sol_id = %data.sol_id))]
    async fn create_payment(&self, data: &NewPayment) -> Result<Payment, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO payments (id, sol_id, user_id, tour, amount, method, status, \
                                   checkout_session_id) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(data.sol_id)
        .bind(data.user_id)
        .bind(data.tour)
        .bind(data.amount)
        .bind(data.method.as_str())
        .bind(&data.checkout_session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::row_to_payment(&row)
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self))]
    async fn get_payment_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE checkout_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self))]
    async fn list_payments(
        &self,
        sol_id: Uuid,
        tour: Option<i32>,
    ) -> Result<Vec<Payment>, AppError> {
        let rows = match tour {
            Some(tour) => sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments \
                 WHERE sol_id = $1 AND tour = $2 \
                 ORDER BY created_at ASC"
            ))
            .bind(sol_id)
            .bind(tour)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?,
            None => sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments \
                 WHERE sol_id = $1 \
                 ORDER BY tour ASC, created_at ASC"
            ))
            .bind(sol_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?,
        };

        rows.iter().map(Self::row_to_payment).collect()
    }

    #[instrument(skip(self))]
    async fn find_live_payment(
        &self,
        sol_id: Uuid,
        user_id: Uuid,
        tour: i32,
    ) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE sol_id = $1 AND user_id = $2 AND tour = $3 AND status <> 'rejected' \
             ORDER BY created_at DESC \
             LIMIT 1"
        ))
        .bind(sol_id)
        .bind(user_id)
        .bind(tour)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[instrument(skip(self))]
    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        validated_by: Option<Uuid>,
        rejection_reason: Option<&str>,
    ) -> Result<Payment, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE payments \
             SET status = $1, \
                 validated_by = COALESCE($2, validated_by), \
                 rejection_reason = $3, \
                 updated_at = NOW() \
             WHERE id = $4 \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(validated_by)
        .bind(rejection_reason)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        Self::row_to_payment(&row)
    }

    #[instrument(skip(self))]
    async fn set_payment_receipt(&self, id: Uuid, path: &str) -> Result<Payment, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET receipt_path = $1, updated_at = NOW() \
             WHERE id = $2 \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(path)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        Self::row_to_payment(&row)
    }

    #[instrument(skip(self))]
    async fn update_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<Payment, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET checkout_session_id = $1, updated_at = NOW() \
             WHERE id = $2 \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(session_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        Self::row_to_payment(&row)
    }

    #[instrument(skip(self))]
    async fn count_validated_payments(&self, sol_id: Uuid, tour: i32) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM payments \
             WHERE sol_id = $1 AND tour = $2 AND status = 'validated'",
        )
        .bind(sol_id)
        .bind(tour)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.get("n"))
    }

    #[instrument(skip(self))]
    async fn complete_tour_payments(&self, sol_id: Uuid, tour: i32) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'completed', updated_at = NOW() \
             WHERE sol_id = $1 AND tour = $2 AND status = 'validated'",
        )
        .bind(sol_id)
        .bind(tour)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    // --- transfers -----------------------------------------------------------

    #[instrument(skip(self))]
    async fn create_transfer(
        &self,
        sol_id: Uuid,
        tour: i32,
        beneficiary_id: Uuid,
        amount: i64,
    ) -> Result<Transfer, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO transfers (id, sol_id, tour, beneficiary_id, amount, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending') \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(sol_id)
        .bind(tour)
        .bind(beneficiary_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::row_to_transfer(&row)
    }

    #[instrument(skip(self))]
    async fn get_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    #[instrument(skip(self))]
    async fn list_transfers(&self, sol_id: Uuid) -> Result<Vec<Transfer>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE sol_id = $1 ORDER BY tour ASC"
        ))
        .bind(sol_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    #[instrument(skip(self))]
    async fn complete_transfer(&self, id: Uuid) -> Result<Option<Transfer>, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE transfers SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    #[instrument(skip(self))]
    async fn get_pending_notifications(&self, limit: i64) -> Result<Vec<Transfer>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE status = 'pending' \
               AND (next_attempt_at IS NULL OR next_attempt_at <= NOW()) \
             ORDER BY next_attempt_at ASC NULLS FIRST, created_at ASC \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    #[instrument(skip(self))]
    async fn mark_transfer_notified(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE transfers SET status = 'notified', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn record_notify_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE transfers \
             SET notify_attempts = notify_attempts + 1, \
                 last_error = $1, \
                 next_attempt_at = $2, \
                 status = CASE WHEN notify_attempts + 1 >= $3 THEN 'failed' ELSE status END, \
                 updated_at = NOW() \
             WHERE id = $4",
        )
        .bind(error)
        .bind(next_attempt_at)
        .bind(max_attempts)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    // --- audit ---------------------------------------------------------------

    #[instrument(skip(self, entry), fields(action = %entry.action))]
    async fn record_audit(&self, entry: &NewAuditLog) -> Result<AuditLog, AppError> {
        let detail = entry
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Serialization(e.to_string()))?;

        let row = sqlx::query(
            "INSERT INTO audit_logs (id, actor_id, action, entity, entity_id, detail) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, actor_id, action, entity, entity_id, detail, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(detail)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Self::row_to_audit(&row)
    }

    #[instrument(skip(self))]
    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditLog>, AppError> {
        let rows = sqlx::query(
            "SELECT id, actor_id, action, entity, entity_id, detail, created_at \
             FROM audit_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_audit).collect()
    }
}
