//! PostgreSQL adapter for the `BoxOffice` booking engine
//!
//! Row locks are `SELECT ... FOR UPDATE`, bounded by a per-transaction
//! `lock_timeout`. Inventory changes are single conditional `UPDATE`s so the
//! stock bounds hold even if a caller skipped the engine's own checks.
//! Uniqueness of references and of active bookings is enforced by named
//! constraints whose names match the ones `boxoffice-types` exports.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod transaction;

use std::time::Duration;

use async_trait::async_trait;
use boxoffice_types::{
    Booking, BookingId, EventCalendar, EventId, EventListing, Operation, Payment, PaymentId,
    Store, StoreError, TicketTier, TierId, UserId,
};
use nutype::nutype;
use sqlx::{postgres::PgPoolOptions, query, Pool, Postgres};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::rows::{BOOKING_COLUMNS, EVENT_COLUMNS, PAYMENT_COLUMNS, TIER_COLUMNS};
pub use crate::transaction::PostgresTransaction;

/// Errors raised while setting up the store.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// Schema migrations failed.
    #[error("failed to apply booking schema migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// Seeding an event row failed.
    #[error("failed to write event {id}")]
    EventWriteFailed {
        /// Event that could not be written.
        id: EventId,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
}

/// Maximum number of database connections in the pool.
///
/// At least one, enforced by the `NonZeroU32` underneath.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the connection pool and row locking.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
    /// How long a transaction waits for a row lock before giving up (default: 5 seconds)
    pub lock_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl PostgresConfig {
    fn pool_options(&self) -> PgPoolOptions {
        let max_connections: std::num::NonZeroU32 = self.max_connections.into();
        PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// Booking storage backed by a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Connects with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connects with custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let pool = config
            .pool_options()
            .connect(&connection_string)
            .await
            .map_err(PostgresStoreError::ConnectionFailed)?;
        Ok(Self {
            pool,
            lock_timeout: config.lock_timeout,
        })
    }

    /// Builds a pool that opens connections on first use.
    pub fn connect_lazy<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let pool = config
            .pool_options()
            .connect_lazy(&connection_string)
            .map_err(PostgresStoreError::ConnectionFailed)?;
        Ok(Self {
            pool,
            lock_timeout: config.lock_timeout,
        })
    }

    /// Wraps an existing pool, sharing it with other components.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            lock_timeout: PostgresConfig::default().lock_timeout,
        }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), PostgresStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresStoreError::MigrationFailed)?;
        info!("[postgres.migrate] booking schema is up to date");
        Ok(())
    }

    /// Inserts or replaces the engine's copy of an event.
    #[instrument(name = "postgres.upsert_event", skip(self, event), fields(event_id = %event.id))]
    pub async fn upsert_event(&self, event: &EventListing) -> Result<(), PostgresStoreError> {
        query(
            "INSERT INTO events (id, title, starts_at, organizer_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title, \
             starts_at = EXCLUDED.starts_at, organizer_id = EXCLUDED.organizer_id",
        )
        .bind(Uuid::from(event.id))
        .bind(&event.title)
        .bind(event.starts_at)
        .bind(Uuid::from(event.organizer_id))
        .execute(&self.pool)
        .await
        .map_err(|source| PostgresStoreError::EventWriteFailed {
            id: event.id,
            source,
        })?;
        Ok(())
    }
}

impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    #[instrument(name = "postgres.begin", skip(self))]
    async fn begin(&self) -> Result<PostgresTransaction, StoreError> {
        PostgresTransaction::begin(&self.pool, self.lock_timeout).await
    }

    async fn tier(&self, id: TierId) -> Result<Option<TicketTier>, StoreError> {
        let sql = format!("SELECT {TIER_COLUMNS} FROM ticket_tiers WHERE id = $1");
        query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .as_ref()
            .map(rows::tier)
            .transpose()
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .as_ref()
            .map(rows::booking)
            .transpose()
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .as_ref()
            .map(rows::payment)
            .transpose()
    }

    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        query(&sql)
            .bind(Uuid::from(booking))
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .iter()
            .map(rows::payment)
            .collect()
    }

    async fn bookings_for_customer(&self, customer: UserId) -> Result<Vec<Booking>, StoreError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE customer_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        );
        query(&sql)
            .bind(Uuid::from(customer))
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .iter()
            .map(rows::booking)
            .collect()
    }
}

#[async_trait]
impl EventCalendar for PostgresStore {
    async fn event(&self, id: EventId) -> Result<Option<EventListing>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ReadEvent))?
            .as_ref()
            .map(rows::event)
            .transpose()
    }
}

// SQLSTATE codes the engine reacts to.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) => match db_error.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                warn!(
                    operation = %operation,
                    "[postgres.lock_timeout] gave up waiting for a row lock"
                );
                return StoreError::LockTimeout { operation };
            }
            Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE) => {
                warn!(
                    error = %db_error,
                    operation = %operation,
                    "[postgres.conflict] transaction aborted by a concurrent writer"
                );
                return StoreError::Conflict { operation };
            }
            Some(UNIQUE_VIOLATION) => {
                let constraint = db_error.constraint().unwrap_or("unknown").to_string();
                warn!(
                    constraint = %constraint,
                    operation = %operation,
                    "[postgres.unique_violation] write rejected by unique constraint"
                );
                return StoreError::UniqueViolation { constraint };
            }
            _ => {}
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            error!(
                error = %error,
                operation = %operation,
                "[postgres.corrupt_row] stored row could not be decoded"
            );
            return StoreError::Corrupt {
                detail: error.to_string(),
            };
        }
        _ => {}
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::Unavailable { operation }
}
