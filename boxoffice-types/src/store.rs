//! Storage contract for booking engines.
//!
//! A [`Store`] hands out [`Transaction`]s. A transaction takes exclusive row
//! locks with the `lock_*` methods, reads and stages writes, and then either
//! commits every staged write at once or none of them. Locks are held until
//! the transaction commits, rolls back or is dropped.
//!
//! Lock order across the engine is booking, then payment, then tier. Storage
//! backends may rely on callers following it.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;

use crate::ids::{BookingId, EventId, PaymentId, TierId, UserId};
use crate::records::{Booking, BookingStatus, EventListing, Payment, TicketTier};
use crate::references::{BookingReference, TransactionReference};

/// Constraint name reported when a booking reference is reused.
pub const BOOKING_REFERENCE_CONSTRAINT: &str = "bookings_reference_key";
/// Constraint name reported when a transaction reference is reused.
pub const TRANSACTION_REFERENCE_CONSTRAINT: &str = "payments_transaction_reference_key";
/// Constraint name reported when a second active booking is written for a customer and tier.
pub const ACTIVE_BOOKING_CONSTRAINT: &str = "bookings_one_active_per_customer_tier";

/// Identifies the storage operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Starting a transaction.
    Begin,
    /// Committing a transaction.
    Commit,
    /// Rolling a transaction back.
    Rollback,
    /// Locking a ticket tier row.
    LockTier,
    /// Locking a booking row.
    LockBooking,
    /// Locking a payment row.
    LockPayment,
    /// Non-transactional or lookup reads.
    Read,
    /// Checking reference uniqueness.
    CheckReference,
    /// Inserting or updating a tier.
    WriteTier,
    /// Inserting or updating a booking.
    WriteBooking,
    /// Inserting or updating a payment.
    WritePayment,
    /// Conditional inventory adjustment.
    AdjustInventory,
    /// Looking up an event.
    ReadEvent,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Begin => write!(f, "begin"),
            Operation::Commit => write!(f, "commit"),
            Operation::Rollback => write!(f, "rollback"),
            Operation::LockTier => write!(f, "lock_tier"),
            Operation::LockBooking => write!(f, "lock_booking"),
            Operation::LockPayment => write!(f, "lock_payment"),
            Operation::Read => write!(f, "read"),
            Operation::CheckReference => write!(f, "check_reference"),
            Operation::WriteTier => write!(f, "write_tier"),
            Operation::WriteBooking => write!(f, "write_booking"),
            Operation::WritePayment => write!(f, "write_payment"),
            Operation::AdjustInventory => write!(f, "adjust_inventory"),
            Operation::ReadEvent => write!(f, "read_event"),
        }
    }
}

/// A lockable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowRef {
    /// A ticket tier row.
    Tier(TierId),
    /// A booking row.
    Booking(BookingId),
    /// A payment row.
    Payment(PaymentId),
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRef::Tier(id) => write!(f, "tier {id}"),
            RowRef::Booking(id) => write!(f, "booking {id}"),
            RowRef::Payment(id) => write!(f, "payment {id}"),
        }
    }
}

/// Error type returned by storage operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured timeout.
    #[error("{operation} timed out waiting for a row lock")]
    LockTimeout { operation: Operation },

    /// The transaction was aborted by the backend (deadlock or serialization failure).
    #[error("{operation} aborted by a concurrent transaction")]
    Conflict { operation: Operation },

    /// A uniqueness constraint rejected the write.
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: String },

    /// A mutation was attempted on a row this transaction has not locked.
    #[error("{row} must be locked before it is modified")]
    RowNotLocked { row: RowRef },

    /// Infrastructure failure (connection drop, pool exhausted).
    #[error("{operation} operation failed")]
    Unavailable { operation: Operation },

    /// Stored data could not be decoded into a record.
    #[error("stored data is corrupt: {detail}")]
    Corrupt { detail: String },
}

impl StoreError {
    /// Whether re-running the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. }
                | StoreError::Conflict { .. }
                | StoreError::UniqueViolation { .. }
                | StoreError::Unavailable { .. }
        )
    }
}

/// Transactional storage for tiers, bookings and payments.
///
/// Reads on the store itself are not isolated and are meant for read-only
/// queries. Everything that mutates state goes through [`Store::begin`].
pub trait Store: Send + Sync {
    /// Transaction handle produced by [`Store::begin`].
    type Tx: Transaction;

    /// Starts a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Reads a tier without locking it.
    fn tier(
        &self,
        id: TierId,
    ) -> impl Future<Output = Result<Option<TicketTier>, StoreError>> + Send;

    /// Reads a booking without locking it.
    fn booking(
        &self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send;

    /// Reads a payment without locking it.
    fn payment(
        &self,
        id: PaymentId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;

    /// Every payment attempt for a booking, newest first.
    fn payments_for_booking(
        &self,
        booking: BookingId,
    ) -> impl Future<Output = Result<Vec<Payment>, StoreError>> + Send;

    /// A customer's bookings, newest first, excluding soft-deleted ones.
    fn bookings_for_customer(
        &self,
        customer: UserId,
    ) -> impl Future<Output = Result<Vec<Booking>, StoreError>> + Send;
}

/// An isolated, all-or-nothing unit of storage work.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// every staged write and releases its locks.
pub trait Transaction: Send {
    /// Locks a tier row exclusively and reads it.
    fn lock_tier(
        &mut self,
        id: TierId,
    ) -> impl Future<Output = Result<Option<TicketTier>, StoreError>> + Send;

    /// Locks a booking row exclusively and reads it.
    fn lock_booking(
        &mut self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send;

    /// Locks a payment row exclusively and reads it.
    fn lock_payment(
        &mut self,
        id: PaymentId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;

    /// The customer's pending or confirmed booking for a tier, if any.
    ///
    /// Callers must hold the tier lock so the answer stays true until commit.
    fn find_active_booking(
        &mut self,
        customer: UserId,
        tier: TierId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send;

    /// Whether any non-deleted booking for the tier currently has `status`.
    fn tier_has_bookings_in(
        &mut self,
        tier: TierId,
        status: BookingStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Most recent `success` payment for a booking.
    fn latest_successful_payment(
        &mut self,
        booking: BookingId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;

    /// Whether some booking already uses `reference`.
    fn booking_reference_taken(
        &mut self,
        reference: &BookingReference,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Whether some payment already uses `reference`.
    fn transaction_reference_taken(
        &mut self,
        reference: &TransactionReference,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Stages a new tier.
    fn insert_tier(
        &mut self,
        tier: &TicketTier,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages descriptive changes to a locked tier: name, price and retirement.
    ///
    /// Quantities are ignored; use the inventory operations instead.
    fn update_tier(
        &mut self,
        tier: &TicketTier,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages a new booking.
    fn insert_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages changes to a locked booking.
    fn update_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages a new payment.
    fn insert_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages changes to a locked payment.
    fn update_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Decrements a locked tier's available stock by `quantity` if enough remains.
    ///
    /// Returns `false` and changes nothing when stock is short.
    fn decrement_available(
        &mut self,
        tier: TierId,
        quantity: u32,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Increments a locked tier's available stock by `quantity`.
    fn increment_available(
        &mut self,
        tier: TierId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sets a locked tier's total stock, shifting available stock by the same delta.
    ///
    /// Returns `false` and changes nothing when `total` is below the booked quantity.
    fn resize_tier(
        &mut self,
        tier: TierId,
        total: u32,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Applies every staged write atomically and releases locks.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discards every staged write and releases locks.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Read-only access to event schedules and ownership.
#[async_trait]
pub trait EventCalendar: Send + Sync {
    /// Looks up an event.
    async fn event(&self, id: EventId) -> Result<Option<EventListing>, StoreError>;
}
