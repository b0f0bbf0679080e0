#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared vocabulary types and traits for the BoxOffice booking engine.
//!
//! This crate provides the foundational types that are shared between the
//! `boxoffice` engine crate and storage adapters like `boxoffice-postgres`.
//! Keeping them here lets adapters implement the storage contract without
//! depending on the engine itself.
//!
//! # Overview
//!
//! This crate contains:
//! - Identifiers: `EventId`, `TierId`, `BookingId`, `PaymentId`, `UserId`
//! - Validated primitives: `Money`, `Quantity`, `PaymentMethod`, `TierName`, `Reason`
//! - References: `BookingReference` (`BKG-…`) and `TransactionReference` (`TXN-…`)
//! - Records: `EventListing`, `TicketTier`, `Booking`, `Payment` and their status enums
//! - Storage contract: `Store`, `Transaction`, `EventCalendar`, `StoreError`, `RowRef`

mod ids;
mod money;
mod records;
mod references;
mod store;
mod validation;

pub use ids::{BookingId, EventId, PaymentId, TierId, UserId};
pub use money::{Money, MoneyError, MAX_MONEY_AMOUNT};
pub use records::{
    Booking, BookingStatus, EventListing, PaymentDetails, Payment, PaymentMethod,
    PaymentMethodError, PaymentStatus, Quantity, QuantityError, Reason, ReasonError, TicketTier,
    TierName, TierNameError, UnknownStatus,
};
pub use references::{
    BookingReference, BookingReferenceError, TransactionReference, TransactionReferenceError,
};
pub use store::{
    EventCalendar, Operation, RowRef, Store, StoreError, Transaction, ACTIVE_BOOKING_CONSTRAINT,
    BOOKING_REFERENCE_CONSTRAINT, TRANSACTION_REFERENCE_CONSTRAINT,
};
