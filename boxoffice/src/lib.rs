//! `BoxOffice` - reservation and payment engine for ticketed events
//!
//! Every state-changing operation runs as a single unit of work against a
//! [`Store`](boxoffice_types::Store): it locks the rows it touches, applies
//! all of its changes, and commits them together or not at all. Concurrent
//! units that touch the same rows serialize on those locks.
//!
//! # Layout
//!
//! - [`ledger`] owns a tier's stock counters.
//! - [`booking`] and [`payment`] hold the two lifecycles.
//! - [`ReservationCoordinator`], [`PaymentCoordinator`] and [`TierCatalog`]
//!   compose them into units of work run by [`executor::execute`].
//! - [`BoxOffice`] validates raw input and wraps results in an [`Outcome`].
//!
//! # Example
//!
//! ```rust,ignore
//! let store = InMemoryStore::new();
//! let office = BoxOffice::builder(store.clone(), Arc::new(store)).build();
//!
//! let outcome = office.create_booking(Caller::customer(user), tier_id, 2).await;
//! assert!(outcome.is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod caller;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod executor;
pub mod facade;
pub mod gateway;
pub mod ledger;
pub mod outcome;
pub mod payment;
pub mod queries;
pub mod reservation;
pub mod settlement;
pub mod signals;

pub use caller::{Caller, Role};
pub use catalog::{TierCatalog, TierChanges};
pub use config::{ConfigError, EngineConfig, GatewayConfig, LatencyWindow, Probability, RetrySettings};
pub use errors::{BookingError, Entity, ErrorKind, FieldError, StatusHint};
pub use executor::{MetricsHook, RetryContext, RetryPolicy};
pub use facade::{BoxOffice, BoxOfficeBuilder, DEFAULT_REFUND_REASON};
pub use gateway::{
    GatewayOutcome, PaymentGateway, SimulatedGateway, DECLINE_REASONS, REFUND_FAILURE_REASON,
};
pub use outcome::{Failure, Outcome};
pub use queries::{BookingQueries, BookingView, PaymentView};
pub use reservation::{Cancellation, ReservationCoordinator, CANCELLATION_REASON};
pub use settlement::{PaymentCoordinator, PaymentReceipt, RefundReceipt};
pub use signals::{BookingConfirmation, LogNotifier, Notifier, NotifyError, Signal, SignalBus};

pub use boxoffice_types as types;
