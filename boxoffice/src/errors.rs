//! Engine failures and their caller-facing classification.
//!
//! [`BookingError`] is what coordinators return; [`ErrorKind`] is the stable
//! label a caller sees in an [`Outcome`](crate::Outcome).

use boxoffice_types::{BookingStatus, EventId, StoreError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Entity named in a [`BookingError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// An event listing.
    Event,
    /// A ticket tier; displayed as "Ticket".
    Tier,
    /// A booking.
    Booking,
    /// A payment attempt.
    Payment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Event => write!(f, "Event"),
            Entity::Tier => write!(f, "Ticket"),
            Entity::Booking => write!(f, "Booking"),
            Entity::Payment => write!(f, "Payment"),
        }
    }
}

/// Field-level detail attached to validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Input field the message is about, e.g. `quantity`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Detail for one field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error type for engine operations.
///
/// Business-rule variants are detected inside a unit of work and always cause
/// a full rollback. `Store` wraps infrastructure failures; the executor may
/// retry transient ones before they reach the caller.
///
/// # Example
///
/// ```
/// use boxoffice::{BookingError, ErrorKind};
///
/// let error = BookingError::InsufficientInventory { requested: 3, available: 1 };
/// assert_eq!(error.kind(), ErrorKind::InsufficientInventory);
/// assert_eq!(error.public_message(), "Insufficient tickets available. Only 1 tickets left");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The event has already started.
    ///
    /// Booking, cancelling and refunding are all refused once the event's
    /// start time has passed; nothing is written.
    #[error("Cannot {action} for past events")]
    EventExpired {
        /// Event that already started.
        event_id: EventId,
        /// Refused action, phrased for the message.
        action: &'static str,
    },

    /// The customer already holds a pending or confirmed booking for the tier.
    #[error("You already have a booking for this ticket")]
    DuplicateActiveBooking,

    /// Fewer tickets remain than were requested.
    #[error("Insufficient tickets available. Only {available} tickets left")]
    InsufficientInventory {
        /// Tickets asked for.
        requested: u32,
        /// Tickets left when the request was checked.
        available: u32,
    },

    /// The caller neither owns the record nor administers it.
    #[error("You do not have permission to {action}")]
    PermissionDenied {
        /// Refused action, phrased for the message.
        action: &'static str,
    },

    /// Cancelling a booking that is already cancelled.
    #[error("Booking is already cancelled")]
    AlreadyCancelled,

    /// Paying for a booking that is no longer pending.
    #[error("Booking is not in pending status")]
    BookingNotPending {
        /// Status the booking was found in.
        status: BookingStatus,
    },

    /// Refunding a payment twice.
    #[error("Payment is already refunded")]
    AlreadyRefunded,

    /// Refunding a payment that never succeeded.
    #[error("Only successful payments can be refunded")]
    PaymentNotSuccessful,

    /// A referenced record does not exist, or is soft-deleted or retired.
    #[error("{entity} not found")]
    NotFound {
        /// Kind of record that was missing.
        entity: Entity,
        /// Identifier as given, for logs.
        id: String,
    },

    /// Input failed validation before any lock was taken.
    #[error("Validation failed")]
    Validation {
        /// One entry per offending field.
        errors: Vec<FieldError>,
    },

    /// The gateway declined a refund; the payment stays successful.
    #[error("Refund failed: {reason}")]
    RefundDeclined {
        /// Gateway's decline reason.
        reason: String,
    },

    /// A tier's capacity cannot drop below what is already booked.
    #[error("Cannot reduce quantity below booked amount ({booked})")]
    QuantityBelowBooked {
        /// Tickets held by pending and confirmed bookings.
        booked: u32,
    },

    /// A tier with confirmed bookings cannot be retired.
    #[error("Cannot delete ticket with confirmed bookings")]
    TierHasConfirmedBookings,

    /// An engine invariant did not hold.
    ///
    /// Callers see only "Internal server error"; the detail goes to the log.
    #[error("internal error: {detail}")]
    Internal {
        /// What went wrong, for operators.
        detail: String,
    },

    /// Storage backend failure.
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    pub(crate) fn not_found(entity: Entity, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// Stable classification for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EventExpired { .. } => ErrorKind::EventExpired,
            Self::DuplicateActiveBooking => ErrorKind::DuplicateActiveBooking,
            Self::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::AlreadyCancelled => ErrorKind::AlreadyCancelled,
            Self::BookingNotPending { .. } => ErrorKind::BookingNotPending,
            Self::AlreadyRefunded => ErrorKind::AlreadyRefunded,
            Self::PaymentNotSuccessful => ErrorKind::PaymentNotSuccessful,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RefundDeclined { .. } => ErrorKind::RefundDeclined,
            Self::QuantityBelowBooked { .. } | Self::TierHasConfirmedBookings => {
                ErrorKind::CatalogConflict
            }
            Self::Internal { .. } | Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure is a transient storage fault worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_transient())
    }

    /// Message safe to show a caller. Infrastructure detail is withheld.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Field-level detail, empty unless this is a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors } => errors,
            _ => &[],
        }
    }
}

/// Logs a failed operation at a level matching its kind and passes it through.
///
/// Business-rule failures are expected traffic and log at `warn`; anything
/// classified as internal logs at `error` with the full detail.
pub(crate) fn logged<T>(
    operation: &'static str,
    result: Result<T, BookingError>,
) -> Result<T, BookingError> {
    if let Err(failure) = &result {
        if failure.kind() == ErrorKind::Internal {
            error!(operation, error = %failure, "[engine] operation failed");
        } else {
            warn!(operation, error = %failure, kind = ?failure.kind(), "[engine] operation rejected");
        }
    }
    result
}

/// Stable, transport-neutral failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
///
/// Each [`BookingError`] variant maps to one kind; the two catalog conflicts
/// share [`ErrorKind::CatalogConflict`].
pub enum ErrorKind {
    /// See [`BookingError::EventExpired`].
    EventExpired,
    /// See [`BookingError::DuplicateActiveBooking`].
    DuplicateActiveBooking,
    /// See [`BookingError::InsufficientInventory`].
    InsufficientInventory,
    /// See [`BookingError::PermissionDenied`].
    PermissionDenied,
    /// See [`BookingError::AlreadyCancelled`].
    AlreadyCancelled,
    /// See [`BookingError::BookingNotPending`].
    BookingNotPending,
    /// See [`BookingError::AlreadyRefunded`].
    AlreadyRefunded,
    /// See [`BookingError::PaymentNotSuccessful`].
    PaymentNotSuccessful,
    /// See [`BookingError::NotFound`].
    NotFound,
    /// See [`BookingError::Validation`].
    Validation,
    /// A charge attempt was recorded but the gateway declined it.
    PaymentDeclined,
    /// See [`BookingError::RefundDeclined`].
    RefundDeclined,
    /// Capacity or retirement change refused by existing bookings.
    CatalogConflict,
    /// Storage or invariant failure; detail withheld from the caller.
    Internal,
}

/// Suggested transport mapping for an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHint {
    /// 400
    BadRequest,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 422
    Unprocessable,
    /// 500
    Internal,
}

impl ErrorKind {
    /// How an HTTP layer would usually report this kind.
    ///
    /// ```
    /// use boxoffice::errors::{ErrorKind, StatusHint};
    ///
    /// assert_eq!(ErrorKind::DuplicateActiveBooking.status_hint(), StatusHint::Conflict);
    /// ```
    pub const fn status_hint(self) -> StatusHint {
        match self {
            Self::DuplicateActiveBooking
            | Self::InsufficientInventory
            | Self::AlreadyCancelled
            | Self::BookingNotPending
            | Self::CatalogConflict => StatusHint::Conflict,
            Self::PermissionDenied => StatusHint::Forbidden,
            Self::NotFound => StatusHint::NotFound,
            Self::Validation => StatusHint::Unprocessable,
            Self::EventExpired
            | Self::AlreadyRefunded
            | Self::PaymentNotSuccessful
            | Self::PaymentDeclined
            | Self::RefundDeclined => StatusHint::BadRequest,
            Self::Internal => StatusHint::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_types::Operation;

    #[test]
    fn messages_match_customer_facing_wording() {
        let error = BookingError::InsufficientInventory {
            requested: 3,
            available: 1,
        };
        assert_eq!(
            error.to_string(),
            "Insufficient tickets available. Only 1 tickets left"
        );

        let error = BookingError::EventExpired {
            event_id: EventId::generate(),
            action: "cancel bookings",
        };
        assert_eq!(error.to_string(), "Cannot cancel bookings for past events");
    }

    #[test]
    fn store_failures_are_reported_generically() {
        let error = BookingError::from(StoreError::Unavailable {
            operation: Operation::Commit,
        });

        assert_eq!(error.kind(), ErrorKind::Internal);
        assert_eq!(error.public_message(), "Internal server error");
        assert!(error.is_transient());
    }

    #[test]
    fn business_rule_failures_are_never_transient() {
        assert!(!BookingError::DuplicateActiveBooking.is_transient());
        assert!(!BookingError::AlreadyRefunded.is_transient());
    }

    #[test]
    fn conflicts_map_to_conflict_hint() {
        assert_eq!(
            ErrorKind::DuplicateActiveBooking.status_hint(),
            StatusHint::Conflict
        );
        assert_eq!(
            ErrorKind::PermissionDenied.status_hint(),
            StatusHint::Forbidden
        );
        assert_eq!(ErrorKind::Internal.status_hint(), StatusHint::Internal);
    }

    #[test]
    fn validation_exposes_field_errors() {
        let error = BookingError::invalid("quantity", "must be at least 1");
        assert_eq!(error.field_errors().len(), 1);
        assert_eq!(error.field_errors()[0].field, "quantity");
        assert!(BookingError::AlreadyCancelled.field_errors().is_empty());
    }
}
