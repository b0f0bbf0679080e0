//! Persistent records and their state machines.
//!
//! Records are plain data. Every state transition that matters for inventory
//! or money goes through the engine's coordinators, which consult the
//! `can_transition_to` tables here before writing.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::ids::{BookingId, EventId, PaymentId, TierId, UserId};
use crate::money::Money;
use crate::references::{BookingReference, TransactionReference};
use crate::validation::is_method_tag;

/// Number of tickets in a single booking. Always at least one.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

/// Payment method tag such as `credit_card` or `paypal`.
///
/// Input is trimmed and lowercased before validation.
#[nutype(
    sanitize(trim, lowercase),
    validate(not_empty, len_char_max = 32, predicate = is_method_tag),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PaymentMethod(String);

/// Display name of a ticket tier ("VIP", "General Admission").
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct TierName(String);

/// Free-text justification recorded with a refund.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Reason(String);

/// Structured gateway metadata stored with a payment.
pub type PaymentDetails = Map<String, Value>;

/// Returned when a stored status string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// The slice of an event the engine needs: who owns it and when it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventListing {
    /// Event identifier.
    pub id: EventId,
    /// Human-readable title, used in confirmation notices.
    pub title: String,
    /// Scheduled start. Bookings for started events are immutable.
    pub starts_at: DateTime<Utc>,
    /// Organizer allowed to administer the event's tiers.
    pub organizer_id: UserId,
}

impl EventListing {
    /// Whether the event has already started as of `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

/// A priced category of tickets with limited stock.
///
/// `available_quantity` never exceeds `total_quantity` and never drops below
/// zero; only the storage layer's conditional inventory operations change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTier {
    /// Tier identifier.
    pub id: TierId,
    /// Owning event.
    pub event_id: EventId,
    /// Display name.
    pub name: TierName,
    /// Unit price.
    pub price: Money,
    /// Stock ever offered for this tier.
    pub total_quantity: u32,
    /// Stock not held by an active booking.
    pub available_quantity: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp. Retired tiers accept no new bookings.
    pub retired_at: Option<DateTime<Utc>>,
}

impl TicketTier {
    /// Creates a fresh tier with all stock available.
    pub fn new(
        event_id: EventId,
        name: TierName,
        price: Money,
        total_quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TierId::generate(),
            event_id,
            name,
            price,
            total_quantity,
            available_quantity: total_quantity,
            created_at: now,
            retired_at: None,
        }
    }

    /// Units currently held by active bookings.
    pub fn booked_quantity(&self) -> u32 {
        self.total_quantity.saturating_sub(self.available_quantity)
    }

    /// Whether `quantity` more units could be reserved right now.
    pub fn can_supply(&self, quantity: Quantity) -> bool {
        self.available_quantity >= quantity.into_inner()
    }

    /// Whether the tier has been retired.
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}

/// Booking state machine: `pending -> confirmed | cancelled`, `confirmed -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Stock reserved, awaiting payment.
    Pending,
    /// Paid.
    Confirmed,
    /// Terminal. Stock has been released.
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings are active and hold stock.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
        )
    }

    /// Lowercase storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A customer's claim on tickets of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier.
    pub id: BookingId,
    /// Unique human-readable reference.
    pub reference: BookingReference,
    /// Customer who owns the booking.
    pub customer_id: UserId,
    /// Tier the tickets come from.
    pub tier_id: TierId,
    /// Number of tickets.
    pub quantity: Quantity,
    /// Unit price times quantity, fixed at creation.
    pub total_amount: Money,
    /// Lifecycle state.
    pub status: BookingStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Administrative soft deletion.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Creates a pending booking.
    pub fn pending(
        reference: BookingReference,
        customer_id: UserId,
        tier_id: TierId,
        quantity: Quantity,
        total_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::generate(),
            reference,
            customer_id,
            tier_id,
            quantity,
            total_amount,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Active and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.deleted_at.is_none()
    }

    /// Whether `user` owns this booking.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.customer_id == user
    }
}

/// Outcome of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Charged.
    Success,
    /// Declined by the gateway; kept for audit.
    Failed,
    /// Charged, then returned.
    Refunded,
}

impl PaymentStatus {
    /// Only a successful payment may become refunded.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Success, Self::Refunded))
    }

    /// Lowercase storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A single settlement attempt against a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier.
    pub id: PaymentId,
    /// Booking being paid.
    pub booking_id: BookingId,
    /// Booking total at the time of the attempt.
    pub amount: Money,
    /// Attempt outcome.
    pub status: PaymentStatus,
    /// Method tag supplied by the customer.
    pub method: PaymentMethod,
    /// Caller-supplied fields merged with gateway metadata.
    pub details: PaymentDetails,
    /// Unique transaction reference.
    pub transaction_reference: TransactionReference,
    /// When the gateway answered.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the refund gateway approved a refund.
    pub refunded_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Whether this attempt charged the customer and has not been refunded.
    pub fn is_successful(&self) -> bool {
        self.status == PaymentStatus::Success
    }
}
