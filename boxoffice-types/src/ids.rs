//! Entity identifiers.
//!
//! Every identifier wraps a UUID. Fresh identifiers are UUIDv7 so that they
//! sort by creation time, which keeps "newest first" listings cheap.

use nutype::nutype;
use uuid::Uuid;

/// Identifier of an event (concert, match, conference) that owns ticket tiers.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct EventId(Uuid);

/// Identifier of a ticket tier.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct TierId(Uuid);

/// Identifier of a booking.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct BookingId(Uuid);

/// Identifier of a payment attempt.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct PaymentId(Uuid);

/// Identifier of an authenticated user (customer, organizer or admin).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct UserId(Uuid);

macro_rules! generate_id {
    ($($ty:ident),+) => {
        $(
            impl $ty {
                /// Creates a new time-ordered identifier.
                pub fn generate() -> Self {
                    Self::new(Uuid::now_v7())
                }
            }
        )+
    };
}

generate_id!(EventId, TierId, BookingId, PaymentId, UserId);
