//! Human-readable booking and transaction references.
//!
//! References are random, so uniqueness is not guaranteed by construction.
//! Callers must check a freshly generated reference against the store and
//! generate again on collision.

use nutype::nutype;
use rand::Rng;

use crate::validation::{is_reference, REFERENCE_CHARSET};

const BOOKING_PREFIX: &str = "BKG-";
const BOOKING_SUFFIX_LEN: usize = 8;
const TRANSACTION_PREFIX: &str = "TXN-";
const TRANSACTION_SUFFIX_LEN: usize = 12;

fn booking_format(s: &str) -> bool {
    is_reference(s, BOOKING_PREFIX, BOOKING_SUFFIX_LEN)
}

fn transaction_format(s: &str) -> bool {
    is_reference(s, TRANSACTION_PREFIX, TRANSACTION_SUFFIX_LEN)
}

/// Booking reference: `BKG-` followed by 8 uppercase alphanumerics.
#[nutype(
    sanitize(trim),
    validate(predicate = booking_format),
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
pub struct BookingReference(String);

/// Payment transaction reference: `TXN-` followed by 12 uppercase alphanumerics.
#[nutype(
    sanitize(trim),
    validate(predicate = transaction_format),
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
pub struct TransactionReference(String);

fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(REFERENCE_CHARSET[rng.random_range(0..REFERENCE_CHARSET.len())]))
        .collect()
}

impl BookingReference {
    /// Draws a random candidate reference.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let candidate = format!("{BOOKING_PREFIX}{}", random_suffix(rng, BOOKING_SUFFIX_LEN));
        Self::try_new(candidate).expect("generated suffix is drawn from the reference charset")
    }
}

impl TransactionReference {
    /// Draws a random candidate reference.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let candidate = format!(
            "{TRANSACTION_PREFIX}{}",
            random_suffix(rng, TRANSACTION_SUFFIX_LEN)
        );
        Self::try_new(candidate).expect("generated suffix is drawn from the reference charset")
    }
}
