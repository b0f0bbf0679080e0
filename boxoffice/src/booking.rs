//! Booking lifecycle: `pending -> confirmed | cancelled`, `confirmed -> cancelled`.

use boxoffice_types::{
    Booking, BookingReference, BookingStatus, EventListing, Quantity, TicketTier, Transaction,
    UserId,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::BookingError;
use crate::ledger;

/// Reference draws before giving up. Collisions are rare enough that hitting
/// this means the store is misbehaving.
const MAX_REFERENCE_ATTEMPTS: usize = 32;

/// Fails with `EventExpired` once the event has started.
pub fn ensure_upcoming(
    event: &EventListing,
    now: DateTime<Utc>,
    action: &'static str,
) -> Result<(), BookingError> {
    if event.has_started(now) {
        return Err(BookingError::EventExpired {
            event_id: event.id,
            action,
        });
    }
    Ok(())
}

/// Stages a new pending booking for `customer` on a locked tier.
///
/// Stock is not touched here; the caller reserves it in the same unit.
pub async fn create<T: Transaction>(
    tx: &mut T,
    event: &EventListing,
    tier: &TicketTier,
    customer: UserId,
    quantity: Quantity,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    ensure_upcoming(event, now, "book tickets")?;

    if let Some(existing) = tx.find_active_booking(customer, tier.id).await? {
        warn!(
            customer = %customer,
            tier = %tier.id,
            existing = %existing.id,
            "[booking.create] customer already holds an active booking"
        );
        return Err(BookingError::DuplicateActiveBooking);
    }

    let total_amount = tier
        .price
        .times(quantity)
        .map_err(|error| BookingError::invalid("quantity", error.to_string()))?;
    let reference = unused_reference(tx).await?;

    let booking = Booking::pending(reference, customer, tier.id, quantity, total_amount, now);
    tx.insert_booking(&booking).await?;
    Ok(booking)
}

async fn unused_reference<T: Transaction>(tx: &mut T) -> Result<BookingReference, BookingError> {
    for _ in 0..MAX_REFERENCE_ATTEMPTS {
        let candidate = BookingReference::generate(&mut rand::rng());
        if !tx.booking_reference_taken(&candidate).await? {
            return Ok(candidate);
        }
        debug!(reference = %candidate, "[booking.reference] collision, drawing again");
    }

    Err(BookingError::Internal {
        detail: format!("no unused booking reference after {MAX_REFERENCE_ATTEMPTS} draws"),
    })
}

/// Moves a locked pending booking to confirmed.
pub async fn confirm<T: Transaction>(
    tx: &mut T,
    booking: &mut Booking,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if !booking.status.can_transition_to(BookingStatus::Confirmed) {
        return Err(BookingError::BookingNotPending {
            status: booking.status,
        });
    }

    booking.status = BookingStatus::Confirmed;
    booking.updated_at = now;
    tx.update_booking(booking).await?;
    Ok(())
}

/// Cancels a locked booking and returns its stock to the tier.
///
/// Both callers, customer cancellation and refunds, check
/// [`ensure_upcoming`] under the tier lock first.
pub async fn cancel<T: Transaction>(
    tx: &mut T,
    booking: &mut Booking,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if !booking.status.can_transition_to(BookingStatus::Cancelled) {
        return Err(BookingError::AlreadyCancelled);
    }

    booking.status = BookingStatus::Cancelled;
    booking.updated_at = now;
    tx.update_booking(booking).await?;
    ledger::release(tx, booking.tier_id, booking.quantity).await
}
