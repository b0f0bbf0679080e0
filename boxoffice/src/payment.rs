//! Payment lifecycle: each attempt is `success` or `failed`; `success -> refunded`.
//!
//! Both operations call the gateway from inside the locked unit, so a slow
//! gateway holds the booking lock for its whole latency.

use boxoffice_types::{
    Booking, BookingStatus, Payment, PaymentDetails, PaymentId, PaymentMethod, PaymentStatus,
    Reason, Transaction, TransactionReference,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::booking;
use crate::errors::BookingError;
use crate::executor::Unit;
use crate::gateway::{GatewayOutcome, PaymentGateway};

const MAX_REFERENCE_ATTEMPTS: usize = 32;

fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true))
}

async fn unused_reference<T: Transaction>(
    tx: &mut T,
) -> Result<TransactionReference, BookingError> {
    for _ in 0..MAX_REFERENCE_ATTEMPTS {
        let candidate = TransactionReference::generate(&mut rand::rng());
        if !tx.transaction_reference_taken(&candidate).await? {
            return Ok(candidate);
        }
        debug!(reference = %candidate, "[payment.reference] collision, drawing again");
    }

    Err(BookingError::Internal {
        detail: format!("no unused transaction reference after {MAX_REFERENCE_ATTEMPTS} draws"),
    })
}

/// Charges a locked pending booking and records the attempt.
///
/// A declined charge is still recorded as a `failed` payment and leaves the
/// booking pending. An approved charge confirms the booking.
pub async fn attempt<T: Transaction>(
    unit: &mut Unit<T>,
    gateway: &dyn PaymentGateway,
    booking: &mut Booking,
    method: PaymentMethod,
    details: PaymentDetails,
    now: DateTime<Utc>,
) -> Result<(Payment, GatewayOutcome), BookingError> {
    if booking.status != BookingStatus::Pending {
        return Err(BookingError::BookingNotPending {
            status: booking.status,
        });
    }

    let transaction_reference = unused_reference(unit.tx()).await?;

    unit.note_gateway_call();
    let outcome = gateway.charge(booking.total_amount).await;

    let mut details = details;
    let _ = details.insert("processed_at".to_string(), timestamp(now));
    let (status, response, gateway_reference) = match &outcome {
        GatewayOutcome::Approved { message, reference } => (
            PaymentStatus::Success,
            message.clone(),
            Value::String(reference.clone()),
        ),
        GatewayOutcome::Declined { reason } => (PaymentStatus::Failed, reason.clone(), Value::Null),
    };
    let _ = details.insert("gateway_response".to_string(), Value::String(response));
    let _ = details.insert("gateway_reference".to_string(), gateway_reference);

    let payment = Payment {
        id: PaymentId::generate(),
        booking_id: booking.id,
        amount: booking.total_amount,
        status,
        method,
        details,
        transaction_reference,
        processed_at: Some(now),
        refunded_at: None,
        created_at: now,
    };
    unit.tx().insert_payment(&payment).await?;

    match &outcome {
        GatewayOutcome::Approved { .. } => {
            booking::confirm(unit.tx(), booking, now).await?;
            info!(
                booking = %booking.id,
                payment = %payment.id,
                amount = %payment.amount,
                "[payment.attempt] charge approved"
            );
        }
        GatewayOutcome::Declined { reason } => {
            warn!(
                booking = %booking.id,
                payment = %payment.id,
                reason = %reason,
                "[payment.attempt] charge declined, booking stays pending"
            );
        }
    }

    Ok((payment, outcome))
}

/// Refunds a locked successful payment and cancels its locked booking.
///
/// Returns the gateway's refund reference. A declined refund changes nothing
/// and fails with `RefundDeclined`.
pub async fn refund<T: Transaction>(
    unit: &mut Unit<T>,
    gateway: &dyn PaymentGateway,
    payment: &mut Payment,
    booking: &mut Booking,
    reason: &Reason,
    now: DateTime<Utc>,
) -> Result<String, BookingError> {
    match payment.status {
        PaymentStatus::Refunded => return Err(BookingError::AlreadyRefunded),
        PaymentStatus::Failed => return Err(BookingError::PaymentNotSuccessful),
        PaymentStatus::Success => {}
    }

    unit.note_gateway_call();
    let (message, reference) = match gateway.refund(payment.amount).await {
        GatewayOutcome::Approved { message, reference } => (message, reference),
        GatewayOutcome::Declined { reason } => {
            warn!(
                payment = %payment.id,
                reason = %reason,
                "[payment.refund] refund declined"
            );
            return Err(BookingError::RefundDeclined { reason });
        }
    };

    payment.status = PaymentStatus::Refunded;
    payment.refunded_at = Some(now);
    let _ = payment.details.insert(
        "refund_reason".to_string(),
        Value::String(reason.to_string()),
    );
    let _ = payment
        .details
        .insert("refunded_at".to_string(), timestamp(now));
    let _ = payment.details.insert(
        "refund_gateway_response".to_string(),
        Value::String(message),
    );
    let _ = payment.details.insert(
        "refund_reference".to_string(),
        Value::String(reference.clone()),
    );
    unit.tx().update_payment(payment).await?;

    booking::cancel(unit.tx(), booking, now).await?;

    info!(
        payment = %payment.id,
        booking = %booking.id,
        amount = %payment.amount,
        "[payment.refund] refund approved, booking cancelled"
    );
    Ok(reference)
}
