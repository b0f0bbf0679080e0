//! Read-only views over bookings and payments.
//!
//! Reads never lock and never run inside a unit of work.

use boxoffice_types::{Booking, BookingId, Payment, PaymentId, Store, TicketTier};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::caller::Caller;
use crate::errors::{logged, BookingError, Entity};

/// A booking with its tier and payment history, newest payment first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    /// The booking itself.
    pub booking: Booking,
    /// Its tier; `None` only if the tier row has gone.
    pub tier: Option<TicketTier>,
    /// Every charge attempt, failed ones included.
    pub payments: Vec<Payment>,
}

/// A payment together with the booking it pays for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentView {
    /// The payment attempt.
    pub payment: Payment,
    /// Booking it pays for.
    pub booking: Booking,
}

/// Lock-free reads scoped to what the caller may see.
pub struct BookingQueries<S> {
    store: Arc<S>,
}

impl<S> Clone for BookingQueries<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> BookingQueries<S> {
    /// Queries against `store`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Another customer's booking reads as not found.
    #[instrument(name = "queries.booking_details", skip(self), fields(caller = %caller.user_id))]
    pub async fn booking_details(
        &self,
        caller: Caller,
        booking_id: BookingId,
    ) -> Result<BookingView, BookingError> {
        logged("booking_details", self.load_booking_view(caller, booking_id).await)
    }

    async fn load_booking_view(
        &self,
        caller: Caller,
        booking_id: BookingId,
    ) -> Result<BookingView, BookingError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .filter(|booking| booking.deleted_at.is_none() && booking.is_owned_by(caller.user_id))
            .ok_or_else(|| BookingError::not_found(Entity::Booking, booking_id))?;
        let tier = self.store.tier(booking.tier_id).await?;
        let payments = self.store.payments_for_booking(booking.id).await?;

        Ok(BookingView {
            booking,
            tier,
            payments,
        })
    }

    /// Visible to the booking's owner and to administrators.
    #[instrument(name = "queries.payment_status", skip(self), fields(caller = %caller.user_id))]
    pub async fn payment_status(
        &self,
        caller: Caller,
        payment_id: PaymentId,
    ) -> Result<PaymentView, BookingError> {
        logged("payment_status", self.load_payment_view(caller, payment_id).await)
    }

    async fn load_payment_view(
        &self,
        caller: Caller,
        payment_id: PaymentId,
    ) -> Result<PaymentView, BookingError> {
        let payment = self
            .store
            .payment(payment_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Payment, payment_id))?;
        let booking = self
            .store
            .booking(payment.booking_id)
            .await?
            .ok_or_else(|| BookingError::Internal {
                detail: format!("payment {payment_id} references a missing booking"),
            })?;

        if !(booking.is_owned_by(caller.user_id) || caller.is_admin()) {
            return Err(BookingError::PermissionDenied {
                action: "view this payment",
            });
        }
        Ok(PaymentView { payment, booking })
    }

    /// The caller's bookings, newest first.
    pub async fn customer_bookings(&self, caller: Caller) -> Result<Vec<Booking>, BookingError> {
        logged(
            "customer_bookings",
            self.store
                .bookings_for_customer(caller.user_id)
                .await
                .map_err(BookingError::from),
        )
    }

    /// Every payment attempt for one of the caller's bookings, newest first.
    pub async fn payment_history(
        &self,
        caller: Caller,
        booking_id: BookingId,
    ) -> Result<Vec<Payment>, BookingError> {
        self.booking_details(caller, booking_id)
            .await
            .map(|view| view.payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_memory::InMemoryStore;
    use boxoffice_types::{
        BookingReference, EventId, Money, PaymentMethod, PaymentStatus, Quantity, TierName,
        TransactionReference, UserId,
    };
    use chrono::Utc;

    fn seeded() -> (InMemoryStore, Booking, Payment) {
        let store = InMemoryStore::new();
        let tier = TicketTier::new(
            EventId::generate(),
            TierName::try_new("Gallery".to_string()).unwrap(),
            Money::from_cents(1_500).unwrap(),
            20,
            Utc::now(),
        );
        let booking = Booking::pending(
            BookingReference::try_new("BKG-QUERY001".to_string()).unwrap(),
            UserId::generate(),
            tier.id,
            Quantity::try_new(1).unwrap(),
            Money::from_cents(1_500).unwrap(),
            Utc::now(),
        );
        let payment = Payment {
            id: PaymentId::generate(),
            booking_id: booking.id,
            amount: booking.total_amount,
            status: PaymentStatus::Failed,
            method: PaymentMethod::try_new("paypal".to_string()).unwrap(),
            details: boxoffice_types::PaymentDetails::new(),
            transaction_reference: TransactionReference::try_new("TXN-QUERY0000001".to_string())
                .unwrap(),
            processed_at: Some(Utc::now()),
            refunded_at: None,
            created_at: Utc::now(),
        };
        store.seed_tier(tier);
        store.seed_booking(booking.clone());
        store.seed_payment(payment.clone());
        (store, booking, payment)
    }

    #[tokio::test]
    async fn owner_sees_booking_with_tier_and_payments() {
        let (store, booking, payment) = seeded();
        let queries = BookingQueries::new(Arc::new(store));

        let view = queries
            .booking_details(Caller::customer(booking.customer_id), booking.id)
            .await
            .unwrap();

        assert_eq!(view.booking, booking);
        assert!(view.tier.is_some());
        assert_eq!(view.payments, vec![payment]);
    }

    #[tokio::test]
    async fn strangers_see_not_found() {
        let (store, booking, _) = seeded();
        let queries = BookingQueries::new(Arc::new(store));

        let error = queries
            .booking_details(Caller::customer(UserId::generate()), booking.id)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            BookingError::NotFound {
                entity: Entity::Booking,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn payment_status_is_forbidden_to_strangers_but_not_admins() {
        let (store, _, payment) = seeded();
        let queries = BookingQueries::new(Arc::new(store));

        let error = queries
            .payment_status(Caller::customer(UserId::generate()), payment.id)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            BookingError::PermissionDenied {
                action: "view this payment"
            }
        );

        let view = queries
            .payment_status(Caller::admin(UserId::generate()), payment.id)
            .await
            .unwrap();
        assert_eq!(view.payment.id, payment.id);
    }

    #[tokio::test]
    async fn customer_bookings_lists_only_own() {
        let (store, booking, _) = seeded();
        let queries = BookingQueries::new(Arc::new(store));

        let mine = queries
            .customer_bookings(Caller::customer(booking.customer_id))
            .await
            .unwrap();
        let theirs = queries
            .customer_bookings(Caller::customer(UserId::generate()))
            .await
            .unwrap();

        assert_eq!(mine.len(), 1);
        assert!(theirs.is_empty());
    }
}
