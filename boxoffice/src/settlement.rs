//! Payment coordinator: charging pending bookings and refunding payments.

use boxoffice_types::{
    Booking, BookingId, EventCalendar, Payment, PaymentDetails, PaymentId, PaymentMethod,
    PaymentStatus, Reason, Store, Transaction,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::booking;
use crate::caller::Caller;
use crate::errors::{logged, BookingError, Entity};
use crate::executor::{execute, RetryPolicy, Unit, UnitOfWork};
use crate::gateway::{GatewayOutcome, PaymentGateway};
use crate::payment;
use crate::signals::{dispatch_confirmation, BookingConfirmation, Notifier, Signal, SignalBus};

/// A recorded charge attempt.
///
/// Declines are not errors at this level: the failed payment row is
/// committed and returned with the gateway's reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    /// The recorded attempt, successful or failed.
    pub payment: Payment,
    /// The booking after the attempt: confirmed, or still pending.
    pub booking: Booking,
    /// Gateway's reason when the charge was declined.
    pub decline_reason: Option<String>,
}

impl PaymentReceipt {
    /// Whether the charge went through.
    pub fn is_approved(&self) -> bool {
        self.payment.status == PaymentStatus::Success
    }
}

/// A committed refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundReceipt {
    /// The payment, now refunded.
    pub payment: Payment,
    /// The booking, now cancelled.
    pub booking: Booking,
    /// Gateway reference of the refund.
    pub refund_reference: String,
}

/// Processes and refunds payments.
pub struct PaymentCoordinator<S> {
    store: Arc<S>,
    calendar: Arc<dyn EventCalendar>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    signals: SignalBus,
}

impl<S> Clone for PaymentCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            calendar: Arc::clone(&self.calendar),
            gateway: Arc::clone(&self.gateway),
            notifier: Arc::clone(&self.notifier),
            policy: self.policy.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<S: Store> PaymentCoordinator<S> {
    /// Coordinator charging through `gateway` and confirming via `notifier`.
    pub fn new(
        store: Arc<S>,
        calendar: Arc<dyn EventCalendar>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
        signals: SignalBus,
    ) -> Self {
        Self {
            store,
            calendar,
            gateway,
            notifier,
            policy,
            signals,
        }
    }

    /// Charges the caller's pending booking.
    ///
    /// Approval confirms the booking and queues a confirmation notice after
    /// commit. A decline records a failed payment and leaves the booking
    /// pending so the customer can try again.
    #[instrument(
        name = "settlement.process_payment",
        skip(self, details),
        fields(customer = %caller.user_id, booking = %booking_id, method = %method)
    )]
    pub async fn process_payment(
        &self,
        caller: Caller,
        booking_id: BookingId,
        method: PaymentMethod,
        details: PaymentDetails,
    ) -> Result<PaymentReceipt, BookingError> {
        let unit = PayBooking {
            gateway: self.gateway.as_ref(),
            customer: caller.user_id,
            booking_id,
            method,
            details,
        };
        let receipt = logged(
            "process_payment",
            execute(self.store.as_ref(), &unit, &self.policy).await,
        )?;

        if receipt.is_approved() {
            info!(
                payment = %receipt.payment.id,
                reference = %receipt.payment.transaction_reference,
                "[settlement.process_payment] payment approved"
            );
            self.notify_confirmed(&receipt.booking).await;
        } else {
            warn!(
                payment = %receipt.payment.id,
                reason = receipt.decline_reason.as_deref().unwrap_or_default(),
                "[settlement.process_payment] payment declined"
            );
        }
        Ok(receipt)
    }

    /// Refunds a successful payment and cancels its booking.
    ///
    /// Allowed for the booking's owner and for administrators.
    #[instrument(
        name = "settlement.refund_payment",
        skip(self),
        fields(caller = %caller.user_id, payment = %payment_id)
    )]
    pub async fn refund_payment(
        &self,
        caller: Caller,
        payment_id: PaymentId,
        reason: Reason,
    ) -> Result<RefundReceipt, BookingError> {
        let result = match self.store.payment(payment_id).await {
            Ok(Some(found)) => {
                let unit = RefundPayment {
                    calendar: self.calendar.as_ref(),
                    gateway: self.gateway.as_ref(),
                    caller,
                    booking_id: found.booking_id,
                    payment_id,
                    reason,
                };
                execute(self.store.as_ref(), &unit, &self.policy).await
            }
            Ok(None) => Err(BookingError::not_found(Entity::Payment, payment_id)),
            Err(error) => Err(error.into()),
        };
        let receipt = logged("refund_payment", result)?;

        self.signals.emit(Signal::InventoryChanged {
            tier_id: receipt.booking.tier_id,
        });
        info!(
            refund_reference = %receipt.refund_reference,
            amount = %receipt.payment.amount,
            "[settlement.refund_payment] payment refunded"
        );
        Ok(receipt)
    }

    async fn notify_confirmed(&self, booking: &Booking) {
        match self.confirmation_for(booking).await {
            Ok(confirmation) => {
                let _ = dispatch_confirmation(Arc::clone(&self.notifier), confirmation);
            }
            Err(failure) => error!(
                booking = %booking.id,
                error = %failure,
                "[settlement.notify_confirmed] could not assemble confirmation"
            ),
        }
    }

    async fn confirmation_for(&self, booking: &Booking) -> Result<BookingConfirmation, BookingError> {
        let tier = self
            .store
            .tier(booking.tier_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Tier, booking.tier_id))?;
        let event = self
            .calendar
            .event(tier.event_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Event, tier.event_id))?;

        Ok(BookingConfirmation {
            booking_id: booking.id,
            reference: booking.reference.clone(),
            customer_id: booking.customer_id,
            tier_id: tier.id,
            tier_name: tier.name.to_string(),
            event_title: event.title,
            event_starts_at: event.starts_at,
            quantity: booking.quantity,
            total_amount: booking.total_amount,
        })
    }
}

struct PayBooking<'a> {
    gateway: &'a dyn PaymentGateway,
    customer: boxoffice_types::UserId,
    booking_id: BookingId,
    method: PaymentMethod,
    details: PaymentDetails,
}

impl UnitOfWork for PayBooking<'_> {
    type Output = PaymentReceipt;

    fn name(&self) -> &'static str {
        "process_payment"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<PaymentReceipt, BookingError> {
        let now = Utc::now();
        let mut booking = unit
            .tx()
            .lock_booking(self.booking_id)
            .await?
            .filter(|booking| booking.deleted_at.is_none())
            .ok_or_else(|| BookingError::not_found(Entity::Booking, self.booking_id))?;

        if !booking.is_owned_by(self.customer) {
            return Err(BookingError::PermissionDenied {
                action: "pay for this booking",
            });
        }

        // Holding the tier serializes confirmation with tier retirement.
        let _ = unit
            .tx()
            .lock_tier(booking.tier_id)
            .await?
            .filter(|tier| !tier.is_retired())
            .ok_or_else(|| BookingError::not_found(Entity::Tier, booking.tier_id))?;

        let (payment, outcome) = payment::attempt(
            unit,
            self.gateway,
            &mut booking,
            self.method.clone(),
            self.details.clone(),
            now,
        )
        .await?;

        let decline_reason = match outcome {
            GatewayOutcome::Approved { .. } => None,
            GatewayOutcome::Declined { reason } => Some(reason),
        };
        Ok(PaymentReceipt {
            payment,
            booking,
            decline_reason,
        })
    }
}

struct RefundPayment<'a> {
    calendar: &'a dyn EventCalendar,
    gateway: &'a dyn PaymentGateway,
    caller: Caller,
    booking_id: BookingId,
    payment_id: PaymentId,
    reason: Reason,
}

impl UnitOfWork for RefundPayment<'_> {
    type Output = RefundReceipt;

    fn name(&self) -> &'static str {
        "refund_payment"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<RefundReceipt, BookingError> {
        let now = Utc::now();
        let mut booking = unit
            .tx()
            .lock_booking(self.booking_id)
            .await?
            .filter(|booking| booking.deleted_at.is_none())
            .ok_or_else(|| BookingError::not_found(Entity::Booking, self.booking_id))?;

        if !(booking.is_owned_by(self.caller.user_id) || self.caller.is_admin()) {
            return Err(BookingError::PermissionDenied {
                action: "refund this payment",
            });
        }

        let mut payment = unit
            .tx()
            .lock_payment(self.payment_id)
            .await?
            .filter(|payment| payment.booking_id == booking.id)
            .ok_or_else(|| BookingError::not_found(Entity::Payment, self.payment_id))?;

        // A refund cancels the booking, so it obeys the same past-event rule.
        let tier = unit
            .tx()
            .lock_tier(booking.tier_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Tier, booking.tier_id))?;
        let event = self
            .calendar
            .event(tier.event_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Event, tier.event_id))?;
        booking::ensure_upcoming(&event, now, "refund bookings")?;

        let refund_reference = payment::refund(
            unit,
            self.gateway,
            &mut payment,
            &mut booking,
            &self.reason,
            now,
        )
        .await?;

        Ok(RefundReceipt {
            payment,
            booking,
            refund_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, Probability};
    use crate::gateway::SimulatedGateway;
    use crate::signals::{LogNotifier, NotifyError};
    use async_trait::async_trait;
    use boxoffice_memory::InMemoryStore;
    use boxoffice_types::{
        BookingReference, BookingStatus, EventId, EventListing, Money, Quantity, TicketTier,
        TierName, UserId,
    };
    use chrono::Duration;
    use tokio::sync::mpsc;

    struct Channel(mpsc::UnboundedSender<BookingConfirmation>);

    #[async_trait]
    impl Notifier for Channel {
        async fn booking_confirmed(&self, confirmation: BookingConfirmation) -> Result<(), NotifyError> {
            self.0
                .send(confirmation)
                .map_err(|error| NotifyError(error.to_string()))
        }
    }

    struct Fixture {
        store: InMemoryStore,
        customer: Caller,
        booking: Booking,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let event = EventListing {
            id: EventId::generate(),
            title: "Chamber Recital".to_string(),
            starts_at: Utc::now() + Duration::days(10),
            organizer_id: UserId::generate(),
        };
        let mut tier = TicketTier::new(
            event.id,
            TierName::try_new("Stalls".to_string()).unwrap(),
            Money::from_cents(5_000).unwrap(),
            10,
            Utc::now(),
        );
        tier.available_quantity = 8;
        let customer = Caller::customer(UserId::generate());
        let booking = Booking::pending(
            BookingReference::try_new("BKG-TEST0001".to_string()).unwrap(),
            customer.user_id,
            tier.id,
            Quantity::try_new(2).unwrap(),
            Money::from_cents(10_000).unwrap(),
            Utc::now(),
        );
        store.seed_event(event);
        store.seed_tier(tier);
        store.seed_booking(booking.clone());
        Fixture {
            store,
            customer,
            booking,
        }
    }

    fn coordinator(
        store: &InMemoryStore,
        success: Probability,
        notifier: Arc<dyn Notifier>,
    ) -> PaymentCoordinator<InMemoryStore> {
        PaymentCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(SimulatedGateway::new(GatewayConfig::instant(
                success,
                Probability::always(),
            ))),
            notifier,
            RetryPolicy::no_retries(),
            SignalBus::default(),
        )
    }

    fn card() -> PaymentMethod {
        PaymentMethod::try_new("credit_card".to_string()).unwrap()
    }

    #[tokio::test]
    async fn approved_charge_confirms_and_notifies() {
        let f = fixture();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let payments = coordinator(&f.store, Probability::always(), Arc::new(Channel(sender)));

        let receipt = payments
            .process_payment(f.customer, f.booking.id, card(), PaymentDetails::new())
            .await
            .unwrap();

        assert!(receipt.is_approved());
        assert_eq!(receipt.booking.status, BookingStatus::Confirmed);
        assert_eq!(receipt.payment.amount, f.booking.total_amount);

        let confirmation = tokio::time::timeout(std::time::Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmation.booking_id, f.booking.id);
        assert_eq!(confirmation.event_title, "Chamber Recital");
    }

    #[tokio::test]
    async fn declined_charge_is_recorded_and_booking_stays_pending() {
        let f = fixture();
        let payments = coordinator(&f.store, Probability::never(), Arc::new(LogNotifier));

        let receipt = payments
            .process_payment(f.customer, f.booking.id, card(), PaymentDetails::new())
            .await
            .unwrap();

        assert!(!receipt.is_approved());
        assert!(receipt.decline_reason.is_some());
        let stored = f.store.booking(f.booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        let history = f.store.payments_for_booking(f.booking.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn only_the_owner_can_pay() {
        let f = fixture();
        let payments = coordinator(&f.store, Probability::always(), Arc::new(LogNotifier));

        let error = payments
            .process_payment(
                Caller::customer(UserId::generate()),
                f.booking.id,
                card(),
                PaymentDetails::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            error,
            BookingError::PermissionDenied {
                action: "pay for this booking"
            }
        );
        assert!(f.store.payments_for_booking(f.booking.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_refund_cancels_and_restores_stock() {
        let f = fixture();
        let payments = coordinator(&f.store, Probability::always(), Arc::new(LogNotifier));
        let receipt = payments
            .process_payment(f.customer, f.booking.id, card(), PaymentDetails::new())
            .await
            .unwrap();

        let refund = payments
            .refund_payment(
                Caller::admin(UserId::generate()),
                receipt.payment.id,
                Reason::try_new("Event moved".to_string()).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(refund.payment.status, PaymentStatus::Refunded);
        assert_eq!(refund.booking.status, BookingStatus::Cancelled);
        assert!(refund.refund_reference.starts_with("RFD-"));
        let tier = f.store.tier(f.booking.tier_id).await.unwrap().unwrap();
        assert_eq!(tier.available_quantity, 10);
    }

    #[tokio::test]
    async fn refunding_twice_is_rejected() {
        let f = fixture();
        let payments = coordinator(&f.store, Probability::always(), Arc::new(LogNotifier));
        let receipt = payments
            .process_payment(f.customer, f.booking.id, card(), PaymentDetails::new())
            .await
            .unwrap();
        let reason = Reason::try_new("Changed plans".to_string()).unwrap();

        payments
            .refund_payment(f.customer, receipt.payment.id, reason.clone())
            .await
            .unwrap();
        let error = payments
            .refund_payment(f.customer, receipt.payment.id, reason)
            .await
            .unwrap_err();

        assert_eq!(error, BookingError::AlreadyRefunded);
    }

    #[tokio::test]
    async fn soft_deleted_booking_cannot_be_refunded() {
        let f = fixture();
        let payments = coordinator(&f.store, Probability::always(), Arc::new(LogNotifier));
        let receipt = payments
            .process_payment(f.customer, f.booking.id, card(), PaymentDetails::new())
            .await
            .unwrap();
        let mut deleted = receipt.booking.clone();
        deleted.deleted_at = Some(Utc::now());
        f.store.seed_booking(deleted);

        let error = payments
            .refund_payment(
                Caller::admin(UserId::generate()),
                receipt.payment.id,
                Reason::try_new("Cleanup".to_string()).unwrap(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.kind(), crate::errors::ErrorKind::NotFound);
        let stored = f.store.payment(receipt.payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        let tier = f.store.tier(f.booking.tier_id).await.unwrap().unwrap();
        assert_eq!(tier.available_quantity, 8);
    }
}
