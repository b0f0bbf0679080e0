//! Reservation coordinator: booking creation and customer cancellation.
//!
//! Both operations run as one unit of work. Locks are taken in the order
//! booking, payment, tier, which every other unit in the engine follows.

use boxoffice_types::{
    Booking, BookingId, EventCalendar, Quantity, Reason, Store, TierId, Transaction, UserId,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::booking;
use crate::caller::{Caller, Role};
use crate::errors::{logged, BookingError, Entity};
use crate::executor::{execute, RetryPolicy, Unit, UnitOfWork};
use crate::gateway::PaymentGateway;
use crate::ledger;
use crate::payment;
use crate::signals::{Signal, SignalBus};

/// Refund reason recorded when a customer cancels a paid booking.
pub const CANCELLATION_REASON: &str = "Cancelled by customer";

/// Result of a successful cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    /// The booking, now cancelled.
    pub booking: Booking,
    /// Gateway reference of the refund, when the booking had been paid.
    pub refund_reference: Option<String>,
}

impl Cancellation {
    /// Whether money went back to the customer.
    pub const fn was_refunded(&self) -> bool {
        self.refund_reference.is_some()
    }
}

/// Creates and cancels bookings.
pub struct ReservationCoordinator<S> {
    store: Arc<S>,
    calendar: Arc<dyn EventCalendar>,
    gateway: Arc<dyn PaymentGateway>,
    policy: RetryPolicy,
    signals: SignalBus,
}

impl<S> Clone for ReservationCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            calendar: Arc::clone(&self.calendar),
            gateway: Arc::clone(&self.gateway),
            policy: self.policy.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<S: Store> ReservationCoordinator<S> {
    /// Coordinator over `store`; `gateway` is used for refunds on cancel.
    pub fn new(
        store: Arc<S>,
        calendar: Arc<dyn EventCalendar>,
        gateway: Arc<dyn PaymentGateway>,
        policy: RetryPolicy,
        signals: SignalBus,
    ) -> Self {
        Self {
            store,
            calendar,
            gateway,
            policy,
            signals,
        }
    }

    /// Books `quantity` tickets of `tier_id` for the calling customer.
    ///
    /// The booking row and the stock decrement commit together or not at
    /// all. The new booking is `pending` until a payment confirms it.
    #[instrument(
        name = "reservation.create_booking",
        skip(self),
        fields(customer = %caller.user_id, tier = %tier_id, quantity = %quantity)
    )]
    pub async fn create_booking(
        &self,
        caller: Caller,
        tier_id: TierId,
        quantity: Quantity,
    ) -> Result<Booking, BookingError> {
        let result = if caller.role == Role::Customer {
            let unit = CreateBooking {
                calendar: self.calendar.as_ref(),
                customer: caller.user_id,
                tier_id,
                quantity,
            };
            execute(self.store.as_ref(), &unit, &self.policy).await
        } else {
            Err(BookingError::PermissionDenied {
                action: "book tickets",
            })
        };

        let booking = logged("create_booking", result)?;
        self.signals.emit(Signal::InventoryChanged { tier_id });
        info!(
            booking = %booking.id,
            reference = %booking.reference,
            total = %booking.total_amount,
            "[reservation.create_booking] booking created"
        );
        Ok(booking)
    }

    /// Cancels one of the caller's bookings, refunding it first if paid.
    ///
    /// A declined refund aborts the cancellation: the booking keeps its
    /// status and no stock is released.
    #[instrument(
        name = "reservation.cancel_booking",
        skip(self),
        fields(customer = %caller.user_id, booking = %booking_id)
    )]
    pub async fn cancel_booking(
        &self,
        caller: Caller,
        booking_id: BookingId,
    ) -> Result<Cancellation, BookingError> {
        let unit = CancelBooking {
            calendar: self.calendar.as_ref(),
            gateway: self.gateway.as_ref(),
            customer: caller.user_id,
            booking_id,
        };
        let cancellation = logged(
            "cancel_booking",
            execute(self.store.as_ref(), &unit, &self.policy).await,
        )?;

        self.signals.emit(Signal::InventoryChanged {
            tier_id: cancellation.booking.tier_id,
        });
        info!(
            refunded = cancellation.was_refunded(),
            released = %cancellation.booking.quantity,
            "[reservation.cancel_booking] booking cancelled"
        );
        Ok(cancellation)
    }
}

struct CreateBooking<'a> {
    calendar: &'a dyn EventCalendar,
    customer: UserId,
    tier_id: TierId,
    quantity: Quantity,
}

impl UnitOfWork for CreateBooking<'_> {
    type Output = Booking;

    fn name(&self) -> &'static str {
        "create_booking"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<Booking, BookingError> {
        let now = Utc::now();
        let tier = unit
            .tx()
            .lock_tier(self.tier_id)
            .await?
            .filter(|tier| !tier.is_retired())
            .ok_or_else(|| BookingError::not_found(Entity::Tier, self.tier_id))?;
        let event = self
            .calendar
            .event(tier.event_id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Event, tier.event_id))?;

        let booking =
            booking::create(unit.tx(), &event, &tier, self.customer, self.quantity, now).await?;

        if !ledger::reserve(unit.tx(), tier.id, self.quantity).await? {
            return Err(BookingError::InsufficientInventory {
                requested: self.quantity.into_inner(),
                available: tier.available_quantity,
            });
        }
        Ok(booking)
    }
}

struct CancelBooking<'a> {
    calendar: &'a dyn EventCalendar,
    gateway: &'a dyn PaymentGateway,
    customer: UserId,
    booking_id: BookingId,
}

impl UnitOfWork for CancelBooking<'_> {
    type Output = Cancellation;

    fn name(&self) -> &'static str {
        "cancel_booking"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<Cancellation, BookingError> {
        let now = Utc::now();
        let mut booking = unit
            .tx()
            .lock_booking(self.booking_id)
            .await?
            .filter(|booking| booking.deleted_at.is_none())
            .ok_or_else(|| BookingError::not_found(Entity::Booking, self.booking_id))?;

        if !booking.is_owned_by(self.customer) {
            return Err(BookingError::PermissionDenied {
                action: "cancel this booking",
            });
        }
        if !booking.status.is_active() {
            return Err(BookingError::AlreadyCancelled);
        }

        let paid = match unit.tx().latest_successful_payment(booking.id).await? {
            Some(found) => unit
                .tx()
                .lock_payment(found.id)
                .await?
                .filter(boxoffice_types::Payment::is_successful),
            None => None,
        };

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
        booking::ensure_upcoming(&event, now, "cancel bookings")?;

        let refund_reference = match paid {
            Some(mut payment) => {
                let reason = Reason::try_new(CANCELLATION_REASON.to_string())
                    .map_err(|error| BookingError::Internal {
                        detail: error.to_string(),
                    })?;
                let reference =
                    payment::refund(unit, self.gateway, &mut payment, &mut booking, &reason, now)
                        .await?;
                Some(reference)
            }
            None => {
                booking::cancel(unit.tx(), &mut booking, now).await?;
                None
            }
        };

        Ok(Cancellation {
            booking,
            refund_reference,
        })
    }
}
