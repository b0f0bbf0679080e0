//! Single entry point wiring the coordinators to one store.
//!
//! [`BoxOffice`] accepts raw caller input, validates it into domain types and
//! wraps every result in an [`Outcome`] envelope.

use boxoffice_types::{
    Booking, BookingId, EventCalendar, EventId, Money, Payment, PaymentDetails, PaymentId,
    PaymentMethod, Quantity, Reason, Store, TicketTier, TierId, TierName,
};
use std::sync::Arc;

use crate::caller::Caller;
use crate::catalog::{TierCatalog, TierChanges};
use crate::config::EngineConfig;
use crate::errors::{BookingError, ErrorKind};
use crate::executor::RetryPolicy;
use crate::gateway::{PaymentGateway, SimulatedGateway};
use crate::outcome::Outcome;
use crate::queries::{BookingQueries, BookingView, PaymentView};
use crate::reservation::{Cancellation, ReservationCoordinator};
use crate::settlement::{PaymentCoordinator, PaymentReceipt, RefundReceipt};
use crate::signals::{LogNotifier, Notifier, SignalBus};

/// Refund reason used when the caller supplies none.
pub const DEFAULT_REFUND_REASON: &str = "Customer request";

/// Builder for [`BoxOffice`].
pub struct BoxOfficeBuilder<S> {
    store: S,
    calendar: Arc<dyn EventCalendar>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: Option<Arc<dyn Notifier>>,
    retry: Option<RetryPolicy>,
    signals: Option<SignalBus>,
    config: EngineConfig,
}

impl<S: Store> BoxOfficeBuilder<S> {
    /// Payment processor; a [`SimulatedGateway`] built from the config by default.
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Confirmation channel; [`LogNotifier`] by default.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Overrides the policy derived from the engine config.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Shares an existing bus, e.g. one a cache already subscribes to.
    #[must_use]
    pub fn signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Engine config used for the default gateway and retry policy.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wires every coordinator to the one store.
    pub fn build(self) -> BoxOffice<S> {
        let store = Arc::new(self.store);
        let gateway = self
            .gateway
            .unwrap_or_else(|| Arc::new(SimulatedGateway::new(self.config.gateway.clone())));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let policy = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from(self.config.retry));
        let signals = self.signals.unwrap_or_default();

        BoxOffice {
            reservations: ReservationCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&self.calendar),
                Arc::clone(&gateway),
                policy.clone(),
                signals.clone(),
            ),
            payments: PaymentCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&self.calendar),
                gateway,
                notifier,
                policy.clone(),
                signals.clone(),
            ),
            catalog: TierCatalog::new(
                Arc::clone(&store),
                Arc::clone(&self.calendar),
                policy,
                signals.clone(),
            ),
            queries: BookingQueries::new(store),
            signals,
        }
    }
}

/// The booking engine.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use boxoffice::{BoxOffice, Caller};
/// use boxoffice::types::{EventId, EventListing, Money, UserId};
/// use boxoffice_memory::InMemoryStore;
/// use chrono::{Duration, Utc};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let organizer = Caller::organizer(UserId::generate());
/// let event = EventListing {
///     id: EventId::generate(),
///     title: "Late Show".to_string(),
///     starts_at: Utc::now() + Duration::days(7),
///     organizer_id: organizer.user_id,
/// };
/// store.seed_event(event.clone());
///
/// let office = BoxOffice::builder(store.clone(), Arc::new(store)).build();
/// let tier = office
///     .create_tier(organizer, event.id, "Balcony", Money::from_cents(4_000).unwrap(), 10)
///     .await
///     .into_data()
///     .unwrap();
///
/// let customer = Caller::customer(UserId::generate());
/// let booking = office.create_booking(customer, tier.id, 2).await;
/// assert!(booking.is_ok());
/// # });
/// ```
pub struct BoxOffice<S> {
    reservations: ReservationCoordinator<S>,
    payments: PaymentCoordinator<S>,
    catalog: TierCatalog<S>,
    queries: BookingQueries<S>,
    signals: SignalBus,
}

impl<S> Clone for BoxOffice<S> {
    fn clone(&self) -> Self {
        Self {
            reservations: self.reservations.clone(),
            payments: self.payments.clone(),
            catalog: self.catalog.clone(),
            queries: self.queries.clone(),
            signals: self.signals.clone(),
        }
    }
}

fn quantity(value: u32, field: &str) -> Result<Quantity, BookingError> {
    Quantity::try_new(value).map_err(|_| BookingError::invalid(field, "must be at least 1"))
}

impl<S: Store> BoxOffice<S> {
    /// Starts a builder over `store`, reading events from `calendar`.
    pub fn builder(store: S, calendar: Arc<dyn EventCalendar>) -> BoxOfficeBuilder<S> {
        BoxOfficeBuilder {
            store,
            calendar,
            gateway: None,
            notifier: None,
            retry: None,
            signals: None,
            config: EngineConfig::default(),
        }
    }

    /// Reservation coordinator, bypassing the [`Outcome`] envelope.
    pub const fn reservations(&self) -> &ReservationCoordinator<S> {
        &self.reservations
    }

    /// Payment coordinator.
    pub const fn payments(&self) -> &PaymentCoordinator<S> {
        &self.payments
    }

    /// Tier catalog.
    pub const fn catalog(&self) -> &TierCatalog<S> {
        &self.catalog
    }

    /// Read-only queries.
    pub const fn queries(&self) -> &BookingQueries<S> {
        &self.queries
    }

    /// Post-commit inventory and catalog signals.
    pub const fn signals(&self) -> &SignalBus {
        &self.signals
    }

    /// Books tickets for the calling customer. `quantity_requested` must be
    /// at least 1.
    pub async fn create_booking(
        &self,
        caller: Caller,
        tier_id: TierId,
        quantity_requested: u32,
    ) -> Outcome<Booking> {
        let result = match quantity(quantity_requested, "quantity") {
            Ok(quantity) => {
                self.reservations
                    .create_booking(caller, tier_id, quantity)
                    .await
            }
            Err(error) => Err(error),
        };
        Outcome::from_result(result, "Booking created successfully")
    }

    /// Cancels a booking, refunding it first when it was paid.
    pub async fn cancel_booking(&self, caller: Caller, booking_id: BookingId) -> Outcome<Cancellation> {
        Outcome::from_result(
            self.reservations.cancel_booking(caller, booking_id).await,
            "Booking cancelled successfully",
        )
    }

    /// Charges a pending booking.
    ///
    /// A declined charge is a failed outcome of kind `PaymentDeclined`, even
    /// though the failed attempt was committed; the receipt rides along as
    /// [`Outcome::failure_data`].
    pub async fn process_payment(
        &self,
        caller: Caller,
        booking_id: BookingId,
        method: &str,
        details: PaymentDetails,
    ) -> Outcome<PaymentReceipt> {
        let method = match PaymentMethod::try_new(method.to_string()) {
            Ok(method) => method,
            Err(error) => {
                return Outcome::from_result(
                    Err(BookingError::invalid("payment_method", error.to_string())),
                    "",
                )
            }
        };

        match self
            .payments
            .process_payment(caller, booking_id, method, details)
            .await
        {
            Ok(receipt) if receipt.is_approved() => {
                Outcome::success("Payment processed successfully", receipt)
            }
            Ok(receipt) => {
                let message = format!(
                    "Payment failed: {}",
                    receipt.decline_reason.as_deref().unwrap_or_default()
                );
                Outcome::failure_with(ErrorKind::PaymentDeclined, message, receipt)
            }
            Err(error) => Outcome::from_result(Err(error), ""),
        }
    }

    /// Refunds a successful payment and cancels its booking. Without a
    /// `reason`, [`DEFAULT_REFUND_REASON`] is recorded.
    pub async fn refund_payment(
        &self,
        caller: Caller,
        payment_id: PaymentId,
        reason: Option<&str>,
    ) -> Outcome<RefundReceipt> {
        let reason = reason.unwrap_or(DEFAULT_REFUND_REASON);
        let result = match Reason::try_new(reason.to_string()) {
            Ok(reason) => self.payments.refund_payment(caller, payment_id, reason).await,
            Err(error) => Err(BookingError::invalid("reason", error.to_string())),
        };
        Outcome::from_result(result, "Payment refunded successfully")
    }

    /// A payment and its booking.
    pub async fn payment_status(&self, caller: Caller, payment_id: PaymentId) -> Outcome<PaymentView> {
        Outcome::from_result(
            self.queries.payment_status(caller, payment_id).await,
            "Payment details retrieved successfully",
        )
    }

    /// A booking with its tier and payments.
    pub async fn booking_details(&self, caller: Caller, booking_id: BookingId) -> Outcome<BookingView> {
        Outcome::from_result(
            self.queries.booking_details(caller, booking_id).await,
            "Booking details retrieved successfully",
        )
    }

    /// The caller's bookings, newest first.
    pub async fn customer_bookings(&self, caller: Caller) -> Outcome<Vec<Booking>> {
        Outcome::from_result(
            self.queries.customer_bookings(caller).await,
            "Bookings retrieved successfully",
        )
    }

    /// Charge attempts for one booking, newest first.
    pub async fn payment_history(&self, caller: Caller, booking_id: BookingId) -> Outcome<Vec<Payment>> {
        Outcome::from_result(
            self.queries.payment_history(caller, booking_id).await,
            "Payment history retrieved successfully",
        )
    }

    /// Opens a tier. Name and quantity problems are reported together.
    pub async fn create_tier(
        &self,
        caller: Caller,
        event_id: EventId,
        name: &str,
        price: Money,
        total_quantity: u32,
    ) -> Outcome<TicketTier> {
        let mut errors = Vec::new();
        let name = TierName::try_new(name.to_string())
            .map_err(|error| errors.push(crate::errors::FieldError::new("name", error.to_string())))
            .ok();
        let total = quantity(total_quantity, "quantity")
            .map_err(|error| errors.extend_from_slice(error.field_errors()))
            .ok();

        let result = match (name, total) {
            (Some(name), Some(total)) => {
                self.catalog
                    .create_tier(caller, event_id, name, price, total)
                    .await
            }
            _ => Err(BookingError::Validation { errors }),
        };
        Outcome::from_result(result, "Ticket created successfully")
    }

    /// Edits a tier; see [`TierCatalog::update_tier`].
    pub async fn update_tier(
        &self,
        caller: Caller,
        tier_id: TierId,
        changes: TierChanges,
    ) -> Outcome<TicketTier> {
        Outcome::from_result(
            self.catalog.update_tier(caller, tier_id, changes).await,
            "Ticket updated successfully",
        )
    }

    /// Retires a tier; see [`TierCatalog::retire_tier`].
    pub async fn retire_tier(&self, caller: Caller, tier_id: TierId) -> Outcome<TicketTier> {
        Outcome::from_result(
            self.catalog.retire_tier(caller, tier_id).await,
            "Ticket deleted successfully",
        )
    }
}
