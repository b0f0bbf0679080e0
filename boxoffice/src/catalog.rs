//! Tier catalog administration for organizers and admins.
//!
//! Stock totals only change through the ledger. Descriptive edits (name,
//! price) never touch existing bookings, whose totals were fixed at creation.

use boxoffice_types::{
    BookingStatus, EventCalendar, EventId, EventListing, Money, Quantity, Store, TicketTier,
    TierId, TierName, Transaction,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::caller::Caller;
use crate::errors::{logged, BookingError, Entity};
use crate::executor::{execute, RetryPolicy, Unit, UnitOfWork};
use crate::ledger;
use crate::signals::{Signal, SignalBus};

/// Partial update of a tier. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierChanges {
    /// New display name.
    pub name: Option<TierName>,
    /// New unit price for future bookings.
    pub price: Option<Money>,
    /// New capacity; stock moves by the same delta.
    pub total_quantity: Option<Quantity>,
}

impl TierChanges {
    /// Nothing to change.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.total_quantity.is_none()
    }
}

/// Creates, edits and retires ticket tiers.
pub struct TierCatalog<S> {
    store: Arc<S>,
    calendar: Arc<dyn EventCalendar>,
    policy: RetryPolicy,
    signals: SignalBus,
}

impl<S> Clone for TierCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            calendar: Arc::clone(&self.calendar),
            policy: self.policy.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<S: Store> TierCatalog<S> {
    /// Catalog over `store`, checking event ownership through `calendar`.
    pub fn new(
        store: Arc<S>,
        calendar: Arc<dyn EventCalendar>,
        policy: RetryPolicy,
        signals: SignalBus,
    ) -> Self {
        Self {
            store,
            calendar,
            policy,
            signals,
        }
    }

    /// Adds a tier with its full capacity available.
    ///
    /// Only the event's organizer or an admin may add tiers, and never to an
    /// event that has already started.
    #[instrument(
        name = "catalog.create_tier",
        skip(self),
        fields(caller = %caller.user_id, event = %event_id)
    )]
    pub async fn create_tier(
        &self,
        caller: Caller,
        event_id: EventId,
        name: TierName,
        price: Money,
        quantity: Quantity,
    ) -> Result<TicketTier, BookingError> {
        let unit = CreateTier {
            calendar: self.calendar.as_ref(),
            caller,
            event_id,
            name,
            price,
            quantity,
        };
        let tier = self.commit("create_tier", &unit).await?;
        info!(tier = %tier.id, total = tier.total_quantity, "[catalog.create_tier] tier created");
        Ok(tier)
    }

    /// Applies `changes` to a live tier.
    ///
    /// A new total below the booked quantity fails with
    /// `QuantityBelowBooked`; available stock moves by the same delta as
    /// the total.
    #[instrument(
        name = "catalog.update_tier",
        skip(self),
        fields(caller = %caller.user_id, tier = %tier_id)
    )]
    pub async fn update_tier(
        &self,
        caller: Caller,
        tier_id: TierId,
        changes: TierChanges,
    ) -> Result<TicketTier, BookingError> {
        let unit = UpdateTier {
            calendar: self.calendar.as_ref(),
            caller,
            tier_id,
            changes,
        };
        let tier = self.commit("update_tier", &unit).await?;
        info!(
            total = tier.total_quantity,
            available = tier.available_quantity,
            "[catalog.update_tier] tier updated"
        );
        Ok(tier)
    }

    /// Retires a tier so it no longer accepts bookings.
    ///
    /// Refused while any confirmed booking references it. Pending and
    /// cancelled bookings stay attached to the retired row.
    #[instrument(
        name = "catalog.retire_tier",
        skip(self),
        fields(caller = %caller.user_id, tier = %tier_id)
    )]
    pub async fn retire_tier(
        &self,
        caller: Caller,
        tier_id: TierId,
    ) -> Result<TicketTier, BookingError> {
        let unit = RetireTier {
            calendar: self.calendar.as_ref(),
            caller,
            tier_id,
        };
        let tier = self.commit("retire_tier", &unit).await?;
        info!("[catalog.retire_tier] tier retired");
        Ok(tier)
    }

    async fn commit<U>(&self, operation: &'static str, unit: &U) -> Result<TicketTier, BookingError>
    where
        U: UnitOfWork<Output = TicketTier>,
    {
        let tier = logged(
            operation,
            execute(self.store.as_ref(), unit, &self.policy).await,
        )?;
        self.signals.emit(Signal::CatalogChanged {
            event_id: tier.event_id,
            tier_id: tier.id,
        });
        Ok(tier)
    }
}

async fn administered_event(
    calendar: &dyn EventCalendar,
    caller: Caller,
    event_id: EventId,
    action: &'static str,
) -> Result<EventListing, BookingError> {
    let event = calendar
        .event(event_id)
        .await?
        .ok_or_else(|| BookingError::not_found(Entity::Event, event_id))?;
    if !caller.can_administer(&event) {
        return Err(BookingError::PermissionDenied { action });
    }
    Ok(event)
}

async fn live_tier<T: Transaction>(tx: &mut T, tier_id: TierId) -> Result<TicketTier, BookingError> {
    tx.lock_tier(tier_id)
        .await?
        .filter(|tier| !tier.is_retired())
        .ok_or_else(|| BookingError::not_found(Entity::Tier, tier_id))
}

struct CreateTier<'a> {
    calendar: &'a dyn EventCalendar,
    caller: Caller,
    event_id: EventId,
    name: TierName,
    price: Money,
    quantity: Quantity,
}

impl UnitOfWork for CreateTier<'_> {
    type Output = TicketTier;

    fn name(&self) -> &'static str {
        "create_tier"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<TicketTier, BookingError> {
        let event = administered_event(
            self.calendar,
            self.caller,
            self.event_id,
            "add tickets to this event",
        )
        .await?;

        let tier = TicketTier::new(
            event.id,
            self.name.clone(),
            self.price,
            self.quantity.into_inner(),
            Utc::now(),
        );
        unit.tx().insert_tier(&tier).await?;
        Ok(tier)
    }
}

struct UpdateTier<'a> {
    calendar: &'a dyn EventCalendar,
    caller: Caller,
    tier_id: TierId,
    changes: TierChanges,
}

impl UnitOfWork for UpdateTier<'_> {
    type Output = TicketTier;

    fn name(&self) -> &'static str {
        "update_tier"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<TicketTier, BookingError> {
        if self.changes.is_empty() {
            return Err(BookingError::invalid("changes", "at least one field must be provided"));
        }

        let tier = live_tier(unit.tx(), self.tier_id).await?;
        let _ = administered_event(self.calendar, self.caller, tier.event_id, "update this ticket")
            .await?;

        if let Some(total) = self.changes.total_quantity {
            if !ledger::resize(unit.tx(), tier.id, total.into_inner()).await? {
                return Err(BookingError::QuantityBelowBooked {
                    booked: tier.booked_quantity(),
                });
            }
        }

        if self.changes.name.is_some() || self.changes.price.is_some() {
            let mut edited = tier.clone();
            if let Some(name) = &self.changes.name {
                edited.name = name.clone();
            }
            if let Some(price) = self.changes.price {
                edited.price = price;
            }
            unit.tx().update_tier(&edited).await?;
        }

        live_tier(unit.tx(), self.tier_id).await
    }
}

struct RetireTier<'a> {
    calendar: &'a dyn EventCalendar,
    caller: Caller,
    tier_id: TierId,
}

impl UnitOfWork for RetireTier<'_> {
    type Output = TicketTier;

    fn name(&self) -> &'static str {
        "retire_tier"
    }

    async fn run<T: Transaction>(&self, unit: &mut Unit<T>) -> Result<TicketTier, BookingError> {
        let mut tier = live_tier(unit.tx(), self.tier_id).await?;
        let _ = administered_event(self.calendar, self.caller, tier.event_id, "delete this ticket")
            .await?;

        if unit
            .tx()
            .tier_has_bookings_in(tier.id, BookingStatus::Confirmed)
            .await?
        {
            return Err(BookingError::TierHasConfirmedBookings);
        }

        tier.retired_at = Some(Utc::now());
        unit.tx().update_tier(&tier).await?;
        Ok(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_memory::InMemoryStore;
    use boxoffice_types::{Booking, BookingReference, UserId};
    use chrono::Duration;

    struct Fixture {
        store: InMemoryStore,
        catalog: TierCatalog<InMemoryStore>,
        organizer: Caller,
        event: EventListing,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let organizer = Caller::organizer(UserId::generate());
        let event = EventListing {
            id: EventId::generate(),
            title: "Film Festival".to_string(),
            starts_at: Utc::now() + Duration::days(30),
            organizer_id: organizer.user_id,
        };
        store.seed_event(event.clone());
        let catalog = TierCatalog::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            RetryPolicy::no_retries(),
            SignalBus::default(),
        );
        Fixture {
            store,
            catalog,
            organizer,
            event,
        }
    }

    fn name(value: &str) -> TierName {
        TierName::try_new(value.to_string()).unwrap()
    }

    fn qty(n: u32) -> Quantity {
        Quantity::try_new(n).unwrap()
    }

    async fn tier_with_booking(f: &Fixture, status: BookingStatus) -> TicketTier {
        let tier = f
            .catalog
            .create_tier(
                f.organizer,
                f.event.id,
                name("Pass"),
                Money::from_cents(9_900).unwrap(),
                qty(10),
            )
            .await
            .unwrap();
        let mut booked = tier.clone();
        booked.available_quantity = 6;
        f.store.seed_tier(booked);

        let mut booking = Booking::pending(
            BookingReference::try_new("BKG-CATALOG1".to_string()).unwrap(),
            UserId::generate(),
            tier.id,
            qty(4),
            Money::from_cents(39_600).unwrap(),
            Utc::now(),
        );
        booking.status = status;
        f.store.seed_booking(booking);
        tier
    }

    #[tokio::test]
    async fn organizer_creates_tier_for_own_event() {
        let f = fixture();

        let tier = f
            .catalog
            .create_tier(
                f.organizer,
                f.event.id,
                name("Early Bird"),
                Money::from_cents(2_000).unwrap(),
                qty(50),
            )
            .await
            .unwrap();

        assert_eq!(tier.available_quantity, 50);
        assert_eq!(f.store.tier(tier.id).await.unwrap(), Some(tier));
    }

    #[tokio::test]
    async fn other_organizers_are_refused() {
        let f = fixture();

        let error = f
            .catalog
            .create_tier(
                Caller::organizer(UserId::generate()),
                f.event.id,
                name("Sneaky"),
                Money::from_cents(100).unwrap(),
                qty(1),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, BookingError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn shrinking_below_booked_is_refused() {
        let f = fixture();
        let tier = tier_with_booking(&f, BookingStatus::Confirmed).await;

        let error = f
            .catalog
            .update_tier(
                f.organizer,
                tier.id,
                TierChanges {
                    total_quantity: Some(qty(3)),
                    ..TierChanges::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(error, BookingError::QuantityBelowBooked { booked: 4 });
    }

    #[tokio::test]
    async fn resizing_moves_available_by_the_same_delta() {
        let f = fixture();
        let tier = tier_with_booking(&f, BookingStatus::Pending).await;

        let updated = f
            .catalog
            .update_tier(
                f.organizer,
                tier.id,
                TierChanges {
                    name: Some(name("Weekend Pass")),
                    total_quantity: Some(qty(12)),
                    ..TierChanges::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.total_quantity, 12);
        assert_eq!(updated.available_quantity, 8);
        assert_eq!(updated.name, name("Weekend Pass"));
    }

    #[tokio::test]
    async fn confirmed_bookings_block_retirement() {
        let f = fixture();
        let tier = tier_with_booking(&f, BookingStatus::Confirmed).await;

        let error = f
            .catalog
            .retire_tier(f.organizer, tier.id)
            .await
            .unwrap_err();

        assert_eq!(error, BookingError::TierHasConfirmedBookings);
    }

    #[tokio::test]
    async fn retired_tiers_disappear_from_the_catalog() {
        let f = fixture();
        let tier = tier_with_booking(&f, BookingStatus::Pending).await;

        let retired = f.catalog.retire_tier(f.organizer, tier.id).await.unwrap();
        assert!(retired.is_retired());

        let error = f
            .catalog
            .update_tier(
                f.organizer,
                tier.id,
                TierChanges {
                    price: Some(Money::from_cents(1).unwrap()),
                    ..TierChanges::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            BookingError::NotFound {
                entity: Entity::Tier,
                ..
            }
        ));
    }
}
