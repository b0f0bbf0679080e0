//! In-memory adapter for the `BoxOffice` booking engine
//!
//! This crate provides an in-memory implementation of the `Store`,
//! `Transaction` and `EventCalendar` traits from `boxoffice-types`, useful
//! for testing and development scenarios where persistence is not required.
//!
//! Row locks are per-row async mutexes whose owned guards live in the
//! transaction, so they are released on commit, rollback or drop. Writes are
//! staged in the transaction and applied to the shared tables in one step at
//! commit, after the uniqueness constraints have been checked.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use boxoffice_types::{
    Booking, BookingId, BookingReference, BookingStatus, EventCalendar, EventId, EventListing,
    Operation, Payment, PaymentId, PaymentStatus, RowRef, Store, StoreError, TicketTier, TierId,
    Transaction, TransactionReference, UserId, ACTIVE_BOOKING_CONSTRAINT,
    BOOKING_REFERENCE_CONSTRAINT, TRANSACTION_REFERENCE_CONSTRAINT,
};
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

#[derive(Default)]
struct Tables {
    events: HashMap<EventId, EventListing>,
    tiers: HashMap<TierId, TicketTier>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
}

struct Shared {
    tables: RwLock<Tables>,
    // One async mutex per row ever locked.
    row_locks: Mutex<HashMap<RowRef, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Option<Duration>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_mutex(&self, row: RowRef) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(row).or_default())
    }

    /// Drops the mutexes of `rows` that nobody holds or waits on.
    fn forget_idle(&self, rows: impl IntoIterator<Item = RowRef>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for row in rows {
            if locks
                .get(&row)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
            {
                let _ = locks.remove(&row);
            }
        }
    }
}

/// Thread-safe in-memory store for testing
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Create a new empty store whose lock waits never time out
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a new empty store that fails lock waits after `timeout`
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Adds or replaces an event listing
    pub fn seed_event(&self, event: EventListing) {
        let _ = self.shared.write().events.insert(event.id, event);
    }

    /// Moves an event's start time, e.g. to put it in the past
    pub fn reschedule_event(&self, id: EventId, starts_at: DateTime<Utc>) {
        if let Some(event) = self.shared.write().events.get_mut(&id) {
            event.starts_at = starts_at;
        }
    }

    /// Adds or replaces a tier, bypassing transactions
    pub fn seed_tier(&self, tier: TicketTier) {
        let _ = self.shared.write().tiers.insert(tier.id, tier);
    }

    /// Adds or replaces a booking, bypassing transactions
    pub fn seed_booking(&self, booking: Booking) {
        let _ = self.shared.write().bookings.insert(booking.id, booking);
    }

    /// Adds or replaces a payment, bypassing transactions
    pub fn seed_payment(&self, payment: Payment) {
        let _ = self.shared.write().payments.insert(payment.id, payment);
    }

    /// Every committed booking for a tier, in no particular order
    pub fn bookings_for_tier(&self, tier: TierId) -> Vec<Booking> {
        self.shared
            .read()
            .bookings
            .values()
            .filter(|booking| booking.tier_id == tier)
            .cloned()
            .collect()
    }

    /// Every committed payment, in no particular order
    pub fn all_payments(&self) -> Vec<Payment> {
        self.shared.read().payments.values().cloned().collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, String)) {
    rows.sort_by_key(|row| std::cmp::Reverse(key(row)));
}

impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        trace!("[memory.begin] transaction started");
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            staged: Staged::default(),
        })
    }

    async fn tier(&self, id: TierId) -> Result<Option<TicketTier>, StoreError> {
        Ok(self.shared.read().tiers.get(&id).cloned())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.shared.read().bookings.get(&id).cloned())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.shared.read().payments.get(&id).cloned())
    }

    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self
            .shared
            .read()
            .payments
            .values()
            .filter(|payment| payment.booking_id == booking)
            .cloned()
            .collect();
        newest_first(&mut payments, |payment| {
            (payment.created_at, payment.id.to_string())
        });
        Ok(payments)
    }

    async fn bookings_for_customer(&self, customer: UserId) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .shared
            .read()
            .bookings
            .values()
            .filter(|booking| booking.customer_id == customer && booking.deleted_at.is_none())
            .cloned()
            .collect();
        newest_first(&mut bookings, |booking| {
            (booking.created_at, booking.id.to_string())
        });
        Ok(bookings)
    }
}

#[async_trait]
impl EventCalendar for InMemoryStore {
    async fn event(&self, id: EventId) -> Result<Option<EventListing>, StoreError> {
        Ok(self.shared.read().events.get(&id).cloned())
    }
}

#[derive(Default)]
struct Staged {
    tiers: HashMap<TierId, TicketTier>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
    // Rows created by this transaction need no lock to be modified.
    inserted: Vec<RowRef>,
}

/// Transaction over an [`InMemoryStore`]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<RowRef, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, row: RowRef, operation: Operation) -> Result<(), StoreError> {
        if self.held.contains_key(&row) {
            return Ok(());
        }

        let mutex = self.shared.row_mutex(row);
        let guard = match self.shared.lock_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.shared.forget_idle([row]);
                    return Err(StoreError::LockTimeout { operation });
                }
            },
            None => mutex.lock_owned().await,
        };
        trace!(%row, "[memory.acquire] row locked");
        let _ = self.held.insert(row, guard);
        Ok(())
    }

    fn may_modify(&self, row: RowRef) -> Result<(), StoreError> {
        if self.held.contains_key(&row) || self.staged.inserted.contains(&row) {
            Ok(())
        } else {
            Err(StoreError::RowNotLocked { row })
        }
    }

    fn current_tier(&self, id: TierId) -> Option<TicketTier> {
        self.staged
            .tiers
            .get(&id)
            .cloned()
            .or_else(|| self.shared.read().tiers.get(&id).cloned())
    }

    fn current_booking(&self, id: BookingId) -> Option<Booking> {
        self.staged
            .bookings
            .get(&id)
            .cloned()
            .or_else(|| self.shared.read().bookings.get(&id).cloned())
    }

    fn current_payment(&self, id: PaymentId) -> Option<Payment> {
        self.staged
            .payments
            .get(&id)
            .cloned()
            .or_else(|| self.shared.read().payments.get(&id).cloned())
    }

    /// Committed bookings overlaid with this transaction's staged ones.
    fn visible_bookings(&self) -> Vec<Booking> {
        let tables = self.shared.read();
        tables
            .bookings
            .values()
            .filter(|booking| !self.staged.bookings.contains_key(&booking.id))
            .chain(self.staged.bookings.values())
            .cloned()
            .collect()
    }

    fn visible_payments(&self) -> Vec<Payment> {
        let tables = self.shared.read();
        tables
            .payments
            .values()
            .filter(|payment| !self.staged.payments.contains_key(&payment.id))
            .chain(self.staged.payments.values())
            .cloned()
            .collect()
    }

    fn locked_tier(&self, id: TierId) -> Result<TicketTier, StoreError> {
        self.may_modify(RowRef::Tier(id))?;
        self.current_tier(id).ok_or_else(|| StoreError::Corrupt {
            detail: format!("locked tier {id} has no row"),
        })
    }

    fn stage_tier(&mut self, tier: TicketTier) {
        let _ = self.staged.tiers.insert(tier.id, tier);
    }

    fn apply(&mut self) -> Result<(), StoreError> {
        let mut tables = self.shared.write();
        let staged = std::mem::take(&mut self.staged);

        for booking in staged.bookings.values() {
            let others = tables
                .bookings
                .values()
                .filter(|other| !staged.bookings.contains_key(&other.id))
                .chain(staged.bookings.values())
                .filter(|other| other.id != booking.id);
            for other in others {
                if other.reference == booking.reference {
                    return Err(unique(BOOKING_REFERENCE_CONSTRAINT));
                }
                if booking.is_active()
                    && other.is_active()
                    && other.customer_id == booking.customer_id
                    && other.tier_id == booking.tier_id
                {
                    return Err(unique(ACTIVE_BOOKING_CONSTRAINT));
                }
            }
        }

        for payment in staged.payments.values() {
            let clash = tables
                .payments
                .values()
                .filter(|other| !staged.payments.contains_key(&other.id))
                .chain(staged.payments.values())
                .any(|other| {
                    other.id != payment.id
                        && other.transaction_reference == payment.transaction_reference
                });
            if clash {
                return Err(unique(TRANSACTION_REFERENCE_CONSTRAINT));
            }
        }

        let written = staged.tiers.len() + staged.bookings.len() + staged.payments.len();
        tables.tiers.extend(staged.tiers);
        tables.bookings.extend(staged.bookings);
        tables.payments.extend(staged.payments);
        debug!(rows = written, "[memory.commit] transaction committed");
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        let rows: Vec<RowRef> = self.held.keys().copied().collect();
        self.held.clear();
        self.shared.forget_idle(rows);
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

impl Transaction for InMemoryTransaction {
    async fn lock_tier(&mut self, id: TierId) -> Result<Option<TicketTier>, StoreError> {
        if self.current_tier(id).is_none() {
            return Ok(None);
        }
        self.acquire(RowRef::Tier(id), Operation::LockTier).await?;
        Ok(self.current_tier(id))
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        if self.current_booking(id).is_none() {
            return Ok(None);
        }
        self.acquire(RowRef::Booking(id), Operation::LockBooking)
            .await?;
        Ok(self.current_booking(id))
    }

    async fn lock_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        if self.current_payment(id).is_none() {
            return Ok(None);
        }
        self.acquire(RowRef::Payment(id), Operation::LockPayment)
            .await?;
        Ok(self.current_payment(id))
    }

    async fn find_active_booking(
        &mut self,
        customer: UserId,
        tier: TierId,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self.visible_bookings().into_iter().find(|booking| {
            booking.is_active() && booking.customer_id == customer && booking.tier_id == tier
        }))
    }

    async fn tier_has_bookings_in(
        &mut self,
        tier: TierId,
        status: BookingStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.visible_bookings().iter().any(|booking| {
            booking.tier_id == tier && booking.status == status && booking.deleted_at.is_none()
        }))
    }

    async fn latest_successful_payment(
        &mut self,
        booking: BookingId,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .visible_payments()
            .into_iter()
            .filter(|payment| payment.booking_id == booking && payment.status == PaymentStatus::Success)
            .max_by_key(|payment| (payment.created_at, payment.id.to_string())))
    }

    async fn booking_reference_taken(
        &mut self,
        reference: &BookingReference,
    ) -> Result<bool, StoreError> {
        Ok(self
            .visible_bookings()
            .iter()
            .any(|booking| &booking.reference == reference))
    }

    async fn transaction_reference_taken(
        &mut self,
        reference: &TransactionReference,
    ) -> Result<bool, StoreError> {
        Ok(self
            .visible_payments()
            .iter()
            .any(|payment| &payment.transaction_reference == reference))
    }

    async fn insert_tier(&mut self, tier: &TicketTier) -> Result<(), StoreError> {
        if self.current_tier(tier.id).is_some() {
            return Err(unique("ticket_tiers_pkey"));
        }
        self.staged.inserted.push(RowRef::Tier(tier.id));
        self.stage_tier(tier.clone());
        Ok(())
    }

    async fn update_tier(&mut self, tier: &TicketTier) -> Result<(), StoreError> {
        let mut current = self.locked_tier(tier.id)?;
        current.name = tier.name.clone();
        current.price = tier.price;
        current.retired_at = tier.retired_at;
        self.stage_tier(current);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if self.current_booking(booking.id).is_some() {
            return Err(unique("bookings_pkey"));
        }
        self.staged.inserted.push(RowRef::Booking(booking.id));
        let _ = self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.may_modify(RowRef::Booking(booking.id))?;
        let _ = self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if self.current_payment(payment.id).is_some() {
            return Err(unique("payments_pkey"));
        }
        self.staged.inserted.push(RowRef::Payment(payment.id));
        let _ = self.staged.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.may_modify(RowRef::Payment(payment.id))?;
        let _ = self.staged.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn decrement_available(&mut self, tier: TierId, quantity: u32) -> Result<bool, StoreError> {
        let mut current = self.locked_tier(tier)?;
        match current.available_quantity.checked_sub(quantity) {
            Some(remaining) => {
                current.available_quantity = remaining;
                self.stage_tier(current);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_available(&mut self, tier: TierId, quantity: u32) -> Result<(), StoreError> {
        let mut current = self.locked_tier(tier)?;
        let restored = current
            .available_quantity
            .checked_add(quantity)
            .filter(|restored| *restored <= current.total_quantity)
            .ok_or_else(|| StoreError::Corrupt {
                detail: format!("releasing {quantity} would exceed the total stock of tier {tier}"),
            })?;
        current.available_quantity = restored;
        self.stage_tier(current);
        Ok(())
    }

    async fn resize_tier(&mut self, tier: TierId, total: u32) -> Result<bool, StoreError> {
        let mut current = self.locked_tier(tier)?;
        let booked = current.booked_quantity();
        if total < booked {
            return Ok(false);
        }
        current.total_quantity = total;
        current.available_quantity = total - booked;
        self.stage_tier(current);
        Ok(true)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.apply()
    }

    async fn rollback(self) -> Result<(), StoreError> {
        trace!(
            locks = self.held.len(),
            "[memory.rollback] staged writes discarded"
        );
        Ok(())
    }
}
