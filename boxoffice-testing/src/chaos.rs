//! Fault injection for exercising retry paths.
//!
//! Wrap any [`Store`] with [`ChaosStoreExt::with_chaos`] to make `begin` and
//! `commit` fail transiently on demand.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use boxoffice::Probability;
use boxoffice_types::{
    Booking, BookingId, BookingReference, BookingStatus, Operation, Payment, PaymentId, Store,
    StoreError, TicketTier, TierId, Transaction, TransactionReference, UserId,
};
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Which faults a [`ChaosStore`] injects, and how often.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    begin_failure_probability: Probability,
    commit_conflict_probability: Probability,
    conflicting_commits: u32,
}

impl ChaosConfig {
    /// No faults, with a fixed seed for any probabilities set later.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Chance that `begin` reports the store unavailable.
    pub fn with_begin_failure_probability(mut self, probability: f64) -> Self {
        self.begin_failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Chance that a commit is rolled back as a conflict.
    pub fn with_commit_conflict_probability(mut self, probability: f64) -> Self {
        self.commit_conflict_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// The first `count` commits fail with a conflict regardless of probability.
    pub const fn with_conflicting_commits(mut self, count: u32) -> Self {
        self.conflicting_commits = count;
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            begin_failure_probability: Probability::never(),
            commit_conflict_probability: Probability::never(),
            conflicting_commits: 0,
        }
    }
}

/// Adds [`with_chaos`](Self::with_chaos) to every store.
///
/// ```
/// use boxoffice_memory::InMemoryStore;
/// use boxoffice_testing::chaos::{ChaosConfig, ChaosStoreExt};
///
/// let store = InMemoryStore::new()
///     .with_chaos(ChaosConfig::deterministic().with_conflicting_commits(2));
/// # let _ = store;
/// ```
pub trait ChaosStoreExt: Sized {
    /// Wraps `self` in a [`ChaosStore`].
    fn with_chaos(self, config: ChaosConfig) -> ChaosStore<Self>;
}

/// Store wrapper that injects transient failures at begin and commit.
///
/// A transaction doomed to conflict still runs every staged operation
/// against the inner store, then rolls back instead of committing.
pub struct ChaosStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    conflicts_injected: AtomicU32,
}

impl<S> ChaosStore<S> {
    /// Wraps `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
            conflicts_injected: AtomicU32::new(0),
        }
    }

    /// Number of commit conflicts injected so far.
    pub fn conflicts_injected(&self) -> u32 {
        self.conflicts_injected.load(Ordering::SeqCst)
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f64 = probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        let mut rng = self
            .rng
            .lock()
            .expect("chaos RNG mutex should not be poisoned");

        rng.random_bool(probability)
    }

    fn should_conflict(&self) -> bool {
        let scripted = self
            .conflicts_injected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |injected| {
                (injected < self.config.conflicting_commits).then_some(injected + 1)
            })
            .is_ok();

        if scripted {
            return true;
        }
        if self.should_inject(self.config.commit_conflict_probability) {
            let _ = self.conflicts_injected.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        false
    }
}

impl<S> Store for ChaosStore<S>
where
    S: Store,
{
    type Tx = ChaosTransaction<S::Tx>;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send {
        let should_fail = self.should_inject(self.config.begin_failure_probability);
        let conflict_on_commit = !should_fail && self.should_conflict();
        let store = &self.store;

        async move {
            if should_fail {
                return Err(StoreError::Unavailable {
                    operation: Operation::Begin,
                });
            }

            let inner = store.begin().await?;
            Ok(ChaosTransaction {
                inner,
                conflict_on_commit,
            })
        }
    }

    fn tier(
        &self,
        id: TierId,
    ) -> impl Future<Output = Result<Option<TicketTier>, StoreError>> + Send {
        self.store.tier(id)
    }

    fn booking(
        &self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send {
        self.store.booking(id)
    }

    fn payment(
        &self,
        id: PaymentId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send {
        self.store.payment(id)
    }

    fn payments_for_booking(
        &self,
        booking: BookingId,
    ) -> impl Future<Output = Result<Vec<Payment>, StoreError>> + Send {
        self.store.payments_for_booking(booking)
    }

    fn bookings_for_customer(
        &self,
        customer: UserId,
    ) -> impl Future<Output = Result<Vec<Booking>, StoreError>> + Send {
        self.store.bookings_for_customer(customer)
    }
}

/// Transaction of a [`ChaosStore`]; may be doomed to conflict at commit.
pub struct ChaosTransaction<T> {
    inner: T,
    conflict_on_commit: bool,
}

impl<T> Transaction for ChaosTransaction<T>
where
    T: Transaction,
{
    fn lock_tier(
        &mut self,
        id: TierId,
    ) -> impl Future<Output = Result<Option<TicketTier>, StoreError>> + Send {
        self.inner.lock_tier(id)
    }

    fn lock_booking(
        &mut self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send {
        self.inner.lock_booking(id)
    }

    fn lock_payment(
        &mut self,
        id: PaymentId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send {
        self.inner.lock_payment(id)
    }

    fn find_active_booking(
        &mut self,
        customer: UserId,
        tier: TierId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send {
        self.inner.find_active_booking(customer, tier)
    }

    fn tier_has_bookings_in(
        &mut self,
        tier: TierId,
        status: BookingStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.inner.tier_has_bookings_in(tier, status)
    }

    fn latest_successful_payment(
        &mut self,
        booking: BookingId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send {
        self.inner.latest_successful_payment(booking)
    }

    fn booking_reference_taken(
        &mut self,
        reference: &BookingReference,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.inner.booking_reference_taken(reference)
    }

    fn transaction_reference_taken(
        &mut self,
        reference: &TransactionReference,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.inner.transaction_reference_taken(reference)
    }

    fn insert_tier(
        &mut self,
        tier: &TicketTier,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.insert_tier(tier)
    }

    fn update_tier(
        &mut self,
        tier: &TicketTier,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.update_tier(tier)
    }

    fn insert_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.insert_booking(booking)
    }

    fn update_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.update_booking(booking)
    }

    fn insert_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.insert_payment(payment)
    }

    fn update_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.update_payment(payment)
    }

    fn decrement_available(
        &mut self,
        tier: TierId,
        quantity: u32,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.inner.decrement_available(tier, quantity)
    }

    fn increment_available(
        &mut self,
        tier: TierId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.increment_available(tier, quantity)
    }

    fn resize_tier(
        &mut self,
        tier: TierId,
        total: u32,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.inner.resize_tier(tier, total)
    }

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            if self.conflict_on_commit {
                self.inner.rollback().await?;
                return Err(StoreError::Conflict {
                    operation: Operation::Commit,
                });
            }
            self.inner.commit().await
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.rollback()
    }
}

impl<S> ChaosStoreExt for S
where
    S: Store,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosStore<Self> {
        ChaosStore::new(self, config)
    }
}
