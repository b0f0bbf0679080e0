//! Transient storage failures: what is retried and what never is.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boxoffice::{BoxOffice, ErrorKind, MetricsHook, RetryContext, RetryPolicy};
use boxoffice_memory::InMemoryStore;
use boxoffice_testing::{ChaosConfig, ChaosStore, ChaosStoreExt, Venue};
use boxoffice_types::{BookingStatus, PaymentDetails, Store, Transaction};

#[derive(Clone, Default)]
struct RetryCounter(Arc<AtomicU32>);

impl RetryCounter {
    fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl MetricsHook for RetryCounter {
    fn on_retry_attempt(&self, _ctx: &RetryContext) {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn chaotic_office(
    venue: &Venue,
    chaos: ChaosConfig,
    max_retries: u32,
) -> (BoxOffice<ChaosStore<InMemoryStore>>, RetryCounter) {
    boxoffice_testing::init_test_tracing();
    let counter = RetryCounter::default();
    let policy = RetryPolicy::new()
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(1))
        .with_metrics_hook(counter.clone());
    let office = BoxOffice::builder(
        venue.store.clone().with_chaos(chaos),
        Arc::new(venue.store.clone()),
    )
    .gateway(venue.gateway.clone())
    .notifier(venue.notifier.clone())
    .retry_policy(policy)
    .build();
    (office, counter)
}

#[tokio::test]
async fn reservation_is_retried_through_commit_conflicts() {
    // Given: storage that aborts the first two commits
    let venue = Venue::builder().total(5).build();
    let (office, retries) =
        chaotic_office(&venue, ChaosConfig::deterministic().with_conflicting_commits(2), 3);

    // When: a customer books two tickets
    let outcome = office
        .create_booking(Venue::customer(), venue.tier.id, 2)
        .await;

    // Then: the third attempt lands and stock moved exactly once
    assert!(outcome.is_ok(), "booking should succeed: {outcome:?}");
    assert_eq!(retries.count(), 2);
    assert_eq!(venue.store.bookings_for_tier(venue.tier.id).len(), 1);
    assert_eq!(venue.available().await, 3);
}

#[tokio::test]
async fn exhausted_retries_leave_no_trace() {
    let venue = Venue::builder().total(5).build();
    let (office, retries) =
        chaotic_office(&venue, ChaosConfig::deterministic().with_conflicting_commits(10), 2);

    let outcome = office
        .create_booking(Venue::customer(), venue.tier.id, 1)
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Internal));
    assert_eq!(outcome.message(), "Internal server error");
    assert_eq!(retries.count(), 2);
    assert!(venue.store.bookings_for_tier(venue.tier.id).is_empty());
    assert_eq!(venue.available().await, 5);
}

#[tokio::test]
async fn charge_is_never_replayed_after_a_commit_failure() {
    // Given: a pending booking and storage that will abort the next commit
    let venue = Venue::builder().build();
    let customer = Venue::customer();
    let booking = venue
        .office
        .create_booking(customer, venue.tier.id, 1)
        .await
        .into_data()
        .expect("booking should succeed");
    let (office, retries) =
        chaotic_office(&venue, ChaosConfig::deterministic().with_conflicting_commits(1), 3);

    // When: the customer pays
    let outcome = office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;

    // Then: the failure surfaces instead of charging the card a second time
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Internal));
    assert_eq!(venue.gateway.charge_calls(), 1);
    assert_eq!(retries.count(), 0);
    let stored = venue
        .store
        .booking(booking.id)
        .await
        .expect("read should succeed")
        .expect("booking exists");
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(venue.store.all_payments().is_empty());
}

#[tokio::test]
async fn unavailable_storage_is_reported_generically() {
    let venue = Venue::builder().build();
    let (office, retries) = chaotic_office(
        &venue,
        ChaosConfig::deterministic().with_begin_failure_probability(1.0),
        1,
    );

    let outcome = office
        .create_booking(Venue::customer(), venue.tier.id, 1)
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Internal));
    assert_eq!(retries.count(), 1);
    assert_eq!(venue.available().await, 100);
}

#[tokio::test]
async fn lock_timeout_gives_up_while_another_unit_holds_the_tier() {
    boxoffice_testing::init_test_tracing();

    // Given: a store with a short lock timeout and a transaction sitting on the tier
    let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
    let venue = Venue::builder()
        .store(store.clone())
        .retry_policy(RetryPolicy::no_retries())
        .build();
    let mut blocker = store.begin().await.expect("begin should succeed");
    let _ = blocker
        .lock_tier(venue.tier.id)
        .await
        .expect("lock should succeed");

    // When: a customer books meanwhile
    let blocked = venue
        .office
        .create_booking(Venue::customer(), venue.tier.id, 1)
        .await;

    // Then: the booking fails without touching stock, and succeeds once the lock is gone
    assert_eq!(blocked.error_kind(), Some(ErrorKind::Internal));
    blocker.rollback().await.expect("rollback should succeed");

    let unblocked = venue
        .office
        .create_booking(Venue::customer(), venue.tier.id, 1)
        .await;
    assert!(unblocked.is_ok(), "booking should succeed: {unblocked:?}");
    assert_eq!(venue.available().await, 99);
}
