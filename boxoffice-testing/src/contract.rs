//! Behaviour every [`Store`] backend must share.
//!
//! Each scenario only uses the storage traits, so the same suite runs
//! against the in-memory adapter and against Postgres.

use boxoffice_types::{
    Booking, BookingReference, BookingStatus, EventId, Money, Payment, PaymentDetails, PaymentId,
    PaymentMethod, PaymentStatus, Quantity, RowRef, Store, StoreError, TicketTier, TierName,
    Transaction, TransactionReference, UserId, ACTIVE_BOOKING_CONSTRAINT,
    BOOKING_REFERENCE_CONSTRAINT,
};
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// A contract scenario that did not hold, named by scenario.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: &StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

trait Step<T> {
    fn during(self, scenario: &'static str, operation: &'static str) -> Result<T, ContractTestFailure>;
}

impl<T> Step<T> for Result<T, StoreError> {
    fn during(self, scenario: &'static str, operation: &'static str) -> Result<T, ContractTestFailure> {
        self.map_err(|error| ContractTestFailure::store_error(scenario, operation, &error))
    }
}

fn ensure(scenario: &'static str, condition: bool, detail: impl Into<String>) -> ContractTestResult {
    if condition {
        Ok(())
    } else {
        Err(ContractTestFailure::assertion(scenario, detail))
    }
}

fn contract_tier(total: u32) -> TicketTier {
    TicketTier::new(
        EventId::generate(),
        TierName::try_new("Contract".to_string()).expect("valid tier name"),
        Money::from_cents(1_000).expect("valid amount"),
        total,
        Utc::now(),
    )
}

fn contract_booking(tier: &TicketTier, customer: UserId) -> Booking {
    Booking::pending(
        BookingReference::generate(&mut rand::rng()),
        customer,
        tier.id,
        Quantity::try_new(1).expect("valid quantity"),
        tier.price,
        Utc::now(),
    )
}

fn contract_payment(booking: &Booking, status: PaymentStatus, age: Duration) -> Payment {
    let created_at = Utc::now() - age;
    Payment {
        id: PaymentId::generate(),
        booking_id: booking.id,
        amount: booking.total_amount,
        status,
        method: PaymentMethod::try_new("credit_card".to_string()).expect("valid method"),
        details: PaymentDetails::new(),
        transaction_reference: TransactionReference::generate(&mut rand::rng()),
        processed_at: Some(created_at),
        refunded_at: None,
        created_at,
    }
}

async fn committed_tier<S: Store>(
    store: &S,
    scenario: &'static str,
    total: u32,
) -> Result<TicketTier, ContractTestFailure> {
    let tier = contract_tier(total);
    let mut tx = store.begin().await.during(scenario, "begin")?;
    tx.insert_tier(&tier).await.during(scenario, "insert_tier")?;
    tx.commit().await.during(scenario, "commit")?;
    Ok(tier)
}

async fn committed_booking<S: Store>(
    store: &S,
    scenario: &'static str,
    booking: &Booking,
) -> ContractTestResult {
    let mut tx = store.begin().await.during(scenario, "begin")?;
    tx.insert_booking(booking)
        .await
        .during(scenario, "insert_booking")?;
    tx.commit().await.during(scenario, "commit")
}

async fn available<S: Store>(
    store: &S,
    scenario: &'static str,
    tier: &TicketTier,
) -> Result<u32, ContractTestFailure> {
    store
        .tier(tier.id)
        .await
        .during(scenario, "tier")?
        .map(|tier| tier.available_quantity)
        .ok_or_else(|| ContractTestFailure::assertion(scenario, "committed tier is missing"))
}

/// Committed changes are visible to later reads; rolled-back ones never are.
pub async fn test_commit_and_rollback<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "commit_and_rollback";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 5).await?;

    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    let _ = tx.lock_tier(tier.id).await.during(SCENARIO, "lock_tier")?;
    let taken = tx
        .decrement_available(tier.id, 2)
        .await
        .during(SCENARIO, "decrement_available")?;
    ensure(SCENARIO, taken, "decrement within stock should succeed")?;
    tx.rollback().await.during(SCENARIO, "rollback")?;

    let after_rollback = available(&store, SCENARIO, &tier).await?;
    ensure(
        SCENARIO,
        after_rollback == 5,
        format!("rollback left {after_rollback} available, expected 5"),
    )?;

    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    let _ = tx.lock_tier(tier.id).await.during(SCENARIO, "lock_tier")?;
    let _ = tx
        .decrement_available(tier.id, 2)
        .await
        .during(SCENARIO, "decrement_available")?;
    tx.commit().await.during(SCENARIO, "commit")?;

    let after_commit = available(&store, SCENARIO, &tier).await?;
    ensure(
        SCENARIO,
        after_commit == 3,
        format!("commit left {after_commit} available, expected 3"),
    )
}

/// Decrements and resizes that would leave stock negative are refused
/// without writing.
pub async fn test_conditional_inventory<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "conditional_inventory";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 3).await?;

    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    let _ = tx.lock_tier(tier.id).await.during(SCENARIO, "lock_tier")?;
    let first = tx
        .decrement_available(tier.id, 2)
        .await
        .during(SCENARIO, "decrement_available")?;
    let second = tx
        .decrement_available(tier.id, 2)
        .await
        .during(SCENARIO, "decrement_available")?;
    ensure(SCENARIO, first && !second, "second decrement must be refused")?;

    let shrunk = tx
        .resize_tier(tier.id, 1)
        .await
        .during(SCENARIO, "resize_tier")?;
    ensure(SCENARIO, !shrunk, "resize below booked quantity must be refused")?;
    let grown = tx
        .resize_tier(tier.id, 6)
        .await
        .during(SCENARIO, "resize_tier")?;
    ensure(SCENARIO, grown, "resize above booked quantity must succeed")?;
    tx.commit().await.during(SCENARIO, "commit")?;

    let committed = store
        .tier(tier.id)
        .await
        .during(SCENARIO, "tier")?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "tier vanished"))?;
    ensure(
        SCENARIO,
        committed.total_quantity == 6 && committed.available_quantity == 4,
        format!(
            "expected 6 total and 4 available, found {} and {}",
            committed.total_quantity, committed.available_quantity
        ),
    )
}

/// Writes to a row the transaction has not locked are rejected.
pub async fn test_modification_requires_lock<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "modification_requires_lock";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 2).await?;
    let mut booking = contract_booking(&tier, UserId::generate());
    committed_booking(&store, SCENARIO, &booking).await?;

    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    booking.status = BookingStatus::Confirmed;
    match tx.update_booking(&booking).await {
        Err(StoreError::RowNotLocked { row }) if row == RowRef::Booking(booking.id) => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("unlocked update should fail with RowNotLocked, got {other:?}"),
        )),
    }
}

/// Concurrent transactions locking one tier never oversell it.
pub async fn test_concurrent_reservations_serialize<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store + 'static,
    S::Tx: 'static,
{
    const SCENARIO: &str = "concurrent_reservations_serialize";
    const STOCK: u32 = 5;
    const CONTENDERS: usize = 12;

    let store = Arc::new(make_store());
    let tier = committed_tier(store.as_ref(), SCENARIO, STOCK).await?;

    let mut handles = Vec::with_capacity(CONTENDERS);
    for _ in 0..CONTENDERS {
        let store = Arc::clone(&store);
        let tier_id = tier.id;
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await?;
            let _ = tx.lock_tier(tier_id).await?;
            let taken = tx.decrement_available(tier_id, 1).await?;
            tx.commit().await?;
            Ok::<bool, StoreError>(taken)
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        let taken = handle
            .await
            .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?
            .during(SCENARIO, "reserve")?;
        if taken {
            reserved += 1;
        }
    }

    let left = available(store.as_ref(), SCENARIO, &tier).await?;
    ensure(
        SCENARIO,
        reserved == STOCK && left == 0,
        format!("{reserved} reservations succeeded with {left} left over"),
    )
}

/// A second booking with a taken reference violates
/// [`BOOKING_REFERENCE_CONSTRAINT`].
pub async fn test_unique_booking_reference<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "unique_booking_reference";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 5).await?;
    let first = contract_booking(&tier, UserId::generate());
    committed_booking(&store, SCENARIO, &first).await?;

    let mut copy = contract_booking(&tier, UserId::generate());
    copy.reference = first.reference.clone();
    expect_unique_violation(&store, SCENARIO, &copy, BOOKING_REFERENCE_CONSTRAINT).await
}

/// A customer's second active booking for a tier violates
/// [`ACTIVE_BOOKING_CONSTRAINT`], and the first is found under lock.
pub async fn test_one_active_booking_per_customer<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "one_active_booking_per_customer";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 5).await?;
    let customer = UserId::generate();
    committed_booking(&store, SCENARIO, &contract_booking(&tier, customer)).await?;

    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    let found = tx
        .find_active_booking(customer, tier.id)
        .await
        .during(SCENARIO, "find_active_booking")?;
    ensure(SCENARIO, found.is_some(), "active booking should be found")?;
    tx.rollback().await.during(SCENARIO, "rollback")?;

    expect_unique_violation(
        &store,
        SCENARIO,
        &contract_booking(&tier, customer),
        ACTIVE_BOOKING_CONSTRAINT,
    )
    .await
}

async fn expect_unique_violation<S: Store>(
    store: &S,
    scenario: &'static str,
    booking: &Booking,
    constraint: &str,
) -> ContractTestResult {
    let mut tx = store.begin().await.during(scenario, "begin")?;
    // Backends may reject at insert time or only at commit.
    let result = match tx.insert_booking(booking).await {
        Ok(()) => tx.commit().await,
        Err(error) => Err(error),
    };

    match result {
        Err(StoreError::UniqueViolation { constraint: found }) if found == constraint => Ok(()),
        other => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected violation of {constraint}, got {other:?}"),
        )),
    }
}

/// Payment history comes back newest first.
pub async fn test_payment_history_order<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: Store,
{
    const SCENARIO: &str = "payment_history_order";
    let store = make_store();
    let tier = committed_tier(&store, SCENARIO, 5).await?;
    let booking = contract_booking(&tier, UserId::generate());
    committed_booking(&store, SCENARIO, &booking).await?;

    let older = contract_payment(&booking, PaymentStatus::Failed, Duration::minutes(5));
    let newer = contract_payment(&booking, PaymentStatus::Success, Duration::minutes(1));
    let mut tx = store.begin().await.during(SCENARIO, "begin")?;
    tx.insert_payment(&older)
        .await
        .during(SCENARIO, "insert_payment")?;
    tx.insert_payment(&newer)
        .await
        .during(SCENARIO, "insert_payment")?;
    let latest = tx
        .latest_successful_payment(booking.id)
        .await
        .during(SCENARIO, "latest_successful_payment")?;
    ensure(
        SCENARIO,
        latest.map(|payment| payment.id) == Some(newer.id),
        "staged successful payment should be visible to its transaction",
    )?;
    tx.commit().await.during(SCENARIO, "commit")?;

    let history: Vec<PaymentId> = store
        .payments_for_booking(booking.id)
        .await
        .during(SCENARIO, "payments_for_booking")?
        .into_iter()
        .map(|payment| payment.id)
        .collect();
    ensure(
        SCENARIO,
        history == vec![newer.id, older.id],
        format!("expected newest first, got {history:?}"),
    )
}

/// Expands to one `#[tokio::test]` per contract scenario.
///
/// `make_store` is a path to a `fn() -> S`. Extra `attributes`, such as an
/// `#[ignore]` for suites needing Docker, are applied to every test.
#[macro_export]
macro_rules! store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        $crate::store_contract_tests! {
            suite = $suite,
            make_store = $make_store,
            attributes = [],
        }
    };
    (
        suite = $suite:ident,
        make_store = $make_store:expr,
        attributes = [$(#[$attr:meta])*] $(,)?
    ) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_commit_and_rollback, test_concurrent_reservations_serialize,
                test_conditional_inventory, test_modification_requires_lock,
                test_one_active_booking_per_customer, test_payment_history_order,
                test_unique_booking_reference,
            };

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn commit_and_rollback_contract() {
                test_commit_and_rollback($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn conditional_inventory_contract() {
                test_conditional_inventory($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn modification_requires_lock_contract() {
                test_modification_requires_lock($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn concurrent_reservations_serialize_contract() {
                test_concurrent_reservations_serialize($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn unique_booking_reference_contract() {
                test_unique_booking_reference($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn one_active_booking_per_customer_contract() {
                test_one_active_booking_per_customer($make_store)
                    .await
                    .expect("store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$attr])*
            async fn payment_history_order_contract() {
                test_payment_history_order($make_store)
                    .await
                    .expect("store contract failed");
            }
        }
    };
}

pub use store_contract_tests;
