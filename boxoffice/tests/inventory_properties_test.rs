//! Property tests for stock accounting under arbitrary booking traffic.
//!
//! Whatever sequence of bookings, payments and cancellations customers
//! issue, one after another or all at once, committed stock must stay within
//! bounds and match the active bookings exactly.

use std::collections::HashSet;
use std::sync::Arc;

use boxoffice::Caller;
use boxoffice_testing::Venue;
use boxoffice_types::{Booking, BookingStatus, Money, PaymentDetails, UserId};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tokio::sync::Barrier;

const CUSTOMERS: usize = 3;
const TOTAL: u32 = 12;

#[derive(Debug, Clone)]
enum Step {
    Book { quantity: u32 },
    Pay,
    Cancel,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u32..6).prop_map(|quantity| Step::Book { quantity }),
        Just(Step::Pay),
        Just(Step::Cancel),
    ]
}

fn arb_traffic() -> impl Strategy<Value = Vec<(usize, Step)>> {
    prop::collection::vec((0..CUSTOMERS, arb_step()), 1..25)
}

fn customers(count: usize) -> Vec<Caller> {
    (0..count)
        .map(|_| Caller::customer(UserId::generate()))
        .collect()
}

fn active_booking(venue: &Venue, customer: Caller) -> Option<Booking> {
    venue
        .store
        .bookings_for_tier(venue.tier.id)
        .into_iter()
        .find(|booking| booking.customer_id == customer.user_id && booking.is_active())
}

async fn apply(venue: &Venue, customer: Caller, step: &Step) {
    match *step {
        Step::Book { quantity } => {
            let _ = venue
                .office
                .create_booking(customer, venue.tier.id, quantity)
                .await;
        }
        Step::Pay => {
            if let Some(booking) = active_booking(venue, customer) {
                let _ = venue
                    .office
                    .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
                    .await;
            }
        }
        Step::Cancel => {
            if let Some(booking) = active_booking(venue, customer) {
                let _ = venue.office.cancel_booking(customer, booking.id).await;
            }
        }
    }
}

fn held_by_active_bookings(venue: &Venue) -> u32 {
    venue
        .store
        .bookings_for_tier(venue.tier.id)
        .iter()
        .filter(|booking| booking.is_active())
        .map(|booking| booking.quantity.into_inner())
        .sum()
}

/// Property: stock never leaves `[0, total]` and always equals total minus
/// the quantity held by active bookings.
#[test]
fn prop_stock_matches_active_bookings() {
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]
        #[test]
        fn stock_matches_active_bookings(traffic in arb_traffic()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let venue = Venue::builder().total(TOTAL).build();
                let customers = customers(CUSTOMERS);

                for (customer, step) in &traffic {
                    apply(&venue, customers[*customer], step).await;

                    let available = venue.available().await;
                    prop_assert!(available <= TOTAL);
                    prop_assert_eq!(available, TOTAL - held_by_active_bookings(&venue));
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}

/// Property: a customer never holds two active bookings for one tier, and
/// every booking is priced at unit price times quantity.
#[test]
fn prop_bookings_are_unique_and_correctly_priced() {
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]
        #[test]
        fn bookings_are_unique_and_correctly_priced(
            price_cents in 100u64..50_000,
            traffic in arb_traffic(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let price = Money::from_cents(price_cents).unwrap();
                let venue = Venue::builder().total(TOTAL).price(price).build();
                let customers = customers(CUSTOMERS);

                for (customer, step) in &traffic {
                    apply(&venue, customers[*customer], step).await;
                }

                let bookings = venue.store.bookings_for_tier(venue.tier.id);
                for customer in &customers {
                    let active = bookings
                        .iter()
                        .filter(|booking| booking.customer_id == customer.user_id && booking.is_active())
                        .count();
                    prop_assert!(active <= 1);
                }

                let references: HashSet<_> = bookings.iter().map(|booking| booking.reference.clone()).collect();
                prop_assert_eq!(references.len(), bookings.len());

                for booking in &bookings {
                    prop_assert_eq!(booking.total_amount, price.times(booking.quantity).unwrap());
                }

                let confirmed_without_payment = bookings
                    .iter()
                    .filter(|booking| booking.status == BookingStatus::Confirmed)
                    .any(|booking| {
                        !venue
                            .store
                            .all_payments()
                            .iter()
                            .any(|payment| payment.booking_id == booking.id && payment.is_successful())
                    });
                prop_assert!(!confirmed_without_payment);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}

/// Property: customers racing each other on one tier, each with their own
/// random mix of bookings, payments and cancellations, still leave stock in
/// `[0, total]` and equal to total minus what active bookings hold.
#[test]
fn prop_concurrent_traffic_keeps_stock_consistent() {
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn concurrent_traffic_keeps_stock_consistent(
            plans in prop::collection::vec(prop::collection::vec(arb_step(), 1..6), 2..5),
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let venue = Arc::new(Venue::builder().total(TOTAL).build());
                let customers = customers(plans.len());
                let start = Arc::new(Barrier::new(plans.len()));

                let tasks: Vec<_> = customers
                    .iter()
                    .copied()
                    .zip(plans.clone())
                    .map(|(customer, plan)| {
                        let venue = Arc::clone(&venue);
                        let start = Arc::clone(&start);
                        tokio::spawn(async move {
                            let _ = start.wait().await;
                            for step in &plan {
                                apply(&venue, customer, step).await;
                            }
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }

                let available = venue.available().await;
                prop_assert!(available <= TOTAL);
                prop_assert_eq!(available, TOTAL - held_by_active_bookings(&venue));

                let bookings = venue.store.bookings_for_tier(venue.tier.id);
                for customer in &customers {
                    let active = bookings
                        .iter()
                        .filter(|booking| booking.customer_id == customer.user_id && booking.is_active())
                        .count();
                    prop_assert!(active <= 1);
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
