mod common;

use std::sync::Arc;

use boxoffice::{BoxOffice, Caller, ErrorKind, RetryPolicy};
use boxoffice_postgres::PostgresStore;
use boxoffice_testing::{RecordingNotifier, ScriptedGateway};
use boxoffice_types::{EventId, EventListing, Money, PaymentDetails, Store, TicketTier, UserId};
use chrono::{Duration, Utc};
use common::PostgresTestFixture;
use tokio::sync::Barrier;

struct Stage {
    office: BoxOffice<PostgresStore>,
    store: PostgresStore,
    tier: TicketTier,
    gateway: Arc<ScriptedGateway>,
}

async fn stage(fixture: &PostgresTestFixture, total: u32) -> Stage {
    let organizer = Caller::organizer(UserId::generate());
    let event = EventListing {
        id: EventId::generate(),
        title: "Harbour Lights".to_string(),
        starts_at: Utc::now() + Duration::days(3),
        organizer_id: organizer.user_id,
    };
    fixture
        .store
        .upsert_event(&event)
        .await
        .expect("event should be stored");

    let gateway = Arc::new(ScriptedGateway::new());
    let office = BoxOffice::builder(fixture.store.clone(), Arc::new(fixture.store.clone()))
        .gateway(gateway.clone())
        .notifier(Arc::new(RecordingNotifier::new()))
        .retry_policy(RetryPolicy::new().base_delay(std::time::Duration::from_millis(5)))
        .build();

    let tier = office
        .create_tier(
            organizer,
            event.id,
            "Standing",
            Money::from_cents(4_500).expect("valid price"),
            total,
        )
        .await
        .into_data()
        .expect("organizer can add a tier");

    Stage {
        office,
        store: fixture.store.clone(),
        tier,
        gateway,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker for testcontainers"]
async fn last_tickets_go_to_exactly_as_many_customers_as_there_is_stock() {
    // Given: a tier with three tickets left and eight customers ready to buy
    let fixture = PostgresTestFixture::new().await;
    let stage = stage(&fixture, 3).await;
    let start = Arc::new(Barrier::new(8));

    // When: every customer books one ticket at the same moment
    let mut handles = Vec::new();
    for _ in 0..8 {
        let office = stage.office.clone();
        let start = Arc::clone(&start);
        let tier_id = stage.tier.id;
        handles.push(tokio::spawn(async move {
            let _ = start.wait().await;
            office
                .create_booking(Caller::customer(UserId::generate()), tier_id, 1)
                .await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("booking task should not panic"));
    }

    // Then: three bookings succeed, the rest are told stock ran out, nothing is left
    let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let sold_out = outcomes
        .iter()
        .filter(|outcome| outcome.error_kind() == Some(ErrorKind::InsufficientInventory))
        .count();
    let left = stage
        .store
        .tier(stage.tier.id)
        .await
        .expect("tier read should succeed")
        .expect("tier exists")
        .available_quantity;

    assert_eq!((succeeded, sold_out, left), (3, 5, 0));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Docker for testcontainers"]
async fn cancelling_a_paid_booking_refunds_once_and_restores_stock() {
    // Given: a customer who booked two tickets and paid
    let fixture = PostgresTestFixture::new().await;
    let stage = stage(&fixture, 10).await;
    let customer = Caller::customer(UserId::generate());
    let booking = stage
        .office
        .create_booking(customer, stage.tier.id, 2)
        .await
        .into_data()
        .expect("booking should succeed");
    let paid = stage
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;
    assert!(paid.is_ok(), "payment should be approved: {paid:?}");

    // When: the customer cancels
    let cancellation = stage
        .office
        .cancel_booking(customer, booking.id)
        .await
        .into_data()
        .expect("cancel should succeed");

    // Then: one refund went out, stock is whole again and the payment is refunded
    let history = stage
        .store
        .payments_for_booking(booking.id)
        .await
        .expect("history read should succeed");
    let available = stage
        .store
        .tier(stage.tier.id)
        .await
        .expect("tier read should succeed")
        .expect("tier exists")
        .available_quantity;

    assert!(cancellation.was_refunded());
    assert_eq!(stage.gateway.refund_calls(), 1);
    assert_eq!(available, 10);
    assert_eq!(history.len(), 1);
    assert!(history[0].refunded_at.is_some());
}
