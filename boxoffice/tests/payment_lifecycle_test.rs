use std::sync::Arc;
use std::time::Duration as StdDuration;

use boxoffice::{Caller, ErrorKind, REFUND_FAILURE_REASON};
use boxoffice_testing::{approved, declined, RecordingNotifier, ScriptedGateway, Venue};
use boxoffice_types::{
    Booking, BookingStatus, PaymentDetails, PaymentStatus, Store, Transaction, UserId,
};
use tokio::sync::Barrier;

async fn book(venue: &Venue, customer: Caller, quantity: u32) -> Booking {
    venue
        .office
        .create_booking(customer, venue.tier.id, quantity)
        .await
        .into_data()
        .expect("booking should succeed")
}

#[tokio::test]
async fn declined_charge_is_recorded_and_booking_can_be_paid_again() {
    // Given: a gateway that declines once and then approves
    let venue = Venue::builder()
        .gateway(
            ScriptedGateway::new()
                .then_charge(declined("Insufficient funds"))
                .then_charge(approved("GTW-0000000000000002")),
        )
        .build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;

    // When: the first attempt is declined
    let first = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;

    // Then: the caller hears why, the attempt is kept and the booking stays pending
    assert_eq!(first.error_kind(), Some(ErrorKind::PaymentDeclined));
    assert_eq!(first.message(), "Payment failed: Insufficient funds");
    let declined_receipt = first
        .failure_data()
        .expect("decline reports the recorded attempt");
    assert_eq!(declined_receipt.payment.status, PaymentStatus::Failed);
    assert_eq!(declined_receipt.booking.status, BookingStatus::Pending);
    let envelope = serde_json::to_value(&first).expect("envelope serializes");
    assert_eq!(envelope["data"]["payment"]["status"], "failed");
    assert_eq!(envelope["data"]["booking"]["id"], serde_json::json!(booking.id));
    let stored = venue
        .store
        .booking(booking.id)
        .await
        .expect("read should succeed")
        .expect("booking exists");
    assert_eq!(stored.status, BookingStatus::Pending);

    // When: the customer tries again
    let second = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;

    // Then: the booking is confirmed and both attempts are on record, newest first
    assert!(second.is_ok(), "second attempt should be approved: {second:?}");
    let history = venue
        .store
        .payments_for_booking(booking.id)
        .await
        .expect("read should succeed");
    let statuses: Vec<_> = history.iter().map(|payment| payment.status).collect();
    assert_eq!(statuses, vec![PaymentStatus::Success, PaymentStatus::Failed]);
    assert_ne!(
        history[0].transaction_reference,
        history[1].transaction_reference
    );
}

#[tokio::test]
async fn confirmed_booking_cannot_be_charged_twice() {
    let venue = Venue::builder().build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;
    let first = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;
    assert!(first.is_ok());

    let second = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;

    assert_eq!(second.error_kind(), Some(ErrorKind::BookingNotPending));
    assert_eq!(venue.gateway.charge_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_for_one_booking_charge_once() {
    // Given: a slow gateway and a customer who double-clicks "pay"
    let venue = Arc::new(
        Venue::builder()
            .gateway(ScriptedGateway::new().with_latency(StdDuration::from_millis(50)))
            .build(),
    );
    let customer = Venue::customer();
    let booking = book(&venue, customer, 2).await;
    let start = Arc::new(Barrier::new(2));

    // When: both payment requests race
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let venue = Arc::clone(&venue);
            let start = Arc::clone(&start);
            tokio::spawn(async move {
                let _ = start.wait().await;
                venue
                    .office
                    .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
                    .await
            })
        })
        .collect();
    let mut outcomes = Vec::new();
    for attempt in attempts {
        outcomes.push(attempt.await.expect("payment task should not panic"));
    }

    // Then: exactly one charge reached the gateway
    let approved = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let refused: Vec<_> = outcomes
        .iter()
        .filter_map(boxoffice::Outcome::error_kind)
        .collect();
    assert_eq!(approved, 1);
    assert_eq!(refused, vec![ErrorKind::BookingNotPending]);
    assert_eq!(venue.gateway.charge_calls(), 1);
}

#[tokio::test]
async fn cancelling_a_paid_booking_issues_exactly_one_refund() {
    // Given: a confirmed booking for four tickets
    let venue = Venue::builder().total(20).build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 4).await;
    let paid = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;
    assert!(paid.is_ok());

    // When: the customer cancels
    let cancellation = venue
        .office
        .cancel_booking(customer, booking.id)
        .await
        .into_data()
        .expect("cancel should succeed");

    // Then: one refund, the payment is marked refunded and exactly four tickets return
    assert!(cancellation.was_refunded());
    assert_eq!(cancellation.booking.status, BookingStatus::Cancelled);
    assert_eq!(venue.gateway.refund_calls(), 1);
    assert_eq!(venue.available().await, 20);

    let history = venue
        .store
        .payments_for_booking(booking.id)
        .await
        .expect("read should succeed");
    assert_eq!(history[0].status, PaymentStatus::Refunded);
    assert_eq!(
        history[0].details.get("refund_reason"),
        Some(&serde_json::json!(boxoffice::CANCELLATION_REASON))
    );
}

#[tokio::test]
async fn declined_refund_aborts_the_cancellation() {
    // Given: a confirmed booking and a refund gateway that times out
    let venue = Venue::builder()
        .total(10)
        .gateway(ScriptedGateway::new().then_refund(declined(REFUND_FAILURE_REASON)))
        .build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 2).await;
    let paid = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;
    assert!(paid.is_ok());

    // When: the customer cancels
    let outcome = venue.office.cancel_booking(customer, booking.id).await;

    // Then: the cancellation fails and nothing moved
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RefundDeclined));
    assert_eq!(outcome.message(), "Refund failed: Refund gateway timeout");
    let stored = venue
        .store
        .booking(booking.id)
        .await
        .expect("read should succeed")
        .expect("booking exists");
    let history = venue
        .store
        .payments_for_booking(booking.id)
        .await
        .expect("read should succeed");
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(history[0].status, PaymentStatus::Success);
    assert_eq!(venue.available().await, 8);

    // And: a later attempt may succeed
    let retried = venue.office.cancel_booking(customer, booking.id).await;
    assert!(retried.is_ok(), "retry should succeed: {retried:?}");
    assert_eq!(venue.gateway.refund_calls(), 2);
    assert_eq!(venue.available().await, 10);
}

#[tokio::test]
async fn refunds_are_refused_for_refunded_failed_and_foreign_payments() {
    let venue = Venue::builder()
        .gateway(ScriptedGateway::new().then_charge(declined("Transaction declined by bank")))
        .build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;

    let failed = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;
    assert_eq!(failed.error_kind(), Some(ErrorKind::PaymentDeclined));
    let failed_payment = venue
        .store
        .payments_for_booking(booking.id)
        .await
        .expect("read should succeed")
        .remove(0);
    let not_successful = venue
        .office
        .refund_payment(customer, failed_payment.id, None)
        .await;
    assert_eq!(
        not_successful.error_kind(),
        Some(ErrorKind::PaymentNotSuccessful)
    );

    let payment = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await
        .into_data()
        .expect("second attempt should be approved")
        .payment;

    let stranger = venue
        .office
        .refund_payment(Venue::customer(), payment.id, None)
        .await;
    assert_eq!(stranger.error_kind(), Some(ErrorKind::PermissionDenied));

    let refunded = venue.office.refund_payment(customer, payment.id, None).await;
    assert!(refunded.is_ok());
    let again = venue.office.refund_payment(customer, payment.id, None).await;
    assert_eq!(again.error_kind(), Some(ErrorKind::AlreadyRefunded));
    assert_eq!(venue.gateway.refund_calls(), 1);
}

#[tokio::test]
async fn failing_notifier_does_not_affect_the_payment() {
    // Given: a notification channel that is down
    let venue = Venue::builder()
        .notifier(RecordingNotifier::failing("smtp unreachable"))
        .build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;

    // When: the customer pays
    let outcome = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await;

    // Then: the payment still succeeds and the notice was attempted
    assert!(outcome.is_ok());
    assert_eq!(
        venue
            .notifier
            .wait_for(1, StdDuration::from_secs(2))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn payment_status_is_private_to_owner_and_admins() {
    let venue = Venue::builder().build();
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;
    let payment = venue
        .office
        .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
        .await
        .into_data()
        .expect("payment should be approved")
        .payment;

    let own = venue.office.payment_status(customer, payment.id).await;
    let admin = venue
        .office
        .payment_status(Caller::admin(UserId::generate()), payment.id)
        .await;
    let stranger = venue
        .office
        .payment_status(Venue::customer(), payment.id)
        .await;

    assert_eq!(
        own.data().map(|view| view.payment.id),
        Some(payment.id)
    );
    assert!(admin.is_ok());
    assert_eq!(stranger.error_kind(), Some(ErrorKind::PermissionDenied));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn payment_waits_for_a_retirement_in_flight_and_then_refuses() {
    // Given: a pending booking and a retirement holding the tier row
    let venue = Arc::new(Venue::builder().build());
    let customer = Venue::customer();
    let booking = book(&venue, customer, 1).await;
    let mut retirement = venue.store.begin().await.expect("begin should succeed");
    let mut tier = retirement
        .lock_tier(venue.tier.id)
        .await
        .expect("lock should succeed")
        .expect("tier exists");

    // When: the customer pays while the retirement is still open
    let mut payment = tokio::spawn({
        let venue = Arc::clone(&venue);
        async move {
            venue
                .office
                .process_payment(customer, booking.id, "credit_card", PaymentDetails::new())
                .await
        }
    });
    let waited = tokio::time::timeout(StdDuration::from_millis(50), &mut payment).await;
    assert!(waited.is_err(), "payment must wait for the tier lock");

    tier.retired_at = Some(chrono::Utc::now());
    retirement.update_tier(&tier).await.expect("retire should stage");
    retirement.commit().await.expect("retire should commit");
    let outcome = payment.await.expect("payment task should not panic");

    // Then: the payment sees the retired tier and never reaches the gateway
    assert_eq!(outcome.error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(venue.gateway.charge_calls(), 0);
    let stored = venue
        .store
        .booking(booking.id)
        .await
        .expect("read should succeed")
        .expect("booking exists");
    assert_eq!(stored.status, BookingStatus::Pending);
}
