//! Box office walkthrough
//!
//! Runs one event through the engine on the in-memory store:
//! - An organizer opens a tier
//! - Two customers book, one pays
//! - The paying customer cancels and is refunded
//!
//! Gateway behavior is configured from `BOXOFFICE_*` variables and log
//! verbosity from `RUST_LOG`.

use std::sync::Arc;

use anyhow::{bail, Result};
use boxoffice::{BoxOffice, Caller, EngineConfig, Outcome};
use boxoffice_memory::InMemoryStore;
use boxoffice_types::{EventId, EventListing, Money, PaymentDetails, UserId};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn show<T: Serialize>(step: &str, outcome: &Outcome<T>) -> Result<()> {
    println!("{step}:\n{}\n", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = EngineConfig::from_env()?;
    let store = config
        .lock_timeout()
        .map_or_else(InMemoryStore::new, InMemoryStore::with_lock_timeout);

    let organizer = Caller::organizer(UserId::generate());
    let event = EventListing {
        id: EventId::generate(),
        title: "Midsummer Jazz Night".to_string(),
        starts_at: Utc::now() + Duration::days(14),
        organizer_id: organizer.user_id,
    };
    store.seed_event(event.clone());

    let office = BoxOffice::builder(store.clone(), Arc::new(store))
        .config(config)
        .build();

    let tier_outcome = office
        .create_tier(organizer, event.id, "Front Row", Money::from_cents(8_500)?, 20)
        .await;
    show("Organizer opens a tier", &tier_outcome)?;
    let Some(tier) = tier_outcome.into_data() else {
        bail!("tier creation failed");
    };

    let alice = Caller::customer(UserId::generate());
    let bob = Caller::customer(UserId::generate());

    let booking_outcome = office.create_booking(alice, tier.id, 3).await;
    show("Alice books three seats", &booking_outcome)?;
    let Some(booking) = booking_outcome.into_data() else {
        bail!("booking failed");
    };

    show(
        "Bob tries to book more than is left",
        &office.create_booking(bob, tier.id, 25).await,
    )?;
    show(
        "Alice tries to book the same tier twice",
        &office.create_booking(alice, tier.id, 1).await,
    )?;

    // The simulated gateway declines a share of charges; keep trying a few times.
    let mut paid = false;
    for attempt in 1..=3 {
        let mut details = PaymentDetails::new();
        details.insert("card_last4".to_string(), serde_json::json!("4242"));
        let outcome = office
            .process_payment(alice, booking.id, "credit_card", details)
            .await;
        show(&format!("Alice pays (attempt {attempt})"), &outcome)?;
        if outcome.is_ok() {
            paid = true;
            break;
        }
    }
    info!(paid, "[demo] payment phase finished");

    show(
        "Alice's bookings",
        &office.customer_bookings(alice).await,
    )?;
    show(
        "Alice cancels",
        &office.cancel_booking(alice, booking.id).await,
    )?;
    show(
        "Booking after cancellation",
        &office.booking_details(alice, booking.id).await,
    )?;

    Ok(())
}
