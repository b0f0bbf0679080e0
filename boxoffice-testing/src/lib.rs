//! Test support for the `BoxOffice` booking engine
//!
//! - [`ScriptedGateway`] and [`RecordingNotifier`] replace the outbound edges.
//! - [`ChaosStore`] injects transient storage failures around any [`Store`](boxoffice_types::Store).
//! - [`contract`] holds the behaviour every storage backend must share.
//! - [`Venue`] wires an engine over the in-memory store for scenario tests.

#![forbid(unsafe_code)]

pub mod chaos;
pub mod contract;
pub mod fixture;
pub mod gateway;
pub mod notifier;

pub use chaos::{ChaosConfig, ChaosStore, ChaosStoreExt, ChaosTransaction};
pub use fixture::{Venue, VenueBuilder};
pub use gateway::{approved, declined, ScriptedGateway};
pub use notifier::RecordingNotifier;

/// Installs a test-friendly subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
