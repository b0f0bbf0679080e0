//! Ready-made engine over the in-memory store.

use std::sync::Arc;

use boxoffice::{BoxOffice, Caller, RetryPolicy};
use boxoffice_memory::InMemoryStore;
use boxoffice_types::{EventId, EventListing, Money, TicketTier, TierName, UserId};
use chrono::{Duration, Utc};

use crate::gateway::ScriptedGateway;
use crate::notifier::RecordingNotifier;

/// One event with one tier, wired to a scripted gateway and a recording notifier.
///
/// # Example
///
/// ```
/// use boxoffice_testing::Venue;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let venue = Venue::builder().total(10).build();
/// let booked = venue.office.create_booking(Venue::customer(), venue.tier.id, 3).await;
///
/// assert!(booked.is_ok());
/// assert_eq!(venue.available().await, 7);
/// # });
/// ```
pub struct Venue {
    /// Backing store, for seeding and for inspecting committed rows.
    pub store: InMemoryStore,
    /// The engine under test.
    pub office: BoxOffice<InMemoryStore>,
    /// The seeded event.
    pub event: EventListing,
    /// The seeded tier, as it was at build time.
    pub tier: TicketTier,
    /// Organizer of [`event`](Self::event).
    pub organizer: Caller,
    /// Gateway the engine charges through.
    pub gateway: Arc<ScriptedGateway>,
    /// Notifier the engine confirms through.
    pub notifier: Arc<RecordingNotifier>,
}

impl Venue {
    /// 100 tickets at 50.00, a week out, approving every charge.
    pub fn builder() -> VenueBuilder {
        VenueBuilder::default()
    }

    /// A fresh customer identity.
    pub fn customer() -> Caller {
        Caller::customer(UserId::generate())
    }

    /// Committed available stock of the venue's tier.
    pub async fn available(&self) -> u32 {
        use boxoffice_types::Store;

        self.store
            .tier(self.tier.id)
            .await
            .expect("in-memory reads do not fail")
            .expect("venue tier exists")
            .available_quantity
    }

    /// Moves the event into the past.
    pub fn start_event(&self) {
        self.store
            .reschedule_event(self.event.id, Utc::now() - Duration::minutes(1));
    }
}

/// Builder for [`Venue`].
pub struct VenueBuilder {
    total: u32,
    price: Money,
    starts_in: Duration,
    gateway: ScriptedGateway,
    notifier: RecordingNotifier,
    retry: RetryPolicy,
    store: InMemoryStore,
}

impl Default for VenueBuilder {
    fn default() -> Self {
        Self {
            total: 100,
            price: Money::from_cents(5_000).expect("valid amount"),
            starts_in: Duration::days(7),
            gateway: ScriptedGateway::new(),
            notifier: RecordingNotifier::new(),
            retry: RetryPolicy::new().base_delay(std::time::Duration::from_millis(1)),
            store: InMemoryStore::new(),
        }
    }
}

impl VenueBuilder {
    /// Tier capacity.
    #[must_use]
    pub const fn total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    /// Unit price.
    #[must_use]
    pub const fn price(mut self, price: Money) -> Self {
        self.price = price;
        self
    }

    /// Time until the event starts.
    #[must_use]
    pub const fn starts_in(mut self, starts_in: Duration) -> Self {
        self.starts_in = starts_in;
        self
    }

    /// Scripted answers for charges and refunds.
    #[must_use]
    pub fn gateway(mut self, gateway: ScriptedGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replace the default recording notifier, e.g. with a failing one.
    #[must_use]
    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Defaults to three retries with a 1ms base delay.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use an existing store, e.g. one with a lock timeout.
    #[must_use]
    pub fn store(mut self, store: InMemoryStore) -> Self {
        self.store = store;
        self
    }

    /// Seeds the event and tier and builds the engine.
    pub fn build(self) -> Venue {
        let organizer = Caller::organizer(UserId::generate());
        let event = EventListing {
            id: EventId::generate(),
            title: "Test Concert".to_string(),
            starts_at: Utc::now() + self.starts_in,
            organizer_id: organizer.user_id,
        };
        let tier = TicketTier::new(
            event.id,
            TierName::try_new("General Admission".to_string()).expect("valid tier name"),
            self.price,
            self.total,
            Utc::now(),
        );
        self.store.seed_event(event.clone());
        self.store.seed_tier(tier.clone());

        let gateway = Arc::new(self.gateway);
        let notifier = Arc::new(self.notifier);
        let office = BoxOffice::builder(self.store.clone(), Arc::new(self.store.clone()))
            .gateway(gateway.clone())
            .notifier(notifier.clone())
            .retry_policy(self.retry)
            .build();

        Venue {
            store: self.store,
            office,
            event,
            tier,
            organizer,
            gateway,
            notifier,
        }
    }
}
