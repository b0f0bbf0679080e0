//! Post-commit signals and confirmation notices.
//!
//! Nothing here participates in a transaction. Signals are emitted after a
//! unit commits; a listing cache or any other subscriber reacts on its own
//! schedule. Notification failures are logged and never reach the caller.

use async_trait::async_trait;
use boxoffice_types::{BookingId, BookingReference, EventId, Money, Quantity, TierId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, Instrument};

/// Something that changed after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A tier's available stock changed.
    InventoryChanged {
        /// Tier whose stock moved.
        tier_id: TierId,
    },
    /// A tier was created, edited or retired.
    CatalogChanged {
        /// Event owning the tier.
        event_id: EventId,
        /// Tier that changed.
        tier_id: TierId,
    },
}

/// Broadcast channel for [`Signal`]s.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    /// Bus buffering up to `capacity` signals per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every signal emitted from now on.
    ///
    /// ```
    /// use boxoffice::{Signal, SignalBus};
    /// use boxoffice::types::TierId;
    ///
    /// let bus = SignalBus::default();
    /// let mut signals = bus.subscribe();
    /// let tier_id = TierId::generate();
    ///
    /// bus.emit(Signal::InventoryChanged { tier_id });
    /// assert_eq!(signals.try_recv().unwrap(), Signal::InventoryChanged { tier_id });
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Best effort: a bus with no subscribers drops the signal.
    pub fn emit(&self, signal: Signal) {
        match self.sender.send(signal) {
            Ok(receivers) => debug!(?signal, receivers, "[signals.emit] signal sent"),
            Err(_) => debug!(?signal, "[signals.emit] no subscribers"),
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Payload sent to the customer when a payment confirms their booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    /// Confirmed booking.
    pub booking_id: BookingId,
    /// Reference printed on the ticket.
    pub reference: BookingReference,
    /// Recipient.
    pub customer_id: UserId,
    /// Tier booked.
    pub tier_id: TierId,
    /// Tier name at confirmation time.
    pub tier_name: String,
    /// Event title at confirmation time.
    pub event_title: String,
    /// When the event starts.
    pub event_starts_at: DateTime<Utc>,
    /// Tickets confirmed.
    pub quantity: Quantity,
    /// Amount charged.
    pub total_amount: Money,
}

/// A [`Notifier`] could not deliver; carries the channel's reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells the customer their booking is confirmed.
    async fn booking_confirmed(&self, confirmation: BookingConfirmation) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_confirmed(&self, confirmation: BookingConfirmation) -> Result<(), NotifyError> {
        info!(
            booking = %confirmation.booking_id,
            reference = %confirmation.reference,
            event = %confirmation.event_title,
            "[notifier.booking_confirmed] confirmation recorded"
        );
        Ok(())
    }
}

/// Sends a confirmation in the background. Failures are logged only.
pub fn dispatch_confirmation(
    notifier: Arc<dyn Notifier>,
    confirmation: BookingConfirmation,
) -> tokio::task::JoinHandle<()> {
    let task = async move {
        let booking = confirmation.booking_id;
        if let Err(error) = notifier.booking_confirmed(confirmation).await {
            error!(
                booking = %booking,
                error = %error,
                "[signals.dispatch_confirmation] failed to send booking confirmation"
            );
        }
    };
    tokio::spawn(task.in_current_span())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn booking_confirmed(&self, _: BookingConfirmation) -> Result<(), NotifyError> {
            Err(NotifyError("mail server down".to_string()))
        }
    }

    fn confirmation() -> BookingConfirmation {
        BookingConfirmation {
            booking_id: BookingId::generate(),
            reference: BookingReference::try_new("BKG-ABCD1234".to_string()).unwrap(),
            customer_id: UserId::generate(),
            tier_id: TierId::generate(),
            tier_name: "VIP".to_string(),
            event_title: "Opening Night".to_string(),
            event_starts_at: Utc::now(),
            quantity: Quantity::try_new(2).unwrap(),
            total_amount: Money::from_cents(30_000).unwrap(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_signals() {
        let bus = SignalBus::default();
        let mut receiver = bus.subscribe();
        let tier_id = TierId::generate();

        bus.emit(Signal::InventoryChanged { tier_id });

        assert_eq!(
            receiver.recv().await.unwrap(),
            Signal::InventoryChanged { tier_id }
        );
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        SignalBus::new(4).emit(Signal::InventoryChanged {
            tier_id: TierId::generate(),
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_notification_is_logged_not_raised() {
        dispatch_confirmation(Arc::new(Broken), confirmation())
            .await
            .unwrap();

        assert!(logs_contain("failed to send booking confirmation"));
    }
}
