//! Notifier that records what it was asked to send.

use async_trait::async_trait;
use boxoffice::{BookingConfirmation, Notifier, NotifyError};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Keeps every confirmation it receives, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<BookingConfirmation>>,
    arrived: Notify,
    fail_with: Option<String>,
}

impl RecordingNotifier {
    /// Notifier that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every call but reports each one as failed.
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Confirmations received so far.
    pub fn sent(&self) -> Vec<BookingConfirmation> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    /// Waits until at least `count` confirmations arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<BookingConfirmation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let arrived = self.arrived.notified();
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.sent();
            }
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn booking_confirmed(&self, confirmation: BookingConfirmation) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(confirmation);
        self.arrived.notify_waiters();

        match &self.fail_with {
            Some(reason) => Err(NotifyError(reason.clone())),
            None => Ok(()),
        }
    }
}
