//! Deterministic payment gateway.

use async_trait::async_trait;
use boxoffice::{GatewayOutcome, PaymentGateway};
use boxoffice_types::Money;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Gateway that replays queued outcomes and counts calls.
///
/// With an empty queue every call is approved.
///
/// ```
/// use boxoffice_testing::{declined, ScriptedGateway};
///
/// let gateway = ScriptedGateway::new().then_charge(declined("Card expired"));
/// assert_eq!(gateway.charge_calls(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    charges: Mutex<VecDeque<GatewayOutcome>>,
    refunds: Mutex<VecDeque<GatewayOutcome>>,
    charge_calls: AtomicU32,
    refund_calls: AtomicU32,
    latency: Option<Duration>,
}

/// An approval carrying `reference` as the processor's reference.
pub fn approved(reference: &str) -> GatewayOutcome {
    GatewayOutcome::Approved {
        message: "Payment completed successfully".to_string(),
        reference: reference.to_string(),
    }
}

/// A decline with `reason`.
pub fn declined(reason: &str) -> GatewayOutcome {
    GatewayOutcome::Declined {
        reason: reason.to_string(),
    }
}

impl ScriptedGateway {
    /// Approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long inside every call, holding whatever locks the caller holds.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues the answer to the next unanswered charge.
    #[must_use]
    pub fn then_charge(self, outcome: GatewayOutcome) -> Self {
        self.charges
            .lock()
            .expect("scripted gateway mutex poisoned")
            .push_back(outcome);
        self
    }

    /// Queues the answer to the next unanswered refund.
    #[must_use]
    pub fn then_refund(self, outcome: GatewayOutcome) -> Self {
        self.refunds
            .lock()
            .expect("scripted gateway mutex poisoned")
            .push_back(outcome);
        self
    }

    /// Charges attempted so far.
    pub fn charge_calls(&self) -> u32 {
        self.charge_calls.load(Ordering::SeqCst)
    }

    /// Refunds attempted so far.
    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }

    fn next(queue: &Mutex<VecDeque<GatewayOutcome>>, fallback: &str) -> GatewayOutcome {
        queue
            .lock()
            .expect("scripted gateway mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| approved(fallback))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, _amount: Money) -> GatewayOutcome {
        let call = self.charge_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = Self::next(&self.charges, &format!("GTW-SCRIPTED{call:04}"));
        self.pause().await;
        outcome
    }

    async fn refund(&self, _amount: Money) -> GatewayOutcome {
        let call = self.refund_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = Self::next(&self.refunds, &format!("RFD-SCRIPTED{call:04}"));
        self.pause().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_queue_then_approves() {
        let gateway = ScriptedGateway::new().then_charge(declined("Insufficient funds"));
        let amount = Money::from_cents(100).unwrap();

        assert!(!gateway.charge(amount).await.is_approved());
        assert!(gateway.charge(amount).await.is_approved());
        assert_eq!(gateway.charge_calls(), 2);
        assert_eq!(gateway.refund_calls(), 0);
    }
}
