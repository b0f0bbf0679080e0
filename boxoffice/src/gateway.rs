//! Payment gateway capability and its simulation.

use async_trait::async_trait;
use boxoffice_types::Money;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::{GatewayConfig, LatencyWindow, Probability};

/// Reasons a simulated charge is declined, drawn uniformly.
pub const DECLINE_REASONS: [&str; 4] = [
    "Insufficient funds",
    "Payment gateway timeout",
    "Invalid payment method",
    "Transaction declined by bank",
];

/// Reason a simulated refund fails.
pub const REFUND_FAILURE_REASON: &str = "Refund gateway timeout";

/// Answer from a payment gateway. A decline is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Money moved.
    Approved {
        /// Processor's confirmation text.
        message: String,
        /// Processor's transaction reference.
        reference: String,
    },
    /// Nothing moved.
    Declined {
        /// Why, as the processor put it.
        reason: String,
    },
}

impl GatewayOutcome {
    /// Whether money moved.
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// External processor that moves money.
#[async_trait]
///
/// Calls are never retried by the engine: a charge may have moved money even
/// when the surrounding transaction later fails.
pub trait PaymentGateway: Send + Sync {
    /// Takes `amount` from the customer.
    async fn charge(&self, amount: Money) -> GatewayOutcome;

    /// Returns `amount` to the customer.
    async fn refund(&self, amount: Money) -> GatewayOutcome;
}

/// Probabilistic stand-in for a real payment network.
///
/// Each call sleeps for a random latency inside the configured window, then
/// approves with the configured probability.
pub struct SimulatedGateway {
    config: GatewayConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedGateway {
    /// Gateway seeded from `config.seed`, or from entropy when unset.
    pub fn new(config: GatewayConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    fn draw(
        &self,
        success_rate: Probability,
        latency: LatencyWindow,
        prefix: &str,
        decline: impl FnOnce(&mut StdRng) -> String,
    ) -> (Duration, Result<String, String>) {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let delay = Duration::from_millis(rng.random_range(latency.min_ms()..=latency.max_ms()));
        let approved = rng.random_bool(success_rate.into());
        let result = if approved {
            Ok(format!("{prefix}{:016X}", rng.random::<u64>()))
        } else {
            Err(decline(&mut *rng))
        };

        (delay, result)
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    #[instrument(name = "gateway.charge", skip(self, amount))]
    async fn charge(&self, amount: Money) -> GatewayOutcome {
        let (delay, result) = self.draw(
            self.config.charge_success_rate,
            self.config.charge_latency,
            "GTW-",
            |rng| DECLINE_REASONS[rng.random_range(0..DECLINE_REASONS.len())].to_string(),
        );
        tokio::time::sleep(delay).await;

        let outcome = match result {
            Ok(reference) => GatewayOutcome::Approved {
                message: "Payment completed successfully".to_string(),
                reference,
            },
            Err(reason) => GatewayOutcome::Declined { reason },
        };
        debug!(%amount, ?outcome, delay_ms = ?delay, "[gateway.charge] simulated charge finished");
        outcome
    }

    #[instrument(name = "gateway.refund", skip(self, amount))]
    async fn refund(&self, amount: Money) -> GatewayOutcome {
        let (delay, result) = self.draw(
            self.config.refund_success_rate,
            self.config.refund_latency,
            "RFD-",
            |_| REFUND_FAILURE_REASON.to_string(),
        );
        tokio::time::sleep(delay).await;

        let outcome = match result {
            Ok(reference) => GatewayOutcome::Approved {
                message: "Refund completed successfully".to_string(),
                reference,
            },
            Err(reason) => GatewayOutcome::Declined { reason },
        };
        debug!(%amount, ?outcome, delay_ms = ?delay, "[gateway.refund] simulated refund finished");
        outcome
    }
}
