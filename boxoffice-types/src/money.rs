//! Fixed-point monetary amounts.
//!
//! Prices, booking totals and payment amounts are all [`Money`]: whole cents,
//! never negative, capped at [`MAX_MONEY_AMOUNT`].

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

use crate::records::Quantity;

/// Why an amount is not valid money.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Below zero.
    #[error("amount {0} is negative")]
    Negative(Decimal),

    /// Finer than a cent.
    #[error("amount {0} has fractional cents")]
    FractionalCents(Decimal),

    /// Above [`MAX_MONEY_AMOUNT`], or a product that overflowed.
    #[error("amount {0} is above the {max} ceiling", max = MAX_MONEY_AMOUNT)]
    TooLarge(Decimal),

    /// Text that is not a decimal number.
    #[error("'{0}' is not an amount")]
    Unparseable(String),
}

/// Largest amount a price or a booking total may reach.
pub const MAX_MONEY_AMOUNT: Decimal = dec!(99_999_999.99);

/// A non-negative amount in whole cents, always carried at scale 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Validates `amount` as money.
    ///
    /// # Errors
    ///
    /// [`MoneyError`] when the amount is negative, has fractional cents or is
    /// above the ceiling. Trailing zeros beyond the cents are accepted.
    pub fn new(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative(amount));
        }
        if amount.normalize().scale() > 2 {
            return Err(MoneyError::FractionalCents(amount));
        }
        if amount > MAX_MONEY_AMOUNT {
            return Err(MoneyError::TooLarge(amount));
        }
        Ok(Self(at_cents(amount)))
    }

    /// `from_cents(8_500)` is 85.00.
    ///
    /// # Errors
    ///
    /// [`MoneyError::TooLarge`] above the ceiling.
    pub fn from_cents(cents: u64) -> Result<Self, MoneyError> {
        Self::new(Decimal::from(cents) / dec!(100))
    }

    /// The amount at scale 2.
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Unit price times a ticket quantity, rounded half away from zero.
    ///
    /// # Errors
    ///
    /// [`MoneyError::TooLarge`] when the total passes the ceiling.
    pub fn times(&self, quantity: Quantity) -> Result<Self, MoneyError> {
        let product = self
            .0
            .checked_mul(Decimal::from(quantity.into_inner()))
            .ok_or(MoneyError::TooLarge(self.0))?;
        Self::new(product.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// 0.00
    pub fn zero() -> Self {
        Self(at_cents(Decimal::ZERO))
    }
}

fn at_cents(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Accepts an optional leading `$`, e.g. `"$150.00"`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let digits = text.trim().trim_start_matches('$').trim();
        let amount = Decimal::from_str(digits)
            .map_err(|_| MoneyError::Unparseable(text.trim().to_string()))?;
        Self::new(amount)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}
