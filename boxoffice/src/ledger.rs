//! Ticket inventory ledger.
//!
//! The only code that changes a tier's stock counters. Each operation locks
//! the tier row first (a no-op when the transaction already holds it), so
//! concurrent units touching the same tier serialize.

use boxoffice_types::{Quantity, TicketTier, TierId, Transaction};
use tracing::debug;

use crate::errors::{BookingError, Entity};

async fn locked_tier<T: Transaction>(tx: &mut T, tier: TierId) -> Result<TicketTier, BookingError> {
    tx.lock_tier(tier)
        .await?
        .ok_or_else(|| BookingError::not_found(Entity::Tier, tier))
}

/// Takes `quantity` units out of stock.
///
/// Returns `false` with no effect when fewer than `quantity` remain.
pub async fn reserve<T: Transaction>(
    tx: &mut T,
    tier: TierId,
    quantity: Quantity,
) -> Result<bool, BookingError> {
    let _ = locked_tier(tx, tier).await?;
    let reserved = tx.decrement_available(tier, quantity.into_inner()).await?;

    debug!(
        tier = %tier,
        quantity = %quantity,
        reserved,
        "[ledger.reserve] stock reservation attempted"
    );
    Ok(reserved)
}

/// Returns `quantity` units to stock.
pub async fn release<T: Transaction>(
    tx: &mut T,
    tier: TierId,
    quantity: Quantity,
) -> Result<(), BookingError> {
    let _ = locked_tier(tx, tier).await?;
    tx.increment_available(tier, quantity.into_inner()).await?;

    debug!(
        tier = %tier,
        quantity = %quantity,
        "[ledger.release] stock released"
    );
    Ok(())
}

/// Changes a tier's total stock, keeping booked units booked.
///
/// Returns `false` with no effect when `total` is below the booked quantity.
pub async fn resize<T: Transaction>(
    tx: &mut T,
    tier: TierId,
    total: u32,
) -> Result<bool, BookingError> {
    let current = locked_tier(tx, tier).await?;
    let resized = tx.resize_tier(tier, total).await?;

    debug!(
        tier = %tier,
        from = current.total_quantity,
        to = total,
        booked = current.booked_quantity(),
        resized,
        "[ledger.resize] tier resize attempted"
    );
    Ok(resized)
}
