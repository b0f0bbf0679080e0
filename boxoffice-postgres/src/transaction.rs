use std::collections::HashSet;
use std::time::Duration;

use boxoffice_types::{
    Booking, BookingId, BookingReference, BookingStatus, Operation, Payment, PaymentId,
    PaymentStatus, RowRef, StoreError, TicketTier, TierId, Transaction, TransactionReference,
    UserId,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{query, query_scalar, Pool, Postgres};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::map_sqlx_error;
use crate::rows::{self, BOOKING_COLUMNS, PAYMENT_COLUMNS, TIER_COLUMNS};

/// A database transaction that remembers which rows it has locked.
///
/// Dropping it without committing rolls the database transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    // Rows locked with FOR UPDATE or inserted by this transaction.
    held: HashSet<RowRef>,
}

impl PostgresTransaction {
    pub(crate) async fn begin(
        pool: &Pool<Postgres>,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Begin))?;

        query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Begin))?;

        Ok(Self {
            tx,
            held: HashSet::new(),
        })
    }

    fn may_modify(&self, row: RowRef) -> Result<(), StoreError> {
        if self.held.contains(&row) {
            Ok(())
        } else {
            Err(StoreError::RowNotLocked { row })
        }
    }

    async fn exists(
        &mut self,
        sql: &str,
        value: &str,
        operation: Operation,
    ) -> Result<bool, StoreError> {
        let found: bool = query_scalar(sql)
            .bind(value)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, operation))?;
        Ok(found)
    }
}

fn wide(quantity: u32) -> i64 {
    i64::from(quantity)
}

impl Transaction for PostgresTransaction {
    async fn lock_tier(&mut self, id: TierId) -> Result<Option<TicketTier>, StoreError> {
        let sql = format!("SELECT {TIER_COLUMNS} FROM ticket_tiers WHERE id = $1 FOR UPDATE");
        let row = query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LockTier))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let _ = self.held.insert(RowRef::Tier(id));
        rows::tier(&row).map(Some)
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let row = query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LockBooking))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let _ = self.held.insert(RowRef::Booking(id));
        rows::booking(&row).map(Some)
    }

    async fn lock_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        let row = query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LockPayment))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let _ = self.held.insert(RowRef::Payment(id));
        rows::payment(&row).map(Some)
    }

    async fn find_active_booking(
        &mut self,
        customer: UserId,
        tier: TierId,
    ) -> Result<Option<Booking>, StoreError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE customer_id = $1 AND tier_id = $2 \
             AND status IN ('pending', 'confirmed') AND deleted_at IS NULL \
             LIMIT 1"
        );
        query(&sql)
            .bind(Uuid::from(customer))
            .bind(Uuid::from(tier))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .as_ref()
            .map(rows::booking)
            .transpose()
    }

    async fn tier_has_bookings_in(
        &mut self,
        tier: TierId,
        status: BookingStatus,
    ) -> Result<bool, StoreError> {
        let found: bool = query_scalar(
            "SELECT EXISTS (SELECT 1 FROM bookings \
             WHERE tier_id = $1 AND status = $2 AND deleted_at IS NULL)",
        )
        .bind(Uuid::from(tier))
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::Read))?;
        Ok(found)
    }

    async fn latest_successful_payment(
        &mut self,
        booking: BookingId,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE booking_id = $1 AND status = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        query(&sql)
            .bind(Uuid::from(booking))
            .bind(PaymentStatus::Success.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Read))?
            .as_ref()
            .map(rows::payment)
            .transpose()
    }

    async fn booking_reference_taken(
        &mut self,
        reference: &BookingReference,
    ) -> Result<bool, StoreError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE reference = $1)",
            reference.as_ref(),
            Operation::CheckReference,
        )
        .await
    }

    async fn transaction_reference_taken(
        &mut self,
        reference: &TransactionReference,
    ) -> Result<bool, StoreError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE transaction_reference = $1)",
            reference.as_ref(),
            Operation::CheckReference,
        )
        .await
    }

    async fn insert_tier(&mut self, tier: &TicketTier) -> Result<(), StoreError> {
        query(
            "INSERT INTO ticket_tiers (id, event_id, name, price, total_quantity, \
             available_quantity, created_at, retired_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::from(tier.id))
        .bind(Uuid::from(tier.event_id))
        .bind(tier.name.as_ref())
        .bind(Decimal::from(tier.price))
        .bind(wide(tier.total_quantity))
        .bind(wide(tier.available_quantity))
        .bind(tier.created_at)
        .bind(tier.retired_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::WriteTier))?;
        let _ = self.held.insert(RowRef::Tier(tier.id));
        Ok(())
    }

    async fn update_tier(&mut self, tier: &TicketTier) -> Result<(), StoreError> {
        self.may_modify(RowRef::Tier(tier.id))?;
        query("UPDATE ticket_tiers SET name = $2, price = $3, retired_at = $4 WHERE id = $1")
            .bind(Uuid::from(tier.id))
            .bind(tier.name.as_ref())
            .bind(Decimal::from(tier.price))
            .bind(tier.retired_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::WriteTier))?;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        query(
            "INSERT INTO bookings (id, reference, customer_id, tier_id, quantity, total_amount, \
             status, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::from(booking.id))
        .bind(booking.reference.as_ref())
        .bind(Uuid::from(booking.customer_id))
        .bind(Uuid::from(booking.tier_id))
        .bind(wide(booking.quantity.into_inner()))
        .bind(Decimal::from(booking.total_amount))
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::WriteBooking))?;
        let _ = self.held.insert(RowRef::Booking(booking.id));
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.may_modify(RowRef::Booking(booking.id))?;
        query("UPDATE bookings SET status = $2, updated_at = $3, deleted_at = $4 WHERE id = $1")
            .bind(Uuid::from(booking.id))
            .bind(booking.status.as_str())
            .bind(booking.updated_at)
            .bind(booking.deleted_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::WriteBooking))?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        query(
            "INSERT INTO payments (id, booking_id, amount, status, method, details, \
             transaction_reference, processed_at, refunded_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::from(payment.id))
        .bind(Uuid::from(payment.booking_id))
        .bind(Decimal::from(payment.amount))
        .bind(payment.status.as_str())
        .bind(payment.method.as_ref())
        .bind(Json(&payment.details))
        .bind(payment.transaction_reference.as_ref())
        .bind(payment.processed_at)
        .bind(payment.refunded_at)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::WritePayment))?;
        let _ = self.held.insert(RowRef::Payment(payment.id));
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.may_modify(RowRef::Payment(payment.id))?;
        query(
            "UPDATE payments SET status = $2, details = $3, processed_at = $4, refunded_at = $5 \
             WHERE id = $1",
        )
        .bind(Uuid::from(payment.id))
        .bind(payment.status.as_str())
        .bind(Json(&payment.details))
        .bind(payment.processed_at)
        .bind(payment.refunded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::WritePayment))?;
        Ok(())
    }

    #[instrument(name = "postgres.decrement_available", skip(self), fields(tier = %tier))]
    async fn decrement_available(&mut self, tier: TierId, quantity: u32) -> Result<bool, StoreError> {
        self.may_modify(RowRef::Tier(tier))?;
        let result = query(
            "UPDATE ticket_tiers SET available_quantity = available_quantity - $2 \
             WHERE id = $1 AND available_quantity >= $2",
        )
        .bind(Uuid::from(tier))
        .bind(wide(quantity))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AdjustInventory))?;

        let taken = result.rows_affected() == 1;
        debug!(taken, "[postgres.decrement_available] conditional decrement applied");
        Ok(taken)
    }

    #[instrument(name = "postgres.increment_available", skip(self), fields(tier = %tier))]
    async fn increment_available(&mut self, tier: TierId, quantity: u32) -> Result<(), StoreError> {
        self.may_modify(RowRef::Tier(tier))?;
        let result = query(
            "UPDATE ticket_tiers SET available_quantity = available_quantity + $2 \
             WHERE id = $1 AND available_quantity + $2 <= total_quantity",
        )
        .bind(Uuid::from(tier))
        .bind(wide(quantity))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AdjustInventory))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Corrupt {
                detail: format!("releasing {quantity} units would exceed the total stock of tier {tier}"),
            })
        }
    }

    #[instrument(name = "postgres.resize_tier", skip(self), fields(tier = %tier))]
    async fn resize_tier(&mut self, tier: TierId, total: u32) -> Result<bool, StoreError> {
        self.may_modify(RowRef::Tier(tier))?;
        let result = query(
            "UPDATE ticket_tiers \
             SET available_quantity = available_quantity + ($2 - total_quantity), \
                 total_quantity = $2 \
             WHERE id = $1 AND $2 >= total_quantity - available_quantity",
        )
        .bind(Uuid::from(tier))
        .bind(wide(total))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AdjustInventory))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(name = "postgres.commit", skip(self), fields(rows = self.held.len()))]
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Commit))?;
        debug!("[postgres.commit] transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Rollback))
    }
}
