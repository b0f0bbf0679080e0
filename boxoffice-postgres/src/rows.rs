//! Column lists and row decoding.

use std::fmt::Display;

use boxoffice_types::{
    Booking, BookingReference, EventListing, Money, Operation, Payment, PaymentDetails,
    PaymentMethod, Quantity, StoreError, TicketTier, TierName, TransactionReference,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::map_sqlx_error;

pub(crate) const EVENT_COLUMNS: &str = "id, title, starts_at, organizer_id";

pub(crate) const TIER_COLUMNS: &str =
    "id, event_id, name, price, total_quantity, available_quantity, created_at, retired_at";

pub(crate) const BOOKING_COLUMNS: &str = "id, reference, customer_id, tier_id, quantity, \
     total_amount, status, created_at, updated_at, deleted_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, booking_id, amount, status, method, details, \
     transaction_reference, processed_at, refunded_at, created_at";

fn corrupt(column: &str, error: impl Display) -> StoreError {
    StoreError::Corrupt {
        detail: format!("{column}: {error}"),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|error| map_sqlx_error(error, Operation::Read))
}

fn count(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let value: i64 = column(row, name)?;
    u32::try_from(value).map_err(|error| corrupt(name, error))
}

fn money(row: &PgRow, name: &str) -> Result<Money, StoreError> {
    let value: Decimal = column(row, name)?;
    Money::new(value).map_err(|error| corrupt(name, error))
}

pub(crate) fn event(row: &PgRow) -> Result<EventListing, StoreError> {
    Ok(EventListing {
        id: column::<Uuid>(row, "id")?.into(),
        title: column(row, "title")?,
        starts_at: column(row, "starts_at")?,
        organizer_id: column::<Uuid>(row, "organizer_id")?.into(),
    })
}

pub(crate) fn tier(row: &PgRow) -> Result<TicketTier, StoreError> {
    let name: String = column(row, "name")?;
    Ok(TicketTier {
        id: column::<Uuid>(row, "id")?.into(),
        event_id: column::<Uuid>(row, "event_id")?.into(),
        name: TierName::try_new(name).map_err(|error| corrupt("name", error))?,
        price: money(row, "price")?,
        total_quantity: count(row, "total_quantity")?,
        available_quantity: count(row, "available_quantity")?,
        created_at: column(row, "created_at")?,
        retired_at: column::<Option<DateTime<Utc>>>(row, "retired_at")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking, StoreError> {
    let reference: String = column(row, "reference")?;
    let status: String = column(row, "status")?;
    Ok(Booking {
        id: column::<Uuid>(row, "id")?.into(),
        reference: BookingReference::try_new(reference)
            .map_err(|error| corrupt("reference", error))?,
        customer_id: column::<Uuid>(row, "customer_id")?.into(),
        tier_id: column::<Uuid>(row, "tier_id")?.into(),
        quantity: Quantity::try_new(count(row, "quantity")?)
            .map_err(|error| corrupt("quantity", error))?,
        total_amount: money(row, "total_amount")?,
        status: status.parse().map_err(|error| corrupt("status", error))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        deleted_at: column::<Option<DateTime<Utc>>>(row, "deleted_at")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<Payment, StoreError> {
    let status: String = column(row, "status")?;
    let method: String = column(row, "method")?;
    let reference: String = column(row, "transaction_reference")?;
    let Json(details) = column::<Json<PaymentDetails>>(row, "details")?;
    Ok(Payment {
        id: column::<Uuid>(row, "id")?.into(),
        booking_id: column::<Uuid>(row, "booking_id")?.into(),
        amount: money(row, "amount")?,
        status: status.parse().map_err(|error| corrupt("status", error))?,
        method: PaymentMethod::try_new(method).map_err(|error| corrupt("method", error))?,
        details,
        transaction_reference: TransactionReference::try_new(reference)
            .map_err(|error| corrupt("transaction_reference", error))?,
        processed_at: column::<Option<DateTime<Utc>>>(row, "processed_at")?,
        refunded_at: column::<Option<DateTime<Utc>>>(row, "refunded_at")?,
        created_at: column(row, "created_at")?,
    })
}
