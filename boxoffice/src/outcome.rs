//! Caller-facing result envelope.
//!
//! Serializes as `{"ok": true, "message", "data"}` on success and
//! `{"ok": false, "errorKind", "message", "errors"?, "data"?}` on failure.
//! A failure carries `data` only when the refusal still committed a record,
//! such as the failed payment row of a declined charge.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::errors::{BookingError, ErrorKind, FieldError};

/// Failure half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Classification the transport layer maps to a status.
    pub kind: ErrorKind,
    /// Human-readable message, safe to show the caller.
    pub message: String,
    /// Per-field detail for validation failures; empty otherwise.
    pub errors: Vec<FieldError>,
}

impl From<&BookingError> for Failure {
    fn from(error: &BookingError) -> Self {
        Self {
            kind: error.kind(),
            message: error.public_message(),
            errors: error.field_errors().to_vec(),
        }
    }
}

/// Result of a [`BoxOffice`](crate::BoxOffice) operation.
///
/// # Example
///
/// ```
/// use boxoffice::{ErrorKind, Outcome};
///
/// let refused: Outcome<u32> = Outcome::failure(ErrorKind::NotFound, "Booking not found");
/// assert_eq!(
///     serde_json::to_string(&refused).unwrap(),
///     r#"{"ok":false,"errorKind":"NotFound","message":"Booking not found"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation committed.
    Success {
        /// Confirmation text.
        message: String,
        /// What the operation produced.
        data: T,
    },
    /// The operation was refused or failed.
    Failure {
        /// Why.
        failure: Failure,
        /// Record committed despite the refusal, if any.
        data: Option<T>,
    },
}

impl<T> Outcome<T> {
    /// Successful outcome.
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self::Success {
            message: message.into(),
            data,
        }
    }

    /// Failed outcome without field detail or data.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            failure: Failure {
                kind,
                message: message.into(),
                errors: Vec::new(),
            },
            data: None,
        }
    }

    /// Failed outcome that still reports what was recorded.
    pub fn failure_with(kind: ErrorKind, message: impl Into<String>, data: T) -> Self {
        Self::Failure {
            failure: Failure {
                kind,
                message: message.into(),
                errors: Vec::new(),
            },
            data: Some(data),
        }
    }

    /// Wraps an engine result; `message` is used only on success.
    pub fn from_result(result: Result<T, BookingError>, message: &str) -> Self {
        match result {
            Ok(data) => Self::success(message, data),
            Err(error) => Self::Failure {
                failure: Failure::from(&error),
                data: None,
            },
        }
    }

    /// Whether the operation succeeded.
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Success or failure message.
    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. } => message,
            Self::Failure { failure, .. } => &failure.message,
        }
    }

    /// Data of a successful outcome.
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Data attached to a failure, such as a declined payment.
    pub const fn failure_data(&self) -> Option<&T> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { data, .. } => data.as_ref(),
        }
    }

    /// Kind of a failed outcome.
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { failure, .. } => Some(failure.kind),
        }
    }

    /// Consumes the outcome, keeping only success data.
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        match self {
            Self::Success { message, data } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("data", data)?;
                map.end()
            }
            Self::Failure { failure, data } => {
                let len = 3 + usize::from(!failure.errors.is_empty()) + usize::from(data.is_some());
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("errorKind", &failure.kind)?;
                map.serialize_entry("message", &failure.message)?;
                if !failure.errors.is_empty() {
                    map.serialize_entry("errors", &failure.errors)?;
                }
                if let Some(data) = data {
                    map.serialize_entry("data", data)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope() {
        let outcome = Outcome::success("Booking created successfully", 7);

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"ok": true, "message": "Booking created successfully", "data": 7})
        );
    }

    #[test]
    fn failure_envelope_hides_internal_detail() {
        let outcome: Outcome<()> = Outcome::from_result(
            Err(BookingError::Internal {
                detail: "connection reset".to_string(),
            }),
            "unused",
        );

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"ok": false, "errorKind": "Internal", "message": "Internal server error"})
        );
    }

    #[test]
    fn validation_failures_carry_field_errors() {
        let outcome: Outcome<()> =
            Outcome::from_result(Err(BookingError::invalid("quantity", "must be at least 1")), "");

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["errorKind"], "Validation");
        assert_eq!(value["errors"][0]["field"], "quantity");
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Validation));
    }

    #[test]
    fn failure_can_report_what_was_recorded() {
        let outcome = Outcome::failure_with(
            ErrorKind::PaymentDeclined,
            "Payment failed: Insufficient funds",
            json!({"status": "failed"}),
        );

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "ok": false,
                "errorKind": "PaymentDeclined",
                "message": "Payment failed: Insufficient funds",
                "data": {"status": "failed"}
            })
        );
        assert!(outcome.data().is_none());
        assert_eq!(outcome.failure_data(), Some(&json!({"status": "failed"})));
    }
}
