//! Shared validation predicates for domain types.
//!
//! This module contains validation functions used by nutype-based domain types
//! across the boxoffice-types crate.

/// Characters used in generated reference suffixes.
pub(crate) const REFERENCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Validation predicate: `prefix` followed by exactly `len` uppercase alphanumerics.
pub(crate) fn is_reference(s: &str, prefix: &str, len: usize) -> bool {
    s.strip_prefix(prefix).is_some_and(|suffix| {
        suffix.len() == len && suffix.bytes().all(|b| REFERENCE_CHARSET.contains(&b))
    })
}

/// Validation predicate: payment method tags are `[a-z0-9_]` only.
pub(crate) fn is_method_tag(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
