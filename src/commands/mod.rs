//! Route-facing command boundary.
//!
//! One function per UI route. Commands parse loose JSON payloads (the
//! web layer forwards request bodies verbatim, and older frontend builds
//! still send snake_case keys), call into the domain modules, and answer
//! with a JSON envelope: `success: true` plus data, or `success: false`
//! plus a stable `code` for the typed failures the UI branches on.
//! Malformed payloads and infrastructure problems are plain
//! `Err(String)`, which the HTTP layer turns into 400/500 responses.

pub mod assignments;
pub mod budgets;
pub mod catalog;
pub mod orders;
pub mod reports;

use crate::{value_i64, value_str};

/// Accept an id as a bare number, a numeric string, or a field of an
/// object payload.
pub(crate) fn payload_arg0_as_i64(arg0: Option<serde_json::Value>, keys: &[&str]) -> Option<i64> {
    match arg0 {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        Some(serde_json::Value::Object(obj)) => {
            let payload = serde_json::Value::Object(obj);
            value_i64(&payload, keys)
                .or_else(|| value_str(&payload, keys).and_then(|s| s.parse().ok()))
        }
        _ => None,
    }
}
