//! Kazaro - medical supply ordering backend.
//!
//! Library core behind the Kazaro web UI. The HTTP layer calls the
//! functions in [`commands`] one-to-one per route; everything below that
//! boundary lives here: catalog schema resolution over the legacy SQLite
//! database, pedido submission with atomic stock decrement, the assignment
//! pivots (supervisor-service, service-product, product-role visibility),
//! per-service budgets, and monthly reporting.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod assignments;
pub mod budgets;
pub mod catalog;
pub mod commands;
pub mod db;
pub mod orders;
pub mod reports;
pub mod schema;

/// Fraction of a service's budget a single pedido may spend.
pub const ORDER_CAP_RATIO: f64 = 0.05;

/// Initialize tracing for an embedding binary.
///
/// Respects `RUST_LOG`; defaults to `info` globally and `debug` for this
/// crate. The HTTP glue owns any additional sinks.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kazaro=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}
