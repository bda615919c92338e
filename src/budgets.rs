//! Per-service budgets and the pedido spending cap.
//!
//! A single pedido may spend at most [`crate::ORDER_CAP_RATIO`] of its
//! service's budget. The cap is checked by the UI before submission via
//! [`check_order_cap`]; submission itself does not re-validate it. That
//! gap is inherited behavior (see DESIGN.md) — the data layer treats the
//! cap as advisory.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};

use crate::db::DbState;
use crate::ORDER_CAP_RATIO;

/// Upsert a service's budget.
pub fn set_budget(db: &DbState, servicio_id: i64, presupuesto: f64) -> Result<(), String> {
    if presupuesto < 0.0 {
        return Err(format!("budget must be non-negative, got {presupuesto}"));
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO servicio_presupuestos (servicio_id, presupuesto, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(servicio_id) DO UPDATE SET
            presupuesto = excluded.presupuesto,
            updated_at = excluded.updated_at",
        params![servicio_id, presupuesto],
    )
    .map_err(|e| format!("set budget: {e}"))?;
    info!(servicio_id, presupuesto, "Budget updated");
    Ok(())
}

/// A service's budget, or `None` when no row exists.
pub fn get_budget(db: &DbState, servicio_id: i64) -> Result<Option<f64>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        "SELECT presupuesto FROM servicio_presupuestos WHERE servicio_id = ?1",
        params![servicio_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| format!("get budget: {e}"))
}

/// All budgets, by service id.
pub fn list_budgets(db: &DbState) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT servicio_id, presupuesto, updated_at
             FROM servicio_presupuestos ORDER BY servicio_id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok(serde_json::json!({
                "servicioId": row.get::<_, i64>(0)?,
                "presupuesto": row.get::<_, f64>(1)?,
                "updatedAt": row.get::<_, String>(2)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    let mut budgets = Vec::new();
    for row in rows {
        match row {
            Ok(b) => budgets.push(b),
            Err(e) => warn!("skipping malformed budget row: {e}"),
        }
    }
    Ok(budgets)
}

/// Remove a service's budget. Returns whether a row existed.
pub fn delete_budget(db: &DbState, servicio_id: i64) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let n = conn
        .execute(
            "DELETE FROM servicio_presupuestos WHERE servicio_id = ?1",
            params![servicio_id],
        )
        .map_err(|e| format!("delete budget: {e}"))?;
    Ok(n > 0)
}

/// Pre-submission cap check: a pedido total may not exceed 5% of the
/// service's budget. Services without a positive budget impose no cap.
pub fn check_order_cap(db: &DbState, servicio_id: i64, total: f64) -> Result<Value, String> {
    let presupuesto = get_budget(db, servicio_id)?;
    let cap = presupuesto
        .filter(|p| *p > 0.0)
        .map(|p| p * ORDER_CAP_RATIO);
    let allowed = cap.map_or(true, |c| total <= c);

    Ok(serde_json::json!({
        "allowed": allowed,
        "servicioId": servicio_id,
        "total": total,
        "cap": cap,
        "presupuesto": presupuesto,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_state() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog: Err(crate::schema::SchemaError::NoProductsTable(
                "not needed here".to_string(),
            )),
        }
    }

    #[test]
    fn test_budget_upsert_and_delete() {
        let db = test_state();

        assert_eq!(get_budget(&db, 7).unwrap(), None);
        set_budget(&db, 7, 120_000.0).expect("set");
        assert_eq!(get_budget(&db, 7).unwrap(), Some(120_000.0));

        set_budget(&db, 7, 150_000.0).expect("update");
        assert_eq!(get_budget(&db, 7).unwrap(), Some(150_000.0));

        set_budget(&db, 8, 50_000.0).expect("set other");
        let all = list_budgets(&db).expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["servicioId"], 7);

        assert!(delete_budget(&db, 7).expect("delete"));
        assert!(!delete_budget(&db, 7).expect("already gone"));
    }

    #[test]
    fn test_negative_budget_rejected() {
        let db = test_state();
        assert!(set_budget(&db, 7, -1.0).is_err());
        assert_eq!(get_budget(&db, 7).unwrap(), None);
    }

    #[test]
    fn test_order_cap_is_five_percent() {
        let db = test_state();
        set_budget(&db, 7, 100_000.0).expect("set");

        let ok = check_order_cap(&db, 7, 5_000.0).expect("check");
        assert_eq!(ok["allowed"], true);
        assert_eq!(ok["cap"], 5_000.0);

        let over = check_order_cap(&db, 7, 5_000.01).expect("check");
        assert_eq!(over["allowed"], false);
    }

    #[test]
    fn test_no_budget_means_no_cap() {
        let db = test_state();

        let unbudgeted = check_order_cap(&db, 9, 1_000_000.0).expect("check");
        assert_eq!(unbudgeted["allowed"], true);
        assert!(unbudgeted["cap"].is_null());

        set_budget(&db, 9, 0.0).expect("zero budget");
        let zero = check_order_cap(&db, 9, 1.0).expect("check");
        assert_eq!(zero["allowed"], true, "zero budget imposes no cap");
    }
}
