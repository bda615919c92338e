//! Assignment pivots.
//!
//! Three associations hang off the catalog and the pedidos flow:
//!
//! - `supervisor_servicios`: which supervisor owns a service. A service
//!   has at most one owner; the strict [`assign`] path refuses to steal,
//!   the [`reassign`] path is the administrative override.
//! - `servicio_productos`: which products a service may order (plain
//!   many-to-many).
//! - `producto_roles`: which roles see a product. A product with no rows
//!   is visible to every role.
//!
//! Databases from before the exclusivity rule may hold duplicate
//! supervisor rows per service; [`repair_duplicate_services`] runs once
//! at startup, keeps the newest row per service, and installs the unique
//! index that prevents recurrence.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};

use crate::db::DbState;

#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    /// The service already belongs to a different supervisor. Carries
    /// the current owner so the caller can report it.
    #[error("service {servicio_id} is already assigned to employee {empleado_id}")]
    Conflict { servicio_id: i64, empleado_id: i64 },
    #[error("{0}")]
    Db(String),
}

// ---------------------------------------------------------------------------
// Supervisor <-> service
// ---------------------------------------------------------------------------

/// Strict assignment: fails on a service owned by someone else,
/// idempotent no-op on the same pair. Returns the pivot row id.
pub fn assign(db: &DbState, empleado_id: i64, servicio_id: i64) -> Result<i64, AssignError> {
    let conn = db.conn.lock().map_err(|e| AssignError::Db(e.to_string()))?;

    let existing: Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, empleado_id FROM supervisor_servicios WHERE servicio_id = ?1",
            params![servicio_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| AssignError::Db(format!("lookup assignment: {e}")))?;

    if let Some((row_id, owner)) = existing {
        if owner == empleado_id {
            return Ok(row_id);
        }
        return Err(AssignError::Conflict {
            servicio_id,
            empleado_id: owner,
        });
    }

    conn.execute(
        "INSERT INTO supervisor_servicios (empleado_id, servicio_id) VALUES (?1, ?2)",
        params![empleado_id, servicio_id],
    )
    .map_err(|e| AssignError::Db(format!("insert assignment: {e}")))?;
    let row_id = conn.last_insert_rowid();
    info!(empleado_id, servicio_id, "Service assigned to supervisor");
    Ok(row_id)
}

/// Administrative override: drop whatever assignment the service has and
/// install the new one. No conflict check by design.
pub fn reassign(db: &DbState, empleado_id: i64, servicio_id: i64) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;
    let result = (|| -> Result<i64, String> {
        conn.execute(
            "DELETE FROM supervisor_servicios WHERE servicio_id = ?1",
            params![servicio_id],
        )
        .map_err(|e| format!("clear assignment: {e}"))?;
        conn.execute(
            "INSERT INTO supervisor_servicios (empleado_id, servicio_id) VALUES (?1, ?2)",
            params![empleado_id, servicio_id],
        )
        .map_err(|e| format!("insert assignment: {e}"))?;
        Ok(conn.last_insert_rowid())
    })();

    match result {
        Ok(row_id) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
            info!(empleado_id, servicio_id, "Service reassigned");
            Ok(row_id)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Delete an assignment by surrogate key. Returns whether a row existed.
pub fn unassign_by_id(db: &DbState, id: i64) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let n = conn
        .execute("DELETE FROM supervisor_servicios WHERE id = ?1", params![id])
        .map_err(|e| format!("unassign: {e}"))?;
    Ok(n > 0)
}

/// Delete an assignment by exact pair. Returns whether a row existed.
pub fn unassign_pair(db: &DbState, empleado_id: i64, servicio_id: i64) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let n = conn
        .execute(
            "DELETE FROM supervisor_servicios WHERE empleado_id = ?1 AND servicio_id = ?2",
            params![empleado_id, servicio_id],
        )
        .map_err(|e| format!("unassign: {e}"))?;
    Ok(n > 0)
}

/// All assignments, oldest first.
pub fn list_assignments(db: &DbState) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, empleado_id, servicio_id, created_at
             FROM supervisor_servicios ORDER BY id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, i64>(0)?,
                "empleadoId": row.get::<_, i64>(1)?,
                "servicioId": row.get::<_, i64>(2)?,
                "createdAt": row.get::<_, String>(3)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    let mut assignments = Vec::new();
    for row in rows {
        match row {
            Ok(a) => assignments.push(a),
            Err(e) => warn!("skipping malformed assignment row: {e}"),
        }
    }
    Ok(assignments)
}

/// Services a supervisor owns.
pub fn services_for_supervisor(db: &DbState, empleado_id: i64) -> Result<Vec<i64>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT servicio_id FROM supervisor_servicios WHERE empleado_id = ?1 ORDER BY servicio_id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![empleado_id], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<i64>, _>>().map_err(|e| e.to_string())
}

/// Startup repair: keep only the newest assignment per service, then
/// install the unique index that makes duplicates impossible. Idempotent
/// — the index guard means later runs delete nothing. Returns the number
/// of rows removed.
pub fn repair_duplicate_services(conn: &Connection) -> Result<usize, String> {
    let removed = conn
        .execute(
            "DELETE FROM supervisor_servicios
             WHERE id NOT IN (
                SELECT MAX(id) FROM supervisor_servicios GROUP BY servicio_id
             )",
            [],
        )
        .map_err(|e| format!("dedupe supervisor_servicios: {e}"))?;

    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_supervisor_servicios_servicio
         ON supervisor_servicios(servicio_id);",
    )
    .map_err(|e| format!("create unique index: {e}"))?;

    Ok(removed)
}

// ---------------------------------------------------------------------------
// Service <-> product
// ---------------------------------------------------------------------------

/// Allow a service to order a product. Idempotent.
pub fn add_service_product(db: &DbState, servicio_id: i64, producto_id: i64) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR IGNORE INTO servicio_productos (servicio_id, producto_id) VALUES (?1, ?2)",
        params![servicio_id, producto_id],
    )
    .map_err(|e| format!("add service product: {e}"))?;
    Ok(())
}

/// Remove a product from a service's catalog. Returns whether a row existed.
pub fn remove_service_product(
    db: &DbState,
    servicio_id: i64,
    producto_id: i64,
) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let n = conn
        .execute(
            "DELETE FROM servicio_productos WHERE servicio_id = ?1 AND producto_id = ?2",
            params![servicio_id, producto_id],
        )
        .map_err(|e| format!("remove service product: {e}"))?;
    Ok(n > 0)
}

/// Replace a service's whole product set.
pub fn set_service_products(
    db: &DbState,
    servicio_id: i64,
    producto_ids: &[i64],
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;
    let result = (|| -> Result<(), String> {
        conn.execute(
            "DELETE FROM servicio_productos WHERE servicio_id = ?1",
            params![servicio_id],
        )
        .map_err(|e| format!("clear service products: {e}"))?;
        for producto_id in producto_ids {
            conn.execute(
                "INSERT OR IGNORE INTO servicio_productos (servicio_id, producto_id) VALUES (?1, ?2)",
                params![servicio_id, producto_id],
            )
            .map_err(|e| format!("insert service product: {e}"))?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => conn
            .execute_batch("COMMIT")
            .map_err(|e| format!("commit: {e}")),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

pub fn products_for_service(db: &DbState, servicio_id: i64) -> Result<Vec<i64>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare("SELECT producto_id FROM servicio_productos WHERE servicio_id = ?1 ORDER BY producto_id")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![servicio_id], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<i64>, _>>().map_err(|e| e.to_string())
}

pub fn services_for_product(db: &DbState, producto_id: i64) -> Result<Vec<i64>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare("SELECT servicio_id FROM servicio_productos WHERE producto_id = ?1 ORDER BY servicio_id")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![producto_id], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<i64>, _>>().map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Product <-> role visibility
// ---------------------------------------------------------------------------

/// Make a product visible to a role. Idempotent.
pub fn add_product_role(db: &DbState, producto_id: i64, rol: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR IGNORE INTO producto_roles (producto_id, rol) VALUES (?1, ?2)",
        params![producto_id, rol],
    )
    .map_err(|e| format!("add product role: {e}"))?;
    Ok(())
}

/// Remove a role from a product. Returns whether a row existed.
pub fn remove_product_role(db: &DbState, producto_id: i64, rol: &str) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let n = conn
        .execute(
            "DELETE FROM producto_roles WHERE producto_id = ?1 AND rol = ?2",
            params![producto_id, rol],
        )
        .map_err(|e| format!("remove product role: {e}"))?;
    Ok(n > 0)
}

/// Replace a product's role set. An empty set makes it visible to all.
pub fn set_product_roles(db: &DbState, producto_id: i64, roles: &[String]) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;
    let result = (|| -> Result<(), String> {
        conn.execute(
            "DELETE FROM producto_roles WHERE producto_id = ?1",
            params![producto_id],
        )
        .map_err(|e| format!("clear product roles: {e}"))?;
        for rol in roles {
            conn.execute(
                "INSERT OR IGNORE INTO producto_roles (producto_id, rol) VALUES (?1, ?2)",
                params![producto_id, rol],
            )
            .map_err(|e| format!("insert product role: {e}"))?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => conn
            .execute_batch("COMMIT")
            .map_err(|e| format!("commit: {e}")),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

pub fn roles_for_product(db: &DbState, producto_id: i64) -> Result<Vec<String>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare("SELECT rol FROM producto_roles WHERE producto_id = ?1 ORDER BY rol")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![producto_id], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<String>, _>>().map_err(|e| e.to_string())
}

/// Whether a role may see a product. Products with no role rows are
/// visible to everyone.
pub fn product_visible_to_role(db: &DbState, producto_id: i64, rol: &str) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let restricted: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM producto_roles WHERE producto_id = ?1",
            params![producto_id],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    if restricted == 0 {
        return Ok(true);
    }
    let visible: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM producto_roles WHERE producto_id = ?1 AND rol = ?2",
            params![producto_id, rol],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    Ok(visible > 0)
}

// ===========================================================================
// Tests
// ===========================================================================
