//! Reporting aggregations over pedidos, plus the Depósito views.
//!
//! Everything here is a pure read. Monthly scopes are half-open
//! `[start, end)` datetime ranges derived from a year/month pair, so an
//! order logged in the first instant of the next month never leaks into
//! the previous summary.

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::warn;

use crate::budgets;
use crate::db::DbState;
use crate::schema::quote_ident;

/// Half-open `[start, end)` range covering one calendar month, in the
/// `YYYY-MM-DD HH:MM:SS` format `created_at` uses.
pub fn month_range(year: i32, month: u32) -> Result<(String, String), String> {
    let start = chrono::NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| format!("invalid month {year}-{month}"))?;
    let end = if month == 12 {
        chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| format!("invalid month {year}-{month}"))?;

    Ok((
        format!("{} 00:00:00", start.format("%Y-%m-%d")),
        format!("{} 00:00:00", end.format("%Y-%m-%d")),
    ))
}

/// Monthly summary across all services: counts, totals, top services,
/// top products, per-day breakdown.
pub fn monthly_summary(db: &DbState, year: i32, month: u32) -> Result<Value, String> {
    let (start, end) = month_range(year, month)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut summary = summary_in_range(&conn, None, &start, &end)?;
    summary["year"] = year.into();
    summary["month"] = month.into();
    summary["topServices"] = Value::Array(top_services(&conn, &start, &end)?);
    Ok(summary)
}

/// Monthly summary scoped to one service, with budget utilization when a
/// positive budget exists.
pub fn service_summary(
    db: &DbState,
    servicio_id: i64,
    year: i32,
    month: u32,
) -> Result<Value, String> {
    let (start, end) = month_range(year, month)?;
    let presupuesto = budgets::get_budget(db, servicio_id)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut summary = summary_in_range(&conn, Some(servicio_id), &start, &end)?;
    summary["year"] = year.into();
    summary["month"] = month.into();
    summary["servicioId"] = servicio_id.into();
    summary["presupuesto"] = presupuesto.into();
    summary["budgetUtilization"] = match presupuesto {
        Some(p) if p > 0.0 => {
            let total = summary["totalAmount"].as_f64().unwrap_or(0.0);
            (total / p).into()
        }
        _ => Value::Null,
    };
    Ok(summary)
}

/// Shared shape of the two summaries: counts, totals, top products,
/// per-day breakdown, optionally scoped to one service.
fn summary_in_range(
    conn: &Connection,
    servicio_id: Option<i64>,
    start: &str,
    end: &str,
) -> Result<Value, String> {
    let scope = if servicio_id.is_some() {
        " AND p.servicio_id = ?3"
    } else {
        ""
    };
    let args = |sid: Option<i64>| -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut v: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(start.to_string()), Box::new(end.to_string())];
        if let Some(sid) = sid {
            v.push(Box::new(sid));
        }
        v
    };
    let bound = args(servicio_id);
    let bound_refs = || rusqlite::params_from_iter(bound.iter().map(|a| a.as_ref()));

    let (order_count, total_amount): (i64, f64) = conn
        .query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(p.total), 0)
                 FROM pedidos p WHERE p.created_at >= ?1 AND p.created_at < ?2{scope}"
            ),
            bound_refs(),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| format!("summary totals: {e}"))?;

    let item_count: i64 = conn
        .query_row(
            &format!(
                "SELECT COALESCE(SUM(i.cantidad), 0)
                 FROM pedido_items i JOIN pedidos p ON p.id = i.pedido_id
                 WHERE p.created_at >= ?1 AND p.created_at < ?2{scope}"
            ),
            bound_refs(),
            |row| row.get(0),
        )
        .map_err(|e| format!("summary item count: {e}"))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT i.producto_id, MAX(i.nombre), SUM(i.cantidad), SUM(i.subtotal)
             FROM pedido_items i JOIN pedidos p ON p.id = i.pedido_id
             WHERE p.created_at >= ?1 AND p.created_at < ?2{scope}
             GROUP BY i.producto_id
             ORDER BY SUM(i.subtotal) DESC, i.producto_id
             LIMIT 5"
        ))
        .map_err(|e| e.to_string())?;
    let top_products = collect_rows(
        stmt.query_map(bound_refs(), |row| {
            Ok(serde_json::json!({
                "productoId": row.get::<_, i64>(0)?,
                "nombre": row.get::<_, String>(1)?,
                "cantidad": row.get::<_, i64>(2)?,
                "importe": row.get::<_, f64>(3)?,
            }))
        })
        .map_err(|e| e.to_string())?,
    );

    let mut stmt = conn
        .prepare(&format!(
            "SELECT strftime('%Y-%m-%d', p.created_at) AS dia, COUNT(*), COALESCE(SUM(p.total), 0)
             FROM pedidos p
             WHERE p.created_at >= ?1 AND p.created_at < ?2{scope}
             GROUP BY dia ORDER BY dia"
        ))
        .map_err(|e| e.to_string())?;
    let per_day = collect_rows(
        stmt.query_map(bound_refs(), |row| {
            Ok(serde_json::json!({
                "dia": row.get::<_, String>(0)?,
                "pedidos": row.get::<_, i64>(1)?,
                "importe": row.get::<_, f64>(2)?,
            }))
        })
        .map_err(|e| e.to_string())?,
    );

    Ok(serde_json::json!({
        "orderCount": order_count,
        "itemCount": item_count,
        "totalAmount": total_amount,
        "topProducts": top_products,
        "perDay": per_day,
    }))
}

fn top_services(conn: &Connection, start: &str, end: &str) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT p.servicio_id, COUNT(*), COALESCE(SUM(p.total), 0)
             FROM pedidos p
             WHERE p.created_at >= ?1 AND p.created_at < ?2 AND p.servicio_id IS NOT NULL
             GROUP BY p.servicio_id
             ORDER BY SUM(p.total) DESC, p.servicio_id
             LIMIT 5",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![start, end], |row| {
            Ok(serde_json::json!({
                "servicioId": row.get::<_, i64>(0)?,
                "pedidos": row.get::<_, i64>(1)?,
                "importe": row.get::<_, f64>(2)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    Ok(collect_rows(rows))
}

/// Consumption per product over a `[desde, hasta)` range, most consumed
/// first. Reads the denormalized items, so deleted products still show.
pub fn consumption_by_product(db: &DbState, desde: &str, hasta: &str) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT i.producto_id, MAX(i.nombre), SUM(i.cantidad), SUM(i.subtotal)
             FROM pedido_items i JOIN pedidos p ON p.id = i.pedido_id
             WHERE p.created_at >= ?1 AND p.created_at < ?2
             GROUP BY i.producto_id
             ORDER BY SUM(i.cantidad) DESC, i.producto_id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![desde, hasta], |row| {
            Ok(serde_json::json!({
                "productoId": row.get::<_, i64>(0)?,
                "nombre": row.get::<_, String>(1)?,
                "cantidad": row.get::<_, i64>(2)?,
                "importe": row.get::<_, f64>(3)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    Ok(collect_rows(rows))
}

/// Products at or under a stock threshold, via the discovered schema.
/// Products with NULL stock are untracked and never reported.
pub fn low_stock(db: &DbState, threshold: i64) -> Result<Value, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let cols = &schema.cols;
    let Some(stock_col) = cols.stock.as_deref() else {
        return Ok(serde_json::json!({ "tracked": false, "products": [] }));
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let sql = format!(
        "SELECT {id}, CAST({name} AS TEXT), CAST({stock} AS INTEGER), {code}
         FROM {table}
         WHERE {stock} IS NOT NULL AND CAST({stock} AS INTEGER) <= ?1
         ORDER BY CAST({stock} AS INTEGER) ASC, {name}",
        id = quote_ident(&cols.id),
        name = quote_ident(&cols.name),
        stock = quote_ident(stock_col),
        code = cols
            .code
            .as_deref()
            .map(|c| format!("CAST({} AS TEXT)", quote_ident(c)))
            .unwrap_or_else(|| "NULL".to_string()),
        table = quote_ident(&schema.products),
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![threshold], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, i64>(0)?,
                "nombre": row.get::<_, Option<String>>(1)?,
                "stock": row.get::<_, i64>(2)?,
                "codigo": row.get::<_, Option<String>>(3)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "tracked": true,
        "products": collect_rows(rows),
    }))
}

fn collect_rows(
    rows: impl Iterator<Item = Result<Value, rusqlite::Error>>,
) -> Vec<Value> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(v) => out.push(v),
            Err(e) => warn!("skipping malformed report row: {e}"),
        }
    }
    out
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, schema};
    use rusqlite::Connection;

    fn test_state() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog: Err(schema::SchemaError::NoProductsTable(
                "not needed here".to_string(),
            )),
        }
    }

    /// Insert a pedido with items at a fixed timestamp; returns its id.
    fn seed_pedido(
        db: &DbState,
        servicio_id: Option<i64>,
        created_at: &str,
        items: &[(i64, &str, f64, i64)],
    ) -> i64 {
        let conn = db.conn.lock().unwrap();
        let total: f64 = items.iter().map(|(_, _, p, q)| p * *q as f64).sum();
        conn.execute(
            "INSERT INTO pedidos (empleado_id, rol, nota, servicio_id, total, created_at)
             VALUES (1, 'administrativo', '', ?1, ?2, ?3)",
            params![servicio_id, total, created_at],
        )
        .expect("insert pedido");
        let pedido_id = conn.last_insert_rowid();
        for (producto_id, nombre, precio, cantidad) in items {
            conn.execute(
                "INSERT INTO pedido_items (pedido_id, producto_id, nombre, precio, cantidad, subtotal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    pedido_id,
                    producto_id,
                    nombre,
                    precio,
                    cantidad,
                    precio * *cantidad as f64
                ],
            )
            .expect("insert item");
        }
        pedido_id
    }

    #[test]
    fn test_month_range_is_half_open() {
        assert_eq!(
            month_range(2026, 2).unwrap(),
            (
                "2026-02-01 00:00:00".to_string(),
                "2026-03-01 00:00:00".to_string()
            )
        );
        // December rolls into the next year
        assert_eq!(
            month_range(2025, 12).unwrap(),
            (
                "2025-12-01 00:00:00".to_string(),
                "2026-01-01 00:00:00".to_string()
            )
        );
        assert!(month_range(2026, 13).is_err());
        assert!(month_range(2026, 0).is_err());
    }

    #[test]
    fn test_monthly_summary_counts_and_excludes_range_edges() {
        let db = test_state();
        seed_pedido(&db, Some(7), "2026-03-05 09:00:00", &[(1, "Gasas", 10.0, 2)]);
        seed_pedido(&db, Some(8), "2026-03-05 15:00:00", &[(2, "Guantes", 2.0, 5)]);
        seed_pedido(&db, Some(7), "2026-03-20 11:00:00", &[(1, "Gasas", 10.0, 1)]);
        // Boundary: first instant of April belongs to April
        seed_pedido(&db, Some(7), "2026-04-01 00:00:00", &[(1, "Gasas", 10.0, 9)]);
        // Previous month
        seed_pedido(&db, Some(7), "2026-02-28 23:59:59", &[(1, "Gasas", 10.0, 9)]);

        let summary = monthly_summary(&db, 2026, 3).expect("summary");
        assert_eq!(summary["orderCount"], 3);
        assert_eq!(summary["itemCount"], 8);
        assert_eq!(summary["totalAmount"], 40.0);

        let per_day = summary["perDay"].as_array().unwrap();
        assert_eq!(per_day.len(), 2);
        assert_eq!(per_day[0]["dia"], "2026-03-05");
        assert_eq!(per_day[0]["pedidos"], 2);
        assert_eq!(per_day[0]["importe"], 30.0);

        let top_products = summary["topProducts"].as_array().unwrap();
        assert_eq!(top_products[0]["productoId"], 1, "Gasas lead by amount");
        assert_eq!(top_products[0]["importe"], 30.0);

        let top_services = summary["topServices"].as_array().unwrap();
        assert_eq!(top_services[0]["servicioId"], 7);
        assert_eq!(top_services[0]["importe"], 30.0);
    }

    #[test]
    fn test_service_summary_scopes_and_utilization() {
        let db = test_state();
        seed_pedido(&db, Some(7), "2026-03-05 09:00:00", &[(1, "Gasas", 10.0, 2)]);
        seed_pedido(&db, Some(8), "2026-03-06 09:00:00", &[(2, "Guantes", 2.0, 5)]);
        crate::budgets::set_budget(&db, 7, 80.0).expect("budget");

        let summary = service_summary(&db, 7, 2026, 3).expect("summary");
        assert_eq!(summary["orderCount"], 1);
        assert_eq!(summary["totalAmount"], 20.0);
        assert_eq!(summary["budgetUtilization"], 0.25);
        assert!(summary.get("topServices").is_none());

        // No budget row: utilization is null
        let other = service_summary(&db, 8, 2026, 3).expect("summary");
        assert!(other["budgetUtilization"].is_null());
    }

    #[test]
    fn test_consumption_orders_by_quantity() {
        let db = test_state();
        seed_pedido(
            &db,
            Some(7),
            "2026-03-05 09:00:00",
            &[(1, "Gasas", 10.0, 2), (2, "Guantes", 2.0, 30)],
        );
        seed_pedido(&db, Some(8), "2026-03-10 09:00:00", &[(2, "Guantes", 2.0, 10)]);

        let consumption =
            consumption_by_product(&db, "2026-03-01 00:00:00", "2026-04-01 00:00:00")
                .expect("consumption");
        assert_eq!(consumption.len(), 2);
        assert_eq!(consumption[0]["productoId"], 2);
        assert_eq!(consumption[0]["cantidad"], 40);
        assert_eq!(consumption[1]["cantidad"], 2);
    }

    #[test]
    fn test_low_stock_filters_by_threshold() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn.execute_batch(
            "CREATE TABLE productos (
                id INTEGER PRIMARY KEY,
                nombre TEXT,
                precio REAL,
                stock INTEGER,
                codigo TEXT
            );
            INSERT INTO productos VALUES (1, 'Gasas', 10.0, 2, 'G-1');
            INSERT INTO productos VALUES (2, 'Guantes', 2.0, 50, 'G-2');
            INSERT INTO productos VALUES (3, 'Suero', 4.0, NULL, 'S-1');
            INSERT INTO productos VALUES (4, 'Barbijos', 3.0, 0, 'B-1');",
        )
        .expect("seed productos");
        let catalog = schema::discover(&conn);
        let db = DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog,
        };

        let report = low_stock(&db, 5).expect("low stock");
        assert_eq!(report["tracked"], true);
        let products = report["products"].as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0]["id"], 4, "lowest stock first");
        assert_eq!(products[1]["id"], 1);
    }

    #[test]
    fn test_low_stock_untracked_schema() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn.execute_batch("CREATE TABLE productos (id INTEGER PRIMARY KEY, nombre TEXT, precio REAL);")
            .expect("seed productos");
        let catalog = schema::discover(&conn);
        let db = DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog,
        };

        let report = low_stock(&db, 5).expect("low stock");
        assert_eq!(report["tracked"], false);
        assert!(report["products"].as_array().unwrap().is_empty());
    }
}
