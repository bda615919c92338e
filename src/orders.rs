//! Pedido submission and queries.
//!
//! **Rules:**
//! - Quantities are validated (>= 1) before any database write
//! - Stock decrement is a conditional UPDATE (`stock >= qty`) inside the
//!   same transaction as the header and line items; zero affected rows
//!   means insufficient stock and aborts the whole pedido
//! - Line items snapshot name, price and code at submission time;
//!   receipts do not change if the product is later renamed or repriced

use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::DbState;
use crate::schema::{quote_ident, SchemaError};

/// One requested line of a cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDraft {
    #[serde(alias = "producto_id", alias = "productId", alias = "product_id")]
    pub producto_id: i64,
    #[serde(alias = "qty", alias = "quantity")]
    pub cantidad: i64,
}

/// A cart plus its submission context.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    #[serde(alias = "empleado_id", alias = "employeeId", alias = "employee_id")]
    pub empleado_id: i64,
    #[serde(default, alias = "role")]
    pub rol: String,
    #[serde(default, alias = "note", alias = "observaciones")]
    pub nota: String,
    #[serde(default, alias = "servicio_id", alias = "serviceId", alias = "service_id")]
    pub servicio_id: Option<i64>,
    pub items: Vec<OrderItemDraft>,
}

/// Successful submission result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmittedOrder {
    pub pedido_id: i64,
    pub total: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("pedido has no items")]
    Empty,
    #[error("invalid quantity {cantidad} for product {producto_id}")]
    InvalidQuantity { producto_id: i64, cantidad: i64 },
    #[error("product {0} not found")]
    ProductNotFound(i64),
    #[error("insufficient stock for '{nombre}': {disponible} available")]
    OutOfStock {
        producto_id: i64,
        nombre: String,
        disponible: i64,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    Db(String),
}

/// Submit a cart as a pedido.
///
/// Runs as a single `BEGIN IMMEDIATE` transaction: header first (total
/// 0), then one conditional stock decrement plus snapshot row per item,
/// then the real total. Any failure rolls back everything — no pedido,
/// no decrement, no items. Two submissions racing for the last unit of
/// stock cannot both succeed: the loser's decrement affects zero rows.
pub fn submit_order(db: &DbState, draft: &OrderDraft) -> Result<SubmittedOrder, SubmitError> {
    if draft.items.is_empty() {
        return Err(SubmitError::Empty);
    }
    for item in &draft.items {
        if item.cantidad < 1 {
            return Err(SubmitError::InvalidQuantity {
                producto_id: item.producto_id,
                cantidad: item.cantidad,
            });
        }
    }

    let schema = db.catalog()?;
    let cols = &schema.cols;
    let table = quote_ident(&schema.products);
    let id_col = quote_ident(&cols.id);

    // Optional roles are selected as NULL so the row shape is fixed.
    let lookup_sql = format!(
        "SELECT CAST({name} AS TEXT), {price}, {code}, {stock} FROM {table} WHERE {id_col} = ?1",
        name = quote_ident(&cols.name),
        price = cols
            .price
            .as_deref()
            .map(|c| format!("CAST({} AS REAL)", quote_ident(c)))
            .unwrap_or_else(|| "NULL".to_string()),
        code = cols
            .code
            .as_deref()
            .map(|c| format!("CAST({} AS TEXT)", quote_ident(c)))
            .unwrap_or_else(|| "NULL".to_string()),
        stock = cols
            .stock
            .as_deref()
            .map(|c| format!("CAST({} AS INTEGER)", quote_ident(c)))
            .unwrap_or_else(|| "NULL".to_string()),
    );
    let decrement_sql = cols.stock.as_deref().map(|c| {
        let stock_col = quote_ident(c);
        format!(
            "UPDATE {table} SET {stock_col} = {stock_col} - ?1 \
             WHERE {id_col} = ?2 AND {stock_col} >= ?1"
        )
    });

    let conn = db.conn.lock().map_err(|e| SubmitError::Db(e.to_string()))?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| SubmitError::Db(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<SubmittedOrder, SubmitError> {
        conn.execute(
            "INSERT INTO pedidos (empleado_id, rol, nota, servicio_id, total)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![draft.empleado_id, draft.rol, draft.nota, draft.servicio_id],
        )
        .map_err(|e| SubmitError::Db(format!("insert pedido: {e}")))?;
        let pedido_id = conn.last_insert_rowid();

        let mut total = 0.0;
        for item in &draft.items {
            let row: Option<(Option<String>, Option<f64>, Option<String>, Option<i64>)> = conn
                .query_row(&lookup_sql, params![item.producto_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .optional()
                .map_err(|e| SubmitError::Db(format!("lookup product: {e}")))?;
            let Some((nombre, precio, codigo, stock)) = row else {
                return Err(SubmitError::ProductNotFound(item.producto_id));
            };
            let nombre = nombre.unwrap_or_else(|| format!("producto {}", item.producto_id));

            // A NULL stock value means this product is not stock-tracked.
            if let (Some(sql), Some(disponible)) = (decrement_sql.as_deref(), stock) {
                let changed = conn
                    .execute(sql, params![item.cantidad, item.producto_id])
                    .map_err(|e| SubmitError::Db(format!("decrement stock: {e}")))?;
                if changed == 0 {
                    return Err(SubmitError::OutOfStock {
                        producto_id: item.producto_id,
                        nombre,
                        disponible: disponible.max(0),
                    });
                }
            }

            let precio = precio.unwrap_or(0.0);
            let subtotal = precio * item.cantidad as f64;
            conn.execute(
                "INSERT INTO pedido_items (pedido_id, producto_id, nombre, precio, cantidad, subtotal, codigo)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    pedido_id,
                    item.producto_id,
                    nombre,
                    precio,
                    item.cantidad,
                    subtotal,
                    codigo
                ],
            )
            .map_err(|e| SubmitError::Db(format!("insert pedido item: {e}")))?;
            total += subtotal;
        }

        conn.execute(
            "UPDATE pedidos SET total = ?1 WHERE id = ?2",
            params![total, pedido_id],
        )
        .map_err(|e| SubmitError::Db(format!("update pedido total: {e}")))?;

        Ok(SubmittedOrder { pedido_id, total })
    })();

    match result {
        Ok(submitted) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| SubmitError::Db(format!("commit: {e}")))?;
            info!(
                pedido_id = submitted.pedido_id,
                total = submitted.total,
                items = draft.items.len(),
                empleado_id = draft.empleado_id,
                "Pedido submitted"
            );
            Ok(submitted)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Optional filters for [`list_orders`]. `desde`/`hasta` form a
/// half-open `[desde, hasta)` range over `created_at`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(default, alias = "servicio_id", alias = "serviceId")]
    pub servicio_id: Option<i64>,
    #[serde(default, alias = "from", alias = "start")]
    pub desde: Option<String>,
    #[serde(default, alias = "to", alias = "end")]
    pub hasta: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Fetch one pedido with its line items, or `None`.
pub fn get_order(db: &DbState, pedido_id: i64) -> Result<Option<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let header = conn
        .query_row(
            "SELECT id, empleado_id, rol, nota, servicio_id, total, created_at
             FROM pedidos WHERE id = ?1",
            params![pedido_id],
            |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "empleadoId": row.get::<_, i64>(1)?,
                    "rol": row.get::<_, String>(2)?,
                    "nota": row.get::<_, String>(3)?,
                    "servicioId": row.get::<_, Option<i64>>(4)?,
                    "total": row.get::<_, f64>(5)?,
                    "createdAt": row.get::<_, String>(6)?,
                }))
            },
        )
        .optional()
        .map_err(|e| format!("fetch pedido: {e}"))?;
    let Some(mut header) = header else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT producto_id, nombre, precio, cantidad, subtotal, codigo
             FROM pedido_items WHERE pedido_id = ?1 ORDER BY id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![pedido_id], |row| {
            Ok(serde_json::json!({
                "productoId": row.get::<_, i64>(0)?,
                "nombre": row.get::<_, String>(1)?,
                "precio": row.get::<_, f64>(2)?,
                "cantidad": row.get::<_, i64>(3)?,
                "subtotal": row.get::<_, f64>(4)?,
                "codigo": row.get::<_, Option<String>>(5)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    let mut items = Vec::new();
    for row in rows {
        match row {
            Ok(item) => items.push(item),
            Err(e) => warn!("skipping malformed pedido item row: {e}"),
        }
    }

    header["items"] = Value::Array(items);
    Ok(Some(header))
}

/// List pedido headers, newest first.
pub fn list_orders(db: &DbState, filter: &OrderFilter) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut sql = String::from(
        "SELECT id, empleado_id, rol, nota, servicio_id, total, created_at FROM pedidos",
    );
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(servicio_id) = filter.servicio_id {
        clauses.push(format!("servicio_id = ?{}", args.len() + 1));
        args.push(Box::new(servicio_id));
    }
    if let Some(desde) = &filter.desde {
        clauses.push(format!("created_at >= ?{}", args.len() + 1));
        args.push(Box::new(desde.clone()));
    }
    if let Some(hasta) = &filter.hasta {
        clauses.push(format!("created_at < ?{}", args.len() + 1));
        args.push(Box::new(hasta.clone()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit.max(0)));
    }

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "empleadoId": row.get::<_, i64>(1)?,
                    "rol": row.get::<_, String>(2)?,
                    "nota": row.get::<_, String>(3)?,
                    "servicioId": row.get::<_, Option<i64>>(4)?,
                    "total": row.get::<_, f64>(5)?,
                    "createdAt": row.get::<_, String>(6)?,
                }))
            },
        )
        .map_err(|e| e.to_string())?;

    let mut pedidos = Vec::new();
    for row in rows {
        match row {
            Ok(p) => pedidos.push(p),
            Err(e) => warn!("skipping malformed pedido row: {e}"),
        }
    }
    Ok(pedidos)
}

// ===========================================================================
// Tests
// ===========================================================================
