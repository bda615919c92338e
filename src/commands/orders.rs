use serde_json::Value;

use crate::commands::payload_arg0_as_i64;
use crate::db::DbState;
use crate::orders::{self, OrderDraft, OrderFilter, SubmitError};

/// Submit a cart as a pedido.
///
/// Success: `{ success, pedidoId, total }`. The two typed submission
/// failures come back as `success: false` envelopes so the UI can offer
/// a retry with adjusted quantities; everything else is `Err`.
pub fn order_submit(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing pedido payload")?;
    let draft: OrderDraft =
        serde_json::from_value(payload).map_err(|e| format!("Invalid pedido payload: {e}"))?;

    match orders::submit_order(db, &draft) {
        Ok(submitted) => Ok(serde_json::json!({
            "success": true,
            "pedidoId": submitted.pedido_id,
            "total": submitted.total,
        })),
        Err(SubmitError::ProductNotFound(producto_id)) => Ok(serde_json::json!({
            "success": false,
            "code": "PRODUCT_NOT_FOUND",
            "productoId": producto_id,
        })),
        Err(SubmitError::OutOfStock {
            producto_id,
            nombre,
            disponible,
        }) => Ok(serde_json::json!({
            "success": false,
            "code": "OUT_OF_STOCK",
            "productoId": producto_id,
            "nombre": nombre,
            "available": disponible,
        })),
        Err(e) => Err(e.to_string()),
    }
}

/// Fetch one pedido with its items.
pub fn order_get(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let pedido_id =
        payload_arg0_as_i64(arg0, &["pedidoId", "pedido_id", "id"]).ok_or("Missing pedidoId")?;
    let pedido = orders::get_order(db, pedido_id)?.ok_or("Pedido not found")?;
    Ok(serde_json::json!({
        "success": true,
        "pedido": pedido,
    }))
}

/// List pedidos, optionally by service and/or `[desde, hasta)` range.
pub fn order_list(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let filter: OrderFilter = match arg0 {
        Some(v) => {
            serde_json::from_value(v).map_err(|e| format!("Invalid pedido filter: {e}"))?
        }
        None => OrderFilter::default(),
    };
    let pedidos = orders::list_orders(db, &filter)?;
    Ok(serde_json::json!({
        "success": true,
        "pedidos": pedidos,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use crate::{db, schema};
    use rusqlite::Connection;

    fn test_state() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn.execute_batch(
            "CREATE TABLE productos (
                id INTEGER PRIMARY KEY,
                nombre TEXT,
                precio REAL,
                stock INTEGER
             );
             INSERT INTO productos VALUES (1, 'Gasas', 10.0, 5);",
        )
        .expect("seed productos");
        let catalog = schema::discover(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog,
        }
    }

    #[test]
    fn order_submit_accepts_legacy_key_spellings() {
        let db = test_state();
        let result = order_submit(
            &db,
            Some(serde_json::json!({
                "employeeId": 3,
                "role": "administrativo",
                "note": "urgente",
                "serviceId": 7,
                "items": [{ "productId": 1, "qty": 2 }],
            })),
        )
        .expect("submit");
        assert_eq!(result["success"], true);
        assert_eq!(result["total"], 20.0);
    }

    #[test]
    fn order_submit_maps_out_of_stock_to_envelope() {
        let db = test_state();
        let result = order_submit(
            &db,
            Some(serde_json::json!({
                "empleadoId": 3,
                "items": [{ "productoId": 1, "cantidad": 99 }],
            })),
        )
        .expect("envelope, not Err");
        assert_eq!(result["success"], false);
        assert_eq!(result["code"], "OUT_OF_STOCK");
        assert_eq!(result["available"], 5);
    }

    #[test]
    fn order_submit_maps_product_not_found_to_envelope() {
        let db = test_state();
        let result = order_submit(
            &db,
            Some(serde_json::json!({
                "empleadoId": 3,
                "items": [{ "productoId": 42, "cantidad": 1 }],
            })),
        )
        .expect("envelope, not Err");
        assert_eq!(result["code"], "PRODUCT_NOT_FOUND");
        assert_eq!(result["productoId"], 42);
    }

    #[test]
    fn order_submit_rejects_invalid_quantity_as_err() {
        let db = test_state();
        let err = order_submit(
            &db,
            Some(serde_json::json!({
                "empleadoId": 3,
                "items": [{ "productoId": 1, "cantidad": 0 }],
            })),
        )
        .unwrap_err();
        assert!(err.contains("invalid quantity"));
    }

    #[test]
    fn order_get_accepts_bare_id() {
        let db = test_state();
        let submitted = order_submit(
            &db,
            Some(serde_json::json!({
                "empleadoId": 3,
                "items": [{ "productoId": 1, "cantidad": 1 }],
            })),
        )
        .expect("submit");

        let fetched = order_get(&db, Some(submitted["pedidoId"].clone())).expect("get");
        assert_eq!(fetched["pedido"]["total"], 10.0);

        assert!(order_get(&db, Some(serde_json::json!(999))).is_err());
    }
}
