use serde_json::Value;

use crate::catalog::{self, ProductFilter, ProductInput};
use crate::commands::payload_arg0_as_i64;
use crate::db::DbState;
use crate::schema;
use crate::value_i64;

const PRODUCT_ID_KEYS: &[&str] = &["productoId", "producto_id", "productId", "id"];

/// List catalog products for a role/service/category/search scope.
pub fn catalog_list_products(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let filter: ProductFilter = match arg0 {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid product filter: {e}"))?,
        None => ProductFilter::default(),
    };
    let products = catalog::list_products(db, &filter)?;
    Ok(serde_json::json!({
        "success": true,
        "products": products,
    }))
}

pub fn catalog_get_product(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let producto_id = payload_arg0_as_i64(arg0, PRODUCT_ID_KEYS).ok_or("Missing productoId")?;
    let product = catalog::get_product(db, producto_id)?.ok_or("Product not found")?;
    Ok(serde_json::json!({
        "success": true,
        "product": product,
    }))
}

pub fn catalog_create_product(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product payload")?;
    let input: ProductInput =
        serde_json::from_value(payload).map_err(|e| format!("Invalid product payload: {e}"))?;
    let producto_id = catalog::create_product(db, &input)?;
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
    }))
}

/// Update a product. Accepts `(id, updates)` or a single object carrying
/// both the id and the changed fields.
pub fn catalog_update_product(
    db: &DbState,
    arg0: Option<Value>,
    arg1: Option<Value>,
) -> Result<Value, String> {
    let producto_id =
        payload_arg0_as_i64(arg0.clone(), PRODUCT_ID_KEYS).ok_or("Missing productoId")?;
    let updates = match (arg1, arg0) {
        (Some(updates), _) => updates,
        (None, Some(obj @ Value::Object(_))) => obj,
        _ => return Err("Missing product updates".to_string()),
    };
    let input: ProductInput =
        serde_json::from_value(updates).map_err(|e| format!("Invalid product updates: {e}"))?;

    if !catalog::update_product(db, producto_id, &input)? {
        return Err("Product not found".to_string());
    }
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
    }))
}

pub fn catalog_delete_product(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let producto_id = payload_arg0_as_i64(arg0, PRODUCT_ID_KEYS).ok_or("Missing productoId")?;
    if !catalog::delete_product(db, producto_id)? {
        return Err("Product not found".to_string());
    }
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
    }))
}

/// Apply a signed stock delta (Depósito admin).
pub fn catalog_adjust_stock(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing stock payload")?;
    let producto_id = value_i64(&payload, PRODUCT_ID_KEYS).ok_or("Missing productoId")?;
    let delta = value_i64(&payload, &["delta", "ajuste", "amount"]).ok_or("Missing delta")?;

    let stock = catalog::adjust_stock(db, producto_id, delta)?;
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
        "stock": stock,
    }))
}

pub fn catalog_list_categories(db: &DbState) -> Result<Value, String> {
    let categories = catalog::list_categories(db)?;
    Ok(serde_json::json!({
        "success": true,
        "categories": categories,
    }))
}

// ---------------------------------------------------------------------------
// Schema mapping admin
// ---------------------------------------------------------------------------

/// Describe the catalog schema resolved at startup, or the reason none
/// was found.
pub fn schema_describe(db: &DbState) -> Result<Value, String> {
    match db.catalog() {
        Ok(schema) => Ok(serde_json::json!({
            "success": true,
            "tables": {
                "products": schema.products,
                "categories": schema.categories,
            },
            "cols": schema.cols,
        })),
        Err(e) => Ok(serde_json::json!({
            "success": false,
            "reason": e.to_string(),
        })),
    }
}

/// Pin the currently resolved schema so future startups skip discovery.
pub fn schema_pin(db: &DbState) -> Result<Value, String> {
    let resolved = db.catalog().map_err(|e| e.to_string())?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    schema::pin(&conn, resolved)?;
    Ok(serde_json::json!({
        "success": true,
        "products": resolved.products,
    }))
}

/// Drop the pinned mapping; the next startup discovers again.
pub fn schema_unpin(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = schema::unpin(&conn)?;
    Ok(serde_json::json!({
        "success": true,
        "removed": removed,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_state() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn.execute_batch(
            "CREATE TABLE productos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT,
                precio REAL,
                stock INTEGER,
                codigo TEXT,
                categoria TEXT
             );",
        )
        .expect("create productos");
        let catalog = schema::discover(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog,
        }
    }

    #[test]
    fn product_crud_via_commands() {
        let db = test_state();

        let created = catalog_create_product(
            &db,
            Some(serde_json::json!({
                "name": "Guantes de nitrilo",
                "price": 3.5,
                "stock": 40,
            })),
        )
        .expect("create");
        let id = created["productoId"].as_i64().unwrap();

        // Tuple shape: (id, updates)
        catalog_update_product(
            &db,
            Some(serde_json::json!(id)),
            Some(serde_json::json!({ "precio": 4.0 })),
        )
        .expect("tuple update");

        // Single-object shape
        catalog_update_product(
            &db,
            Some(serde_json::json!({ "productoId": id, "stock": 35 })),
            None,
        )
        .expect("object update");

        let fetched = catalog_get_product(&db, Some(serde_json::json!(id))).expect("get");
        assert_eq!(fetched["product"]["precio"], 4.0);
        assert_eq!(fetched["product"]["stock"], 35);

        let adjusted = catalog_adjust_stock(
            &db,
            Some(serde_json::json!({ "productoId": id, "delta": -5 })),
        )
        .expect("adjust");
        assert_eq!(adjusted["stock"], 30);

        catalog_delete_product(&db, Some(serde_json::json!(id))).expect("delete");
        assert!(catalog_get_product(&db, Some(serde_json::json!(id))).is_err());
    }

    #[test]
    fn schema_describe_reports_tables_and_cols() {
        let db = test_state();
        let described = schema_describe(&db).expect("describe");
        assert_eq!(described["success"], true);
        assert_eq!(described["tables"]["products"], "productos");
        assert_eq!(described["cols"]["name"], "nombre");
    }

    #[test]
    fn schema_pin_roundtrip() {
        let db = test_state();
        let pinned = schema_pin(&db).expect("pin");
        assert_eq!(pinned["products"], "productos");

        {
            let conn = db.conn.lock().unwrap();
            assert!(db::get_setting(&conn, schema::MAPPING_CATEGORY, schema::MAPPING_KEY).is_some());
        }

        let unpinned = schema_unpin(&db).expect("unpin");
        assert_eq!(unpinned["removed"], true);
    }
}
