//! Product catalog administration over the discovered schema.
//!
//! Every statement here is built against the table and column names
//! resolved at startup ([`crate::schema`]); identifiers are quoted,
//! values always bound. Input fields that map to no physical column in
//! this deployment are skipped with a warning rather than failing the
//! whole write.
//!
//! Stock is only ever mutated in two places: the conditional decrement
//! inside pedido submission, and [`adjust_stock`] (signed delta, floor
//! at zero) for the Depósito admin.

use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::DbState;
use crate::schema::quote_ident;

/// Admin-provided product fields. All optional so the same shape serves
/// create (name required) and partial update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    #[serde(default, alias = "name", alias = "descripcion")]
    pub nombre: Option<String>,
    #[serde(default, alias = "price")]
    pub precio: Option<f64>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default, alias = "code")]
    pub codigo: Option<String>,
    #[serde(default, alias = "category", alias = "rubro")]
    pub categoria: Option<String>,
}

/// Filters for [`list_products`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    #[serde(default, alias = "role")]
    pub rol: Option<String>,
    #[serde(default, alias = "servicio_id", alias = "serviceId")]
    pub servicio_id: Option<i64>,
    #[serde(default, alias = "category")]
    pub categoria: Option<String>,
    #[serde(default, alias = "search", alias = "q")]
    pub buscar: Option<String>,
}

/// Fixed-shape SELECT list over the discovered columns; missing roles
/// come back as NULL.
fn select_list(db: &DbState) -> Result<(String, String, String), String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let cols = &schema.cols;
    let opt = |c: &Option<String>, cast: &str| {
        c.as_deref()
            .map(|c| format!("CAST(p.{} AS {cast})", quote_ident(c)))
            .unwrap_or_else(|| "NULL".to_string())
    };
    let select = format!(
        "SELECT p.{id}, CAST(p.{name} AS TEXT), {precio}, {stock}, {codigo}, {categoria} FROM {table} p",
        id = quote_ident(&cols.id),
        name = quote_ident(&cols.name),
        precio = opt(&cols.price, "REAL"),
        stock = opt(&cols.stock, "INTEGER"),
        codigo = opt(&cols.code, "TEXT"),
        categoria = opt(&cols.category, "TEXT"),
        table = quote_ident(&schema.products),
    );
    Ok((
        select,
        quote_ident(&cols.id),
        quote_ident(&cols.name),
    ))
}

fn row_to_product(row: &rusqlite::Row<'_>) -> Result<Value, rusqlite::Error> {
    Ok(serde_json::json!({
        "id": row.get::<_, i64>(0)?,
        "nombre": row.get::<_, Option<String>>(1)?,
        "precio": row.get::<_, Option<f64>>(2)?,
        "stock": row.get::<_, Option<i64>>(3)?,
        "codigo": row.get::<_, Option<String>>(4)?,
        "categoria": row.get::<_, Option<String>>(5)?,
    }))
}

/// List catalog products, optionally scoped to a role's visible set, a
/// service's assigned set, a category, and/or a name search.
pub fn list_products(db: &DbState, filter: &ProductFilter) -> Result<Vec<Value>, String> {
    let (select, id_col, name_col) = select_list(db)?;
    let schema = db.catalog().map_err(|e| e.to_string())?;

    let mut sql = select;
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(rol) = &filter.rol {
        clauses.push(format!(
            "(NOT EXISTS (SELECT 1 FROM producto_roles pr WHERE pr.producto_id = p.{id_col})
              OR EXISTS (SELECT 1 FROM producto_roles pr
                         WHERE pr.producto_id = p.{id_col} AND pr.rol = ?{n}))",
            n = args.len() + 1,
        ));
        args.push(Box::new(rol.clone()));
    }
    if let Some(servicio_id) = filter.servicio_id {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM servicio_productos sp
                     WHERE sp.producto_id = p.{id_col} AND sp.servicio_id = ?{n})",
            n = args.len() + 1,
        ));
        args.push(Box::new(servicio_id));
    }
    if let Some(categoria) = &filter.categoria {
        let Some(cat_col) = schema.cols.category.as_deref() else {
            return Err("catalog has no category column to filter on".to_string());
        };
        clauses.push(format!(
            "CAST(p.{} AS TEXT) = ?{}",
            quote_ident(cat_col),
            args.len() + 1
        ));
        args.push(Box::new(categoria.clone()));
    }
    if let Some(buscar) = &filter.buscar {
        clauses.push(format!(
            "CAST(p.{name_col} AS TEXT) LIKE ?{n}",
            n = args.len() + 1,
        ));
        args.push(Box::new(format!("%{buscar}%")));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY CAST(p.{name_col} AS TEXT)"));

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn.prepare(&sql).map_err(|e| format!("list products: {e}"))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row_to_product(row),
        )
        .map_err(|e| e.to_string())?;

    let mut products = Vec::new();
    for row in rows {
        match row {
            Ok(p) => products.push(p),
            Err(e) => warn!("skipping malformed product row: {e}"),
        }
    }
    Ok(products)
}

/// Fetch one product with its role and service associations.
pub fn get_product(db: &DbState, producto_id: i64) -> Result<Option<Value>, String> {
    let (select, id_col, _) = select_list(db)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let product = conn
        .query_row(
            &format!("{select} WHERE p.{id_col} = ?1"),
            params![producto_id],
            |row| row_to_product(row),
        )
        .optional()
        .map_err(|e| format!("get product: {e}"))?;
    let Some(mut product) = product else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT rol FROM producto_roles WHERE producto_id = ?1 ORDER BY rol")
        .map_err(|e| e.to_string())?;
    let roles: Vec<String> = stmt
        .query_map(params![producto_id], |row| row.get(0))
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT servicio_id FROM servicio_productos WHERE producto_id = ?1 ORDER BY servicio_id")
        .map_err(|e| e.to_string())?;
    let servicios: Vec<i64> = stmt
        .query_map(params![producto_id], |row| row.get(0))
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    product["roles"] = serde_json::json!(roles);
    product["servicios"] = serde_json::json!(servicios);
    Ok(Some(product))
}

/// Map provided input fields onto physical columns. Fields this
/// deployment has no column for are dropped with a warning.
fn mapped_fields(
    db: &DbState,
    input: &ProductInput,
) -> Result<Vec<(String, Box<dyn rusqlite::ToSql>)>, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let cols = &schema.cols;
    let mut fields: Vec<(String, Box<dyn rusqlite::ToSql>)> = Vec::new();

    if let Some(nombre) = &input.nombre {
        fields.push((quote_ident(&cols.name), Box::new(nombre.clone())));
    }
    if let Some(precio) = input.precio {
        match cols.price.as_deref() {
            Some(c) => fields.push((quote_ident(c), Box::new(precio))),
            None => warn!("catalog has no price column; dropping precio"),
        }
    }
    if let Some(stock) = input.stock {
        match cols.stock.as_deref() {
            Some(c) => fields.push((quote_ident(c), Box::new(stock))),
            None => warn!("catalog has no stock column; dropping stock"),
        }
    }
    if let Some(codigo) = &input.codigo {
        match cols.code.as_deref() {
            Some(c) => fields.push((quote_ident(c), Box::new(codigo.clone()))),
            None => warn!("catalog has no code column; dropping codigo"),
        }
    }
    if let Some(categoria) = &input.categoria {
        match cols.category.as_deref() {
            Some(c) => fields.push((quote_ident(c), Box::new(categoria.clone()))),
            None => warn!("catalog has no category column; dropping categoria"),
        }
    }
    Ok(fields)
}

/// Create a product. `nombre` is required; returns the new id.
pub fn create_product(db: &DbState, input: &ProductInput) -> Result<i64, String> {
    if input.nombre.as_deref().map_or(true, |n| n.trim().is_empty()) {
        return Err("Missing nombre".to_string());
    }
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let table = quote_ident(&schema.products);
    let fields = mapped_fields(db, input)?;

    let columns: Vec<&str> = fields.iter().map(|(c, _)| c.as_str()).collect();
    let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        &sql,
        rusqlite::params_from_iter(fields.iter().map(|(_, v)| v.as_ref())),
    )
    .map_err(|e| format!("create product: {e}"))?;
    let id = conn.last_insert_rowid();
    info!(producto_id = id, "Product created");
    Ok(id)
}

/// Partial update: only provided fields change. Returns whether the
/// product existed.
pub fn update_product(db: &DbState, producto_id: i64, input: &ProductInput) -> Result<bool, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let table = quote_ident(&schema.products);
    let id_col = quote_ident(&schema.cols.id);
    let fields = mapped_fields(db, input)?;
    if fields.is_empty() {
        return Err("Nothing to update".to_string());
    }

    let sets: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{c} = ?{}", i + 1))
        .collect();
    let sql = format!(
        "UPDATE {table} SET {} WHERE {id_col} = ?{}",
        sets.join(", "),
        fields.len() + 1
    );

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut args: Vec<&dyn rusqlite::ToSql> = fields.iter().map(|(_, v)| v.as_ref()).collect();
    args.push(&producto_id);
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(args))
        .map_err(|e| format!("update product: {e}"))?;
    Ok(changed > 0)
}

/// Delete a product and drop its pivot rows. Returns whether it existed.
///
/// Pedido items are untouched by design: they are historical snapshots.
pub fn delete_product(db: &DbState, producto_id: i64) -> Result<bool, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let table = quote_ident(&schema.products);
    let id_col = quote_ident(&schema.cols.id);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;
    let result = (|| -> Result<bool, String> {
        let deleted = conn
            .execute(
                &format!("DELETE FROM {table} WHERE {id_col} = ?1"),
                params![producto_id],
            )
            .map_err(|e| format!("delete product: {e}"))?;
        if deleted > 0 {
            conn.execute(
                "DELETE FROM servicio_productos WHERE producto_id = ?1",
                params![producto_id],
            )
            .map_err(|e| format!("clear service pivots: {e}"))?;
            conn.execute(
                "DELETE FROM producto_roles WHERE producto_id = ?1",
                params![producto_id],
            )
            .map_err(|e| format!("clear role pivots: {e}"))?;
        }
        Ok(deleted > 0)
    })();

    match result {
        Ok(existed) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
            if existed {
                info!(producto_id, "Product deleted");
            }
            Ok(existed)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Apply a signed stock delta, floored at zero. Returns the new stock.
pub fn adjust_stock(db: &DbState, producto_id: i64, delta: i64) -> Result<i64, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let Some(stock_col) = schema.cols.stock.as_deref() else {
        return Err("catalog has no stock column".to_string());
    };
    let table = quote_ident(&schema.products);
    let id_col = quote_ident(&schema.cols.id);
    let stock_col = quote_ident(stock_col);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            &format!(
                "UPDATE {table} SET {stock_col} = {stock_col} + ?1
                 WHERE {id_col} = ?2 AND {stock_col} IS NOT NULL AND {stock_col} + ?1 >= 0"
            ),
            params![delta, producto_id],
        )
        .map_err(|e| format!("adjust stock: {e}"))?;

    if changed == 0 {
        // Disambiguate the failure for the caller
        let current: Option<Option<i64>> = conn
            .query_row(
                &format!(
                    "SELECT CAST({stock_col} AS INTEGER) FROM {table} WHERE {id_col} = ?1"
                ),
                params![producto_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("read stock: {e}"))?;
        return match current {
            None => Err(format!("Product not found: {producto_id}")),
            Some(None) => Err(format!("Product {producto_id} does not track stock")),
            Some(Some(s)) => Err(format!(
                "Stock adjustment {delta} would leave product {producto_id} negative ({s} available)"
            )),
        };
    }

    let new_stock: i64 = conn
        .query_row(
            &format!("SELECT CAST({stock_col} AS INTEGER) FROM {table} WHERE {id_col} = ?1"),
            params![producto_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("read stock: {e}"))?;
    info!(producto_id, delta, new_stock, "Stock adjusted");
    Ok(new_stock)
}

/// Category names: from the dedicated table when one exists, else the
/// distinct values of the products table's category column.
pub fn list_categories(db: &DbState) -> Result<Vec<String>, String> {
    let schema = db.catalog().map_err(|e| e.to_string())?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let sql = match (&schema.categories, &schema.cols.category_name, &schema.cols.category) {
        (Some(cat_table), Some(name_col), _) => format!(
            "SELECT DISTINCT CAST({} AS TEXT) FROM {} WHERE {} IS NOT NULL ORDER BY 1",
            quote_ident(name_col),
            quote_ident(cat_table),
            quote_ident(name_col),
        ),
        (_, _, Some(cat_col)) => format!(
            "SELECT DISTINCT CAST({col} AS TEXT) FROM {table} WHERE {col} IS NOT NULL ORDER BY 1",
            col = quote_ident(cat_col),
            table = quote_ident(&schema.products),
        ),
        _ => return Ok(Vec::new()),
    };

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<String>, _>>()
        .map_err(|e| e.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assignments, db, schema};
    use rusqlite::Connection;

    fn state_with(products_ddl: &str) -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn.execute_batch(products_ddl).expect("create catalog");
        let catalog = schema::discover(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog,
        }
    }

    fn test_state() -> DbState {
        state_with(
            "CREATE TABLE productos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT,
                precio REAL,
                stock INTEGER,
                codigo TEXT,
                categoria TEXT
            );",
        )
    }

    fn input(nombre: &str) -> ProductInput {
        ProductInput {
            nombre: Some(nombre.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_get_update_delete_roundtrip() {
        let db = test_state();

        let id = create_product(
            &db,
            &ProductInput {
                nombre: Some("Gasas estériles".to_string()),
                precio: Some(10.0),
                stock: Some(5),
                codigo: Some("G-100".to_string()),
                categoria: Some("Curación".to_string()),
            },
        )
        .expect("create");

        let product = get_product(&db, id).expect("get").expect("exists");
        assert_eq!(product["nombre"], "Gasas estériles");
        assert_eq!(product["precio"], 10.0);
        assert_eq!(product["stock"], 5);
        assert_eq!(product["categoria"], "Curación");

        // Partial update: only the price changes
        assert!(update_product(
            &db,
            id,
            &ProductInput {
                precio: Some(12.5),
                ..Default::default()
            },
        )
        .expect("update"));
        let product = get_product(&db, id).expect("get").expect("exists");
        assert_eq!(product["precio"], 12.5);
        assert_eq!(product["nombre"], "Gasas estériles");

        assert!(delete_product(&db, id).expect("delete"));
        assert!(get_product(&db, id).expect("get").is_none());
        assert!(!delete_product(&db, id).expect("already gone"));
    }

    #[test]
    fn test_create_requires_nombre() {
        let db = test_state();
        assert!(create_product(&db, &ProductInput::default()).is_err());
        assert!(create_product(&db, &input("   ")).is_err());
    }

    #[test]
    fn test_update_missing_product_reports_not_found() {
        let db = test_state();
        assert!(!update_product(&db, 404, &input("x")).expect("update"));
    }

    #[test]
    fn test_unmapped_fields_are_dropped() {
        // This deployment has no price/stock/code/category columns
        let db = state_with("CREATE TABLE productos (id INTEGER PRIMARY KEY, nombre TEXT);");

        let id = create_product(
            &db,
            &ProductInput {
                nombre: Some("Guantes".to_string()),
                precio: Some(3.0),
                stock: Some(10),
                ..Default::default()
            },
        )
        .expect("create still works");
        let product = get_product(&db, id).expect("get").expect("exists");
        assert_eq!(product["nombre"], "Guantes");
        assert!(product["precio"].is_null());

        // An update that only touches unmapped fields has nothing to do
        let err = update_product(
            &db,
            id,
            &ProductInput {
                precio: Some(4.0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.contains("Nothing to update"));
    }

    #[test]
    fn test_adjust_stock_deltas_and_floor() {
        let db = test_state();
        let id = create_product(
            &db,
            &ProductInput {
                nombre: Some("Jeringas".to_string()),
                stock: Some(10),
                ..Default::default()
            },
        )
        .expect("create");

        assert_eq!(adjust_stock(&db, id, 5).expect("increase"), 15);
        assert_eq!(adjust_stock(&db, id, -12).expect("decrease"), 3);

        let err = adjust_stock(&db, id, -4).unwrap_err();
        assert!(err.contains("negative"));
        // Failed adjustment leaves the row untouched
        let product = get_product(&db, id).expect("get").expect("exists");
        assert_eq!(product["stock"], 3);

        assert!(adjust_stock(&db, 404, 1).unwrap_err().contains("not found"));
    }

    #[test]
    fn test_adjust_stock_untracked_product() {
        let db = test_state();
        let id = create_product(&db, &input("Suero")).expect("create");
        let err = adjust_stock(&db, id, 1).unwrap_err();
        assert!(err.contains("does not track stock"));
    }

    #[test]
    fn test_list_filters_by_role_service_and_category() {
        let db = test_state();
        let gasas = create_product(
            &db,
            &ProductInput {
                nombre: Some("Gasas".to_string()),
                categoria: Some("Curación".to_string()),
                ..Default::default()
            },
        )
        .expect("create");
        let guantes = create_product(
            &db,
            &ProductInput {
                nombre: Some("Guantes".to_string()),
                categoria: Some("Protección".to_string()),
                ..Default::default()
            },
        )
        .expect("create");

        // Restrict gasas to supervisors; guantes stays open to all
        assignments::add_product_role(&db, gasas, "supervisor").expect("role");
        // Assign only guantes to service 3
        assignments::add_service_product(&db, 3, guantes).expect("pivot");

        let all = list_products(&db, &ProductFilter::default()).expect("list");
        assert_eq!(all.len(), 2);

        let admin_view = list_products(
            &db,
            &ProductFilter {
                rol: Some("administrativo".to_string()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(admin_view.len(), 1);
        assert_eq!(admin_view[0]["nombre"], "Guantes");

        let supervisor_view = list_products(
            &db,
            &ProductFilter {
                rol: Some("supervisor".to_string()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(supervisor_view.len(), 2);

        let service3 = list_products(
            &db,
            &ProductFilter {
                servicio_id: Some(3),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(service3.len(), 1);
        assert_eq!(service3[0]["id"], guantes);

        let curacion = list_products(
            &db,
            &ProductFilter {
                categoria: Some("Curación".to_string()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(curacion.len(), 1);
        assert_eq!(curacion[0]["id"], gasas);

        let search = list_products(
            &db,
            &ProductFilter {
                buscar: Some("Guant".to_string()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(search.len(), 1);
    }

    #[test]
    fn test_delete_product_clears_pivots() {
        let db = test_state();
        let id = create_product(&db, &input("Gasas")).expect("create");
        assignments::add_service_product(&db, 3, id).expect("pivot");
        assignments::add_product_role(&db, id, "supervisor").expect("role");

        assert!(delete_product(&db, id).expect("delete"));
        assert!(assignments::products_for_service(&db, 3).unwrap().is_empty());
        assert!(assignments::roles_for_product(&db, id).unwrap().is_empty());
    }

    #[test]
    fn test_categories_derived_from_product_column() {
        let db = test_state();
        for (nombre, cat) in [("Gasas", "Curación"), ("Vendas", "Curación"), ("Guantes", "Protección")] {
            create_product(
                &db,
                &ProductInput {
                    nombre: Some(nombre.to_string()),
                    categoria: Some(cat.to_string()),
                    ..Default::default()
                },
            )
            .expect("create");
        }

        assert_eq!(list_categories(&db).unwrap(), vec!["Curación", "Protección"]);
    }

    #[test]
    fn test_categories_from_dedicated_table() {
        let db = state_with(
            "CREATE TABLE productos (id INTEGER PRIMARY KEY, nombre TEXT, rubro_id INTEGER);
             CREATE TABLE rubros (id INTEGER PRIMARY KEY, nombre TEXT);
             INSERT INTO rubros (nombre) VALUES ('Descartables'), ('Curación');",
        );

        assert_eq!(list_categories(&db).unwrap(), vec!["Curación", "Descartables"]);
    }
}
