//! Catalog schema resolution over the legacy database.
//!
//! Kazaro deployments inherit a products table that predates the app,
//! with several naming conventions in the wild (`productos.Descripción`,
//! `insumos.nombre`, `articulos.detalle`, ...). Rather than assuming
//! fixed names, the resolver inspects `sqlite_master` once at startup,
//! scores candidate tables, and maps their columns to semantic roles.
//! The result is immutable and carried in [`crate::db::DbState`] for the
//! lifetime of the process.
//!
//! An explicit mapping pinned in `app_settings` (category `catalog`, key
//! `schema_mapping`) bypasses the heuristics entirely. It is validated
//! eagerly against the live tables; a stale mapping is a startup error,
//! not a silent fallback.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db;

/// Settings slot holding the pinned mapping, if any.
pub const MAPPING_CATEGORY: &str = "catalog";
pub const MAPPING_KEY: &str = "schema_mapping";

/// Tables that must never be taken for a products table: everything the
/// app owns, plus legacy tables known to hold people/services, plus the
/// category tables themselves (they also carry a name-like column).
const NON_PRODUCT_TABLES: &[&str] = &[
    "pedidos",
    "pedido_items",
    "supervisor_servicios",
    "servicio_productos",
    "servicio_presupuestos",
    "producto_roles",
    "app_settings",
    "schema_version",
    "usuarios",
    "empleados",
    "servicios",
    "roles",
];

const ID_CANDIDATES: &[&str] = &["id", "id_producto", "producto_id", "idproducto"];
const NAME_CANDIDATES: &[&str] = &[
    "nombre",
    "descripcion",
    "detalle",
    "denominacion",
    "producto",
    "articulo",
    "insumo",
    "name",
    "description",
];
const PRICE_CANDIDATES: &[&str] = &[
    "precio",
    "precio_unitario",
    "preciounitario",
    "costo",
    "importe",
    "valor",
    "price",
    "unit_price",
];
const STOCK_CANDIDATES: &[&str] = &[
    "stock",
    "existencia",
    "existencias",
    "cantidad_disponible",
    "disponible",
    "cantidad",
    "qty",
    "quantity",
];
const CODE_CANDIDATES: &[&str] = &[
    "codigo",
    "cod",
    "codigo_barras",
    "codbarra",
    "sku",
    "code",
    "barcode",
];
const CATEGORY_CANDIDATES: &[&str] = &[
    "categoria",
    "categoria_id",
    "id_categoria",
    "rubro",
    "rubro_id",
    "id_rubro",
    "tipo",
    "familia",
    "grupo",
    "category",
    "category_id",
];
const CATEGORY_TABLE_CANDIDATES: &[&str] = &[
    "categorias",
    "categoria",
    "rubros",
    "rubro",
    "familias",
    "grupos",
    "categories",
];

/// Semantic column roles of the resolved products table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogColumns {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
}

/// Resolved catalog location: which physical tables and columns play
/// which semantic role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSchema {
    pub products: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    pub cols: CatalogColumns,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// No table scored above zero. Hard precondition failure for every
    /// catalog operation; requires data correction, never retried.
    #[error("no plausible products table found: {0}")]
    NoProductsTable(String),
    /// The pinned mapping names a table or column that no longer exists.
    #[error("pinned schema mapping is invalid: {0}")]
    InvalidMapping(String),
    #[error("schema inspection failed: {0}")]
    Inspect(String),
}

/// Quote an identifier for direct interpolation into SQL built against
/// the discovered tables. Values are always bound as parameters;
/// identifiers cannot be, so they get standard double-quote escaping.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ---------------------------------------------------------------------------
// Resolution entry points
// ---------------------------------------------------------------------------

/// Resolve the catalog schema: pinned mapping first, heuristics second.
pub fn resolve(conn: &Connection) -> Result<CatalogSchema, SchemaError> {
    if let Some(raw) = db::get_setting(conn, MAPPING_CATEGORY, MAPPING_KEY) {
        return from_mapping(conn, &raw);
    }
    discover(conn)
}

/// Parse and validate an explicitly pinned mapping.
pub fn from_mapping(conn: &Connection, raw: &str) -> Result<CatalogSchema, SchemaError> {
    let schema: CatalogSchema = serde_json::from_str(raw)
        .map_err(|e| SchemaError::InvalidMapping(format!("unparseable JSON: {e}")))?;
    validate(conn, &schema)?;
    debug!(products = %schema.products, "Using pinned catalog schema mapping");
    Ok(schema)
}

/// Check every table and column a mapping names against the live database.
pub fn validate(conn: &Connection, schema: &CatalogSchema) -> Result<(), SchemaError> {
    let product_cols = table_columns(conn, &schema.products).map_err(|_| {
        SchemaError::InvalidMapping(format!("products table '{}' does not exist", schema.products))
    })?;
    if product_cols.is_empty() {
        return Err(SchemaError::InvalidMapping(format!(
            "products table '{}' does not exist",
            schema.products
        )));
    }

    let mut required: Vec<(&str, &str)> = vec![("name", schema.cols.name.as_str())];
    if !schema.cols.id.eq_ignore_ascii_case("rowid") {
        required.push(("id", schema.cols.id.as_str()));
    }
    for (role, col) in [
        ("price", &schema.cols.price),
        ("stock", &schema.cols.stock),
        ("code", &schema.cols.code),
        ("category", &schema.cols.category),
    ] {
        if let Some(col) = col {
            required.push((role, col.as_str()));
        }
    }
    for (role, col) in required {
        if !product_cols.iter().any(|c| c.name.eq_ignore_ascii_case(col)) {
            return Err(SchemaError::InvalidMapping(format!(
                "column '{col}' (role {role}) is missing from '{}'",
                schema.products
            )));
        }
    }

    if let Some(cat_table) = &schema.categories {
        let cat_cols = table_columns(conn, cat_table).map_err(|_| {
            SchemaError::InvalidMapping(format!("categories table '{cat_table}' does not exist"))
        })?;
        if cat_cols.is_empty() {
            return Err(SchemaError::InvalidMapping(format!(
                "categories table '{cat_table}' does not exist"
            )));
        }
        if let Some(name_col) = &schema.cols.category_name {
            if !cat_cols.iter().any(|c| c.name.eq_ignore_ascii_case(name_col)) {
                return Err(SchemaError::InvalidMapping(format!(
                    "column '{name_col}' (role categoryName) is missing from '{cat_table}'"
                )));
            }
        }
    }

    Ok(())
}

/// Pin the given mapping so future startups skip the heuristics.
pub fn pin(conn: &Connection, schema: &CatalogSchema) -> Result<(), String> {
    let raw = serde_json::to_string(schema).map_err(|e| format!("serialize mapping: {e}"))?;
    db::set_setting(conn, MAPPING_CATEGORY, MAPPING_KEY, &raw)
}

/// Remove a pinned mapping. Returns whether one existed.
pub fn unpin(conn: &Connection) -> Result<bool, String> {
    db::delete_setting(conn, MAPPING_CATEGORY, MAPPING_KEY)
}

// ---------------------------------------------------------------------------
// Heuristic discovery
// ---------------------------------------------------------------------------

/// Scan all tables and pick the most plausible products table.
///
/// Pure read (`sqlite_master` + `PRAGMA table_info`), idempotent. Scoring:
/// a name-like text column is worth 3, a price-like column 2, code-like
/// and category-like columns 1 each. Blacklisted tables and tables with
/// no usable name column are skipped; ties keep the first table in
/// `sqlite_master` order.
pub fn discover(conn: &Connection) -> Result<CatalogSchema, SchemaError> {
    let tables = table_names(conn)?;
    let mut scanned = 0usize;
    let mut best: Option<(i32, String, CatalogColumns)> = None;

    for table in &tables {
        let folded = fold(table);
        if NON_PRODUCT_TABLES.iter().any(|t| *t == folded)
            || CATEGORY_TABLE_CANDIDATES.iter().any(|t| *t == folded)
        {
            continue;
        }
        scanned += 1;

        let columns = table_columns(conn, table)?;
        let Some((score, cols)) = score_and_resolve(&columns) else {
            continue;
        };
        debug!(table = %table, score, "Scored products candidate");
        if score > 0 && best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, table.clone(), cols));
        }
    }

    let Some((_, products, mut cols)) = best else {
        return Err(SchemaError::NoProductsTable(format!(
            "scanned {scanned} candidate table(s) in {}, none had a recognizable product shape",
            if tables.is_empty() { "an empty database".to_string() } else { format!("{} table(s)", tables.len()) },
        )));
    };

    let categories = discover_categories(conn, &tables)?;
    if let Some((cat_table, cat_name_col)) = categories {
        cols.category_name = Some(cat_name_col);
        return Ok(CatalogSchema {
            products,
            categories: Some(cat_table),
            cols,
        });
    }

    Ok(CatalogSchema {
        products,
        categories: None,
        cols,
    })
}

/// Score a candidate table and resolve its column roles.
///
/// Returns `None` when the table has no usable name column at all — such
/// a table cannot back the catalog no matter how it scores.
fn score_and_resolve(columns: &[ColumnInfo]) -> Option<(i32, CatalogColumns)> {
    let name = find_column(columns, NAME_CANDIDATES).filter(|c| is_text(columns, c));
    let price = find_column(columns, PRICE_CANDIDATES);
    let stock = find_column(columns, STOCK_CANDIDATES);
    let code = find_column(columns, CODE_CANDIDATES);
    let category = find_column(columns, CATEGORY_CANDIDATES);

    let mut score = 0;
    if name.is_some() {
        score += 3;
    }
    if price.is_some() {
        score += 2;
    }
    if code.is_some() {
        score += 1;
    }
    if category.is_some() {
        score += 1;
    }

    // Fallbacks: first text column for name, declared primary key (else
    // rowid) for id.
    let name = name.or_else(|| first_text_column(columns))?;
    let id = find_column(columns, ID_CANDIDATES)
        .or_else(|| columns.iter().find(|c| c.pk).map(|c| c.name.clone()))
        .unwrap_or_else(|| "rowid".to_string());

    // Stock and the id column must not double as the name column.
    let stock = stock.filter(|s| *s != name);

    Some((
        score,
        CatalogColumns {
            id,
            name,
            price,
            stock,
            code,
            category,
            category_name: None,
        },
    ))
}

/// Look for a dedicated categories table and its name column.
fn discover_categories(
    conn: &Connection,
    tables: &[String],
) -> Result<Option<(String, String)>, SchemaError> {
    for table in tables {
        let folded = fold(table);
        if !CATEGORY_TABLE_CANDIDATES.iter().any(|t| *t == folded) {
            continue;
        }
        let columns = table_columns(conn, table)?;
        let name_col = find_column(&columns, NAME_CANDIDATES)
            .or_else(|| find_column(&columns, &["categoria", "rubro"]))
            .or_else(|| first_text_column(&columns));
        if let Some(name_col) = name_col {
            return Ok(Some((table.clone(), name_col)));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Inspection helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    decl_type: String,
    pk: bool,
}

fn table_names(conn: &Connection) -> Result<Vec<String>, SchemaError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
        .map_err(|e| SchemaError::Inspect(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| SchemaError::Inspect(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| SchemaError::Inspect(e.to_string()))
}

/// Columns of a table via `PRAGMA table_info`. Empty for unknown tables.
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, SchemaError> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| SchemaError::Inspect(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(1)?,
                decl_type: row.get::<_, String>(2).unwrap_or_default(),
                pk: row.get::<_, i64>(5).unwrap_or(0) > 0,
            })
        })
        .map_err(|e| SchemaError::Inspect(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| SchemaError::Inspect(e.to_string()))
}

/// Match actual columns against an ordered candidate list, first
/// candidate wins. Comparison is case- and diacritic-insensitive.
fn find_column(columns: &[ColumnInfo], candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        if let Some(col) = columns.iter().find(|c| fold(&c.name) == *candidate) {
            return Some(col.name.clone());
        }
    }
    None
}

fn is_text(columns: &[ColumnInfo], name: &str) -> bool {
    columns
        .iter()
        .find(|c| c.name == name)
        .map(|c| {
            let t = c.decl_type.to_ascii_uppercase();
            t.is_empty() || t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB")
        })
        .unwrap_or(false)
}

fn first_text_column(columns: &[ColumnInfo]) -> Option<String> {
    columns
        .iter()
        .find(|c| !c.pk && is_text(columns, &c.name))
        .map(|c| c.name.clone())
}

/// Lowercase and strip the diacritics that show up in legacy Spanish
/// column names ("Descripción", "Código", "Categoría").
fn fold(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
