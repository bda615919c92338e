//! Local SQLite database layer for Kazaro.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations for the
//! app-owned tables, settings helpers, and the shared state handed to
//! every command. The legacy catalog tables (products and categories)
//! are deliberately NOT owned by the migrations: they pre-exist in
//! deployed databases under inconsistent names and are resolved once at
//! startup by [`crate::schema`].

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::assignments;
use crate::schema::{self, CatalogSchema, SchemaError};

/// Shared state holding the database connection and the catalog schema
/// resolved at startup.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
    /// Catalog schema resolved at startup. Kept as a `Result` so catalog
    /// operations can surface the original discovery failure verbatim.
    pub catalog: Result<CatalogSchema, SchemaError>,
}

impl DbState {
    /// Resolved catalog schema, or the discovery failure if none was found.
    pub fn catalog(&self) -> Result<&CatalogSchema, SchemaError> {
        match &self.catalog {
            Ok(s) => Ok(s),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `db_path`.
///
/// Opens the connection, sets pragmas, runs any pending migrations,
/// repairs supervisor-service duplicates left by older deployments, and
/// resolves the catalog schema (pinned mapping first, heuristics second).
///
/// A missing products table is NOT fatal here — catalog operations fail
/// individually until the data is corrected. An invalid pinned mapping IS
/// fatal: it means explicit configuration went stale.
pub fn init(db_path: &Path) -> Result<DbState, String> {
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(db_path)?;
    run_migrations(&conn)?;

    let repaired = assignments::repair_duplicate_services(&conn)?;
    if repaired > 0 {
        warn!("Removed {repaired} duplicate supervisor-service rows during startup repair");
    }

    let catalog = match schema::resolve(&conn) {
        Ok(s) => {
            info!(
                products = %s.products,
                categories = s.categories.as_deref().unwrap_or("-"),
                "Catalog schema resolved"
            );
            Ok(s)
        }
        Err(e @ SchemaError::InvalidMapping(_)) => {
            return Err(format!("catalog schema: {e}"));
        }
        Err(e) => {
            warn!("Catalog schema unavailable: {e}");
            Err(e)
        }
    };

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: db_path.to_path_buf(),
        catalog,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: pedido tables and the settings store.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- pedidos (order headers)
        CREATE TABLE IF NOT EXISTS pedidos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            empleado_id INTEGER NOT NULL,
            rol TEXT NOT NULL DEFAULT '',
            nota TEXT NOT NULL DEFAULT '',
            servicio_id INTEGER,
            total REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- pedido_items (line items; snapshot of the product at order time)
        CREATE TABLE IF NOT EXISTS pedido_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pedido_id INTEGER NOT NULL,
            producto_id INTEGER NOT NULL,
            nombre TEXT NOT NULL,
            precio REAL NOT NULL DEFAULT 0,
            cantidad INTEGER NOT NULL,
            subtotal REAL NOT NULL DEFAULT 0,
            codigo TEXT,
            FOREIGN KEY(pedido_id) REFERENCES pedidos(id) ON DELETE CASCADE
        );

        -- app_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS app_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_pedidos_created_at ON pedidos(created_at);
        CREATE INDEX IF NOT EXISTS idx_pedidos_servicio ON pedidos(servicio_id);
        CREATE INDEX IF NOT EXISTS idx_pedido_items_pedido ON pedido_items(pedido_id);
        CREATE INDEX IF NOT EXISTS idx_pedido_items_producto ON pedido_items(producto_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: assignment pivots.
///
/// `supervisor_servicios` carries no unique index here on purpose:
/// historical databases may hold duplicate rows per service, and the
/// startup repair step deduplicates before the index is created.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- supervisor_servicios (one supervisor per service, repaired at startup)
        CREATE TABLE IF NOT EXISTS supervisor_servicios (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            empleado_id INTEGER NOT NULL,
            servicio_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- servicio_productos (which products a service may order)
        CREATE TABLE IF NOT EXISTS servicio_productos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            servicio_id INTEGER NOT NULL,
            producto_id INTEGER NOT NULL,
            UNIQUE(servicio_id, producto_id)
        );

        -- producto_roles (which roles see a product; no rows = visible to all)
        CREATE TABLE IF NOT EXISTS producto_roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            producto_id INTEGER NOT NULL,
            rol TEXT NOT NULL,
            UNIQUE(producto_id, rol)
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_supervisor_servicios_empleado ON supervisor_servicios(empleado_id);
        CREATE INDEX IF NOT EXISTS idx_servicio_productos_producto ON servicio_productos(producto_id);
        CREATE INDEX IF NOT EXISTS idx_producto_roles_rol ON producto_roles(rol);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (assignment pivots)");
    Ok(())
}

/// Migration v3: per-service budgets.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS servicio_presupuestos (
            servicio_id INTEGER PRIMARY KEY,
            presupuesto REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (servicio_presupuestos table)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM app_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO app_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Delete a single setting. Returns whether a row was removed.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<bool, String> {
    let n = conn
        .execute(
            "DELETE FROM app_settings WHERE setting_category = ?1 AND setting_key = ?2",
            params![category, key],
        )
        .map_err(|e| format!("delete_setting: {e}"))?;
    Ok(n > 0)
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
