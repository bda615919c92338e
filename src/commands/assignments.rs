use serde::Deserialize;
use serde_json::Value;

use crate::assignments::{self, AssignError};
use crate::commands::payload_arg0_as_i64;
use crate::db::DbState;
use crate::{value_i64, value_str};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupervisorPairPayload {
    #[serde(alias = "empleado_id", alias = "employeeId", alias = "employee_id")]
    empleado_id: i64,
    #[serde(alias = "servicio_id", alias = "serviceId", alias = "service_id")]
    servicio_id: i64,
}

fn parse_pair_payload(arg0: Option<Value>) -> Result<SupervisorPairPayload, String> {
    let payload = arg0.ok_or("Missing assignment payload")?;
    serde_json::from_value(payload).map_err(|e| format!("Invalid assignment payload: {e}"))
}

/// Strict assignment. A service owned by someone else answers with an
/// `ASSIGNMENT_CONFLICT` envelope (409 at the HTTP layer) carrying the
/// current owner.
pub fn supervisor_assign(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = parse_pair_payload(arg0)?;
    match assignments::assign(db, payload.empleado_id, payload.servicio_id) {
        Ok(id) => Ok(serde_json::json!({
            "success": true,
            "id": id,
            "empleadoId": payload.empleado_id,
            "servicioId": payload.servicio_id,
        })),
        Err(AssignError::Conflict {
            servicio_id,
            empleado_id,
        }) => Ok(serde_json::json!({
            "success": false,
            "code": "ASSIGNMENT_CONFLICT",
            "servicioId": servicio_id,
            "empleadoId": empleado_id,
        })),
        Err(e) => Err(e.to_string()),
    }
}

/// Administrative override: always wins.
pub fn supervisor_reassign(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = parse_pair_payload(arg0)?;
    let id = assignments::reassign(db, payload.empleado_id, payload.servicio_id)?;
    Ok(serde_json::json!({
        "success": true,
        "id": id,
        "empleadoId": payload.empleado_id,
        "servicioId": payload.servicio_id,
    }))
}

/// Remove an assignment by surrogate id or by exact pair.
pub fn supervisor_unassign(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing unassign payload")?;
    let removed = if let Some(id) = value_i64(&payload, &["id", "assignmentId", "assignment_id"]) {
        assignments::unassign_by_id(db, id)?
    } else {
        let pair: SupervisorPairPayload = serde_json::from_value(payload)
            .map_err(|e| format!("Invalid unassign payload: {e}"))?;
        assignments::unassign_pair(db, pair.empleado_id, pair.servicio_id)?
    };
    Ok(serde_json::json!({
        "success": true,
        "removed": removed,
    }))
}

pub fn supervisor_list(db: &DbState) -> Result<Value, String> {
    let assignments = assignments::list_assignments(db)?;
    Ok(serde_json::json!({
        "success": true,
        "assignments": assignments,
    }))
}

/// Services owned by one supervisor.
pub fn supervisor_services(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let empleado_id = payload_arg0_as_i64(arg0, &["empleadoId", "empleado_id", "employeeId", "id"])
        .ok_or("Missing empleadoId")?;
    let servicios = assignments::services_for_supervisor(db, empleado_id)?;
    Ok(serde_json::json!({
        "success": true,
        "empleadoId": empleado_id,
        "servicios": servicios,
    }))
}

// ---------------------------------------------------------------------------
// Service <-> product catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceProductPayload {
    #[serde(alias = "servicio_id", alias = "serviceId")]
    servicio_id: i64,
    #[serde(alias = "producto_id", alias = "productId")]
    producto_id: i64,
}

pub fn service_products_add(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ServiceProductPayload = serde_json::from_value(
        arg0.ok_or("Missing service-product payload")?,
    )
    .map_err(|e| format!("Invalid service-product payload: {e}"))?;
    assignments::add_service_product(db, payload.servicio_id, payload.producto_id)?;
    Ok(serde_json::json!({ "success": true }))
}

pub fn service_products_remove(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ServiceProductPayload = serde_json::from_value(
        arg0.ok_or("Missing service-product payload")?,
    )
    .map_err(|e| format!("Invalid service-product payload: {e}"))?;
    let removed = assignments::remove_service_product(db, payload.servicio_id, payload.producto_id)?;
    Ok(serde_json::json!({ "success": true, "removed": removed }))
}

/// Replace a service's whole product set.
pub fn service_products_set(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing service-product payload")?;
    let servicio_id =
        value_i64(&payload, &["servicioId", "servicio_id", "serviceId"]).ok_or("Missing servicioId")?;
    let producto_ids: Vec<i64> = payload
        .get("productoIds")
        .or_else(|| payload.get("producto_ids"))
        .or_else(|| payload.get("productIds"))
        .and_then(|v| v.as_array())
        .ok_or("Missing productoIds")?
        .iter()
        .filter_map(|v| v.as_i64())
        .collect();
    assignments::set_service_products(db, servicio_id, &producto_ids)?;
    Ok(serde_json::json!({
        "success": true,
        "servicioId": servicio_id,
        "count": producto_ids.len(),
    }))
}

pub fn service_products_list(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let servicio_id = payload_arg0_as_i64(arg0, &["servicioId", "servicio_id", "serviceId", "id"])
        .ok_or("Missing servicioId")?;
    let productos = assignments::products_for_service(db, servicio_id)?;
    Ok(serde_json::json!({
        "success": true,
        "servicioId": servicio_id,
        "productos": productos,
    }))
}

// ---------------------------------------------------------------------------
// Product <-> role visibility
// ---------------------------------------------------------------------------

/// Replace a product's visible-role set. An empty list opens it to all.
pub fn product_roles_set(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product-roles payload")?;
    let producto_id = value_i64(&payload, &["productoId", "producto_id", "productId"])
        .ok_or("Missing productoId")?;
    let roles: Vec<String> = payload
        .get("roles")
        .and_then(|v| v.as_array())
        .ok_or("Missing roles")?
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    assignments::set_product_roles(db, producto_id, &roles)?;
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
        "roles": roles,
    }))
}

pub fn product_roles_add(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product-role payload")?;
    let producto_id = value_i64(&payload, &["productoId", "producto_id", "productId"])
        .ok_or("Missing productoId")?;
    let rol = value_str(&payload, &["rol", "role"]).ok_or("Missing rol")?;
    assignments::add_product_role(db, producto_id, &rol)?;
    Ok(serde_json::json!({ "success": true }))
}

pub fn product_roles_remove(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product-role payload")?;
    let producto_id = value_i64(&payload, &["productoId", "producto_id", "productId"])
        .ok_or("Missing productoId")?;
    let rol = value_str(&payload, &["rol", "role"]).ok_or("Missing rol")?;
    let removed = assignments::remove_product_role(db, producto_id, &rol)?;
    Ok(serde_json::json!({ "success": true, "removed": removed }))
}

pub fn product_roles_list(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let producto_id = payload_arg0_as_i64(arg0, &["productoId", "producto_id", "productId", "id"])
        .ok_or("Missing productoId")?;
    let roles = assignments::roles_for_product(db, producto_id)?;
    Ok(serde_json::json!({
        "success": true,
        "productoId": producto_id,
        "roles": roles,
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
        assignments::repair_duplicate_services(&conn).expect("repair");
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
            catalog: Err(crate::schema::SchemaError::NoProductsTable(
                "not needed here".to_string(),
            )),
        }
    }

    #[test]
    fn assign_conflict_surfaces_owner_in_envelope() {
        let db = test_state();

        let first = supervisor_assign(
            &db,
            Some(serde_json::json!({ "empleadoId": 1, "servicioId": 7 })),
        )
        .expect("assign");
        assert_eq!(first["success"], true);

        let conflict = supervisor_assign(
            &db,
            Some(serde_json::json!({ "employeeId": 2, "serviceId": 7 })),
        )
        .expect("conflict envelope");
        assert_eq!(conflict["success"], false);
        assert_eq!(conflict["code"], "ASSIGNMENT_CONFLICT");
        assert_eq!(conflict["empleadoId"], 1, "carries the current owner");

        let reassigned = supervisor_reassign(
            &db,
            Some(serde_json::json!({ "empleadoId": 2, "servicioId": 7 })),
        )
        .expect("override");
        assert_eq!(reassigned["success"], true);

        let listed = supervisor_list(&db).expect("list");
        let rows = listed["assignments"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["empleadoId"], 2);
    }

    #[test]
    fn unassign_supports_id_and_pair_shapes() {
        let db = test_state();
        let assigned = supervisor_assign(
            &db,
            Some(serde_json::json!({ "empleadoId": 1, "servicioId": 7 })),
        )
        .expect("assign");

        let by_id = supervisor_unassign(&db, Some(serde_json::json!({ "id": assigned["id"] })))
            .expect("by id");
        assert_eq!(by_id["removed"], true);

        supervisor_assign(
            &db,
            Some(serde_json::json!({ "empleadoId": 1, "servicioId": 8 })),
        )
        .expect("assign");
        let by_pair = supervisor_unassign(
            &db,
            Some(serde_json::json!({ "empleadoId": 1, "servicioId": 8 })),
        )
        .expect("by pair");
        assert_eq!(by_pair["removed"], true);
    }

    #[test]
    fn service_products_set_replaces_whole_set() {
        let db = test_state();
        service_products_set(
            &db,
            Some(serde_json::json!({ "servicioId": 3, "productoIds": [1, 2, 3] })),
        )
        .expect("set");
        service_products_set(
            &db,
            Some(serde_json::json!({ "servicioId": 3, "productoIds": [2] })),
        )
        .expect("replace");

        let listed = service_products_list(&db, Some(serde_json::json!(3))).expect("list");
        assert_eq!(listed["productos"], serde_json::json!([2]));
    }

    #[test]
    fn product_roles_roundtrip() {
        let db = test_state();
        product_roles_set(
            &db,
            Some(serde_json::json!({ "productoId": 9, "roles": ["supervisor", " admin "] })),
        )
        .expect("set");

        let listed = product_roles_list(&db, Some(serde_json::json!(9))).expect("list");
        assert_eq!(listed["roles"], serde_json::json!(["admin", "supervisor"]));

        product_roles_remove(
            &db,
            Some(serde_json::json!({ "productoId": 9, "rol": "admin" })),
        )
        .expect("remove");
        product_roles_add(
            &db,
            Some(serde_json::json!({ "productoId": 9, "role": "deposito" })),
        )
        .expect("add");
        let listed = product_roles_list(&db, Some(serde_json::json!(9))).expect("list");
        assert_eq!(listed["roles"], serde_json::json!(["deposito", "supervisor"]));
    }
}
