use serde_json::Value;

use crate::budgets;
use crate::commands::payload_arg0_as_i64;
use crate::db::DbState;
use crate::{value_f64, value_i64};

const SERVICE_ID_KEYS: &[&str] = &["servicioId", "servicio_id", "serviceId", "id"];

/// Upsert a service's budget.
pub fn budget_set(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing budget payload")?;
    let servicio_id = value_i64(&payload, SERVICE_ID_KEYS).ok_or("Missing servicioId")?;
    let presupuesto = value_f64(&payload, &["presupuesto", "budget", "amount"])
        .ok_or("Missing presupuesto")?;

    budgets::set_budget(db, servicio_id, presupuesto)?;
    Ok(serde_json::json!({
        "success": true,
        "servicioId": servicio_id,
        "presupuesto": presupuesto,
    }))
}

pub fn budget_get(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let servicio_id = payload_arg0_as_i64(arg0, SERVICE_ID_KEYS).ok_or("Missing servicioId")?;
    let presupuesto = budgets::get_budget(db, servicio_id)?;
    Ok(serde_json::json!({
        "success": true,
        "servicioId": servicio_id,
        "presupuesto": presupuesto,
    }))
}

pub fn budget_list(db: &DbState) -> Result<Value, String> {
    let budgets = budgets::list_budgets(db)?;
    Ok(serde_json::json!({
        "success": true,
        "budgets": budgets,
    }))
}

pub fn budget_delete(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let servicio_id = payload_arg0_as_i64(arg0, SERVICE_ID_KEYS).ok_or("Missing servicioId")?;
    let removed = budgets::delete_budget(db, servicio_id)?;
    Ok(serde_json::json!({
        "success": true,
        "removed": removed,
    }))
}

/// Pre-submission cap check the cart screen calls before enabling the
/// submit button.
pub fn budget_check_cap(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing cap payload")?;
    let servicio_id = value_i64(&payload, SERVICE_ID_KEYS).ok_or("Missing servicioId")?;
    let total = value_f64(&payload, &["total", "amount"]).ok_or("Missing total")?;

    let mut check = budgets::check_order_cap(db, servicio_id, total)?;
    check["success"] = Value::Bool(true);
    Ok(check)
}
