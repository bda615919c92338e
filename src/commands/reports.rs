use serde::Deserialize;
use serde_json::Value;

use crate::db::DbState;
use crate::reports;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonthPayload {
    #[serde(alias = "anio", alias = "año")]
    year: i32,
    #[serde(alias = "mes")]
    month: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceMonthPayload {
    #[serde(alias = "servicio_id", alias = "serviceId")]
    servicio_id: i64,
    #[serde(alias = "anio", alias = "año")]
    year: i32,
    #[serde(alias = "mes")]
    month: u32,
}

/// Range for the consumption report: either explicit `[desde, hasta)`
/// datetimes or a year/month pair.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumptionPayload {
    #[serde(default, alias = "from", alias = "start")]
    desde: Option<String>,
    #[serde(default, alias = "to", alias = "end")]
    hasta: Option<String>,
    #[serde(default, alias = "anio", alias = "año")]
    year: Option<i32>,
    #[serde(default, alias = "mes")]
    month: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LowStockPayload {
    #[serde(default, alias = "umbral")]
    threshold: Option<i64>,
}

/// Default Depósito low-stock threshold when the view sends none.
const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

pub fn report_monthly(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: MonthPayload = serde_json::from_value(arg0.ok_or("Missing report payload")?)
        .map_err(|e| format!("Invalid report payload: {e}"))?;
    let summary = reports::monthly_summary(db, payload.year, payload.month)?;
    Ok(serde_json::json!({
        "success": true,
        "summary": summary,
    }))
}

pub fn report_service_monthly(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ServiceMonthPayload =
        serde_json::from_value(arg0.ok_or("Missing report payload")?)
            .map_err(|e| format!("Invalid report payload: {e}"))?;
    let summary = reports::service_summary(db, payload.servicio_id, payload.year, payload.month)?;
    Ok(serde_json::json!({
        "success": true,
        "summary": summary,
    }))
}

/// Depósito consumption report over a range or a calendar month.
pub fn report_consumption(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ConsumptionPayload =
        serde_json::from_value(arg0.ok_or("Missing report payload")?)
            .map_err(|e| format!("Invalid report payload: {e}"))?;

    let (desde, hasta) = match (payload.desde, payload.hasta, payload.year, payload.month) {
        (Some(desde), Some(hasta), _, _) => (desde, hasta),
        (None, None, Some(year), Some(month)) => reports::month_range(year, month)?,
        _ => return Err("Provide desde/hasta or year/month".to_string()),
    };

    let consumption = reports::consumption_by_product(db, &desde, &hasta)?;
    Ok(serde_json::json!({
        "success": true,
        "desde": desde,
        "hasta": hasta,
        "consumption": consumption,
    }))
}

/// Depósito low-stock report over the discovered schema.
pub fn report_low_stock(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LowStockPayload = match arg0 {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid payload: {e}"))?,
        None => LowStockPayload::default(),
    };
    let threshold = payload.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);

    let mut report = reports::low_stock(db, threshold)?;
    report["success"] = Value::Bool(true);
    report["threshold"] = threshold.into();
    Ok(report)
}
