use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// Liveness probe; no dependencies are touched.
pub async fn service_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp(),
    }))
}
