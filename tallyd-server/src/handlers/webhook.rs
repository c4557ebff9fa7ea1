//! Webhook ingestion routes.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use tallyd_core::IngestOutcome;
use tallyd_model::PollCreatedPayload;

use crate::auth::{authorize, AuthPolicy};
use crate::errors::AppResult;
use crate::state::AppState;

/// PollCreated notification from the indexing pipeline.
///
/// Responds `true` when the event was ingested (newly registered or already
/// known) and `false` when the signature is not one we subscribe to, so the
/// indexer never retries deliveries we will always skip.
pub async fn poll_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PollCreatedPayload>,
) -> AppResult<Json<bool>> {
    authorize(&state, AuthPolicy::RequiresWebhookSecret, &headers).await?;

    match state.ingestor.ingest(&payload).await? {
        IngestOutcome::Registered => {
            // A freshly registered poll may already be past its end date;
            // don't make it wait out a full scheduler interval.
            state.scheduler.tick_now();
            Ok(Json(true))
        }
        IngestOutcome::AlreadyHandled => Ok(Json(true)),
        IngestOutcome::Skipped => Ok(Json(false)),
    }
}

/// Delivery-channel probe used by the indexer to validate its endpoint
/// configuration. Deliberately unauthenticated: the indexer probes before
/// its secret is configured.
pub async fn webhook_health() -> Json<Value> {
    info!("Webhook delivery channel probed");
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp(),
    }))
}
