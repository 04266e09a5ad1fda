//! Sync API endpoints.
//!
//! Enter/exit records are delivered in the background; these endpoints report
//! on the queue and let a client force delivery ("sync now").

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{FlushReport, SyncStatus};

use crate::state::SharedState;

/// Creates the sync router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(sync_status))
        .route("/flush", post(flush))
}

/// Get the sync queue status.
#[utoipa::path(
    get,
    path = "/api/sync",
    tag = "sync",
    operation_id = "getSyncStatus",
    summary = "Get sync status",
    description = "Returns whether a sink is configured, how many records are \
        waiting, delivery totals and the most recent dropped record.",
    responses(
        (status = 200, description = "Sync status", body = SyncStatus)
    )
)]
pub async fn sync_status(State(state): State<SharedState>) -> Json<SyncStatus> {
    Json(state.engine.sync_queue().status())
}

/// Deliver queued records now.
#[utoipa::path(
    post,
    path = "/api/sync/flush",
    tag = "sync",
    operation_id = "flushSync",
    summary = "Sync now",
    description = "Delivers queued records in order, stopping at the first \
        record that exhausts its retries. Returns what was delivered and \
        what is left.",
    responses(
        (status = 200, description = "Flush finished", body = FlushReport)
    )
)]
pub async fn flush(State(state): State<SharedState>) -> Json<FlushReport> {
    Json(state.engine.sync_queue().flush().await)
}
