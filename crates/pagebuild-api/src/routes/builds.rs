//! Build lifecycle callbacks.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::delete;
use pagebuild_core::BuildId;
use tracing::info;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{build_id}/callback", delete(build_finished))
}

/// Called by a build when it finishes. Unknown ids are accepted.
async fn build_finished(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> &'static str {
    let build_id = BuildId::from(build_id);
    info!(build_id = %build_id, "Received build callback");
    state.pool.stop_build(&build_id).await;
    "Callback registered"
}
