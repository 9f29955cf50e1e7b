//! Operator routes.

pub mod builds;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the operator router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/builds", builds::router())
        .with_state(state)
}
