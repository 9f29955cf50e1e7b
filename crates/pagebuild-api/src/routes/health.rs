//! Liveness and health endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
}

async fn index() -> &'static str {
    "Server running"
}

/// Check the token endpoint, every queue and the pool.
///
/// Always answers 200; problems are listed in `reasons`.
async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    let token = state.compute.access_token();
    let queues = join_all(state.sources.iter().map(|source| async move {
        (source.name().to_string(), source.attributes().await)
    }));
    let pool = state.pool.health();

    let (token, queues, pool) = tokio::join!(token, queues, pool);

    let mut reasons = Vec::new();
    if let Err(e) = token {
        reasons.push(e.to_string());
    }

    let mut queue_attributes = Map::new();
    for (name, attributes) in queues {
        match attributes {
            Ok(attributes) => {
                queue_attributes.insert(name, json!(attributes));
            }
            Err(e) => reasons.push(format!("{}: {}", name, e)),
        }
    }

    let pool = match pool {
        Ok(pool) => Some(pool),
        Err(e) => {
            reasons.push(e.to_string());
            None
        }
    };

    if reasons.is_empty() {
        Json(json!({
            "ok": true,
            "buildContainers": pool,
            "queueAttributes": queue_attributes,
        }))
    } else {
        warn!(?reasons, "Healthcheck failed");
        Json(json!({ "ok": false, "reasons": reasons }))
    }
}
