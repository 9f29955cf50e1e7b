use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use pagebuild_api::{AppState, routes};
use pagebuild_core::compute::{BuildContainer, BuildContainersState, ComputeApi, Task, TaskSpec};
use pagebuild_core::{Build, BuildId, BuilderPool, Error, QueueSource, Result};
use pagebuild_scheduler::MemoryQueue;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingPool {
    stopped: Mutex<Vec<BuildId>>,
    unhealthy: bool,
}

#[async_trait]
impl BuilderPool for RecordingPool {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn can_start_build(&self, _build: &Build) -> Result<bool> {
        Ok(true)
    }

    async fn start_build(&self, _build: Arc<Build>) -> Result<()> {
        Ok(())
    }

    async fn stop_build(&self, build_id: &BuildId) {
        self.stopped.lock().unwrap().push(build_id.clone());
    }

    async fn health(&self) -> Result<Value> {
        if self.unhealthy {
            return Err(Error::Unhealthy(
                "Expected 2 build containers but only 1 found.".to_string(),
            ));
        }
        Ok(json!({ "expected": 2, "found": 2, "started": 2, "available": 1 }))
    }
}

struct TokenOnlyApi {
    token: bool,
}

#[async_trait]
impl ComputeApi for TokenOnlyApi {
    async fn access_token(&self) -> Result<String> {
        if self.token {
            Ok("token".to_string())
        } else {
            Err(Error::Auth("bad credentials".to_string()))
        }
    }

    async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>> {
        unimplemented!()
    }

    async fn fetch_build_containers_by_label(&self, _label: &str) -> Result<Vec<BuildContainer>> {
        unimplemented!()
    }

    async fn update_build_container(
        &self,
        _container: &BuildContainer,
        _environment: &BTreeMap<String, String>,
    ) -> Result<()> {
        unimplemented!()
    }

    async fn fetch_active_tasks(&self, _label: &str) -> Result<Vec<Task>> {
        unimplemented!()
    }

    async fn start_task(&self, _container: &BuildContainer, _spec: &TaskSpec) -> Result<Task> {
        unimplemented!()
    }

    async fn stop_task(&self, _task_guid: &str) -> Result<()> {
        unimplemented!()
    }

    async fn build_containers_state(&self, _expected: usize) -> Result<BuildContainersState> {
        unimplemented!()
    }
}

fn state(pool: Arc<RecordingPool>, token: bool) -> AppState {
    let queue: Arc<dyn QueueSource> =
        Arc::new(MemoryQueue::new("site-build-queue", Duration::from_secs(60)));
    AppState::new(pool, vec![queue], Arc::new(TokenOnlyApi { token }))
}

async fn send(state: AppState, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = routes::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_index() {
    let (status, body) = send(state(Arc::default(), true), Method::GET, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Server running");
}

#[tokio::test]
async fn test_build_callback_stops_build() {
    let pool = Arc::new(RecordingPool::default());
    let (status, body) = send(
        state(pool.clone(), true),
        Method::DELETE,
        "/builds/abc-123_x/callback",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Callback registered");
    assert_eq!(*pool.stopped.lock().unwrap(), vec![BuildId::from("abc-123_x")]);
}

#[tokio::test]
async fn test_healthcheck_ok() {
    let (status, body) = send(state(Arc::default(), true), Method::GET, "/healthcheck").await;
    let body: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["buildContainers"]["found"], 2);
    assert_eq!(body["queueAttributes"]["site-build-queue"]["waiting"], 0);
}

#[tokio::test]
async fn test_healthcheck_reports_reasons_with_200() {
    let pool = Arc::new(RecordingPool {
        unhealthy: true,
        ..Default::default()
    });
    let (status, body) = send(state(pool, false), Method::GET, "/healthcheck").await;
    let body: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    let reasons = body["reasons"].as_array().unwrap();
    assert_eq!(reasons.len(), 2);
    assert!(reasons[0].as_str().unwrap().contains("bad credentials"));
    assert!(reasons[1].as_str().unwrap().contains("Expected 2 build containers"));
}
