//! HTTP client for the compute-control API.

use async_trait::async_trait;
use futures::future::try_join_all;
use pagebuild_config::CloudConfig;
use pagebuild_core::compute::{
    BuildContainer, BuildContainersState, ComputeApi, STATE_STARTED, Task, TaskSpec,
};
use pagebuild_core::{Error, Result};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

use crate::TokenClient;

const ACTIVE_TASK_STATES: &str = "PENDING,RUNNING,CANCELING";

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    resources: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct V2App {
    metadata: V2Metadata,
    entity: V2Entity,
}

#[derive(Debug, Deserialize)]
struct V2Metadata {
    guid: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct V2Entity {
    name: String,
    #[serde(default)]
    docker_image: Option<String>,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct V3App {
    guid: String,
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    metadata: V3Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct V3Metadata {
    #[serde(default)]
    labels: HashMap<String, Option<String>>,
    #[serde(default)]
    annotations: HashMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct V3Task {
    guid: String,
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    memory_in_mb: u64,
}

#[derive(Debug, Deserialize)]
struct InstanceStats {
    state: String,
}

impl From<V2App> for BuildContainer {
    fn from(app: V2App) -> Self {
        Self {
            guid: app.metadata.guid,
            name: app.entity.name,
            url: app.metadata.url,
            state: app.entity.state,
            container_name: None,
            command: None,
        }
    }
}

impl From<V3App> for BuildContainer {
    fn from(app: V3App) -> Self {
        let container_name = app.metadata.labels.get("name").cloned().flatten();
        let command = app.metadata.annotations.get("command").cloned().flatten();
        Self {
            url: format!("/v3/apps/{}", app.guid),
            guid: app.guid,
            container_name: container_name.or_else(|| Some(app.name.clone())),
            name: app.name,
            state: app.state,
            command,
        }
    }
}

impl From<V3Task> for Task {
    fn from(task: V3Task) -> Self {
        Self {
            guid: task.guid,
            name: task.name,
            state: task.state,
            memory_in_mb: task.memory_in_mb,
        }
    }
}

/// Cloud Foundry implementation of `ComputeApi`.
pub struct CloudFoundryClient {
    http: reqwest::Client,
    api_host: Url,
    auth: TokenClient,
    space_guid: Option<String>,
    container_image: Option<String>,
}

impl CloudFoundryClient {
    pub fn new(
        http: reqwest::Client,
        api_host: Url,
        auth: TokenClient,
        space_guid: Option<String>,
        container_image: Option<String>,
    ) -> Self {
        Self {
            http,
            api_host,
            auth,
            space_guid,
            container_image,
        }
    }

    pub fn from_config(config: &CloudConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let api_host = Url::parse(&config.api_host).map_err(|e| Error::Api(e.to_string()))?;
        let auth = TokenClient::new(
            http.clone(),
            config.token_url.clone(),
            config.username.clone(),
            config.password.clone(),
        );
        Ok(Self::new(
            http,
            api_host,
            auth,
            config.space_guid.clone(),
            config.container_image.clone(),
        ))
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.api_host
            .join(path)
            .map_err(|e| Error::Api(format!("invalid API path {}: {}", path, e)))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let url = self.resolve(path)?;
        let token = self.auth.access_token().await?;

        debug!(method = %method, url = %url, "Compute API request");

        let mut request = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Api(format!(
                "{} {} failed ({}): {}",
                method, path, status, text
            )));
        }
        Ok(text)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let text = self.send(method, path, body).await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("unexpected response from {}: {}", path, e)))
    }

    async fn fetch_instance_states(
        &self,
        container: &BuildContainer,
    ) -> Result<BTreeMap<String, usize>> {
        let stats: HashMap<String, InstanceStats> = self
            .request(
                Method::GET,
                &format!("/v2/apps/{}/stats", container.guid),
                None,
            )
            .await?;

        let mut counts = BTreeMap::new();
        for instance in stats.into_values() {
            *counts.entry(instance.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl ComputeApi for CloudFoundryClient {
    async fn access_token(&self) -> Result<String> {
        self.auth.access_token().await
    }

    async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>> {
        let space_guid = self
            .space_guid
            .as_deref()
            .ok_or_else(|| Error::Api("no build space configured".to_string()))?;

        let apps: ListResponse<V2App> = self
            .request(Method::GET, &format!("/v2/spaces/{}/apps", space_guid), None)
            .await?;

        Ok(apps
            .resources
            .into_iter()
            .filter(|app| match &self.container_image {
                Some(image) => app.entity.docker_image.as_deref() == Some(image.as_str()),
                None => true,
            })
            .map(BuildContainer::from)
            .collect())
    }

    async fn fetch_build_containers_by_label(&self, label: &str) -> Result<Vec<BuildContainer>> {
        let apps: ListResponse<V3App> = self
            .request(
                Method::GET,
                &format!("/v3/apps?label_selector=type=={}", label),
                None,
            )
            .await?;

        Ok(apps.resources.into_iter().map(BuildContainer::from).collect())
    }

    async fn update_build_container(
        &self,
        container: &BuildContainer,
        environment: &BTreeMap<String, String>,
    ) -> Result<()> {
        let body = json!({ "environment_json": environment });
        self.send(Method::PUT, &container.url, Some(&body)).await?;
        self.send(Method::POST, &format!("{}/restage", container.url), None)
            .await?;
        Ok(())
    }

    async fn fetch_active_tasks(&self, label: &str) -> Result<Vec<Task>> {
        let tasks: ListResponse<V3Task> = self
            .request(
                Method::GET,
                &format!(
                    "/v3/tasks?label_selector=type=={}&states={}&per_page=5000",
                    label, ACTIVE_TASK_STATES
                ),
                None,
            )
            .await?;

        Ok(tasks.resources.into_iter().map(Task::from).collect())
    }

    async fn start_task(&self, container: &BuildContainer, spec: &TaskSpec) -> Result<Task> {
        let body = json!({
            "name": spec.name,
            "command": spec.command,
            "memory_in_mb": spec.memory_in_mb,
            "disk_in_mb": spec.disk_in_mb,
            "metadata": { "labels": { "type": spec.label } },
        });

        let task: V3Task = self
            .request(
                Method::POST,
                &format!("/v3/apps/{}/tasks", container.guid),
                Some(&body),
            )
            .await?;
        Ok(task.into())
    }

    async fn stop_task(&self, task_guid: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("/v3/tasks/{}/actions/cancel", task_guid),
            None,
        )
        .await?;
        Ok(())
    }

    async fn build_containers_state(&self, expected: usize) -> Result<BuildContainersState> {
        let containers = self.fetch_build_containers().await?;
        let started: Vec<&BuildContainer> = containers
            .iter()
            .filter(|c| c.state == STATE_STARTED)
            .collect();

        let mut errors = Vec::new();
        if containers.len() < expected {
            errors.push(format!(
                "Expected {} build containers but only {} found.",
                expected,
                containers.len()
            ));
        }
        if started.len() != expected {
            errors.push(format!(
                "Not all build containers are in the {} state.",
                STATE_STARTED
            ));
        }

        let states = try_join_all(started.iter().map(|c| self.fetch_instance_states(c))).await?;
        for (container, counts) in started.iter().zip(states) {
            let unhealthy = ["CRASHED", "DOWN", "FLAPPING", "UNKNOWN"]
                .iter()
                .any(|s| counts.contains_key(*s));
            if unhealthy {
                errors.push(format!(
                    "{}: not all instances are running. {:?}",
                    container.name, counts
                ));
            } else if counts.is_empty() {
                errors.push(format!("{} has 0 running instances", container.name));
            }
        }

        if !errors.is_empty() {
            return Err(Error::Unhealthy(errors.join("\n")));
        }

        Ok(BuildContainersState {
            expected,
            found: containers.len(),
            started: started.len(),
        })
    }
}
