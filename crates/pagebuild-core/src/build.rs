//! The build entity.
//!
//! A `Build` is created once per queue message and never mutated afterwards.
//! Pools, timers and the scheduler share it through `Arc<Build>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{BuildId, Result};

/// Environment key holding the URL the build calls when it finishes.
pub const CALLBACK_ENV: &str = "BUILDER_CALLBACK";
pub const STATUS_CALLBACK_ENV: &str = "STATUS_CALLBACK";
pub const LOG_CALLBACK_ENV: &str = "LOG_CALLBACK";
pub const BUILD_ID_ENV: &str = "BUILD_ID";
pub const OWNER_ENV: &str = "OWNER";
pub const REPOSITORY_ENV: &str = "REPOSITORY";

/// Requested size of the execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerSize {
    #[default]
    Default,
    Large,
}

/// A single `{name, value}` pair from the queue payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: Value,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Decoded queue payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_size: Option<ContainerSize>,
    pub environment: Vec<EnvVar>,
}

impl BuildPayload {
    /// Parse a payload from raw JSON text.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// One unit of work with a resolved execution environment.
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub build_id: BuildId,
    pub container_name: Option<String>,
    pub container_size: Option<ContainerSize>,
    pub container_environment: BTreeMap<String, String>,
}

impl Build {
    /// Create a build from a decoded payload.
    ///
    /// `callback_base` is the externally reachable base URL of this service;
    /// the build is told to call `<callback_base>/builds/<build_id>/callback`.
    pub fn new(payload: BuildPayload, callback_base: &str) -> Self {
        let build_id = BuildId::generate();

        // Later entries win on duplicate names.
        let mut container_environment: BTreeMap<String, String> = payload
            .environment
            .into_iter()
            .map(|var| (var.name, stringify(var.value)))
            .collect();

        container_environment.insert(
            CALLBACK_ENV.to_string(),
            callback_url(callback_base, &build_id),
        );

        Self {
            build_id,
            container_name: payload.container_name,
            container_size: payload.container_size,
            container_environment,
        }
    }

    /// Parse the raw message body and create a build from it.
    pub fn from_json(body: &str, callback_base: &str) -> Result<Self> {
        Ok(Self::new(BuildPayload::from_json(body)?, callback_base))
    }

    /// Name of the template to run this build on.
    pub fn container_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or("default")
    }

    pub fn is_large(&self) -> bool {
        self.container_size == Some(ContainerSize::Large)
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.container_environment.get(key).map(String::as_str)
    }

    /// Lowercased `owner/repository` pair, if the payload carried both.
    pub fn owner_repository(&self) -> Option<String> {
        let owner = self.env(OWNER_ENV)?;
        let repository = self.env(REPOSITORY_ENV)?;
        Some(format!("{}/{}", owner, repository).to_lowercase())
    }

    pub fn status_callback(&self) -> Option<&str> {
        self.env(STATUS_CALLBACK_ENV)
    }

    pub fn log_callback(&self) -> Option<&str> {
        self.env(LOG_CALLBACK_ENV)
    }

    /// Build id assigned by the upstream service, when present.
    pub fn source_build_id(&self) -> Option<&str> {
        self.env(BUILD_ID_ENV)
    }
}

fn callback_url(base: &str, build_id: &BuildId) -> String {
    format!("{}/builds/{}/callback", base.trim_end_matches('/'), build_id)
}

/// Environment values must be strings; numbers and booleans keep their JSON text.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://example.com";

    fn payload() -> BuildPayload {
        BuildPayload {
            container_name: None,
            container_size: None,
            environment: vec![
                EnvVar::new("OVERRIDE_A", "VALUE A"),
                EnvVar::new("OVERRIDE_B", "VALUE B"),
                EnvVar::new("OVERRIDE_C", "VALUE C"),
            ],
        }
    }

    #[test]
    fn test_environment_contains_every_input_pair() {
        let build = Build::new(payload(), BASE);
        assert_eq!(build.env("OVERRIDE_A"), Some("VALUE A"));
        assert_eq!(build.env("OVERRIDE_B"), Some("VALUE B"));
        assert_eq!(build.env("OVERRIDE_C"), Some("VALUE C"));
        assert_eq!(build.container_environment.len(), 4);
    }

    #[test]
    fn test_callback_is_injected() {
        let build = Build::new(payload(), BASE);
        assert_eq!(
            build.env(CALLBACK_ENV),
            Some(format!("https://example.com/builds/{}/callback", build.build_id).as_str())
        );
    }

    #[test]
    fn test_callback_tolerates_trailing_slash() {
        let build = Build::new(payload(), "https://example.com/");
        assert_eq!(
            build.env(CALLBACK_ENV).unwrap(),
            format!("https://example.com/builds/{}/callback", build.build_id)
        );
    }

    #[test]
    fn test_last_duplicate_wins() {
        let payload = BuildPayload {
            environment: vec![EnvVar::new("NAME", "first"), EnvVar::new("NAME", "second")],
            ..Default::default()
        };
        let build = Build::new(payload, BASE);
        assert_eq!(build.env("NAME"), Some("second"));
    }

    #[test]
    fn test_non_string_values_are_coerced() {
        let payload = BuildPayload {
            environment: vec![
                EnvVar::new("BUILD_ID", 1234),
                EnvVar::new("SKIP_LOGGING", false),
            ],
            ..Default::default()
        };
        let build = Build::new(payload, BASE);
        assert_eq!(build.source_build_id(), Some("1234"));
        assert_eq!(build.env("SKIP_LOGGING"), Some("false"));
    }

    #[test]
    fn test_from_json() {
        let body = json!({
            "containerName": "exp",
            "containerSize": "large",
            "environment": [{ "name": "OWNER", "value": "Owner" }, { "name": "REPOSITORY", "value": "Repo" }],
        })
        .to_string();

        let build = Build::from_json(&body, BASE).unwrap();
        assert_eq!(build.container_name(), "exp");
        assert!(build.is_large());
        assert_eq!(build.owner_repository(), Some("owner/repo".to_string()));
    }

    #[test]
    fn test_default_container_name() {
        let build = Build::new(payload(), BASE);
        assert_eq!(build.container_name(), "default");
        assert!(!build.is_large());
        assert_eq!(build.owner_repository(), None);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let err = Build::from_json(r#"{"environment": "nope"}"#, BASE).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidPayload(_)));

        let err = Build::from_json("not json", BASE).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidPayload(_)));
    }
}
