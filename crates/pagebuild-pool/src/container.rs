//! Fixed-roster builder pool.
//!
//! The roster of build containers is fetched from the compute API on a fixed
//! interval. Each container runs at most one build; admission only looks at
//! the cached roster.

use async_trait::async_trait;
use pagebuild_config::ContainerPoolSettings;
use pagebuild_core::compute::{BuildContainer, ComputeApi};
use pagebuild_core::{Build, BuildId, BuilderPool, Error, Result, StatusReporter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::timeout::{BuildTimer, report_timeout};

/// A build container and the build assigned to it, if any.
#[derive(Debug)]
struct Unit {
    container: BuildContainer,
    build: Option<Arc<Build>>,
    timer: Option<BuildTimer>,
}

impl Unit {
    fn idle(container: BuildContainer) -> Self {
        Self {
            container,
            build: None,
            timer: None,
        }
    }

    fn runs(&self, build_id: &BuildId) -> bool {
        self.build
            .as_ref()
            .is_some_and(|build| &build.build_id == build_id)
    }
}

struct Inner {
    api: Arc<dyn ComputeApi>,
    reporter: Arc<dyn StatusReporter>,
    settings: ContainerPoolSettings,
    units: Mutex<Vec<Unit>>,
    monitoring: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Fetch the roster and merge it into the tracked units.
    async fn refresh(&self) -> Result<usize> {
        let containers = self.api.fetch_build_containers().await?;

        let mut units = self.units.lock().await;
        let mut previous: HashMap<String, Unit> = units
            .drain(..)
            .map(|unit| (unit.container.guid.clone(), unit))
            .collect();

        *units = containers
            .into_iter()
            .map(|container| match previous.remove(&container.guid) {
                Some(mut unit) => {
                    unit.container = container;
                    unit
                }
                None => Unit::idle(container),
            })
            .collect();

        for unit in previous.into_values() {
            if let Some(timer) = unit.timer {
                timer.cancel();
            }
            if let Some(build) = unit.build {
                warn!(
                    build_id = %build.build_id,
                    container = %unit.container.name,
                    "Container left the roster, abandoning build"
                );
            }
        }

        Ok(units.len())
    }

    /// Free the unit running `build_id`.
    ///
    /// The timeout path passes `cancel_timer = false`: aborting the timer
    /// from inside its own task would cancel the rest of the timeout work.
    async fn release(&self, build_id: &BuildId, cancel_timer: bool) -> Option<Arc<Build>> {
        let mut units = self.units.lock().await;
        let unit = units.iter_mut().find(|unit| unit.runs(build_id))?;

        if let Some(timer) = unit.timer.take() {
            if cancel_timer {
                timer.cancel();
            }
        }
        unit.build.take()
    }

    fn start_timer(self: &Arc<Self>, build: Arc<Build>) -> BuildTimer {
        let inner = Arc::clone(self);
        BuildTimer::start(self.settings.build_timeout, async move {
            warn!(build_id = %build.build_id, "Build timed out");
            // A stop that won the race already freed the unit; nothing to report.
            if inner.release(&build.build_id, false).await.is_some() {
                report_timeout(inner.reporter.as_ref(), &build, true).await;
            }
        })
    }

    async fn monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.settings.refresh_interval).await;
            if !self.monitoring.load(Ordering::SeqCst) {
                break;
            }
            self.refresh_logged().await;
        }
    }

    async fn refresh_logged(&self) {
        match self.refresh().await {
            Ok(count) => info!(count, "Cluster monitor: container(s) present"),
            Err(e) => error!(error = %e, "Cluster monitor failed to refresh roster"),
        }
    }
}

/// Builder pool backed by a fixed roster of long-lived build containers.
pub struct ContainerPool {
    inner: Arc<Inner>,
}

impl ContainerPool {
    pub fn new(
        api: Arc<dyn ComputeApi>,
        reporter: Arc<dyn StatusReporter>,
        settings: ContainerPoolSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                reporter,
                settings,
                units: Mutex::new(Vec::new()),
                monitoring: AtomicBool::new(false),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Fetch the roster now. Exposed for tests and manual resyncs.
    pub async fn refresh(&self) -> Result<usize> {
        self.inner.refresh().await
    }

    /// Number of tracked containers without a build.
    pub async fn available_units(&self) -> usize {
        let units = self.inner.units.lock().await;
        units.iter().filter(|unit| unit.build.is_none()).count()
    }

    pub async fn unit_count(&self) -> usize {
        self.inner.units.lock().await.len()
    }

    /// Name of the container running `build_id`, if any.
    pub async fn container_for(&self, build_id: &BuildId) -> Option<String> {
        let units = self.inner.units.lock().await;
        units
            .iter()
            .find(|unit| unit.runs(build_id))
            .map(|unit| unit.container.name.clone())
    }
}

#[async_trait]
impl BuilderPool for ContainerPool {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn start(&self) -> Result<()> {
        self.inner.monitoring.store(true, Ordering::SeqCst);
        self.inner.refresh_logged().await;

        let handle = tokio::spawn(Arc::clone(&self.inner).monitor());
        if let Some(previous) = self.inner.monitor.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        self.inner.monitoring.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.monitor.lock().await.take() {
            handle.abort();
        }
    }

    async fn can_start_build(&self, _build: &Build) -> Result<bool> {
        Ok(self.available_units().await > 0)
    }

    async fn start_build(&self, build: Arc<Build>) -> Result<()> {
        let container = {
            let mut units = self.inner.units.lock().await;
            let unit = units
                .iter_mut()
                .find(|unit| unit.build.is_none())
                .ok_or(Error::PoolExhausted)?;

            unit.build = Some(Arc::clone(&build));
            unit.timer = Some(self.inner.start_timer(Arc::clone(&build)));
            unit.container.clone()
        };

        match self
            .inner
            .api
            .update_build_container(&container, &build.container_environment)
            .await
        {
            Ok(()) => {
                info!(build_id = %build.build_id, container = %container.name, "Staged build on container");
                Ok(())
            }
            Err(e) => {
                self.inner.release(&build.build_id, true).await;
                Err(e)
            }
        }
    }

    async fn stop_build(&self, build_id: &BuildId) {
        info!(build_id = %build_id, "Stopping build");
        if self.inner.release(build_id, true).await.is_none() {
            warn!(build_id = %build_id, "Unable to stop build, container not found");
        }
    }

    async fn health(&self) -> Result<serde_json::Value> {
        let state = self
            .inner
            .api
            .build_containers_state(self.inner.settings.expected_containers)
            .await?;
        Ok(json!({
            "expected": state.expected,
            "found": state.found,
            "started": state.started,
            "available": self.available_units().await,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TIMEOUT_MESSAGE;
    use pagebuild_core::compute::{BuildContainersState, Task, TaskSpec};
    use pagebuild_core::{BuildPayload, BuildStatus, EnvVar};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct MockApi {
        containers: std::sync::Mutex<Vec<BuildContainer>>,
        fail_updates: AtomicBool,
        updates: AtomicUsize,
    }

    impl MockApi {
        fn with_containers(count: usize) -> Self {
            let api = Self::default();
            api.set_containers((1..=count).map(|i| format!("guid-{}", i)).collect());
            api
        }

        fn set_containers(&self, guids: Vec<String>) {
            *self.containers.lock().unwrap() = guids
                .into_iter()
                .map(|guid| BuildContainer {
                    name: format!("builder-{}", guid),
                    url: format!("/v2/apps/{}", guid),
                    state: "STARTED".to_string(),
                    container_name: None,
                    command: None,
                    guid,
                })
                .collect();
        }
    }

    #[async_trait]
    impl ComputeApi for MockApi {
        async fn access_token(&self) -> Result<String> {
            Ok("token".to_string())
        }

        async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>> {
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn fetch_build_containers_by_label(&self, _label: &str) -> Result<Vec<BuildContainer>> {
            unimplemented!()
        }

        async fn update_build_container(
            &self,
            _container: &BuildContainer,
            _environment: &BTreeMap<String, String>,
        ) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(Error::Api("restage failed".to_string()));
            }
            Ok(())
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

        async fn build_containers_state(&self, expected: usize) -> Result<BuildContainersState> {
            let found = self.containers.lock().unwrap().len();
            Ok(BuildContainersState {
                expected,
                found,
                started: found,
            })
        }
    }

    #[derive(Default)]
    struct MockReporter {
        statuses: std::sync::Mutex<Vec<(BuildId, BuildStatus, String)>>,
        logs: std::sync::Mutex<Vec<(BuildId, String)>>,
    }

    #[async_trait]
    impl StatusReporter for MockReporter {
        async fn report_status(
            &self,
            build: &Build,
            status: BuildStatus,
            message: &str,
        ) -> Result<()> {
            self.statuses.lock().unwrap().push((
                build.build_id.clone(),
                status,
                message.to_string(),
            ));
            Ok(())
        }

        async fn report_log(&self, build: &Build, output: &str) -> Result<()> {
            self.logs
                .lock()
                .unwrap()
                .push((build.build_id.clone(), output.to_string()));
            Ok(())
        }
    }

    fn build() -> Arc<Build> {
        let payload = BuildPayload {
            environment: vec![
                EnvVar::new("STATUS_CALLBACK", "https://example.com/status"),
                EnvVar::new("LOG_CALLBACK", "https://example.com/log"),
            ],
            ..Default::default()
        };
        Arc::new(Build::new(payload, "https://builder.example.com"))
    }

    async fn pool_with(
        count: usize,
        timeout: Duration,
    ) -> (ContainerPool, Arc<MockApi>, Arc<MockReporter>) {
        let api = Arc::new(MockApi::with_containers(count));
        let reporter = Arc::new(MockReporter::default());
        let settings = ContainerPoolSettings {
            build_timeout: timeout,
            ..Default::default()
        };
        let pool = ContainerPool::new(api.clone(), reporter.clone(), settings);
        pool.refresh().await.unwrap();
        (pool, api, reporter)
    }

    #[tokio::test]
    async fn test_can_start_build_requires_a_free_unit() {
        let (pool, _api, _reporter) = pool_with(2, Duration::from_secs(600)).await;
        let first = build();
        let second = build();

        assert!(pool.can_start_build(&first).await.unwrap());
        pool.start_build(first.clone()).await.unwrap();
        assert!(pool.can_start_build(&second).await.unwrap());
        pool.start_build(second.clone()).await.unwrap();
        assert!(!pool.can_start_build(&build()).await.unwrap());

        pool.stop_build(&first.build_id).await;
        assert!(pool.can_start_build(&build()).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_roster_admits_nothing() {
        let (pool, _api, _reporter) = pool_with(0, Duration::from_secs(600)).await;
        assert!(!pool.can_start_build(&build()).await.unwrap());
        assert!(matches!(
            pool.start_build(build()).await,
            Err(Error::PoolExhausted)
        ));
    }

    #[tokio::test]
    async fn test_start_build_takes_first_free_unit() {
        let (pool, api, _reporter) = pool_with(3, Duration::from_secs(600)).await;
        let build = build();

        pool.start_build(build.clone()).await.unwrap();

        assert_eq!(pool.available_units().await, 2);
        assert_eq!(api.updates.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.container_for(&build.build_id).await.as_deref(),
            Some("builder-guid-1")
        );
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let (pool, api, reporter) = pool_with(2, Duration::from_millis(20)).await;
        api.fail_updates.store(true, Ordering::SeqCst);
        let build = build();

        let result = pool.start_build(build.clone()).await;

        assert!(matches!(result, Err(Error::Api(_))));
        assert_eq!(pool.available_units().await, 2);
        assert_eq!(pool.container_for(&build.build_id).await, None);

        // The rolled-back timer must not report later.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(reporter.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_build_is_noop() {
        let (pool, _api, _reporter) = pool_with(1, Duration::from_secs(600)).await;
        pool.start_build(build()).await.unwrap();

        pool.stop_build(&BuildId::from("unknown")).await;

        assert_eq!(pool.available_units().await, 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_reclaims_and_reports() {
        let (pool, _api, reporter) = pool_with(1, Duration::ZERO).await;
        let build = build();

        pool.start_build(build.clone()).await.unwrap();

        for _ in 0..100 {
            if !reporter.statuses.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(pool.available_units().await, 1);
        let statuses = reporter.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![(build.build_id.clone(), BuildStatus::Error, TIMEOUT_MESSAGE.to_string())]
        );
        let logs = reporter.logs.lock().unwrap().clone();
        assert_eq!(logs, vec![(build.build_id.clone(), TIMEOUT_MESSAGE.to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_prevents_timeout_report() {
        let (pool, _api, reporter) = pool_with(1, Duration::from_secs(60)).await;
        let build = build();

        pool.start_build(build.clone()).await.unwrap();
        pool.stop_build(&build.build_id).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(reporter.statuses.lock().unwrap().is_empty());
        assert!(reporter.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_surviving_assignments() {
        let (pool, api, _reporter) = pool_with(2, Duration::from_secs(600)).await;
        let first = build();
        let second = build();
        pool.start_build(first.clone()).await.unwrap();
        pool.start_build(second.clone()).await.unwrap();

        // guid-1 survives, guid-2 disappears, guid-3 is new.
        api.set_containers(vec!["guid-3".to_string(), "guid-1".to_string()]);
        assert_eq!(pool.refresh().await.unwrap(), 2);

        assert_eq!(
            pool.container_for(&first.build_id).await.as_deref(),
            Some("builder-guid-1")
        );
        assert_eq!(pool.container_for(&second.build_id).await, None);
        assert_eq!(pool.available_units().await, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_monitoring() {
        let api = Arc::new(MockApi::with_containers(2));
        let pool = ContainerPool::new(
            api,
            Arc::new(MockReporter::default()),
            ContainerPoolSettings::default(),
        );

        pool.start().await.unwrap();
        assert_eq!(pool.unit_count().await, 2);
        pool.stop().await;
        assert!(pool.inner.monitor.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_health_reports_roster() {
        let (pool, _api, _reporter) = pool_with(2, Duration::from_secs(600)).await;
        let health = pool.health().await.unwrap();
        assert_eq!(health["found"], 2);
        assert_eq!(health["available"], 2);
    }
}
