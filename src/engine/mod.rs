//! Preview Service (C6): orchestrates the Router Adapter, Container Driver,
//! Git Operator, and DB Provisioner to bring a `(project_id, session_id)`
//! preview to `Running`/`Responding` and back down again, serialized by the
//! per-key lock registry (§5).

pub mod stack;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{container_name, db_name, OrchestratorConfig};
use crate::locks::{session_key, KeyedLocks};
use crate::router::Router;
use crate::runtime::{ContainerRuntime, RunSpec};
use stack::{detect_stack, Stack};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct PreviewStatus {
    pub running: bool,
    pub is_responding: bool,
    pub url: Option<String>,
}

impl PreviewStatus {
    fn absent() -> Self {
        Self { running: false, is_responding: false, url: None }
    }
}

pub struct PreviewService {
    config: Arc<OrchestratorConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    router: Arc<dyn Router>,
    locks: Arc<KeyedLocks>,
    http: reqwest::Client,
}

impl PreviewService {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        router: Arc<dyn Router>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .expect("failed to build preview health-probe HTTP client");

        Self { config, runtime, router, locks, http }
    }

    fn discovery_labels(&self, project_id: &str, session_id: &str) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("kosuke.project_id".to_string(), project_id.to_string());
        labels.insert("kosuke.session_id".to_string(), session_id.to_string());
        labels
    }

    async fn find_container(&self, project_id: &str, session_id: &str) -> Result<Option<crate::runtime::ContainerInfo>> {
        let labels = self.discovery_labels(project_id, session_id);
        let mut matches = self.runtime.list_by_label(&labels).await?;
        Ok(matches.pop())
    }

    /// §4.6 `get_preview_status`.
    pub async fn get_preview_status(&self, project_id: &str, session_id: &str) -> Result<PreviewStatus> {
        let Some(info) = self.find_container(project_id, session_id).await? else {
            return Ok(PreviewStatus::absent());
        };

        let url = self.router.url_from_container(&info);

        if !info.running {
            return Ok(PreviewStatus { running: false, is_responding: false, url });
        }

        let is_responding = match &url {
            Some(internal) => self.probe_health(internal).await,
            None => false,
        };

        Ok(PreviewStatus { running: true, is_responding, url })
    }

    async fn probe_health(&self, base_url: &str) -> bool {
        let target = format!("{}{}", base_url.trim_end_matches('/'), self.config.preview_health_path);
        match self.http.get(&target).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(err) => {
                tracing::debug!(url = %target, error = %err, "preview health probe failed");
                false
            }
        }
    }

    /// §4.6 `start_preview`. The caller is expected to have already ensured
    /// the session workspace exists (`session::ensure_session_workspace`);
    /// this function only touches the container layer.
    pub async fn start_preview(
        &self,
        project_id: &str,
        session_id: &str,
        env_vars: HashMap<String, String>,
        workspace_path: &Path,
    ) -> Result<PreviewStatus> {
        let _guard = self.locks.lock(&session_key(project_id, session_id)).await;

        if let Some(info) = self.find_container(project_id, session_id).await? {
            self.runtime
                .restart(&info.name, STOP_GRACE)
                .await
                .with_context(|| format!("failed to restart existing preview container '{}'", info.name))?;
            let refreshed = self.runtime.inspect(&info.name).await?;
            let url = self.router.url_from_container(&refreshed);
            return Ok(PreviewStatus { running: true, is_responding: false, url });
        }

        crate::metrics::record_preview_start_attempt();

        let name = container_name(&self.config.preview_resource_prefix, project_id, session_id);
        let route = self.router.prepare_run(project_id, session_id, &name);

        let image = match detect_stack(workspace_path) {
            Stack::Bun => &self.config.bun_preview_image,
            Stack::Python => &self.config.python_preview_image,
        };

        self.runtime
            .ensure_pulled(image)
            .await
            .with_context(|| format!("failed to pull preview image {image}"))?;

        let session_db_name = db_name(project_id, session_id)?;
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            self.config.postgres_user, self.config.postgres_password,
            self.config.postgres_host, self.config.postgres_port, session_db_name,
        );

        let mut env: Vec<(String, String)> = env_vars.into_iter().collect();
        env.push(("DATABASE_URL".to_string(), database_url));
        env.push(("PORT".to_string(), "3000".to_string()));

        let mut spec = RunSpec::new(name.clone(), image.clone());
        spec.env = env;
        spec.labels = route.labels.clone();
        spec.network = Some(self.config.preview_network.clone());
        spec.mounts = vec![format!(
            "{}/{}:/workspace",
            self.config.host_workspace_dir, project_id
        )];
        spec.host_port = route.port;

        match self.runtime.run(&spec).await {
            Ok(_) => {
                tracing::info!(container = %name, project_id, session_id, "started preview container");
                Ok(PreviewStatus { running: true, is_responding: false, url: Some(route.url) })
            }
            Err(err) => {
                tracing::warn!(container = %name, error = %err, "preview start failed; removing partial container");
                crate::metrics::record_preview_start_failure();
                let _ = self.runtime.remove(&name, true).await;
                Err(err).context("failed to start preview container")
            }
        }
    }

    /// §4.6 `stop_preview`: idempotent stop+remove.
    pub async fn stop_preview(&self, project_id: &str, session_id: &str) -> Result<()> {
        let _guard = self.locks.lock(&session_key(project_id, session_id)).await;

        let name = container_name(&self.config.preview_resource_prefix, project_id, session_id);
        self.runtime.stop(&name, STOP_GRACE).await?;
        self.runtime.remove(&name, true).await?;
        Ok(())
    }

    /// §4.6 `restart_preview_container`: restart by name, falling back to
    /// `start_preview` if no container currently exists.
    pub async fn restart_preview_container(
        &self,
        project_id: &str,
        session_id: &str,
        workspace_path: &Path,
    ) -> Result<PreviewStatus> {
        let existing = self.find_container(project_id, session_id).await?;

        match existing {
            Some(info) => {
                let _guard = self.locks.lock(&session_key(project_id, session_id)).await;
                self.runtime.restart(&info.name, STOP_GRACE).await?;
                let refreshed = self.runtime.inspect(&info.name).await?;
                let url = self.router.url_from_container(&refreshed);
                Ok(PreviewStatus { running: true, is_responding: false, url })
            }
            None => self.start_preview(project_id, session_id, HashMap::new(), workspace_path).await,
        }
    }

    /// Lists every currently running/known preview container, used at
    /// startup to repopulate the proxy route table (§11 "restart-time route
    /// recovery").
    pub async fn list_all_previews(&self) -> Result<Vec<crate::runtime::ContainerInfo>> {
        self.runtime.list_by_label(&HashMap::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{RouteInfo, RouteMode};
    use crate::runtime::ContainerInfo;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeRuntime {
        containers: StdMutex<HashMap<String, ContainerInfo>>,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self { containers: StdMutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ensure_pulled(&self, _image: &str) -> Result<()> {
            Ok(())
        }
        async fn run(&self, spec: &RunSpec) -> Result<String> {
            let info = ContainerInfo {
                id: spec.name.clone(),
                name: spec.name.clone(),
                running: true,
                exit_code: None,
                host_port: spec.host_port,
                labels: spec.labels.clone(),
            };
            self.containers.lock().unwrap().insert(spec.name.clone(), info);
            Ok(spec.name.clone())
        }
        async fn start(&self, name: &str) -> Result<()> {
            if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
                c.running = true;
            }
            Ok(())
        }
        async fn stop(&self, name: &str, _grace: Duration) -> Result<()> {
            if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
                c.running = false;
            }
            Ok(())
        }
        async fn remove(&self, name: &str, _force: bool) -> Result<()> {
            self.containers.lock().unwrap().remove(name);
            Ok(())
        }
        async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
            self.containers
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("not found"))
        }
        async fn list_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<ContainerInfo>> {
            Ok(self
                .containers
                .lock()
                .unwrap()
                .values()
                .filter(|c| labels.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
                .cloned()
                .collect())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct FakeRouter;

    impl Router for FakeRouter {
        fn prepare_run(&self, project_id: &str, session_id: &str, _container_name: &str) -> RouteInfo {
            let mut labels = HashMap::new();
            labels.insert("kosuke.project_id".to_string(), project_id.to_string());
            labels.insert("kosuke.session_id".to_string(), session_id.to_string());
            RouteInfo {
                url: "http://localhost:40000".to_string(),
                mode: RouteMode::Port,
                port: Some(40000),
                subdomain: None,
                labels,
            }
        }
        fn url_from_container(&self, inspect: &ContainerInfo) -> Option<String> {
            inspect.host_port.map(|p| format!("http://localhost:{p}"))
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            bun_preview_image: "bun:latest".to_string(),
            python_preview_image: "python:latest".to_string(),
            port_range_start: 40000,
            port_range_end: 40000,
            router_mode: crate::config::RouterMode::Port,
            preview_base_domain: String::new(),
            preview_network: "net".to_string(),
            preview_resource_prefix: "kp".to_string(),
            preview_health_path: "/".to_string(),
            host_workspace_dir: "/workspaces".to_string(),
            projects_base_path: "/projects".to_string(),
            postgres_host: "localhost".to_string(),
            postgres_port: 5432,
            postgres_db: "postgres".to_string(),
            postgres_user: "postgres".to_string(),
            postgres_password: "secret".to_string(),
            session_branch_prefix: "kosuke/chat-".to_string(),
            runtime: Default::default(),
            data_dir: "./data".to_string(),
        }
    }

    fn service() -> PreviewService {
        PreviewService::new(
            Arc::new(test_config()),
            Arc::new(FakeRuntime::new()),
            Arc::new(FakeRouter),
            Arc::new(KeyedLocks::new()),
        )
    }

    #[tokio::test]
    async fn status_is_absent_before_any_start() {
        let svc = service();
        let status = svc.get_preview_status("7", "kosuke-chat-abc123").await.unwrap();
        assert!(!status.running);
        assert!(status.url.is_none());
    }

    #[tokio::test]
    async fn start_preview_creates_container_with_expected_name_and_env() {
        let svc = service();
        let status = svc
            .start_preview("7", "kosuke-chat-abc123", HashMap::from([("FOO".to_string(), "bar".to_string())]), Path::new("/tmp"))
            .await
            .unwrap();

        assert!(status.running);
        assert_eq!(status.url, Some("http://localhost:40000".to_string()));
    }

    #[tokio::test]
    async fn stop_preview_is_idempotent_on_absent_container() {
        let svc = service();
        svc.stop_preview("7", "kosuke-chat-abc123").await.unwrap();
        let status = svc.get_preview_status("7", "kosuke-chat-abc123").await.unwrap();
        assert!(!status.running);
    }

    #[tokio::test]
    async fn starting_twice_converges_to_single_container() {
        let svc = service();
        svc.start_preview("7", "kosuke-chat-abc123", HashMap::new(), Path::new("/tmp")).await.unwrap();
        svc.start_preview("7", "kosuke-chat-abc123", HashMap::new(), Path::new("/tmp")).await.unwrap();

        let matches = svc.runtime.list_by_label(&svc.discovery_labels("7", "kosuke-chat-abc123")).await.unwrap();
        assert_eq!(matches.len(), 1);
    }
}
