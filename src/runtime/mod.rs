//! Container Driver (C3): a thin, typed wrapper over a container engine.
//! Every operation is addressed by container name or label filter and is
//! idempotent, per §4.3 — discovery always goes through `list_by_label` so
//! two callers racing to start the same `(project_id, session_id)` never
//! collide on a name. Engine-layer functions speak `anyhow::Result`, same
//! as the rest of this codebase; `stop`/`remove` swallow "not found" at
//! this layer so callers never have to special-case a cold container.

mod docker;
mod podman;

pub use docker::DockerRuntime;
pub use podman::PodmanRuntime;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeType;

/// Everything needed to create-and-start a container (§4.3 `spec`).
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
    /// Bind mounts in `host_path:container_path` form.
    pub mounts: Vec<String>,
    /// Host port to bind to the container's internal port 3000, if the
    /// router is in port mode. `None` in proxy mode, where the container
    /// is reached over the Docker network by name instead.
    pub host_port: Option<u16>,
}

impl RunSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            labels: HashMap::new(),
            network: None,
            mounts: Vec::new(),
            host_port: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    /// Host port bound to the container's primary (3000/tcp) port, if any.
    pub host_port: Option<u16>,
    pub labels: HashMap<String, String>,
}

fn looks_like_not_found(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("no such container") || msg.contains("404") || msg.contains("not found")
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` if it is not already present locally; a no-op
    /// otherwise.
    async fn ensure_pulled(&self, image: &str) -> Result<()>;

    /// Create and start a container per `spec`.
    async fn run(&self, spec: &RunSpec) -> Result<String>;

    /// Start an existing (stopped) container by name.
    async fn start(&self, name: &str) -> Result<()>;

    /// SIGTERM, then SIGKILL after `grace`. Idempotent: absent is success.
    async fn stop(&self, name: &str, grace: Duration) -> Result<()>;

    /// Idempotent: absent is success.
    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Inspect a container's current state by name. `Err` if absent.
    async fn inspect(&self, name: &str) -> Result<ContainerInfo>;

    /// Deterministic discovery: every container carrying all of `labels`
    /// (a subset match, so callers can filter on just `project_id`, or on
    /// `project_id` + `session_id` together).
    async fn list_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<ContainerInfo>>;

    async fn is_available(&self) -> bool;

    /// Equivalent to stop+start, preserving identity (name, labels). The
    /// default is literally stop-then-start; engines with a native verb
    /// override it.
    async fn restart(&self, name: &str, grace: Duration) -> Result<()> {
        self.stop(name, grace).await?;
        self.start(name).await
    }
}

/// No container engine reachable; mutating calls fail, discovery returns
/// empty so status checks degrade to "not running" instead of erroring.
pub struct NoopRuntime;

#[async_trait]
impl ContainerRuntime for NoopRuntime {
    async fn ensure_pulled(&self, _image: &str) -> Result<()> {
        anyhow::bail!("no container engine available")
    }
    async fn run(&self, spec: &RunSpec) -> Result<String> {
        anyhow::bail!("cannot run '{}': no container engine available", spec.name)
    }
    async fn start(&self, name: &str) -> Result<()> {
        anyhow::bail!("cannot start '{name}': no container engine available")
    }
    async fn stop(&self, _name: &str, _grace: Duration) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _name: &str, _force: bool) -> Result<()> {
        Ok(())
    }
    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        anyhow::bail!("container '{name}' not found: no container engine available")
    }
    async fn list_by_label(&self, _labels: &HashMap<String, String>) -> Result<Vec<ContainerInfo>> {
        Ok(Vec::new())
    }
    async fn is_available(&self) -> bool {
        false
    }
}

pub async fn detect_runtime(config: &crate::config::RuntimeConfig) -> Result<Arc<dyn ContainerRuntime>> {
    match config.runtime_type {
        RuntimeType::Docker => match DockerRuntime::new(&config.docker_socket) {
            Ok(runtime) => Ok(Arc::new(runtime)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to Docker; previews will not start");
                Ok(Arc::new(NoopRuntime))
            }
        },
        RuntimeType::Podman => Ok(Arc::new(PodmanRuntime::new())),
        RuntimeType::Auto => {
            if let Ok(docker) = DockerRuntime::new(&config.docker_socket) {
                if docker.is_available().await {
                    tracing::info!("auto-detected Docker runtime");
                    return Ok(Arc::new(docker));
                }
            }
            let podman = PodmanRuntime::new();
            if podman.is_available().await {
                tracing::info!("auto-detected Podman runtime");
                return Ok(Arc::new(podman));
            }
            tracing::warn!("no container runtime available; previews will not start until Docker or Podman is installed");
            Ok(Arc::new(NoopRuntime))
        }
    }
}
