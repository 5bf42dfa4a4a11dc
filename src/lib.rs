pub mod activity;
pub mod api;
pub mod config;
pub mod db;
pub mod dbprovisioner;
pub mod engine;
pub mod error;
pub mod git;
pub mod github;
pub mod locks;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod runtime;
pub mod session;

pub use db::DbPool;
pub use error::OrchestratorError;

use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::OrchestratorConfig;
use crate::dbprovisioner::DbProvisioner;
use crate::engine::PreviewService;
use crate::locks::KeyedLocks;
use crate::proxy::RouteTable;
use crate::runtime::ContainerRuntime;
use crate::session::SessionManager;

/// Everything a control-plane handler needs, built once at startup and
/// shared behind an `Arc` the way the teacher's own `AppState` is.
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub db: DbPool,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub previews: Arc<PreviewService>,
    pub sessions: Arc<SessionManager>,
    pub db_provisioner: Arc<DbProvisioner>,
    pub locks: Arc<KeyedLocks>,
    /// Populated only in proxy router mode; `None` in port mode, where
    /// clients connect straight to `localhost:<port>` and there is no
    /// shared route table to maintain.
    pub routes: Option<Arc<ArcSwap<RouteTable>>>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<OrchestratorConfig>,
        db: DbPool,
        runtime: Arc<dyn ContainerRuntime>,
        previews: Arc<PreviewService>,
        sessions: Arc<SessionManager>,
        db_provisioner: Arc<DbProvisioner>,
        locks: Arc<KeyedLocks>,
        routes: Option<Arc<ArcSwap<RouteTable>>>,
    ) -> Self {
        Self {
            config,
            db,
            runtime,
            previews,
            sessions,
            db_provisioner,
            locks,
            routes,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
