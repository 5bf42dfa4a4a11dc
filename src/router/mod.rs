//! Router Adapter (C2): decides how a running preview container becomes
//! reachable. Two strategies, port and proxy, share one capability set —
//! `prepare_run` to compute the route before a container exists, and
//! `url_from_container` to recover it afterward from an inspected
//! container's labels/ports. No inheritance: a `Router` is a value handed
//! into the Preview Service (C6), per the "pluggable routing" design note.

use anyhow::Result;
use rand::Rng as _;
use std::collections::HashMap;

use crate::config::{sanitize, OrchestratorConfig};
use crate::runtime::ContainerInfo;

pub const CONTAINER_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Port,
    Proxy,
}

/// The route computed for a preview, independent of how it was derived.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub url: String,
    pub mode: RouteMode,
    pub port: Option<u16>,
    pub subdomain: Option<String>,
    pub labels: HashMap<String, String>,
}

pub trait Router: Send + Sync {
    /// Compute the route a not-yet-created container for `(project_id,
    /// session_id)` will be assigned.
    fn prepare_run(&self, project_id: &str, session_id: &str, container_name: &str) -> RouteInfo;

    /// Recover the route from an already-inspected container. Must be
    /// deterministic given the same labels/ports, so that a process
    /// restart recovers the same URL without re-deciding it.
    fn url_from_container(&self, inspect: &ContainerInfo) -> Option<String>;
}

const LABEL_PROJECT_ID: &str = "kosuke.project_id";
const LABEL_SESSION_ID: &str = "kosuke.session_id";
const LABEL_BRANCH: &str = "kosuke.branch";

fn base_labels(project_id: &str, session_id: &str, branch: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(LABEL_PROJECT_ID.to_string(), project_id.to_string());
    labels.insert(LABEL_SESSION_ID.to_string(), session_id.to_string());
    labels.insert(LABEL_BRANCH.to_string(), branch.to_string());
    labels
}

/// Exposes previews on a random host port in a configured range, proxying
/// nothing — the caller connects straight through to `localhost:<port>`.
pub struct PortRouter {
    range_start: u16,
    range_end: u16,
    branch_prefix: String,
}

impl PortRouter {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            range_start: config.port_range_start,
            range_end: config.port_range_end,
            branch_prefix: config.session_branch_prefix.clone(),
        }
    }

    fn pick_port(&self) -> u16 {
        if self.range_start == self.range_end {
            return self.range_start;
        }
        rand::rng().random_range(self.range_start..=self.range_end)
    }
}

impl Router for PortRouter {
    fn prepare_run(&self, project_id: &str, session_id: &str, _container_name: &str) -> RouteInfo {
        let port = self.pick_port();
        let branch = format!("{}{}", self.branch_prefix, session_id);
        RouteInfo {
            url: format!("http://localhost:{}", port),
            mode: RouteMode::Port,
            port: Some(port),
            subdomain: None,
            labels: base_labels(project_id, session_id, &branch),
        }
    }

    fn url_from_container(&self, inspect: &ContainerInfo) -> Option<String> {
        inspect.host_port.map(|port| format!("http://localhost:{}", port))
    }
}

/// Exposes previews as subdomains of a shared base domain, routed by a
/// reverse proxy (see `crate::proxy`) keyed on the Host header.
pub struct ProxyRouter {
    base_domain: String,
    network: String,
    branch_prefix: String,
}

impl ProxyRouter {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            base_domain: config.preview_base_domain.clone(),
            network: config.preview_network.clone(),
            branch_prefix: config.session_branch_prefix.clone(),
        }
    }

    fn subdomain(&self, project_id: &str, session_id: &str) -> String {
        format!(
            "project-{}-{}.{}",
            project_id,
            sanitize(session_id, 20),
            self.base_domain
        )
    }
}

impl Router for ProxyRouter {
    fn prepare_run(&self, project_id: &str, session_id: &str, _container_name: &str) -> RouteInfo {
        let subdomain = self.subdomain(project_id, session_id);
        let branch = format!("{}{}", self.branch_prefix, session_id);
        let mut labels = base_labels(project_id, session_id, &branch);
        labels.insert("kosuke.router.host".to_string(), subdomain.clone());
        labels.insert("kosuke.router.port".to_string(), CONTAINER_PORT.to_string());
        labels.insert("kosuke.router.network".to_string(), self.network.clone());

        RouteInfo {
            url: format!("https://{}", subdomain),
            mode: RouteMode::Proxy,
            port: None,
            subdomain: Some(subdomain),
            labels,
        }
    }

    fn url_from_container(&self, inspect: &ContainerInfo) -> Option<String> {
        // Recovery re-derives the subdomain from the labels the container
        // was created with, rather than the container name, so it survives
        // whatever naming scheme happens to be in force.
        let project_id = inspect.labels.get(LABEL_PROJECT_ID)?;
        let session_id = inspect.labels.get(LABEL_SESSION_ID)?;
        Some(format!("https://{}", self.subdomain(project_id, session_id)))
    }
}

pub fn build_router(config: &OrchestratorConfig) -> Result<Box<dyn Router>> {
    match config.router_mode {
        crate::config::RouterMode::Port => Ok(Box::new(PortRouter::new(config))),
        crate::config::RouterMode::Proxy => Ok(Box::new(ProxyRouter::new(config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(mode: crate::config::RouterMode) -> OrchestratorConfig {
        OrchestratorConfig {
            bun_preview_image: "img".to_string(),
            python_preview_image: "img".to_string(),
            port_range_start: 40000,
            port_range_end: 40000,
            router_mode: mode,
            preview_base_domain: "preview.example".to_string(),
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

    #[test]
    fn port_router_uses_fixed_port_when_range_collapses() {
        let router = PortRouter::new(&test_config(crate::config::RouterMode::Port));
        let info = router.prepare_run("7", "kosuke-chat-abc123", "kp-7-kosuke-chat-abc123");
        assert_eq!(info.url, "http://localhost:40000");
        assert_eq!(info.port, Some(40000));
    }

    #[test]
    fn port_router_recovery_round_trips() {
        let router = PortRouter::new(&test_config(crate::config::RouterMode::Port));
        let info = router.prepare_run("7", "kosuke-chat-abc123", "kp-7-kosuke-chat-abc123");
        let fake_inspect = ContainerInfo {
            id: "abc".to_string(),
            name: "kp-7-kosuke-chat-abc123".to_string(),
            running: true,
            exit_code: None,
            host_port: info.port,
            labels: info.labels.clone(),
        };
        assert_eq!(router.url_from_container(&fake_inspect), Some(info.url));
    }

    #[test]
    fn proxy_router_subdomain_matches_s2_scenario() {
        let router = ProxyRouter::new(&test_config(crate::config::RouterMode::Proxy));
        let info = router.prepare_run("42", "kosuke-chat-XYZ!!", "kp-42-kosuke-chat-xyz");
        assert_eq!(info.url, "https://project-42-kosuke-chat-xyz.preview.example");
    }

    #[test]
    fn proxy_router_recovery_round_trips_from_labels() {
        let router = ProxyRouter::new(&test_config(crate::config::RouterMode::Proxy));
        let info = router.prepare_run("42", "kosuke-chat-xyz", "kp-42-kosuke-chat-xyz");
        let fake_inspect = ContainerInfo {
            id: "abc".to_string(),
            name: "kp-42-kosuke-chat-xyz".to_string(),
            running: true,
            exit_code: None,
            host_port: None,
            labels: info.labels.clone(),
        };
        assert_eq!(router.url_from_container(&fake_inspect), Some(info.url));
    }
}
