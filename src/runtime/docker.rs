//! Docker backend for the Container Driver (C3), via `bollard`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::{looks_like_not_found, ContainerInfo, ContainerRuntime, RunSpec};

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(socket: &str) -> Result<Self> {
        let client = if cfg!(windows) || socket.starts_with("npipe://") || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }

    fn container_info_from(
        id: String,
        name: String,
        running: bool,
        exit_code: Option<i64>,
        host_port: Option<u16>,
        labels: HashMap<String, String>,
    ) -> ContainerInfo {
        ContainerInfo { id, name, running, exit_code, host_port, labels }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_pulled(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "pulling preview image");
        let options = CreateImageOptions { from_image: image, ..Default::default() };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("failed to pull image {image}"))?;
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert("3000/tcp".to_string(), HashMap::new());
        if let Some(host_port) = spec.host_port {
            port_bindings.insert(
                "3000/tcp".to_string(),
                Some(vec![bollard::service::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = bollard::service::HostConfig {
            port_bindings: Some(port_bindings),
            binds: if spec.mounts.is_empty() { None } else { Some(spec.mounts.clone()) },
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: spec.name.as_str(), platform: None };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await
            .with_context(|| format!("failed to create container '{}'", spec.name))?;

        self.client
            .start_container::<String>(&response.id, None)
            .await
            .with_context(|| format!("failed to start container '{}'", spec.name))?;

        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.client
            .start_container::<String>(name, None)
            .await
            .with_context(|| format!("failed to start container '{name}'"))
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions { t: grace.as_secs() as i64 };
        match self.client.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = anyhow::Error::from(e);
                if looks_like_not_found(&err) {
                    Ok(())
                } else {
                    Err(err).with_context(|| format!("failed to stop container '{name}'"))
                }
            }
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { force, ..Default::default() };
        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = anyhow::Error::from(e);
                if looks_like_not_found(&err) {
                    Ok(())
                } else {
                    Err(err).with_context(|| format!("failed to remove container '{name}'"))
                }
            }
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        let info = self
            .client
            .inspect_container(name, None)
            .await
            .with_context(|| format!("failed to inspect container '{name}'"))?;

        let host_port = info
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get("3000/tcp"))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|b| b.first())
            .and_then(|p| p.host_port.as_ref())
            .and_then(|p| p.parse().ok());

        let (running, exit_code) = info
            .state
            .as_ref()
            .map(|s| (s.running.unwrap_or(false), s.exit_code))
            .unwrap_or((false, None));

        let labels = info
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        Ok(Self::container_info_from(
            info.id.unwrap_or_default(),
            info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            running,
            exit_code,
            host_port,
            labels,
        ))
    }

    async fn list_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<ContainerInfo>> {
        let label_filters: Vec<String> =
            labels.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut filters = HashMap::new();
        filters.insert("label".to_string(), label_filters);

        let options = ListContainersOptions { all: true, filters, ..Default::default() };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("failed to list containers by label")?;

        let mut result = Vec::with_capacity(containers.len());
        for container in containers {
            let name = container
                .names
                .and_then(|names| names.first().cloned())
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string();

            let host_port = container.ports.as_ref().and_then(|ports| {
                ports
                    .iter()
                    .find(|p| p.private_port == 3000)
                    .and_then(|p| p.public_port)
                    .map(|p| p as u16)
            });

            let running = container.state.as_deref() == Some("running");

            result.push(Self::container_info_from(
                container.id.unwrap_or_default(),
                name,
                running,
                None,
                host_port,
                container.labels.unwrap_or_default(),
            ));
        }

        Ok(result)
    }

    async fn is_available(&self) -> bool {
        self.client.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_exposes_container_port_3000_regardless_of_host_port() {
        let spec = RunSpec::new("kp-7-abc", "bun:latest");
        assert!(spec.host_port.is_none());
    }
}
