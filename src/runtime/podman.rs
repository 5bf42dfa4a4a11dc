//! Podman backend for the Container Driver (C3), shelled out to the
//! `podman` CLI the same way `git::mod` shells out to `git` — no local
//! socket to speak to, so every operation is a subprocess plus output
//! parsing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;

use super::{ContainerInfo, ContainerRuntime, RunSpec};

pub struct PodmanRuntime;

impl PodmanRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn run_command(&self, args: &[String]) -> Result<String> {
        let output = Command::new("podman")
            .args(args)
            .output()
            .await
            .context("failed to execute podman command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("podman {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn is_not_found(stderr: &str) -> bool {
        let lower = stderr.to_lowercase();
        lower.contains("no such container") || lower.contains("no container with")
    }
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn ensure_pulled(&self, image: &str) -> Result<()> {
        let exists = self
            .run_command(&["image".to_string(), "exists".to_string(), image.to_string()])
            .await;
        if exists.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "pulling preview image with podman");
        self.run_command(&["pull".to_string(), image.to_string()]).await?;
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        args.push("-p".to_string());
        match spec.host_port {
            Some(host_port) => args.push(format!("{host_port}:3000")),
            None => args.push(":3000".to_string()),
        }

        if let Some(network) = &spec.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for bind in &spec.mounts {
            args.push("-v".to_string());
            args.push(bind.clone());
        }

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(spec.image.clone());

        self.run_command(&args).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.run_command(&["start".to_string(), name.to_string()]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        let output = Command::new("podman")
            .args(["stop", "-t", &grace.as_secs().to_string(), name])
            .output()
            .await
            .context("failed to execute podman stop")?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_not_found(&stderr) {
            Ok(())
        } else {
            anyhow::bail!("podman stop failed: {}", stderr.trim())
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());

        let output = Command::new("podman")
            .args(&args)
            .output()
            .await
            .context("failed to execute podman rm")?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_not_found(&stderr) {
            Ok(())
        } else {
            anyhow::bail!("podman rm failed: {}", stderr.trim())
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        let format = "{{.Id}}|{{.Name}}|{{.State.Running}}|{{.State.ExitCode}}|{{range $p, $conf := .NetworkSettings.Ports}}{{range $conf}}{{.HostPort}}{{end}}{{end}}";
        let output = self
            .run_command(&[
                "inspect".to_string(),
                "--format".to_string(),
                format.to_string(),
                name.to_string(),
            ])
            .await?;

        let parts: Vec<&str> = output.split('|').collect();
        if parts.len() < 4 {
            anyhow::bail!("unexpected podman inspect output for '{name}'");
        }

        let running = parts[2] == "true";
        let exit_code = parts[3].parse::<i64>().ok();
        let host_port = parts.get(4).and_then(|s| s.parse::<u16>().ok());

        let labels = self.inspect_labels(name).await.unwrap_or_default();

        Ok(ContainerInfo {
            id: parts[0].to_string(),
            name: parts[1].trim_start_matches('/').to_string(),
            running,
            exit_code,
            host_port,
            labels,
        })
    }

    async fn list_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<ContainerInfo>> {
        let mut args = vec!["ps".to_string(), "--all".to_string()];
        for (key, value) in labels {
            args.push("--filter".to_string());
            args.push(format!("label={key}={value}"));
        }
        args.push("--format".to_string());
        args.push("{{.ID}}".to_string());

        let output = self.run_command(&args).await?;

        let mut result = Vec::new();
        for id in output.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(info) = self.inspect(id.trim()).await {
                result.push(info);
            }
        }

        Ok(result)
    }

    async fn is_available(&self) -> bool {
        Command::new("podman")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl PodmanRuntime {
    async fn inspect_labels(&self, name: &str) -> Result<HashMap<String, String>> {
        let output = self
            .run_command(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .Config.Labels}}".to_string(),
                name.to_string(),
            ])
            .await?;

        if output.trim().is_empty() || output.trim() == "null" {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&output).context("failed to parse podman label JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_not_found_matches_podman_error_text() {
        assert!(PodmanRuntime::is_not_found("Error: no such container foo"));
        assert!(!PodmanRuntime::is_not_found("Error: permission denied"));
    }
}
