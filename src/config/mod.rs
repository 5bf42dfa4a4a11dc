//! Process-wide configuration (C1): loaded once at startup, immutable
//! thereafter, and threaded through every component as `Arc<OrchestratorConfig>`
//! rather than read from ambient global state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Strategy used by the Router Adapter (C2) to expose a running preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    Port,
    Proxy,
}

/// Container engine selection for the Container Driver (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Docker,
    Podman,
    Auto,
}

impl Default for RuntimeType {
    fn default() -> Self {
        RuntimeType::Auto
    }
}

/// Container-engine connection settings, split out so it can be handed
/// to `runtime::detect_runtime` on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime_type: RuntimeType,
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::Auto,
            docker_socket: default_docker_socket(),
        }
    }
}

fn default_preview_health_path() -> String {
    "/".to_string()
}

fn default_session_branch_prefix() -> String {
    "kosuke/chat-".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

/// Process-wide immutable configuration (§4.1). Every field here is a
/// required option per the spec's options table except the two that carry
/// an explicit, unambiguous default.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub bun_preview_image: String,
    pub python_preview_image: String,

    pub port_range_start: u16,
    pub port_range_end: u16,

    pub router_mode: RouterMode,
    #[serde(default)]
    pub preview_base_domain: String,

    pub preview_network: String,
    pub preview_resource_prefix: String,

    #[serde(default = "default_preview_health_path")]
    pub preview_health_path: String,

    pub host_workspace_dir: String,
    pub projects_base_path: String,

    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_password: String,

    #[serde(default = "default_session_branch_prefix")]
    pub session_branch_prefix: String,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Where the control-plane SQLite store lives.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl OrchestratorConfig {
    /// Load from a TOML file at `path`; fail fast naming every missing
    /// required key rather than stopping at the first one.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            anyhow::bail!(
                "config file not found at {path}; this orchestrator has no built-in defaults \
                 for image references, ports, or database credentials"
            );
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;

        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path}"))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.bun_preview_image.trim().is_empty() {
            missing.push("bun_preview_image");
        }
        if self.python_preview_image.trim().is_empty() {
            missing.push("python_preview_image");
        }
        if self.router_mode == RouterMode::Proxy && self.preview_base_domain.trim().is_empty() {
            missing.push("preview_base_domain");
        }
        if self.preview_network.trim().is_empty() {
            missing.push("preview_network");
        }
        if self.preview_resource_prefix.trim().is_empty() {
            missing.push("preview_resource_prefix");
        }
        if self.host_workspace_dir.trim().is_empty() {
            missing.push("host_workspace_dir");
        }
        if self.projects_base_path.trim().is_empty() {
            missing.push("projects_base_path");
        }
        if self.postgres_host.trim().is_empty() {
            missing.push("postgres_host");
        }
        if self.postgres_db.trim().is_empty() {
            missing.push("postgres_db");
        }
        if self.postgres_user.trim().is_empty() {
            missing.push("postgres_user");
        }

        if !missing.is_empty() {
            anyhow::bail!("missing required configuration keys: {}", missing.join(", "));
        }

        if self.port_range_start > self.port_range_end {
            anyhow::bail!(
                "port_range_start ({}) must be <= port_range_end ({})",
                self.port_range_start,
                self.port_range_end
            );
        }

        Ok(())
    }
}

/// Sanitize a session id / resource fragment: lowercased, non-alphanumerics
/// collapsed to single hyphens, truncated, and stripped of leading/trailing
/// hyphens. Used by every derived name below.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let lowered = input.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_hyphen = false;

    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }

    let trimmed = out.trim_matches('-');
    let truncated: String = trimmed.chars().take(max_len).collect();
    truncated.trim_matches('-').to_string()
}

/// `container_name(project_id, session_id) = prefix + "-" + project_id + "-" + sanitize(session_id)`
pub fn container_name(prefix: &str, project_id: &str, session_id: &str) -> String {
    format!("{}-{}-{}", prefix, project_id, sanitize(session_id, 20))
}

/// `db_name(project_id, session_id)`, lowercased with hyphens stripped,
/// validated against the Postgres identifier rule and the 63-char limit.
pub fn db_name(project_id: &str, session_id: &str) -> Result<String> {
    let raw = format!("kosuke_preview_{}_{}", project_id, session_id);
    let lowered = raw.to_lowercase();
    let stripped: String = lowered.chars().filter(|c| *c != '-').collect();

    validate_identifier(&stripped)?;
    Ok(stripped)
}

/// `branch_name(session_id) = session_branch_prefix + session_id`
pub fn branch_name(prefix: &str, session_id: &str) -> String {
    format!("{}{}", prefix, session_id)
}

/// Validates a Postgres-style identifier: `^[a-zA-Z_][a-zA-Z0-9_-]*$`, ≤63 chars.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        anyhow::bail!("identifier '{}' must be 1-63 characters", name);
    }

    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        anyhow::bail!("identifier '{}' must start with a letter or underscore", name);
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        anyhow::bail!("identifier '{}' contains invalid characters", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_collapses_non_alphanumerics() {
        assert_eq!(sanitize("Kosuke-Chat_XYZ!!", 20), "kosuke-chat-xyz");
    }

    #[test]
    fn sanitize_truncates_long_inputs() {
        let long = "a".repeat(50);
        let out = sanitize(&long, 20);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn sanitize_strips_leading_and_trailing_hyphens_after_truncation() {
        let input = "--abc--";
        assert_eq!(sanitize(input, 20), "abc");
    }

    #[test]
    fn container_name_is_pure_and_deterministic() {
        let a = container_name("kp", "7", "kosuke-chat-abc123");
        let b = container_name("kp", "7", "kosuke-chat-abc123");
        assert_eq!(a, b);
        assert_eq!(a, "kp-7-kosuke-chat-abc123");
    }

    #[test]
    fn db_name_strips_hyphens_and_validates() {
        let name = db_name("7", "kosuke-chat-abc123").unwrap();
        assert_eq!(name, "kosuke_preview_7_kosukechatabc123");
        assert!(validate_identifier(&name).is_ok());
    }

    #[test]
    fn db_name_rejects_overlong_identifiers() {
        let long_session = "x".repeat(80);
        let err = db_name("7", &long_session).unwrap_err();
        assert!(err.to_string().contains("63"));
    }

    #[test]
    fn branch_name_is_prefix_plus_session_id() {
        assert_eq!(
            branch_name("kosuke/chat-", "abc123"),
            "kosuke/chat-abc123"
        );
    }

    #[test]
    fn validate_identifier_rejects_leading_digit() {
        assert!(validate_identifier("1abc").is_err());
    }
}
