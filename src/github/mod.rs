//! GitHub API client used by the Git Operator and Session Manager for
//! head-branch/PR lookups. Authentication is a caller-supplied token
//! (personal access token or installation token) — this crate never
//! mints or stores tokens itself.

pub mod api_client;

pub use api_client::GitHubClient;
