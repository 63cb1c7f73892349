//! Server configuration loaded from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from environment parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Process-level settings, distinct from the per-repository policy document.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Webhook HMAC secret. `None` disables signature verification
    /// (local development only).
    pub webhook_secret: Option<String>,

    /// API tokens for the credential pool.
    pub tokens: Vec<String>,

    /// Maximum deliveries processed in parallel across all entity keys.
    pub max_workers: usize,

    /// Per-entity-key queue depth; deliveries beyond it are rejected 503.
    pub backlog: usize,

    /// Wall-clock budget for processing one delivery.
    pub delivery_timeout: Duration,

    /// Idle time after which a per-key worker exits.
    pub idle_timeout: Duration,

    /// Source CIDR ranges; empty disables IP allowlisting.
    pub allowed_ranges: Vec<String>,

    /// Honor `x-forwarded-for` when allowlisting (behind a trusted proxy).
    pub trust_forwarded_header: bool,

    /// Work directory for cherry-pick clones.
    pub git_work_dir: PathBuf,

    /// Committer identity for cherry-pick commits.
    pub git_name: String,
    pub git_email: String,

    /// Path of the policy document.
    pub config_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, EnvError> {
        let bind_addr = optional("REPO_WARDEN_BIND")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_addr: SocketAddr = bind_addr.parse().map_err(|_| EnvError::Invalid {
            name: "REPO_WARDEN_BIND",
            value: bind_addr.clone(),
        })?;

        let tokens: Vec<String> = required("REPO_WARDEN_TOKENS")?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(EnvError::Invalid {
                name: "REPO_WARDEN_TOKENS",
                value: String::new(),
            });
        }

        Ok(ServerConfig {
            bind_addr,
            webhook_secret: optional("REPO_WARDEN_WEBHOOK_SECRET"),
            tokens,
            max_workers: parse_or("REPO_WARDEN_MAX_WORKERS", 16)?,
            backlog: parse_or("REPO_WARDEN_BACKLOG", 64)?,
            delivery_timeout: Duration::from_secs(parse_or(
                "REPO_WARDEN_DELIVERY_TIMEOUT_SECS",
                120,
            )?),
            idle_timeout: Duration::from_secs(parse_or("REPO_WARDEN_IDLE_TIMEOUT_SECS", 300)?),
            allowed_ranges: optional("REPO_WARDEN_ALLOWED_RANGES")
                .map(|v| {
                    v.split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            trust_forwarded_header: optional("REPO_WARDEN_TRUST_FORWARDED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            git_work_dir: optional("REPO_WARDEN_GIT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/repo-warden/repos")),
            git_name: optional("REPO_WARDEN_GIT_NAME")
                .unwrap_or_else(|| "repo-warden".to_string()),
            git_email: optional("REPO_WARDEN_GIT_EMAIL")
                .unwrap_or_else(|| "repo-warden@localhost".to_string()),
            config_path: optional("REPO_WARDEN_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("repo-warden.yaml")),
        })
    }
}

fn required(name: &'static str) -> Result<String, EnvError> {
    std::env::var(name).map_err(|_| EnvError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, EnvError> {
    match optional(name) {
        Some(value) => value.parse().map_err(|_| EnvError::Invalid { name, value }),
        None => Ok(default),
    }
}
