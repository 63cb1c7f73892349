//! GitHub API access.
//!
//! This module provides the HTTP client the handlers speak through, with:
//! - Credential rotation against the shared pool on rate-limit responses
//! - Transient/permanent error categorization plus exponential backoff
//! - Wire types for the slice of the REST API the state machine reads

mod client;
mod error;
mod retry;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use client::{DEFAULT_BASE_URL, GitHubApi, HttpGitHub};
pub use error::{ApiError, ApiErrorKind};
pub use retry::{RetryConfig, retry_with_backoff};
