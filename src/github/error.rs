//! GitHub API error types.
//!
//! Errors are categorized for retry decisions:
//!
//! - **Transient** errors are retriable with backoff (5xx, network failures,
//!   a few known GitHub propagation-delay messages)
//! - **Permanent** errors require human intervention (most 4xx, merge
//!   conflicts, auth failures)
//! - **RateLimited** errors are handled by credential rotation, not backoff;
//!   they surface only once the whole pool is exhausted

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Transient error, safe to retry with backoff.
    Transient,

    /// Permanent error, retrying will not help.
    Permanent,

    /// Rate limit exhausted. Carries the reset time when the API reported
    /// one. Recovery is credential rotation, then webhook redelivery.
    RateLimited { reset_at: Option<DateTime<Utc>> },
}

impl ApiErrorKind {
    /// Whether backoff-retry is worthwhile. Rate limits return false: the
    /// credential pool already rotated before this error surfaced.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct ApiError {
    pub kind: ApiErrorKind,

    /// The HTTP status code, if the request got far enough to have one.
    pub status: Option<u16>,

    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    pub fn rate_limited(reset_at: Option<DateTime<Utc>>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::RateLimited { reset_at },
            status: Some(429),
            message: message.into(),
        }
    }

    /// Categorizes a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            429 => ApiErrorKind::RateLimited { reset_at: None },
            403 if is_rate_limit_message(body) => ApiErrorKind::RateLimited { reset_at: None },
            500..=599 => ApiErrorKind::Transient,
            _ if is_transient_message(body) => ApiErrorKind::Transient,
            _ => ApiErrorKind::Permanent,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate(body),
        }
    }

    /// Categorizes a request that never produced a response.
    pub fn from_network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Permanent
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// Whether a 403 body indicates rate limiting rather than permissions.
fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit")
        || message.contains("api rate")
        || message.contains("secondary rate")
        || message.contains("abuse detection")
}

/// Known GitHub API quirks that resolve with retries.
fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    (message.contains("required status check") && message.contains("expected"))
        || message.contains("base branch was modified")
        || message.contains("try again")
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let end = (0..=LIMIT).rev().find(|i| body.is_char_boundary(*i));
        format!("{}...", &body[..end.unwrap_or(0)])
    }
}
