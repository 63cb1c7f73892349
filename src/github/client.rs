//! GitHub REST client backed by the credential pool.
//!
//! Every request checks a credential out of the pool, observes the
//! `x-ratelimit-*` response headers to keep the pool's budgets current, and
//! rotates to another credential when the current one reports exhaustion.
//! Rotation is bounded; once it runs out the call fails with a rate-limit
//! error and recovery is left to webhook redelivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Method, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::credentials::{CredentialPool, PoolError};
use crate::types::{PrNumber, RepoId, Sha};

use super::error::{ApiError, ApiErrorKind};
use super::types::{CheckRun, CommitState, NewPullRequest, PullRequest, Review};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("repo-warden/", env!("CARGO_PKG_VERSION"));
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// The slice of the GitHub API the handlers use. Implemented over HTTP in
/// production and by an in-memory fake in tests.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_pull(&self, repo: &RepoId, number: PrNumber) -> Result<PullRequest, ApiError>;

    /// Open PRs, optionally filtered by base branch.
    async fn list_open_pulls(
        &self,
        repo: &RepoId,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>, ApiError>;

    async fn list_reviews(&self, repo: &RepoId, number: PrNumber)
        -> Result<Vec<Review>, ApiError>;

    async fn list_check_runs(&self, repo: &RepoId, sha: &Sha) -> Result<Vec<CheckRun>, ApiError>;

    async fn list_changed_files(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<String>, ApiError>;

    async fn add_labels(
        &self,
        repo: &RepoId,
        number: PrNumber,
        labels: &[String],
    ) -> Result<(), ApiError>;

    /// Removing a label the PR does not carry is a no-op, not an error.
    async fn remove_label(
        &self,
        repo: &RepoId,
        number: PrNumber,
        label: &str,
    ) -> Result<(), ApiError>;

    /// Creates the label in the repository if it does not exist yet.
    async fn ensure_label(&self, repo: &RepoId, name: &str, color: &str) -> Result<(), ApiError>;

    async fn post_comment(
        &self,
        repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<(), ApiError>;

    async fn request_reviewers(
        &self,
        repo: &RepoId,
        number: PrNumber,
        reviewers: &[String],
    ) -> Result<(), ApiError>;

    async fn set_commit_status(
        &self,
        repo: &RepoId,
        sha: &Sha,
        state: CommitState,
        context: &str,
        description: &str,
    ) -> Result<(), ApiError>;

    /// Merges with a head-SHA guard so a racing push fails the merge
    /// instead of merging unreviewed commits.
    async fn merge_pull(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> Result<(), ApiError>;

    /// Fetches a file's raw contents at a ref; `Ok(None)` when absent.
    async fn fetch_contents(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ApiError>;

    async fn create_pull(
        &self,
        repo: &RepoId,
        new: &NewPullRequest,
    ) -> Result<PullRequest, ApiError>;

    async fn rerequest_check(&self, repo: &RepoId, check_run_id: u64) -> Result<(), ApiError>;

    /// Successful authenticated calls made through this instance.
    fn spend(&self) -> u32;
}

/// Production [`GitHubApi`] over reqwest.
pub struct HttpGitHub {
    http: reqwest::Client,
    pool: Arc<CredentialPool>,
    base_url: String,
    spend: AtomicU32,
}

impl HttpGitHub {
    pub fn new(pool: Arc<CredentialPool>) -> Result<Self, ApiError> {
        Self::with_base_url(pool, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        pool: Arc<CredentialPool>,
        base_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpGitHub {
            http,
            pool,
            base_url: base_url.into(),
            spend: AtomicU32::new(0),
        })
    }

    /// A handle sharing the connection pool and credentials but with a
    /// fresh spend counter, for per-delivery accounting.
    pub fn for_delivery(&self) -> HttpGitHub {
        HttpGitHub {
            http: self.http.clone(),
            pool: self.pool.clone(),
            base_url: self.base_url.clone(),
            spend: AtomicU32::new(0),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        accept: &'static str,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut rotations = 0;

        loop {
            let lease = self.pool.acquire(1).await.map_err(|e| {
                let PoolError::RateLimited { reset_at } = e;
                ApiError::rate_limited(reset_at, "credential pool exhausted")
            })?;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bearer {}", lease.token()))
                .header(ACCEPT, accept);
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ApiError::from_network(&e))?;

            let (remaining, reset_at) = rate_limit_headers(response.headers());
            if let Some(remaining) = remaining {
                self.pool.report(&lease, remaining, reset_at).await;
            }

            let status = response.status();
            if status.is_success() {
                self.spend.fetch_add(1, Ordering::Relaxed);
                return Ok(response);
            }

            let text = response.text().await.unwrap_or_default();
            let error = ApiError::from_status(status.as_u16(), &text);
            if let ApiErrorKind::RateLimited { .. } = error.kind {
                self.pool.mark_exhausted(&lease, reset_at).await;
                rotations += 1;
                if rotations > self.pool.max_rotations() {
                    return Err(ApiError::rate_limited(reset_at, "credential rotations exhausted"));
                }
                debug!(%url, rotations, "credential exhausted, rotating");
                continue;
            }
            return Err(error);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, None, JSON_MEDIA_TYPE).await?;
        decode(response).await
    }
}

#[async_trait]
impl GitHubApi for HttpGitHub {
    async fn get_pull(&self, repo: &RepoId, number: PrNumber) -> Result<PullRequest, ApiError> {
        self.get_json(&format!(
            "/repos/{}/{}/pulls/{}",
            repo.owner, repo.repo, number.0
        ))
        .await
    }

    async fn list_open_pulls(
        &self,
        repo: &RepoId,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>, ApiError> {
        let mut path = format!(
            "/repos/{}/{}/pulls?state=open&per_page=100",
            repo.owner, repo.repo
        );
        if let Some(base) = base {
            path.push_str(&format!("&base={}", encode_segment(base)));
        }
        self.get_json(&path).await
    }

    async fn list_reviews(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<Review>, ApiError> {
        self.get_json(&format!(
            "/repos/{}/{}/pulls/{}/reviews?per_page=100",
            repo.owner, repo.repo, number.0
        ))
        .await
    }

    async fn list_check_runs(&self, repo: &RepoId, sha: &Sha) -> Result<Vec<CheckRun>, ApiError> {
        #[derive(Deserialize)]
        struct CheckRunList {
            check_runs: Vec<CheckRun>,
        }
        let list: CheckRunList = self
            .get_json(&format!(
                "/repos/{}/{}/commits/{}/check-runs?per_page=100",
                repo.owner,
                repo.repo,
                sha.as_str()
            ))
            .await?;
        Ok(list.check_runs)
    }

    async fn list_changed_files(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<String>, ApiError> {
        #[derive(Deserialize)]
        struct ChangedFile {
            filename: String,
        }
        let files: Vec<ChangedFile> = self
            .get_json(&format!(
                "/repos/{}/{}/pulls/{}/files?per_page=100",
                repo.owner, repo.repo, number.0
            ))
            .await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    async fn add_labels(
        &self,
        repo: &RepoId,
        number: PrNumber,
        labels: &[String],
    ) -> Result<(), ApiError> {
        if labels.is_empty() {
            return Ok(());
        }
        self.send(
            Method::POST,
            &format!("/repos/{}/{}/issues/{}/labels", repo.owner, repo.repo, number.0),
            Some(json!({ "labels": labels })),
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    async fn remove_label(
        &self,
        repo: &RepoId,
        number: PrNumber,
        label: &str,
    ) -> Result<(), ApiError> {
        let result = self
            .send(
                Method::DELETE,
                &format!(
                    "/repos/{}/{}/issues/{}/labels/{}",
                    repo.owner,
                    repo.repo,
                    number.0,
                    encode_segment(label)
                ),
                None,
                JSON_MEDIA_TYPE,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // The label was already absent.
            Err(e) if e.status == Some(404) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_label(&self, repo: &RepoId, name: &str, color: &str) -> Result<(), ApiError> {
        let result = self
            .send(
                Method::POST,
                &format!("/repos/{}/{}/labels", repo.owner, repo.repo),
                Some(json!({ "name": name, "color": color })),
                JSON_MEDIA_TYPE,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // 422 means the label already exists.
            Err(e) if e.status == Some(422) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn post_comment(
        &self,
        repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<(), ApiError> {
        self.send(
            Method::POST,
            &format!(
                "/repos/{}/{}/issues/{}/comments",
                repo.owner, repo.repo, number.0
            ),
            Some(json!({ "body": body })),
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    async fn request_reviewers(
        &self,
        repo: &RepoId,
        number: PrNumber,
        reviewers: &[String],
    ) -> Result<(), ApiError> {
        if reviewers.is_empty() {
            return Ok(());
        }
        self.send(
            Method::POST,
            &format!(
                "/repos/{}/{}/pulls/{}/requested_reviewers",
                repo.owner, repo.repo, number.0
            ),
            Some(json!({ "reviewers": reviewers })),
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    async fn set_commit_status(
        &self,
        repo: &RepoId,
        sha: &Sha,
        state: CommitState,
        context: &str,
        description: &str,
    ) -> Result<(), ApiError> {
        self.send(
            Method::POST,
            &format!(
                "/repos/{}/{}/statuses/{}",
                repo.owner,
                repo.repo,
                sha.as_str()
            ),
            Some(json!({
                "state": state,
                "context": context,
                "description": description,
            })),
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    async fn merge_pull(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> Result<(), ApiError> {
        self.send(
            Method::PUT,
            &format!(
                "/repos/{}/{}/pulls/{}/merge",
                repo.owner, repo.repo, number.0
            ),
            Some(json!({ "sha": head_sha.as_str(), "merge_method": "merge" })),
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    async fn fetch_contents(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ApiError> {
        let encoded: Vec<String> = path.split('/').map(encode_segment).collect();
        let result = self
            .send(
                Method::GET,
                &format!(
                    "/repos/{}/{}/contents/{}?ref={}",
                    repo.owner,
                    repo.repo,
                    encoded.join("/"),
                    encode_segment(git_ref)
                ),
                None,
                RAW_MEDIA_TYPE,
            )
            .await;
        match result {
            Ok(response) => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from_network(&e))?;
                Ok(Some(bytes.to_vec()))
            }
            Err(e) if e.status == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_pull(
        &self,
        repo: &RepoId,
        new: &NewPullRequest,
    ) -> Result<PullRequest, ApiError> {
        let body = serde_json::to_value(new)
            .map_err(|e| ApiError::permanent(format!("failed to encode request: {e}")))?;
        let response = self
            .send(
                Method::POST,
                &format!("/repos/{}/{}/pulls", repo.owner, repo.repo),
                Some(body),
                JSON_MEDIA_TYPE,
            )
            .await?;
        decode(response).await
    }

    async fn rerequest_check(&self, repo: &RepoId, check_run_id: u64) -> Result<(), ApiError> {
        self.send(
            Method::POST,
            &format!(
                "/repos/{}/{}/check-runs/{}/rerequest",
                repo.owner, repo.repo, check_run_id
            ),
            None,
            JSON_MEDIA_TYPE,
        )
        .await?;
        Ok(())
    }

    fn spend(&self) -> u32 {
        self.spend.load(Ordering::Relaxed)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json()
        .await
        .map_err(|e| ApiError::permanent(format!("invalid response body: {e}")))
}

/// Reads the observed budget out of `x-ratelimit-remaining` /
/// `x-ratelimit-reset` (the latter a unix timestamp).
fn rate_limit_headers(headers: &HeaderMap) -> (Option<u32>, Option<DateTime<Utc>>) {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    (remaining, reset_at)
}

/// Percent-encodes one URL path segment.
fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
