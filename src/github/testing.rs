//! In-memory [`GitHubApi`] implementation for tests.
//!
//! Serves canned pull requests, reviews, check runs, and file contents, and
//! records every mutation so tests can assert on exactly what would have
//! hit the real API. Label mutations are applied to the stored PR so
//! idempotence tests observe converged state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::types::{PrNumber, RepoId, Sha};

use super::client::GitHubApi;
use super::error::ApiError;
use super::types::{CheckRun, CommitState, GitRef, NewPullRequest, PullRequest, User};

#[derive(Default)]
pub struct FakeGitHub {
    pulls: Mutex<HashMap<u64, PullRequest>>,
    reviews: Mutex<HashMap<u64, Vec<super::types::Review>>>,
    check_runs: Mutex<HashMap<String, Vec<CheckRun>>>,
    changed_files: Mutex<HashMap<u64, Vec<String>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,

    added_labels: Mutex<Vec<(u64, Vec<String>)>>,
    removed_labels: Mutex<Vec<(u64, String)>>,
    ensured_labels: Mutex<Vec<(String, String)>>,
    comments: Mutex<Vec<(u64, String)>>,
    requested_reviewers: Mutex<Vec<(u64, Vec<String>)>>,
    statuses: Mutex<Vec<(String, CommitState, String, String)>>,
    merged: Mutex<Vec<u64>>,
    created_pulls: Mutex<Vec<NewPullRequest>>,
    rerequested_checks: Mutex<Vec<u64>>,

    merge_failures: Mutex<Vec<ApiError>>,
    create_pull_failures: Mutex<Vec<ApiError>>,

    spend: AtomicU32,
}

/// A plausible open PR for tests to customize.
pub fn sample_pull(number: u64) -> PullRequest {
    PullRequest {
        number: PrNumber(number),
        state: "open".to_string(),
        title: "fix: quiet the flaky watcher test".to_string(),
        user: User {
            login: "author".to_string(),
        },
        head: GitRef {
            branch: "fix-watcher".to_string(),
            sha: Sha::new(format!("head{number}000000")),
        },
        base: GitRef {
            branch: "main".to_string(),
            sha: Sha::new("basesha000000"),
        },
        draft: false,
        merged: false,
        merge_commit_sha: None,
        mergeable: Some(true),
        labels: Vec::new(),
        additions: 5,
        deletions: 2,
    }
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull(self, pr: PullRequest) -> Self {
        self.put_pull(pr);
        self
    }

    pub fn put_pull(&self, pr: PullRequest) {
        self.pulls.lock().unwrap().insert(pr.number.0, pr);
    }

    pub fn pull(&self, number: u64) -> Option<PullRequest> {
        self.pulls.lock().unwrap().get(&number).cloned()
    }

    pub fn set_reviews(&self, number: u64, reviews: Vec<super::types::Review>) {
        self.reviews.lock().unwrap().insert(number, reviews);
    }

    pub fn set_check_runs(&self, sha: &Sha, runs: Vec<CheckRun>) {
        self.check_runs
            .lock()
            .unwrap()
            .insert(sha.as_str().to_string(), runs);
    }

    pub fn set_changed_files(&self, number: u64, files: Vec<String>) {
        self.changed_files.lock().unwrap().insert(number, files);
    }

    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }

    pub fn queue_merge_failure(&self, error: ApiError) {
        self.merge_failures.lock().unwrap().push(error);
    }

    pub fn queue_create_pull_failure(&self, error: ApiError) {
        self.create_pull_failures.lock().unwrap().push(error);
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }

    pub fn added_labels(&self) -> Vec<(u64, Vec<String>)> {
        self.added_labels.lock().unwrap().clone()
    }

    pub fn removed_labels(&self) -> Vec<(u64, String)> {
        self.removed_labels.lock().unwrap().clone()
    }

    pub fn ensured_labels(&self) -> Vec<(String, String)> {
        self.ensured_labels.lock().unwrap().clone()
    }

    pub fn requested_reviewers(&self) -> Vec<(u64, Vec<String>)> {
        self.requested_reviewers.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, CommitState, String, String)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn merged(&self) -> Vec<u64> {
        self.merged.lock().unwrap().clone()
    }

    pub fn created_pulls(&self) -> Vec<NewPullRequest> {
        self.created_pulls.lock().unwrap().clone()
    }

    pub fn rerequested_checks(&self) -> Vec<u64> {
        self.rerequested_checks.lock().unwrap().clone()
    }

    fn count(&self) {
        self.spend.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn get_pull(&self, _repo: &RepoId, number: PrNumber) -> Result<PullRequest, ApiError> {
        self.count();
        self.pulls
            .lock()
            .unwrap()
            .get(&number.0)
            .cloned()
            .ok_or_else(|| ApiError::permanent(format!("no such PR: {number}")))
    }

    async fn list_open_pulls(
        &self,
        _repo: &RepoId,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>, ApiError> {
        self.count();
        let pulls = self.pulls.lock().unwrap();
        let mut open: Vec<PullRequest> = pulls
            .values()
            .filter(|pr| pr.is_open())
            .filter(|pr| base.is_none_or(|b| pr.base.branch == b))
            .cloned()
            .collect();
        open.sort_by_key(|pr| pr.number.0);
        Ok(open)
    }

    async fn list_reviews(
        &self,
        _repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<super::types::Review>, ApiError> {
        self.count();
        Ok(self
            .reviews
            .lock()
            .unwrap()
            .get(&number.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_check_runs(&self, _repo: &RepoId, sha: &Sha) -> Result<Vec<CheckRun>, ApiError> {
        self.count();
        Ok(self
            .check_runs
            .lock()
            .unwrap()
            .get(sha.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn list_changed_files(
        &self,
        _repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<String>, ApiError> {
        self.count();
        Ok(self
            .changed_files
            .lock()
            .unwrap()
            .get(&number.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_labels(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        labels: &[String],
    ) -> Result<(), ApiError> {
        if labels.is_empty() {
            return Ok(());
        }
        self.count();
        self.added_labels
            .lock()
            .unwrap()
            .push((number.0, labels.to_vec()));
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(&number.0) {
            for label in labels {
                if !pr.labels.iter().any(|l| &l.name == label) {
                    pr.labels.push(super::types::Label {
                        name: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn remove_label(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        label: &str,
    ) -> Result<(), ApiError> {
        self.count();
        self.removed_labels
            .lock()
            .unwrap()
            .push((number.0, label.to_string()));
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(&number.0) {
            pr.labels.retain(|l| l.name != label);
        }
        Ok(())
    }

    async fn ensure_label(&self, _repo: &RepoId, name: &str, color: &str) -> Result<(), ApiError> {
        self.count();
        self.ensured_labels
            .lock()
            .unwrap()
            .push((name.to_string(), color.to_string()));
        Ok(())
    }

    async fn post_comment(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<(), ApiError> {
        self.count();
        self.comments
            .lock()
            .unwrap()
            .push((number.0, body.to_string()));
        Ok(())
    }

    async fn request_reviewers(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        reviewers: &[String],
    ) -> Result<(), ApiError> {
        self.count();
        self.requested_reviewers
            .lock()
            .unwrap()
            .push((number.0, reviewers.to_vec()));
        Ok(())
    }

    async fn set_commit_status(
        &self,
        _repo: &RepoId,
        sha: &Sha,
        state: CommitState,
        context: &str,
        description: &str,
    ) -> Result<(), ApiError> {
        self.count();
        self.statuses.lock().unwrap().push((
            sha.as_str().to_string(),
            state,
            context.to_string(),
            description.to_string(),
        ));
        Ok(())
    }

    async fn merge_pull(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        _head_sha: &Sha,
    ) -> Result<(), ApiError> {
        if let Some(error) = self.merge_failures.lock().unwrap().pop() {
            return Err(error);
        }
        self.count();
        self.merged.lock().unwrap().push(number.0);
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(&number.0) {
            pr.merged = true;
            pr.state = "closed".to_string();
        }
        Ok(())
    }

    async fn fetch_contents(
        &self,
        _repo: &RepoId,
        path: &str,
        _git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ApiError> {
        self.count();
        Ok(self.contents.lock().unwrap().get(path).cloned())
    }

    async fn create_pull(
        &self,
        _repo: &RepoId,
        new: &NewPullRequest,
    ) -> Result<PullRequest, ApiError> {
        if let Some(error) = self.create_pull_failures.lock().unwrap().pop() {
            return Err(error);
        }
        self.count();
        let mut created = self.created_pulls.lock().unwrap();
        created.push(new.clone());
        let number = 1000 + created.len() as u64;
        let mut pr = sample_pull(number);
        pr.title = new.title.clone();
        pr.head.branch = new.head.clone();
        pr.base.branch = new.base.clone();
        self.pulls.lock().unwrap().insert(number, pr.clone());
        Ok(pr)
    }

    async fn rerequest_check(&self, _repo: &RepoId, check_run_id: u64) -> Result<(), ApiError> {
        self.count();
        self.rerequested_checks.lock().unwrap().push(check_run_id);
        Ok(())
    }

    fn spend(&self) -> u32 {
        self.spend.load(Ordering::Relaxed)
    }
}
