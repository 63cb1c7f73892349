//! Point-in-time snapshot of everything the state machine reads about a PR.
//!
//! A snapshot is fetched fresh for every delivery; evaluation is a pure
//! function of the snapshot, so processing the same delivery twice converges
//! to the same result.

use std::collections::{BTreeSet, HashMap};

use crate::github::types::{CheckRun, PullRequest, Review};
use crate::github::{ApiError, GitHubApi};
use crate::types::{PrNumber, RepoId, Sha};

#[derive(Debug, Clone)]
pub struct PrSnapshot {
    pub repo: RepoId,
    pub number: PrNumber,
    pub title: String,
    pub author: String,
    pub is_open: bool,
    pub merged: bool,
    pub draft: bool,
    pub head_sha: Sha,
    pub base_branch: String,
    pub merge_commit_sha: Option<Sha>,
    /// `None` while GitHub is still computing mergeability.
    pub mergeable: Option<bool>,
    pub changed_lines: u64,
    pub current_labels: BTreeSet<String>,
    /// Logins whose latest review approves the current head commit.
    pub approvals: BTreeSet<String>,
    pub check_runs: Vec<CheckRun>,
    pub changed_files: Vec<String>,
}

impl PrSnapshot {
    /// Fetches a fresh snapshot via the API.
    pub async fn fetch(
        gh: &dyn GitHubApi,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Self, ApiError> {
        let pull = gh.get_pull(repo, number).await?;
        let reviews = gh.list_reviews(repo, number).await?;
        let check_runs = gh.list_check_runs(repo, &pull.head.sha).await?;
        let changed_files = gh.list_changed_files(repo, number).await?;
        Ok(Self::from_parts(
            repo.clone(),
            pull,
            reviews,
            check_runs,
            changed_files,
        ))
    }

    /// Assembles a snapshot from already-fetched pieces.
    pub fn from_parts(
        repo: RepoId,
        pull: PullRequest,
        reviews: Vec<Review>,
        check_runs: Vec<CheckRun>,
        changed_files: Vec<String>,
    ) -> Self {
        let approvals = valid_approvals(&reviews, &pull.head.sha);
        PrSnapshot {
            repo,
            number: pull.number,
            title: pull.title,
            author: pull.user.login,
            is_open: pull.state == "open",
            merged: pull.merged,
            draft: pull.draft,
            head_sha: pull.head.sha,
            base_branch: pull.base.branch,
            merge_commit_sha: pull.merge_commit_sha,
            mergeable: pull.mergeable,
            changed_lines: pull.additions + pull.deletions,
            current_labels: pull.labels.into_iter().map(|l| l.name).collect(),
            approvals,
            check_runs,
            changed_files,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.current_labels.contains(label)
    }
}

/// Latest review per login, counted only when it approves the current head.
/// A push invalidates earlier approvals because their `commit_id` no longer
/// matches.
fn valid_approvals(reviews: &[Review], head_sha: &Sha) -> BTreeSet<String> {
    let mut latest: HashMap<&str, &Review> = HashMap::new();
    for review in reviews {
        // Plain comments neither grant nor revoke approval.
        if review.state == "COMMENTED" {
            continue;
        }
        latest.insert(review.user.login.as_str(), review);
    }
    latest
        .into_values()
        .filter(|r| r.state == "APPROVED" && r.commit_id == *head_sha)
        .map(|r| r.user.login.clone())
        .collect()
}
