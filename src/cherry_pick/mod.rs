//! Cherry-pick orchestration for merged pull requests.
//!
//! When a tracked PR merges, its merge commit is replayed onto each target
//! branch (the configured tracked branches plus any branches requested by
//! `/cherry-pick` commands). Targets are processed sequentially and
//! independently: a conflict on one branch is reported as a comment on the
//! source PR and does not stop the remaining branches.

mod git;

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EffectiveConfig;
use crate::engine::{PrSnapshot, VERIFIED_LABEL};
use crate::github::GitHubApi;
use crate::github::types::NewPullRequest;
use crate::types::{PrNumber, RepoId, Sha};

pub use git::LocalGit;

/// Errors from replaying a commit onto a branch.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The commit does not apply cleanly to the target branch.
    #[error("cherry-pick onto {branch} hit conflicts:\n{details}")]
    Conflict { branch: String, details: String },

    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("no usable credential for git: {0}")]
    Auth(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Replays a commit onto a target branch and publishes the result as a
/// branch named by [`branch_name`]. Implemented by [`LocalGit`] in
/// production and by fakes in tests.
#[async_trait]
pub trait BranchReplayer: Send + Sync {
    /// Returns the name of the pushed branch.
    async fn replay(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        sha: &Sha,
        target: &str,
    ) -> Result<String, ReplayError>;
}

/// Branch holding the replayed commit for one PR/target pair.
pub fn branch_name(pr: PrNumber, target: &str) -> String {
    format!("cherry-pick-{}-{}", pr.0, target)
}

/// Prefix of the labels recording `/cherry-pick` requests on open PRs.
///
/// The label is the persistence mechanism: requests survive restarts
/// because they live on the PR itself until it merges.
pub const LABEL_PREFIX: &str = "cherry-pick/";

/// Target branches requested via [`LABEL_PREFIX`] labels.
pub fn requested_from_labels(labels: &BTreeSet<String>) -> Vec<String> {
    labels
        .iter()
        .filter_map(|l| l.strip_prefix(LABEL_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Tracked branches first, then explicit requests, without duplicates.
pub fn merge_targets(config: &EffectiveConfig, requested: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    config
        .tracked_cherry_pick_branches
        .iter()
        .chain(requested)
        .filter(|b| seen.insert(b.as_str().to_string()))
        .cloned()
        .collect()
}

/// What happened for each target branch.
#[derive(Debug, Default)]
pub struct CherryPickOutcome {
    /// Target branch and the PR opened for it.
    pub opened: Vec<(String, PrNumber)>,
    /// Target branch and the failure reported for it.
    pub failed: Vec<(String, String)>,
}

/// Replays the snapshot's merge commit onto each target, opening a PR per
/// clean replay and commenting on the source PR for each failure.
///
/// Failures are per-target: the remaining branches still run. Comment
/// delivery failures are logged and swallowed so a flaky comment cannot
/// mask the replay results.
pub async fn run(
    gh: &dyn GitHubApi,
    replayer: &dyn BranchReplayer,
    snapshot: &PrSnapshot,
    config: &EffectiveConfig,
    targets: &[String],
) -> CherryPickOutcome {
    let mut outcome = CherryPickOutcome::default();
    if targets.is_empty() {
        return outcome;
    }

    let Some(merge_sha) = &snapshot.merge_commit_sha else {
        let reason = "the merge commit is not known yet".to_string();
        comment_failure(gh, snapshot, "all targets", &reason).await;
        for target in targets {
            outcome.failed.push((target.clone(), reason.clone()));
        }
        return outcome;
    };

    for target in targets {
        match replay_one(gh, replayer, snapshot, config, merge_sha, target).await {
            Ok(number) => {
                info!(pr = %snapshot.number, %target, opened = %number, "cherry-pick opened");
                outcome.opened.push((target.clone(), number));
            }
            Err(reason) => {
                warn!(pr = %snapshot.number, %target, %reason, "cherry-pick failed");
                comment_failure(gh, snapshot, target, &reason).await;
                outcome.failed.push((target.clone(), reason));
            }
        }
    }
    outcome
}

async fn replay_one(
    gh: &dyn GitHubApi,
    replayer: &dyn BranchReplayer,
    snapshot: &PrSnapshot,
    config: &EffectiveConfig,
    merge_sha: &Sha,
    target: &str,
) -> Result<PrNumber, String> {
    let branch = replayer
        .replay(&snapshot.repo, snapshot.number, merge_sha, target)
        .await
        .map_err(|e| e.to_string())?;

    let new = NewPullRequest {
        title: format!("[{target}] {}", snapshot.title),
        head: branch,
        base: target.to_string(),
        body: format!(
            "Automated cherry-pick of #{} to `{target}`.",
            snapshot.number
        ),
    };
    let created = gh
        .create_pull(&snapshot.repo, &new)
        .await
        .map_err(|e| e.to_string())?;

    if config.auto_verify_cherry_picked_prs {
        gh.add_labels(
            &snapshot.repo,
            created.number,
            &[VERIFIED_LABEL.to_string()],
        )
        .await
        .map_err(|e| e.to_string())?;
    }

    Ok(created.number)
}

async fn comment_failure(gh: &dyn GitHubApi, snapshot: &PrSnapshot, target: &str, reason: &str) {
    let body = format!(
        "Cherry-pick of #{} to `{target}` failed:\n\n```\n{reason}\n```",
        snapshot.number
    );
    if let Err(error) = gh.post_comment(&snapshot.repo, snapshot.number, &body).await {
        warn!(pr = %snapshot.number, %error, "failed to report cherry-pick failure");
    }
}
