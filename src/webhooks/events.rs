//! Typed webhook event representations.
//!
//! Each variant carries only the fields needed for routing and handling;
//! everything else about the PR is refetched from the API at processing time
//! so derived state is always computed from ground truth.
//!
//! Unknown event types are first-class: they parse to [`Event::Unknown`] and
//! take a no-op path instead of being rejected, keeping ingress
//! forward-compatible with GitHub's event catalogue.

use serde::{Deserialize, Serialize};

use crate::types::{CommentId, EntityKey, PrNumber, RepoId, Sha};

/// A parsed webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A pull request was opened, closed, edited, or synchronized.
    PullRequest(PullRequestEvent),

    /// An issue or PR comment was created, edited, or deleted.
    ///
    /// PR conversation comments arrive as `issue_comment` events; this is
    /// where `/command` lines appear.
    IssueComment(IssueCommentEvent),

    /// A pull request review was submitted, edited, or dismissed.
    Review(ReviewEvent),

    /// A check run completed (or was created/re-requested).
    CheckRun(CheckRunEvent),

    /// A branch protection rule changed.
    BranchProtectionRule(BranchProtectionRuleEvent),

    /// Any event type this engine does not handle.
    ///
    /// Accepted and recorded, never processed further.
    Unknown {
        repo: Option<RepoId>,
        event_type: String,
    },
}

impl Event {
    /// Returns the repository this event belongs to, when one is known.
    pub fn repo(&self) -> Option<&RepoId> {
        match self {
            Event::PullRequest(e) => Some(&e.repo),
            Event::IssueComment(e) => Some(&e.repo),
            Event::Review(e) => Some(&e.repo),
            Event::CheckRun(e) => Some(&e.repo),
            Event::BranchProtectionRule(e) => Some(&e.repo),
            Event::Unknown { repo, .. } => repo.as_ref(),
        }
    }

    /// Returns the dispatcher routing key for this event.
    ///
    /// Events tied to a PR serialize per PR; repository-level events (and
    /// check runs with no associated PR) serialize per repository. Events
    /// with no repository at all return `None` and are completed at ingress.
    pub fn entity_key(&self) -> Option<EntityKey> {
        match self {
            Event::PullRequest(e) => Some(EntityKey::new(e.repo.clone(), e.pr_number.0)),
            Event::IssueComment(e) => Some(match e.pr_number {
                Some(pr) => EntityKey::new(e.repo.clone(), pr.0),
                None => EntityKey::repo_wide(e.repo.clone()),
            }),
            Event::Review(e) => Some(EntityKey::new(e.repo.clone(), e.pr_number.0)),
            Event::CheckRun(e) => Some(match e.pull_requests.first() {
                Some(pr) => EntityKey::new(e.repo.clone(), pr.0),
                None => EntityKey::repo_wide(e.repo.clone()),
            }),
            Event::BranchProtectionRule(e) => Some(EntityKey::repo_wide(e.repo.clone())),
            Event::Unknown { repo, .. } => {
                repo.as_ref().map(|r| EntityKey::repo_wide(r.clone()))
            }
        }
    }

    /// Short name used in logs and execution records.
    pub fn kind(&self) -> &str {
        match self {
            Event::PullRequest(_) => "pull_request",
            Event::IssueComment(_) => "issue_comment",
            Event::Review(_) => "pull_request_review",
            Event::CheckRun(_) => "check_run",
            Event::BranchProtectionRule(_) => "branch_protection_rule",
            Event::Unknown { event_type, .. } => event_type,
        }
    }
}

/// Action performed on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    Closed,
    Edited,
    /// New commits were pushed to the PR head.
    Synchronize,
    Reopened,
    ConvertedToDraft,
    ReadyForReview,
    Labeled,
    Unlabeled,
}

/// A pull request lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub repo: RepoId,
    pub action: PrAction,
    pub pr_number: PrNumber,
    pub title: String,
    pub author: String,
    pub head_sha: Sha,
    pub base_branch: String,
    pub head_branch: String,
    pub draft: bool,
    /// Whether the PR was merged (only meaningful for `closed`).
    pub merged: bool,
    /// The merge commit SHA (only set once merged).
    pub merge_commit_sha: Option<Sha>,
}

/// Action performed on an issue comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
}

/// An issue/PR comment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentEvent {
    pub repo: RepoId,
    pub action: CommentAction,
    /// Set only when the comment is on a pull request; commands are only
    /// valid on PRs.
    pub pr_number: Option<PrNumber>,
    pub comment_id: CommentId,
    /// Empty for `deleted` actions.
    pub body: String,
    pub author: String,
}

/// Action performed on a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Submitted,
    Edited,
    Dismissed,
}

/// State of a submitted review, as delivered in webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
}

/// A pull request review event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub repo: RepoId,
    pub action: ReviewAction,
    pub pr_number: PrNumber,
    pub state: ReviewState,
    pub reviewer: String,
}

/// Action for check run events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    Created,
    Completed,
    Rerequested,
    RequestedAction,
}

/// A check run event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunEvent {
    pub repo: RepoId,
    pub action: CheckRunAction,
    /// The check's name (the context required checks are matched against).
    pub name: String,
    pub head_sha: Sha,
    /// success, failure, neutral, cancelled, timed_out, action_required,
    /// stale, skipped. Absent until the run completes.
    pub conclusion: Option<String>,
    /// PRs whose head this run is attached to. May be empty for pushes to
    /// branches with no open PR.
    pub pull_requests: Vec<PrNumber>,
}

/// Action for branch protection rule events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchProtectionAction {
    Created,
    Edited,
    Deleted,
}

/// A branch protection rule change.
///
/// Routed repo-wide: the handler re-evaluates every open PR targeting the
/// affected branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtectionRuleEvent {
    pub repo: RepoId,
    pub action: BranchProtectionAction,
    /// The branch name (pattern) the rule applies to.
    pub branch: String,
}
