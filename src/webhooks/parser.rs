//! Webhook payload parsing.
//!
//! This module parses raw webhook JSON payloads into typed [`Event`] values.
//!
//! # Parsing Strategy
//!
//! 1. The event type comes from the `X-GitHub-Event` header
//! 2. The payload is parsed according to the event type
//! 3. Unknown event types (and known types with irrelevant actions) parse to
//!    [`Event::Unknown`] with the repository extracted best-effort, so they
//!    are accepted and audited rather than rejected
//! 4. Malformed payloads for known types return `Err` with details

use serde::Deserialize;
use thiserror::Error;

use crate::types::{CommentId, PrNumber, RepoId, Sha};

use super::events::{
    BranchProtectionAction, BranchProtectionRuleEvent, CheckRunAction, CheckRunEvent,
    CommentAction, Event, IssueCommentEvent, PrAction, PullRequestEvent, ReviewAction,
    ReviewEvent, ReviewState,
};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Field has an invalid value (e.g., unknown review state).
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// `event_type` is the value of the `X-GitHub-Event` header. Unknown event
/// types never fail; they produce [`Event::Unknown`] so ingress can accept
/// them and the execution record can note that nothing was handled.
pub fn parse_event(event_type: &str, payload: &[u8]) -> Result<Event, ParseError> {
    match event_type {
        "pull_request" => parse_pull_request(payload),
        "issue_comment" => parse_issue_comment(payload),
        "pull_request_review" => parse_review(payload),
        "check_run" => parse_check_run(payload),
        "branch_protection_rule" => parse_branch_protection_rule(payload),
        other => Ok(unknown_event(other, payload)),
    }
}

/// Builds an `Unknown` event, pulling the repository out of the payload when
/// one is present so the delivery still routes through a per-repo worker.
fn unknown_event(event_type: &str, payload: &[u8]) -> Event {
    let repo = serde_json::from_slice::<RawAnyPayload>(payload)
        .ok()
        .and_then(|raw| raw.repository)
        .map(|r| r.into_repo_id());
    Event::Unknown {
        repo,
        event_type: event_type.to_string(),
    }
}

// ─── Raw payload structures ───────────────────────────────────────────────────
//
// These match GitHub's webhook JSON structure. Optional fields are modeled
// with Option<T> and validated explicitly where required.

#[derive(Debug, Deserialize)]
struct RawAnyPayload {
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawAccount,
    name: String,
}

impl RawRepository {
    fn into_repo_id(self) -> RepoId {
        RepoId::new(self.owner.login, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    login: String,
}

// ─── pull_request ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    title: Option<String>,
    merged: Option<bool>,
    merge_commit_sha: Option<String>,
    head: RawRef,
    base: RawRef,
    draft: Option<bool>,
    user: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "opened" => PrAction::Opened,
        "closed" => PrAction::Closed,
        "edited" => PrAction::Edited,
        "synchronize" => PrAction::Synchronize,
        "reopened" => PrAction::Reopened,
        "converted_to_draft" => PrAction::ConvertedToDraft,
        "ready_for_review" => PrAction::ReadyForReview,
        "labeled" => PrAction::Labeled,
        "unlabeled" => PrAction::Unlabeled,
        // Other actions (assigned, locked, milestoned, ...) take the no-op path
        _ => {
            return Ok(Event::Unknown {
                repo: Some(raw.repository.into_repo_id()),
                event_type: "pull_request".to_string(),
            });
        }
    };

    Ok(Event::PullRequest(PullRequestEvent {
        repo: raw.repository.into_repo_id(),
        action,
        pr_number: PrNumber(raw.pull_request.number),
        title: raw.pull_request.title.unwrap_or_default(),
        author: raw.pull_request.user.login,
        head_sha: Sha::new(raw.pull_request.head.sha),
        base_branch: raw.pull_request.base.ref_name,
        head_branch: raw.pull_request.head.ref_name,
        draft: raw.pull_request.draft.unwrap_or(false),
        merged: raw.pull_request.merged.unwrap_or(false),
        merge_commit_sha: raw.pull_request.merge_commit_sha.map(Sha::new),
    }))
}

// ─── issue_comment ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    body: Option<String>,
    user: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    // Present iff the "issue" is actually a pull request
    pull_request: Option<serde_json::Value>,
}

fn parse_issue_comment(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "created" => CommentAction::Created,
        "edited" => CommentAction::Edited,
        "deleted" => CommentAction::Deleted,
        other => {
            return Err(ParseError::InvalidField {
                field: "action",
                value: other.to_string(),
            });
        }
    };

    let pr_number = raw.issue.pull_request.map(|_| PrNumber(raw.issue.number));

    Ok(Event::IssueComment(IssueCommentEvent {
        repo: raw.repository.into_repo_id(),
        action,
        pr_number,
        comment_id: CommentId(raw.comment.id),
        body: raw.comment.body.unwrap_or_default(),
        author: raw.comment.user.login,
    }))
}

// ─── pull_request_review ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawReviewPayload {
    action: String,
    review: RawReview,
    pull_request: RawPrNumberOnly,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    user: RawAccount,
    state: String,
}

#[derive(Debug, Deserialize)]
struct RawPrNumberOnly {
    number: u64,
}

fn parse_review(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawReviewPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "submitted" => ReviewAction::Submitted,
        "edited" => ReviewAction::Edited,
        "dismissed" => ReviewAction::Dismissed,
        other => {
            return Err(ParseError::InvalidField {
                field: "action",
                value: other.to_string(),
            });
        }
    };

    // REST payloads use lowercase states; tolerate either casing.
    let state = match raw.review.state.to_lowercase().as_str() {
        "approved" => ReviewState::Approved,
        "changes_requested" => ReviewState::ChangesRequested,
        "commented" => ReviewState::Commented,
        "dismissed" => ReviewState::Dismissed,
        other => {
            return Err(ParseError::InvalidField {
                field: "review.state",
                value: other.to_string(),
            });
        }
    };

    Ok(Event::Review(ReviewEvent {
        repo: raw.repository.into_repo_id(),
        action,
        pr_number: PrNumber(raw.pull_request.number),
        state,
        reviewer: raw.review.user.login,
    }))
}

// ─── check_run ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawCheckRunPayload {
    action: String,
    check_run: RawCheckRun,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawCheckRun {
    name: String,
    head_sha: String,
    conclusion: Option<String>,
    #[serde(default)]
    pull_requests: Vec<RawPrNumberOnly>,
}

fn parse_check_run(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawCheckRunPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "created" => CheckRunAction::Created,
        "completed" => CheckRunAction::Completed,
        "rerequested" => CheckRunAction::Rerequested,
        "requested_action" => CheckRunAction::RequestedAction,
        _ => {
            return Ok(Event::Unknown {
                repo: Some(raw.repository.into_repo_id()),
                event_type: "check_run".to_string(),
            });
        }
    };

    Ok(Event::CheckRun(CheckRunEvent {
        repo: raw.repository.into_repo_id(),
        action,
        name: raw.check_run.name,
        head_sha: Sha::new(raw.check_run.head_sha),
        conclusion: raw.check_run.conclusion,
        pull_requests: raw
            .check_run
            .pull_requests
            .into_iter()
            .map(|pr| PrNumber(pr.number))
            .collect(),
    }))
}

// ─── branch_protection_rule ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawBranchProtectionPayload {
    action: String,
    rule: RawProtectionRule,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawProtectionRule {
    name: String,
}

fn parse_branch_protection_rule(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawBranchProtectionPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "created" => BranchProtectionAction::Created,
        "edited" => BranchProtectionAction::Edited,
        "deleted" => BranchProtectionAction::Deleted,
        other => {
            return Err(ParseError::InvalidField {
                field: "action",
                value: other.to_string(),
            });
        }
    };

    Ok(Event::BranchProtectionRule(BranchProtectionRuleEvent {
        repo: raw.repository.into_repo_id(),
        action,
        branch: raw.rule.name,
    }))
}
