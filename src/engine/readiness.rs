//! The merge-readiness predicate.
//!
//! `evaluate` is a pure function of the snapshot, the effective
//! configuration, and the resolved OWNERS decision. It never performs I/O;
//! applying the result to GitHub is `apply`'s job.

use std::fmt;

use crate::config::EffectiveConfig;
use crate::owners::OwnersDecision;

use super::labels::{self, AUTOMERGE_LABEL, HOLD_LABEL, WIP_LABEL};
use super::snapshot::PrSnapshot;

/// One reason the PR cannot be merged right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Closed,
    Draft,
    WorkInProgress,
    Hold,
    Conflicts,
    MissingApprovals { have: u32, need: u32 },
    PendingChecks { checks: Vec<String> },
    FailingChecks { checks: Vec<String> },
    MissingLabels { labels: Vec<String> },
    TitleNotConventional,
}

impl BlockReason {
    /// Whether this reason clears on its own (checks finishing, reviews
    /// arriving) as opposed to needing action on the PR.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            BlockReason::PendingChecks { .. } | BlockReason::MissingApprovals { .. }
        )
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Closed => write!(f, "PR is closed"),
            BlockReason::Draft => write!(f, "PR is a draft"),
            BlockReason::WorkInProgress => write!(f, "marked work-in-progress"),
            BlockReason::Hold => write!(f, "hold is set"),
            BlockReason::Conflicts => write!(f, "merge conflicts"),
            BlockReason::MissingApprovals { have, need } => {
                write!(f, "{have}/{need} approvals")
            }
            BlockReason::PendingChecks { checks } => {
                write!(f, "waiting on checks: {}", checks.join(", "))
            }
            BlockReason::FailingChecks { checks } => {
                write!(f, "failing checks: {}", checks.join(", "))
            }
            BlockReason::MissingLabels { labels } => {
                write!(f, "missing labels: {}", labels.join(", "))
            }
            BlockReason::TitleNotConventional => write!(f, "title is not conventional"),
        }
    }
}

/// The full verdict for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub desired_labels: std::collections::BTreeSet<String>,
    pub can_be_merged: bool,
    pub blocking: Vec<BlockReason>,
}

impl Evaluation {
    /// Whether the automerge flag is armed and honored.
    pub fn should_automerge(&self, snapshot: &PrSnapshot, config: &EffectiveConfig) -> bool {
        self.can_be_merged
            && config.merge.automerge_enabled
            && snapshot.has_label(AUTOMERGE_LABEL)
    }
}

/// Computes the merge-readiness verdict and the desired label set.
pub fn evaluate(
    snapshot: &PrSnapshot,
    config: &EffectiveConfig,
    owners: &OwnersDecision,
) -> Evaluation {
    let mut blocking = Vec::new();

    if !snapshot.is_open {
        blocking.push(BlockReason::Closed);
    }
    if snapshot.draft {
        blocking.push(BlockReason::Draft);
    }
    if snapshot.has_label(WIP_LABEL) {
        blocking.push(BlockReason::WorkInProgress);
    }
    if snapshot.has_label(HOLD_LABEL) {
        blocking.push(BlockReason::Hold);
    }
    if snapshot.mergeable == Some(false) {
        blocking.push(BlockReason::Conflicts);
    }

    let have = snapshot
        .approvals
        .iter()
        .filter(|login| owners.counts_approval(login))
        .count() as u32;
    let need = config.merge.minimum_lgtm;
    if have < need {
        blocking.push(BlockReason::MissingApprovals { have, need });
    }

    let required = config.merge.required_checks_for(&snapshot.base_branch);
    let mut pending = Vec::new();
    let mut failing = Vec::new();
    for name in &required {
        match snapshot.check_runs.iter().find(|c| &c.name == name) {
            Some(run) if run.passed() => {}
            Some(run) if run.failed() => failing.push(name.clone()),
            // Queued, in progress, or not reported yet.
            _ => pending.push(name.clone()),
        }
    }
    if !failing.is_empty() {
        blocking.push(BlockReason::FailingChecks { checks: failing });
    }
    if !pending.is_empty() {
        blocking.push(BlockReason::PendingChecks { checks: pending });
    }

    let missing: Vec<String> = config
        .merge
        .required_labels
        .iter()
        .filter(|l| !snapshot.has_label(l))
        .cloned()
        .collect();
    if !missing.is_empty() {
        blocking.push(BlockReason::MissingLabels { labels: missing });
    }

    if !conventional_title_ok(&snapshot.title, &config.merge.conventional_title_prefixes) {
        blocking.push(BlockReason::TitleNotConventional);
    }

    let can_be_merged = blocking.is_empty();
    Evaluation {
        desired_labels: labels::desired_labels(snapshot, config, can_be_merged),
        can_be_merged,
        blocking,
    }
}

/// Accepts `prefix: ...`, `prefix(scope): ...`, and the `!` breaking-change
/// marker. An empty prefix list disables the check.
fn conventional_title_ok(title: &str, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    let Some((head, rest)) = title.split_once(':') else {
        return false;
    };
    if rest.trim().is_empty() {
        return false;
    }
    let head = head.trim();
    let head = head.strip_suffix('!').unwrap_or(head);
    let head = match head.split_once('(') {
        Some((bare, scope)) if scope.ends_with(')') => bare,
        Some(_) => return false,
        None => head,
    };
    prefixes.iter().any(|p| p == head)
}
