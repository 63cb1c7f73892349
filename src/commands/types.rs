//! Intent types produced by the comment-command parser.

use serde::{Deserialize, Serialize};

/// A structured intent parsed from one line of a PR/issue comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "kebab-case")]
pub enum Intent {
    /// `/hold` blocks merging; `/hold cancel` lifts the block.
    Hold { cancel: bool },

    /// `/wip` marks the PR as work-in-progress; `/wip cancel` clears it.
    Wip { cancel: bool },

    /// `/verified` marks the PR as verified; `/verified cancel` clears it.
    Verified { cancel: bool },

    /// `/automerge` arms automatic merge once the PR is eligible;
    /// `/automerge cancel` disarms it.
    Automerge { cancel: bool },

    /// `/cherry-pick <branch>...` requests cherry-picks onto the named
    /// target branches once the PR merges.
    CherryPick { branches: Vec<String> },

    /// `/retest [check...]` re-runs the named checks, or every required
    /// check when none are named.
    Retest { checks: Vec<String> },

    /// Bare `/<label>` adds a label; `/<label> cancel` removes it.
    /// Only labels the configuration manages are acted on.
    ToggleLabel { label: String, cancel: bool },
}

impl Intent {
    /// Whether the comment author must appear in the effective OWNERS set
    /// for this intent to be acted on.
    ///
    /// `hold` and `wip` are open to anyone (conservative gates). Label
    /// toggles are restricted only when the label gates merging.
    pub fn requires_owner(&self, gating_labels: &[String]) -> bool {
        match self {
            Intent::Hold { .. } | Intent::Wip { .. } => false,
            Intent::Verified { .. }
            | Intent::Automerge { .. }
            | Intent::CherryPick { .. }
            | Intent::Retest { .. } => true,
            Intent::ToggleLabel { label, .. } => gating_labels.iter().any(|l| l == label),
        }
    }
}
