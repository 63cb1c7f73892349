//! Label derivation and diffing.
//!
//! Two classes of managed label:
//!
//! - **Sticky** labels (`hold`, `wip`, `verified`, `automerge`) are set and
//!   cleared by comment commands; evaluation carries them through untouched.
//! - **Derived** labels (the size bucket, `needs-rebase`, `can-be-merged`)
//!   are recomputed from the snapshot on every evaluation, so the full label
//!   set is a pure function of current inputs.

use std::collections::BTreeSet;

use crate::config::EffectiveConfig;

use super::snapshot::PrSnapshot;

pub const HOLD_LABEL: &str = "hold";
pub const WIP_LABEL: &str = "wip";
pub const VERIFIED_LABEL: &str = "verified";
pub const AUTOMERGE_LABEL: &str = "automerge";
pub const NEEDS_REBASE_LABEL: &str = "needs-rebase";
pub const CAN_BE_MERGED_LABEL: &str = "can-be-merged";

/// Picks the size bucket for a change of `lines` lines.
///
/// The table is sorted ascending with the unbounded bucket last; each
/// `max_lines` is an exclusive upper boundary, so with boundaries
/// `{10, 50, 150, 300, none}` a 149-line change lands in the `[50, 150)`
/// bucket and a 150-line change in `[150, 300)`.
pub fn size_label(config: &EffectiveConfig, lines: u64) -> Option<String> {
    config
        .size_thresholds
        .iter()
        .find(|t| t.max_lines.is_none_or(|max| lines < max))
        .map(|t| t.label.clone())
}

/// Recomputes the full desired label set for a snapshot.
pub fn desired_labels(
    snapshot: &PrSnapshot,
    config: &EffectiveConfig,
    can_be_merged: bool,
) -> BTreeSet<String> {
    let mut labels = snapshot.current_labels.clone();

    // Strip every derived label, then re-add the ones that currently apply.
    labels.retain(|l| !is_derived(config, l));

    if let Some(label) = size_label(config, snapshot.changed_lines) {
        labels.insert(label);
    }
    if snapshot.mergeable == Some(false) {
        labels.insert(NEEDS_REBASE_LABEL.to_string());
    }
    if can_be_merged {
        labels.insert(CAN_BE_MERGED_LABEL.to_string());
    }
    labels
}

fn is_derived(config: &EffectiveConfig, label: &str) -> bool {
    label == NEEDS_REBASE_LABEL
        || label == CAN_BE_MERGED_LABEL
        || config.size_thresholds.iter().any(|t| t.label == label)
}

/// The minimal mutation set taking `current` to `desired`.
///
/// Only labels this crate manages are ever touched; user-applied labels
/// pass through untouched even if they appear on one side only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub fn diff_labels(
    current: &BTreeSet<String>,
    desired: &BTreeSet<String>,
    config: &EffectiveConfig,
) -> LabelDiff {
    LabelDiff {
        add: desired
            .difference(current)
            .filter(|l| config.manages_label(l))
            .cloned()
            .collect(),
        remove: current
            .difference(desired)
            .filter(|l| config.manages_label(l))
            .cloned()
            .collect(),
    }
}
