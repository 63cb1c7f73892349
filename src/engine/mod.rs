//! The PR state machine.
//!
//! Four stages, each a separate concern:
//!
//! 1. [`snapshot`] fetches a fresh view of the PR (details, reviews,
//!    check runs, changed files).
//! 2. [`readiness`] computes the merge verdict as a pure function of the
//!    snapshot, the effective configuration, and the OWNERS decision.
//! 3. [`labels`] derives the full desired label set and the minimal diff.
//! 4. [`apply`] performs the diff, publishes the verdict as a commit
//!    status, and triggers automerge when armed.
//!
//! Because stages 2 and 3 are pure, re-processing a delivery converges:
//! the second pass produces an empty diff.

mod apply;
pub mod labels;
mod readiness;
mod snapshot;

pub use apply::{MERGE_STATUS_CONTEXT, apply};
pub use labels::{
    AUTOMERGE_LABEL, CAN_BE_MERGED_LABEL, HOLD_LABEL, NEEDS_REBASE_LABEL, VERIFIED_LABEL,
    WIP_LABEL,
};
pub use readiness::{BlockReason, Evaluation, evaluate};
pub use snapshot::PrSnapshot;
