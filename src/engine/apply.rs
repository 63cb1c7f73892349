//! Applies an evaluation to GitHub: label diff, commit status, automerge.
//!
//! Mutations are the minimal diff against the snapshot, so re-applying the
//! same evaluation to converged state performs no label writes.

use tracing::{info, warn};

use crate::config::EffectiveConfig;
use crate::github::{ApiError, GitHubApi, RetryConfig, retry_with_backoff};

use super::labels::diff_labels;
use super::readiness::Evaluation;
use super::snapshot::PrSnapshot;

/// Commit status context carrying the merge-readiness verdict.
pub const MERGE_STATUS_CONTEXT: &str = "repo-warden/can-be-merged";

/// The status API rejects descriptions over 140 characters.
const STATUS_DESCRIPTION_LIMIT: usize = 140;

pub async fn apply(
    gh: &dyn GitHubApi,
    snapshot: &PrSnapshot,
    config: &EffectiveConfig,
    evaluation: &Evaluation,
    retry: RetryConfig,
) -> Result<(), ApiError> {
    if config.labels_enabled {
        let diff = diff_labels(&snapshot.current_labels, &evaluation.desired_labels, config);
        if !diff.is_empty() {
            info!(
                pr = %snapshot.number,
                add = ?diff.add,
                remove = ?diff.remove,
                "applying label diff"
            );
        }
        for label in &diff.add {
            gh.ensure_label(&snapshot.repo, label, config.label_color(label))
                .await?;
        }
        gh.add_labels(&snapshot.repo, snapshot.number, &diff.add)
            .await?;
        for label in &diff.remove {
            gh.remove_label(&snapshot.repo, snapshot.number, label)
                .await?;
        }
    }

    publish_status(gh, snapshot, evaluation).await?;

    if evaluation.should_automerge(snapshot, config) {
        info!(pr = %snapshot.number, sha = %snapshot.head_sha.short(), "automerging");
        let result = retry_with_backoff(retry, || {
            gh.merge_pull(&snapshot.repo, snapshot.number, &snapshot.head_sha)
        })
        .await;
        if let Err(error) = result {
            warn!(pr = %snapshot.number, %error, "automerge failed");
            return Err(error);
        }
    }

    Ok(())
}

async fn publish_status(
    gh: &dyn GitHubApi,
    snapshot: &PrSnapshot,
    evaluation: &Evaluation,
) -> Result<(), ApiError> {
    use crate::github::types::CommitState;

    let (state, description) = if evaluation.can_be_merged {
        (CommitState::Success, "ready to merge".to_string())
    } else {
        let summary = evaluation
            .blocking
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let state = if evaluation.blocking.iter().all(|r| r.is_waiting()) {
            CommitState::Pending
        } else {
            CommitState::Failure
        };
        (state, truncate_description(&summary))
    };

    gh.set_commit_status(
        &snapshot.repo,
        &snapshot.head_sha,
        state,
        MERGE_STATUS_CONTEXT,
        &description,
    )
    .await
}

fn truncate_description(s: &str) -> String {
    if s.len() <= STATUS_DESCRIPTION_LIMIT {
        return s.to_string();
    }
    let end = (0..=STATUS_DESCRIPTION_LIMIT - 3)
        .rev()
        .find(|i| s.is_char_boundary(*i))
        .unwrap_or(0);
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ConfigResolver;
    use crate::engine::labels::AUTOMERGE_LABEL;
    use crate::engine::readiness::evaluate;
    use crate::github::testing::{FakeGitHub, sample_pull};
    use crate::github::types::CommitState;
    use crate::owners::OwnersDecision;
    use crate::types::{PrNumber, RepoId};

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0)
    }

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    fn config() -> EffectiveConfig {
        ConfigResolver::from_str("defaults:\n  automerge_enabled: true\n  minimum_lgtm: 0\n")
            .unwrap()
            .resolve(&repo(), None)
            .unwrap()
    }

    async fn snapshot(gh: &FakeGitHub, number: u64) -> PrSnapshot {
        PrSnapshot::fetch(gh, &repo(), PrNumber(number)).await.unwrap()
    }

    #[tokio::test]
    async fn label_diff_converges_and_stays_converged() {
        let gh = FakeGitHub::new().with_pull(sample_pull(3));
        let config = config();
        let owners = OwnersDecision::Unrestricted;

        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &owners);
        apply(&gh, &snap, &config, &evaluation, fast_retry())
            .await
            .unwrap();
        let writes_after_first = gh.added_labels().len() + gh.removed_labels().len();
        assert!(writes_after_first > 0);

        // Re-processing the same inputs against the converged state makes
        // no further label mutations.
        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &owners);
        apply(&gh, &snap, &config, &evaluation, fast_retry())
            .await
            .unwrap();
        assert_eq!(gh.added_labels().len() + gh.removed_labels().len(), writes_after_first);
    }

    #[tokio::test]
    async fn labels_created_with_configured_colors_before_adding() {
        let gh = FakeGitHub::new().with_pull(sample_pull(3));
        let config = config();

        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &OwnersDecision::Unrestricted);
        apply(&gh, &snap, &config, &evaluation, fast_retry())
            .await
            .unwrap();

        let ensured = gh.ensured_labels();
        assert!(
            ensured
                .iter()
                .any(|(name, color)| name == "size/XS" && color == "3cbf00")
        );
    }

    #[tokio::test]
    async fn verdict_published_as_commit_status() {
        let gh = FakeGitHub::new().with_pull(sample_pull(3));
        let config = config();

        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &OwnersDecision::Unrestricted);
        apply(&gh, &snap, &config, &evaluation, fast_retry())
            .await
            .unwrap();

        let statuses = gh.statuses();
        assert_eq!(statuses.len(), 1);
        let (sha, state, context, _) = &statuses[0];
        assert_eq!(sha, snap.head_sha.as_str());
        assert_eq!(*state, CommitState::Success);
        assert_eq!(context, MERGE_STATUS_CONTEXT);
    }

    #[tokio::test]
    async fn automerge_retries_transient_failures() {
        let mut pull = sample_pull(3);
        pull.labels.push(crate::github::types::Label {
            name: AUTOMERGE_LABEL.to_string(),
        });
        let gh = FakeGitHub::new().with_pull(pull);
        gh.queue_merge_failure(ApiError::transient("temporarily glitchy"));
        let config = config();

        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &OwnersDecision::Unrestricted);
        assert!(evaluation.should_automerge(&snap, &config));
        apply(&gh, &snap, &config, &evaluation, fast_retry())
            .await
            .unwrap();
        assert_eq!(gh.merged(), vec![3]);
    }

    #[tokio::test]
    async fn automerge_permanent_failure_surfaces() {
        let mut pull = sample_pull(3);
        pull.labels.push(crate::github::types::Label {
            name: AUTOMERGE_LABEL.to_string(),
        });
        let gh = FakeGitHub::new().with_pull(pull);
        gh.queue_merge_failure(ApiError::permanent("branch protection says no"));
        let config = config();

        let snap = snapshot(&gh, 3).await;
        let evaluation = evaluate(&snap, &config, &OwnersDecision::Unrestricted);
        let result = apply(&gh, &snap, &config, &evaluation, fast_retry()).await;
        assert!(result.is_err());
        assert!(gh.merged().is_empty());
    }

    #[test]
    fn description_truncated_for_status_api() {
        let long = "blocked ".repeat(40);
        let truncated = truncate_description(&long);
        assert!(truncated.len() <= STATUS_DESCRIPTION_LIMIT);
        assert!(truncated.ends_with("..."));
    }
}
