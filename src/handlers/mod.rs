//! Per-event orchestration: each delivery becomes API reads, command
//! effects, and one evaluation pass.
//!
//! Handlers never trust payload-derived PR state beyond routing. The PR is
//! refetched at processing time and the evaluation is recomputed from that
//! ground truth, so a handler re-run (webhook redelivery, duplicate event)
//! converges instead of compounding.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::cherry_pick::{self, BranchReplayer};
use crate::commands::{Intent, parse_comment};
use crate::config::{
    ConfigError, ConfigResolver, EffectiveConfig, OVERRIDE_FILE_PATH,
};
use crate::engine::{
    AUTOMERGE_LABEL, HOLD_LABEL, PrSnapshot, VERIFIED_LABEL, WIP_LABEL, apply, evaluate,
};
use crate::github::{ApiError, GitHubApi, RetryConfig};
use crate::owners::{self, GithubOwnersSource, OwnersDecision, OwnersError};
use crate::types::{PrNumber, RepoId};
use crate::webhooks::events::{
    BranchProtectionRuleEvent, CheckRunEvent, CommentAction, Event, IssueCommentEvent, PrAction,
    PullRequestEvent, ReviewEvent,
};

/// Comment posted when a PR is opened.
const WELCOME_COMMENT: &str = "\
Thanks for the pull request!

Available commands (one per line, at the start of a comment):
`/hold`, `/wip`, `/verified`, `/automerge`, `/cherry-pick <branch>`, `/retest [check]`.
Append ` cancel` to undo a flag.";

/// Errors surfaced while processing one delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Owners(#[from] OwnersError),
}

/// Processes parsed webhook events.
pub struct EventHandler {
    gh: Arc<dyn GitHubApi>,
    resolver: ConfigResolver,
    replayer: Arc<dyn BranchReplayer>,
    retry: RetryConfig,
}

impl EventHandler {
    pub fn new(
        gh: Arc<dyn GitHubApi>,
        resolver: ConfigResolver,
        replayer: Arc<dyn BranchReplayer>,
    ) -> Self {
        EventHandler {
            gh,
            resolver,
            replayer,
            retry: RetryConfig::DEFAULT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Processes one event. Returns whether the event did any work; events
    /// the configuration excludes, unknown types, and no-op actions report
    /// `false` so the execution record distinguishes them from real work.
    #[tracing::instrument(skip_all, fields(event = event.kind()))]
    pub async fn handle(&self, event: &Event) -> Result<bool, HandlerError> {
        match event {
            Event::PullRequest(e) => self.handle_pull_request(e).await,
            Event::IssueComment(e) => self.handle_comment(e).await,
            Event::Review(e) => self.handle_review(e).await,
            Event::CheckRun(e) => self.handle_check_run(e).await,
            Event::BranchProtectionRule(e) => self.handle_branch_protection(e).await,
            Event::Unknown { event_type, .. } => {
                debug!(event_type, "ignoring unhandled event type");
                Ok(false)
            }
        }
    }

    async fn handle_pull_request(&self, event: &PullRequestEvent) -> Result<bool, HandlerError> {
        let config = self.effective_config(&event.repo).await?;
        if !config.event_allowed("pull_request") {
            return Ok(false);
        }

        match event.action {
            PrAction::Opened | PrAction::ReadyForReview => {
                let snapshot = self.snapshot(&event.repo, event.pr_number).await?;
                let owners = self.owners_for(&snapshot).await?;
                // The welcome comment goes out once; redeliveries of
                // `opened` are caught upstream by the duplicate guard.
                if event.action == PrAction::Opened {
                    self.gh
                        .post_comment(&event.repo, event.pr_number, WELCOME_COMMENT)
                        .await?;
                }
                let reviewers: Vec<String> = owners
                    .suggested_reviewers()
                    .into_iter()
                    .filter(|r| r != &snapshot.author)
                    .collect();
                if !reviewers.is_empty() {
                    self.gh
                        .request_reviewers(&event.repo, event.pr_number, &reviewers)
                        .await?;
                }
                let evaluation = evaluate(&snapshot, &config, &owners);
                apply(&*self.gh, &snapshot, &config, &evaluation, self.retry).await?;
                Ok(true)
            }
            PrAction::Closed if event.merged => {
                let snapshot = self.snapshot(&event.repo, event.pr_number).await?;
                let requested = cherry_pick::requested_from_labels(&snapshot.current_labels);
                let targets = cherry_pick::merge_targets(&config, &requested);
                if targets.is_empty() {
                    return Ok(true);
                }
                info!(pr = %event.pr_number, ?targets, "replaying merged PR");
                cherry_pick::run(&*self.gh, &*self.replayer, &snapshot, &config, &targets)
                    .await;
                Ok(true)
            }
            PrAction::Closed => Ok(true),
            _ => {
                self.evaluate_open(&config, &event.repo, event.pr_number)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn handle_comment(&self, event: &IssueCommentEvent) -> Result<bool, HandlerError> {
        if event.action != CommentAction::Created {
            return Ok(false);
        }
        let Some(number) = event.pr_number else {
            return Ok(false);
        };
        let config = self.effective_config(&event.repo).await?;
        if !config.event_allowed("issue_comment") {
            return Ok(false);
        }
        let intents = parse_comment(&event.body);
        if intents.is_empty() {
            return Ok(false);
        }

        let snapshot = self.snapshot(&event.repo, number).await?;
        let owners = self.owners_for(&snapshot).await?;

        for intent in &intents {
            if intent.requires_owner(&config.merge.required_labels)
                && !owners.authorizes(&event.author)
            {
                info!(pr = %number, author = %event.author, "rejecting unauthorized command");
                let body = format!(
                    "@{}: `/{}` is restricted to users listed in OWNERS for the files this PR touches.",
                    event.author,
                    command_name(intent)
                );
                self.gh.post_comment(&event.repo, number, &body).await?;
                continue;
            }
            self.apply_intent(intent, &snapshot, &config).await?;
        }

        self.evaluate_open(&config, &event.repo, number).await?;
        Ok(true)
    }

    async fn handle_review(&self, event: &ReviewEvent) -> Result<bool, HandlerError> {
        let config = self.effective_config(&event.repo).await?;
        if !config.event_allowed("pull_request_review") {
            return Ok(false);
        }
        self.evaluate_open(&config, &event.repo, event.pr_number)
            .await?;
        Ok(true)
    }

    async fn handle_check_run(&self, event: &CheckRunEvent) -> Result<bool, HandlerError> {
        let config = self.effective_config(&event.repo).await?;
        if !config.event_allowed("check_run") {
            return Ok(false);
        }
        if event.pull_requests.is_empty() {
            return Ok(false);
        }
        for number in &event.pull_requests {
            self.evaluate_open(&config, &event.repo, *number).await?;
        }
        Ok(true)
    }

    /// A protection rule change can alter which checks are required, so
    /// every open PR targeting the branch is re-evaluated.
    async fn handle_branch_protection(
        &self,
        event: &BranchProtectionRuleEvent,
    ) -> Result<bool, HandlerError> {
        let config = self.effective_config(&event.repo).await?;
        if !config.event_allowed("branch_protection_rule") {
            return Ok(false);
        }
        let open = self
            .gh
            .list_open_pulls(&event.repo, Some(&event.branch))
            .await?;
        info!(branch = %event.branch, count = open.len(), "re-evaluating after protection change");
        for pr in open {
            self.evaluate_open(&config, &event.repo, pr.number).await?;
        }
        Ok(true)
    }

    async fn apply_intent(
        &self,
        intent: &Intent,
        snapshot: &PrSnapshot,
        config: &EffectiveConfig,
    ) -> Result<(), HandlerError> {
        match intent {
            Intent::Hold { cancel } => {
                self.set_sticky(snapshot, config, HOLD_LABEL, *cancel).await
            }
            Intent::Wip { cancel } => self.set_sticky(snapshot, config, WIP_LABEL, *cancel).await,
            Intent::Verified { cancel } => {
                self.set_sticky(snapshot, config, VERIFIED_LABEL, *cancel)
                    .await
            }
            Intent::Automerge { cancel } => {
                self.set_sticky(snapshot, config, AUTOMERGE_LABEL, *cancel)
                    .await
            }
            Intent::ToggleLabel { label, cancel } => {
                if config.manages_label(label) {
                    self.set_sticky(snapshot, config, label, *cancel).await
                } else {
                    debug!(%label, "ignoring toggle for unmanaged label");
                    Ok(())
                }
            }
            Intent::CherryPick { branches } => {
                if snapshot.merged {
                    // Already merged: replay immediately.
                    cherry_pick::run(&*self.gh, &*self.replayer, snapshot, config, branches)
                        .await;
                    Ok(())
                } else {
                    // Record the request as labels; the merge handler picks
                    // them up.
                    for branch in branches {
                        let label = format!("{}{branch}", cherry_pick::LABEL_PREFIX);
                        self.set_sticky(snapshot, config, &label, false).await?;
                    }
                    Ok(())
                }
            }
            Intent::Retest { checks } => self.retest(snapshot, config, checks).await,
        }
    }

    async fn retest(
        &self,
        snapshot: &PrSnapshot,
        config: &EffectiveConfig,
        checks: &[String],
    ) -> Result<(), HandlerError> {
        let required = config.merge.required_checks_for(&snapshot.base_branch);
        for run in &snapshot.check_runs {
            let wanted = if checks.is_empty() {
                run.failed() && required.contains(&run.name)
            } else {
                checks.contains(&run.name)
            };
            if wanted {
                info!(pr = %snapshot.number, check = %run.name, "re-requesting check");
                self.gh.rerequest_check(&snapshot.repo, run.id).await?;
            }
        }
        Ok(())
    }

    async fn set_sticky(
        &self,
        snapshot: &PrSnapshot,
        config: &EffectiveConfig,
        label: &str,
        cancel: bool,
    ) -> Result<(), HandlerError> {
        if cancel {
            self.gh
                .remove_label(&snapshot.repo, snapshot.number, label)
                .await?;
        } else {
            self.gh
                .ensure_label(&snapshot.repo, label, config.label_color(label))
                .await?;
            self.gh
                .add_labels(&snapshot.repo, snapshot.number, &[label.to_string()])
                .await?;
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<PrSnapshot, HandlerError> {
        Ok(PrSnapshot::fetch(&*self.gh, repo, number).await?)
    }

    /// Refetches the PR and applies a fresh evaluation. Closed PRs are left
    /// alone.
    async fn evaluate_open(
        &self,
        config: &EffectiveConfig,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<(), HandlerError> {
        let snapshot = self.snapshot(repo, number).await?;
        if !snapshot.is_open {
            return Ok(());
        }
        let owners = self.owners_for(&snapshot).await?;
        let evaluation = evaluate(&snapshot, config, &owners);
        apply(&*self.gh, &snapshot, config, &evaluation, self.retry).await?;
        Ok(())
    }

    /// Resolves layered configuration, including the in-repository override
    /// file on the default branch.
    async fn effective_config(&self, repo: &RepoId) -> Result<EffectiveConfig, HandlerError> {
        let override_file = self
            .gh
            .fetch_contents(repo, OVERRIDE_FILE_PATH, "HEAD")
            .await?;
        Ok(self.resolver.resolve(repo, override_file.as_deref())?)
    }

    /// A repository with no OWNERS declarations anywhere is unrestricted.
    async fn owners_for(&self, snapshot: &PrSnapshot) -> Result<OwnersDecision, HandlerError> {
        let source = GithubOwnersSource::new(&*self.gh, &snapshot.repo);
        match owners::resolve(&source, &snapshot.base_branch, &snapshot.changed_files).await {
            Ok(decision) => Ok(decision),
            Err(OwnersError::NotFound) => Ok(OwnersDecision::Unrestricted),
            Err(e) => Err(e.into()),
        }
    }
}

/// Production [`DeliveryProcessor`]: one [`EventHandler`] per delivery over
/// a per-delivery API client, so token spend is attributed to the delivery
/// that caused it.
pub struct WardenProcessor {
    gh: Arc<crate::github::HttpGitHub>,
    resolver: ConfigResolver,
    replayer: Arc<dyn BranchReplayer>,
}

impl WardenProcessor {
    pub fn new(
        gh: Arc<crate::github::HttpGitHub>,
        resolver: ConfigResolver,
        replayer: Arc<dyn BranchReplayer>,
    ) -> Self {
        WardenProcessor {
            gh,
            resolver,
            replayer,
        }
    }
}

#[async_trait::async_trait]
impl crate::dispatch::DeliveryProcessor for WardenProcessor {
    async fn process(
        &self,
        event: &Event,
    ) -> Result<crate::dispatch::ProcessOutcome, HandlerError> {
        let gh: Arc<dyn GitHubApi> = Arc::new(self.gh.for_delivery());
        let handler = EventHandler::new(
            Arc::clone(&gh),
            self.resolver.clone(),
            Arc::clone(&self.replayer),
        );
        let handled = handler.handle(event).await?;
        Ok(crate::dispatch::ProcessOutcome {
            handled,
            token_spend: gh.spend(),
        })
    }
}

/// User-facing name of a command, for rejection messages.
fn command_name(intent: &Intent) -> String {
    match intent {
        Intent::Hold { .. } => "hold".to_string(),
        Intent::Wip { .. } => "wip".to_string(),
        Intent::Verified { .. } => "verified".to_string(),
        Intent::Automerge { .. } => "automerge".to_string(),
        Intent::CherryPick { .. } => "cherry-pick".to_string(),
        Intent::Retest { .. } => "retest".to_string(),
        Intent::ToggleLabel { label, .. } => label.clone(),
    }
}
