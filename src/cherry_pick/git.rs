//! Local git operations for cherry-pick replay.
//!
//! Git runs as a subprocess with a scrubbed environment (no system or user
//! config, no terminal prompts) so behavior is identical across machines.
//! Credentials are injected into the remote URL per invocation and never
//! written to disk; the committer identity rides on `-c` flags.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::credentials::CredentialPool;
use crate::types::{PrNumber, RepoId, Sha};

use super::{BranchReplayer, ReplayError, branch_name};

/// [`BranchReplayer`] backed by a local clone per repository.
pub struct LocalGit {
    work_dir: PathBuf,
    committer_name: String,
    committer_email: String,
    pool: Arc<CredentialPool>,
    remote_base: String,
}

impl LocalGit {
    pub fn new(
        work_dir: PathBuf,
        committer_name: String,
        committer_email: String,
        pool: Arc<CredentialPool>,
    ) -> Self {
        LocalGit {
            work_dir,
            committer_name,
            committer_email,
            pool,
            remote_base: "https://github.com".to_string(),
        }
    }

    /// Points pushes and fetches somewhere other than github.com. Tests use
    /// `file://` remotes.
    pub fn with_remote_base(mut self, remote_base: impl Into<String>) -> Self {
        self.remote_base = remote_base.into();
        self
    }

    fn repo_dir(&self, repo: &RepoId) -> PathBuf {
        self.work_dir.join(format!("{}-{}", repo.owner, repo.repo))
    }

    /// Remote URL with the credential embedded for HTTPS remotes. Passed as
    /// a command argument each time instead of being stored in the clone.
    async fn remote_url(&self, repo: &RepoId) -> Result<String, ReplayError> {
        if let Some(host) = self.remote_base.strip_prefix("https://") {
            let lease = self
                .pool
                .acquire(1)
                .await
                .map_err(|e| ReplayError::Auth(e.to_string()))?;
            Ok(format!(
                "https://x-access-token:{}@{}/{}/{}.git",
                lease.token(),
                host,
                repo.owner,
                repo.repo
            ))
        } else {
            Ok(format!(
                "{}/{}/{}",
                self.remote_base, repo.owner, repo.repo
            ))
        }
    }

    async fn run(&self, dir: &std::path::Path, args: &[&str]) -> Result<Output, ReplayError> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = git_command(dir).args(args).output().await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(ReplayError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn ensure_clone(&self, repo: &RepoId, url: &str) -> Result<PathBuf, ReplayError> {
        let dir = self.repo_dir(repo);
        if !dir.join(".git").exists() {
            tokio::fs::create_dir_all(&self.work_dir).await?;
            self.run(
                &self.work_dir,
                &["clone", "--quiet", url, &dir.to_string_lossy()],
            )
            .await?;
        } else {
            self.run(
                &dir,
                &["fetch", "--quiet", url, "+refs/heads/*:refs/remotes/origin/*"],
            )
            .await?;
        }
        Ok(dir)
    }

    /// Number of parents of `sha`; merge commits need `-m 1` to pick the
    /// mainline side.
    async fn parent_count(&self, dir: &std::path::Path, sha: &Sha) -> Result<usize, ReplayError> {
        let output = self
            .run(dir, &["rev-parse", &format!("{}^@", sha.as_str())])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).lines().count())
    }
}

#[async_trait]
impl BranchReplayer for LocalGit {
    async fn replay(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        sha: &Sha,
        target: &str,
    ) -> Result<String, ReplayError> {
        let url = self.remote_url(repo).await?;
        let dir = self.ensure_clone(repo, &url).await?;
        let branch = branch_name(pr, target);

        self.run(
            &dir,
            &[
                "checkout",
                "--quiet",
                "-B",
                &branch,
                &format!("refs/remotes/origin/{target}"),
            ],
        )
        .await?;

        let mainline = self.parent_count(&dir, sha).await? > 1;
        let name_arg = format!("user.name={}", self.committer_name);
        let email_arg = format!("user.email={}", self.committer_email);
        let mut args: Vec<&str> = vec!["-c", &name_arg, "-c", &email_arg, "cherry-pick", "-x"];
        if mainline {
            args.extend(["-m", "1"]);
        }
        args.push(sha.as_str());

        if let Err(error) = self.run(&dir, &args).await {
            // Leave the clone clean for the next target branch.
            let _ = self.run(&dir, &["cherry-pick", "--abort"]).await;
            return Err(match error {
                ReplayError::CommandFailed { stderr, .. } if looks_like_conflict(&stderr) => {
                    ReplayError::Conflict {
                        branch: target.to_string(),
                        details: stderr,
                    }
                }
                other => other,
            });
        }

        self.run(
            &dir,
            &[
                "push",
                "--quiet",
                "--force",
                &url,
                &format!("HEAD:refs/heads/{branch}"),
            ],
        )
        .await?;
        Ok(branch)
    }
}

fn looks_like_conflict(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("conflict") || stderr.contains("could not apply")
}

/// Git command with a scrubbed environment.
fn git_command(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}
