//! OWNERS tree resolution.
//!
//! Ownership is declared in YAML files named `OWNERS`, one per directory.
//! Each file lists `approvers` and `reviewers`; `root-approvers: false`
//! severs inheritance so that nothing above that directory (the repository
//! root included) applies to paths beneath it.
//!
//! Resolution is per changed path: union the declarations from the deepest
//! ancestor directory up to the nearest severing boundary (inclusive), then
//! union across every changed path to get the PR-level requirement.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Name of the per-directory ownership file.
pub const OWNERS_FILE_NAME: &str = "OWNERS";

/// Errors from OWNERS resolution.
#[derive(Debug, Error)]
pub enum OwnersError {
    /// No ownership declaration exists anywhere in the ancestry of any
    /// changed path, root included. Callers decide the fallback policy;
    /// the usual one is [`OwnersDecision::Unrestricted`].
    #[error("no OWNERS declaration found for any changed path")]
    NotFound,

    #[error("invalid OWNERS file at {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to load {path}: {message}")]
    Source { path: String, message: String },
}

/// Where OWNERS file bytes come from: the repository contents API in
/// production, an in-memory tree in tests.
#[async_trait]
pub trait OwnersSource: Send + Sync {
    /// Fetches the file at `path` on `git_ref`. `Ok(None)` means the file
    /// does not exist there.
    async fn fetch(&self, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, OwnersError>;
}

/// One parsed OWNERS file.
#[derive(Debug, Deserialize)]
struct OwnersFile {
    #[serde(default)]
    approvers: Vec<String>,

    #[serde(default)]
    reviewers: Vec<String>,

    /// When `false`, declarations above this directory do not apply here.
    #[serde(rename = "root-approvers", default = "default_true")]
    root_approvers: bool,
}

fn default_true() -> bool {
    true
}

/// The resolved PR-level ownership requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnersDecision {
    /// Only listed logins carry authority for the changed paths.
    Restricted {
        approvers: BTreeSet<String>,
        reviewers: BTreeSet<String>,
    },

    /// No ownership declared; everyone is treated as authorized.
    Unrestricted,
}

impl OwnersDecision {
    /// Whether `login`'s approval counts toward the merge requirement.
    pub fn counts_approval(&self, login: &str) -> bool {
        match self {
            OwnersDecision::Restricted { approvers, .. } => approvers.contains(login),
            OwnersDecision::Unrestricted => true,
        }
    }

    /// Whether `login` may issue owner-gated commands (approver or reviewer).
    pub fn authorizes(&self, login: &str) -> bool {
        match self {
            OwnersDecision::Restricted {
                approvers,
                reviewers,
            } => approvers.contains(login) || reviewers.contains(login),
            OwnersDecision::Unrestricted => true,
        }
    }

    /// Reviewer logins to request reviews from, approvers first.
    pub fn suggested_reviewers(&self) -> Vec<String> {
        match self {
            OwnersDecision::Restricted {
                approvers,
                reviewers,
            } => approvers.iter().chain(reviewers.iter()).cloned().collect(),
            OwnersDecision::Unrestricted => Vec::new(),
        }
    }
}

/// [`OwnersSource`] backed by the repository contents API.
pub struct GithubOwnersSource<'a> {
    gh: &'a dyn crate::github::GitHubApi,
    repo: &'a crate::types::RepoId,
}

impl<'a> GithubOwnersSource<'a> {
    pub fn new(gh: &'a dyn crate::github::GitHubApi, repo: &'a crate::types::RepoId) -> Self {
        GithubOwnersSource { gh, repo }
    }
}

#[async_trait]
impl OwnersSource for GithubOwnersSource<'_> {
    async fn fetch(&self, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, OwnersError> {
        self.gh
            .fetch_contents(self.repo, path, git_ref)
            .await
            .map_err(|e| OwnersError::Source {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}

/// Resolves the PR-level ownership requirement for `changed_paths` at
/// `git_ref`.
///
/// An empty `changed_paths` (repository-level commands, issue comments)
/// consults the root OWNERS file alone. Each OWNERS file is fetched at most
/// once per call.
pub async fn resolve(
    source: &dyn OwnersSource,
    git_ref: &str,
    changed_paths: &[String],
) -> Result<OwnersDecision, OwnersError> {
    let mut cache: HashMap<String, Option<OwnersFile>> = HashMap::new();
    let mut approvers = BTreeSet::new();
    let mut reviewers = BTreeSet::new();
    let mut found_any = false;

    let paths: Vec<&str> = if changed_paths.is_empty() {
        vec![""]
    } else {
        changed_paths.iter().map(String::as_str).collect()
    };

    for path in paths {
        for dir in ancestor_dirs(path) {
            let file = load_cached(source, git_ref, &dir, &mut cache).await?;
            let Some(file) = file else { continue };
            found_any = true;
            approvers.extend(file.approvers.iter().cloned());
            reviewers.extend(file.reviewers.iter().cloned());
            if !file.root_approvers {
                break;
            }
        }
    }

    if !found_any {
        return Err(OwnersError::NotFound);
    }
    Ok(OwnersDecision::Restricted {
        approvers,
        reviewers,
    })
}

async fn load_cached<'a>(
    source: &dyn OwnersSource,
    git_ref: &str,
    dir: &str,
    cache: &'a mut HashMap<String, Option<OwnersFile>>,
) -> Result<&'a Option<OwnersFile>, OwnersError> {
    if !cache.contains_key(dir) {
        let file_path = if dir.is_empty() {
            OWNERS_FILE_NAME.to_string()
        } else {
            format!("{dir}/{OWNERS_FILE_NAME}")
        };
        let parsed = match source.fetch(&file_path, git_ref).await? {
            Some(bytes) => {
                Some(
                    serde_yaml::from_slice(&bytes).map_err(|source| OwnersError::Invalid {
                        path: file_path,
                        source,
                    })?,
                )
            }
            None => None,
        };
        cache.insert(dir.to_string(), parsed);
    }
    // Entry was just inserted if it was missing.
    Ok(&cache[dir])
}

/// Ancestor directories of a file path, deepest first, ending with the
/// repository root (the empty string).
fn ancestor_dirs(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        dirs.push(current.to_string());
    }
    dirs.push(String::new());
    dirs
}
