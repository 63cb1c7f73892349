//! Repository policy document and overlay resolution.
//!
//! The policy document has a global layer plus per-repository entries; a
//! repository may additionally carry an override file on its default branch
//! (see [`OVERRIDE_FILE_PATH`]). Resolution overlays the layers in order:
//!
//! 1. built-in defaults
//! 2. the document's global layer
//! 3. the per-repository entry
//! 4. the in-repository override file
//!
//! Scalar keys replace; structured keys (threshold table, color map, check
//! lists) replace the whole sub-object from lower layers rather than merging
//! element by element.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RepoId;

/// Path of the in-repository override file, relative to the repo root.
pub const OVERRIDE_FILE_PATH: &str = ".repo-warden.yaml";

/// Fallback color for labels whose configured color is not valid hex.
pub const DEFAULT_LABEL_COLOR: &str = "ededed";

/// Errors from configuration loading and resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The repository has no entry and the document requires one.
    #[error("no configuration entry for repository {0}")]
    UnknownRepository(RepoId),

    /// A document or override file failed to parse.
    #[error("invalid configuration document: {0}")]
    InvalidDocument(#[from] serde_yaml::Error),

    /// The document file could not be read at startup.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// One size-label bucket.
///
/// `max_lines = None` marks the unbounded bucket, which must sort last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeThreshold {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<u64>,
}

/// Branch-specific adjustments to the required check list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCheckOverride {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One configuration layer. Every key is optional; `None` means "inherit
/// from the layer below".
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ConfigLayer {
    pub allowed_events: Option<Vec<String>>,
    pub labels_enabled: Option<bool>,
    pub label_colors: Option<BTreeMap<String, String>>,
    pub size_thresholds: Option<Vec<SizeThreshold>>,
    pub minimum_lgtm: Option<u32>,
    pub required_labels: Option<Vec<String>>,
    pub conventional_title_prefixes: Option<Vec<String>>,
    pub automerge_enabled: Option<bool>,
    pub required_checks: Option<Vec<String>>,
    pub branch_checks: Option<BTreeMap<String, BranchCheckOverride>>,
    pub tracked_cherry_pick_branches: Option<Vec<String>>,
    pub auto_verify_cherry_picked_prs: Option<bool>,
}

impl ConfigLayer {
    /// Overlays `upper` onto `self`: any key set in `upper` replaces the
    /// value here wholesale.
    fn overlay(&mut self, upper: &ConfigLayer) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = &upper.$field {
                    self.$field = Some(v.clone());
                }
            };
        }
        take!(allowed_events);
        take!(labels_enabled);
        take!(label_colors);
        take!(size_thresholds);
        take!(minimum_lgtm);
        take!(required_labels);
        take!(conventional_title_prefixes);
        take!(automerge_enabled);
        take!(required_checks);
        take!(branch_checks);
        take!(tracked_cherry_pick_branches);
        take!(auto_verify_cherry_picked_prs);
    }
}

/// Merge policy portion of the effective configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Minimum number of valid approvals from OWNERS approvers.
    pub minimum_lgtm: u32,

    /// Labels that must all be present for merge eligibility.
    pub required_labels: Vec<String>,

    /// Allowed conventional-commit title prefixes. Empty disables the check.
    pub conventional_title_prefixes: Vec<String>,

    /// Whether the automerge flag is honored at all.
    pub automerge_enabled: bool,

    /// Checks required on every branch.
    pub required_checks: Vec<String>,

    /// Per-branch include/exclude adjustments.
    pub branch_checks: BTreeMap<String, BranchCheckOverride>,
}

impl MergePolicy {
    /// Returns the effective required check list for a target branch.
    pub fn required_checks_for(&self, branch: &str) -> Vec<String> {
        let mut checks = self.required_checks.clone();
        if let Some(rule) = self.branch_checks.get(branch) {
            for include in &rule.include {
                if !checks.contains(include) {
                    checks.push(include.clone());
                }
            }
            checks.retain(|c| !rule.exclude.contains(c));
        }
        checks
    }
}

/// Fully resolved configuration for one repository at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub repo: RepoId,
    pub allowed_events: Vec<String>,
    pub labels_enabled: bool,
    pub label_colors: BTreeMap<String, String>,
    /// Sorted ascending by threshold; the unbounded entry, if any, is last.
    pub size_thresholds: Vec<SizeThreshold>,
    pub merge: MergePolicy,
    pub tracked_cherry_pick_branches: Vec<String>,
    pub auto_verify_cherry_picked_prs: bool,
}

impl EffectiveConfig {
    /// Returns true if this event type is processed for the repository.
    pub fn event_allowed(&self, event_type: &str) -> bool {
        self.allowed_events.iter().any(|e| e == event_type)
    }

    /// Color for a managed label, falling back to the default palette entry.
    pub fn label_color(&self, label: &str) -> &str {
        self.label_colors
            .get(label)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LABEL_COLOR)
    }

    /// Returns true if this crate manages the given label name (and should
    /// therefore add/remove it during evaluation).
    pub fn manages_label(&self, label: &str) -> bool {
        self.label_colors.contains_key(label)
            || self.size_thresholds.iter().any(|t| t.label == label)
    }
}

/// The top-level policy document as loaded from disk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ConfigDocument {
    /// When true, repositories without an entry fail resolution instead of
    /// falling back to the global layer.
    #[serde(default)]
    pub require_repository_entry: bool,

    /// Global layer applied to every repository.
    #[serde(default)]
    pub defaults: ConfigLayer,

    /// Per-repository entries keyed by `owner/repo`.
    #[serde(default)]
    pub repositories: HashMap<String, ConfigLayer>,
}

/// Resolves effective configuration per delivery.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    document: ConfigDocument,
}

impl ConfigResolver {
    pub fn new(document: ConfigDocument) -> Self {
        ConfigResolver { document }
    }

    /// Parses a document from YAML (JSON is a subset and parses too).
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ConfigResolver::new(serde_yaml::from_str(text)?))
    }

    /// Loads the document from a file at startup.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_str(&std::fs::read_to_string(path)?)
    }

    /// Resolves the effective configuration for `repo`, overlaying the
    /// in-repository override file content when present.
    ///
    /// `override_file` is the raw content of [`OVERRIDE_FILE_PATH`] fetched
    /// from the repository, or `None` when the file does not exist. A file
    /// that exists but fails to parse is a `ConfigError` (the delivery fails
    /// fast rather than silently running under the wrong policy).
    pub fn resolve(
        &self,
        repo: &RepoId,
        override_file: Option<&[u8]>,
    ) -> Result<EffectiveConfig, ConfigError> {
        let mut layer = builtin_defaults();
        layer.overlay(&self.document.defaults);

        match self.document.repositories.get(&repo.full_name()) {
            Some(entry) => layer.overlay(entry),
            None if self.document.require_repository_entry => {
                return Err(ConfigError::UnknownRepository(repo.clone()));
            }
            None => {}
        }

        if let Some(bytes) = override_file {
            let text = String::from_utf8_lossy(bytes);
            let overrides: ConfigLayer = serde_yaml::from_str(&text)?;
            layer.overlay(&overrides);
        }

        Ok(normalize(repo.clone(), layer))
    }
}

/// Built-in lowest layer. Every key is set so the resolved config never has
/// holes regardless of what the document provides.
fn builtin_defaults() -> ConfigLayer {
    let mut colors = BTreeMap::new();
    colors.insert("hold".to_string(), "b60205".to_string());
    colors.insert("wip".to_string(), "fbca04".to_string());
    colors.insert("verified".to_string(), "0e8a16".to_string());
    colors.insert("automerge".to_string(), "1d76db".to_string());
    colors.insert("needs-rebase".to_string(), "e11d21".to_string());
    colors.insert("can-be-merged".to_string(), "0e8a16".to_string());
    // Size buckets graded green to red.
    colors.insert("size/XS".to_string(), "3cbf00".to_string());
    colors.insert("size/S".to_string(), "5d9801".to_string());
    colors.insert("size/M".to_string(), "7f7203".to_string());
    colors.insert("size/L".to_string(), "a14c05".to_string());
    colors.insert("size/XL".to_string(), "c32607".to_string());

    ConfigLayer {
        allowed_events: Some(vec![
            "pull_request".to_string(),
            "issue_comment".to_string(),
            "pull_request_review".to_string(),
            "check_run".to_string(),
            "branch_protection_rule".to_string(),
        ]),
        labels_enabled: Some(true),
        label_colors: Some(colors),
        size_thresholds: Some(vec![
            SizeThreshold {
                label: "size/XS".to_string(),
                max_lines: Some(10),
            },
            SizeThreshold {
                label: "size/S".to_string(),
                max_lines: Some(50),
            },
            SizeThreshold {
                label: "size/M".to_string(),
                max_lines: Some(150),
            },
            SizeThreshold {
                label: "size/L".to_string(),
                max_lines: Some(300),
            },
            SizeThreshold {
                label: "size/XL".to_string(),
                max_lines: None,
            },
        ]),
        minimum_lgtm: Some(1),
        required_labels: Some(Vec::new()),
        conventional_title_prefixes: Some(Vec::new()),
        automerge_enabled: Some(false),
        required_checks: Some(Vec::new()),
        branch_checks: Some(BTreeMap::new()),
        tracked_cherry_pick_branches: Some(Vec::new()),
        auto_verify_cherry_picked_prs: Some(false),
    }
}

/// Materializes a fully-overlaid layer into an [`EffectiveConfig`]:
/// sorts the threshold table (unbounded entry last) and replaces invalid
/// color values with [`DEFAULT_LABEL_COLOR`].
fn normalize(repo: RepoId, layer: ConfigLayer) -> EffectiveConfig {
    let mut size_thresholds = layer.size_thresholds.unwrap_or_default();
    size_thresholds.sort_by_key(|t| t.max_lines.unwrap_or(u64::MAX));

    let label_colors = layer
        .label_colors
        .unwrap_or_default()
        .into_iter()
        .map(|(name, color)| {
            if is_valid_color(&color) {
                (name, color)
            } else {
                (name, DEFAULT_LABEL_COLOR.to_string())
            }
        })
        .collect();

    EffectiveConfig {
        repo,
        allowed_events: layer.allowed_events.unwrap_or_default(),
        labels_enabled: layer.labels_enabled.unwrap_or(true),
        label_colors,
        size_thresholds,
        merge: MergePolicy {
            minimum_lgtm: layer.minimum_lgtm.unwrap_or(1),
            required_labels: layer.required_labels.unwrap_or_default(),
            conventional_title_prefixes: layer.conventional_title_prefixes.unwrap_or_default(),
            automerge_enabled: layer.automerge_enabled.unwrap_or(false),
            required_checks: layer.required_checks.unwrap_or_default(),
            branch_checks: layer.branch_checks.unwrap_or_default(),
        },
        tracked_cherry_pick_branches: layer.tracked_cherry_pick_branches.unwrap_or_default(),
        auto_verify_cherry_picked_prs: layer.auto_verify_cherry_picked_prs.unwrap_or(false),
    }
}

/// GitHub label colors are six hex digits without a leading `#`.
fn is_valid_color(color: &str) -> bool {
    color.len() == 6 && color.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    fn resolver(doc: &str) -> ConfigResolver {
        ConfigResolver::from_str(doc).unwrap()
    }

    #[test]
    fn empty_document_resolves_to_defaults() {
        let config = resolver("{}").resolve(&repo(), None).unwrap();
        assert!(config.labels_enabled);
        assert_eq!(config.merge.minimum_lgtm, 1);
        assert!(!config.merge.automerge_enabled);
        assert_eq!(config.size_thresholds.len(), 5);
        assert!(config.event_allowed("pull_request"));
        assert!(!config.event_allowed("workflow_dispatch"));
    }

    #[test]
    fn global_layer_overrides_defaults() {
        let config = resolver("defaults:\n  minimum_lgtm: 2\n")
            .resolve(&repo(), None)
            .unwrap();
        assert_eq!(config.merge.minimum_lgtm, 2);
    }

    #[test]
    fn repository_entry_overrides_global() {
        let doc = "\
defaults:
  minimum_lgtm: 2
  automerge_enabled: true
repositories:
  octo/widgets:
    minimum_lgtm: 3
";
        let config = resolver(doc).resolve(&repo(), None).unwrap();
        assert_eq!(config.merge.minimum_lgtm, 3);
        // Keys the repo entry does not set are inherited.
        assert!(config.merge.automerge_enabled);
    }

    #[test]
    fn override_file_wins_over_everything() {
        let doc = "\
repositories:
  octo/widgets:
    minimum_lgtm: 3
";
        let config = resolver(doc)
            .resolve(&repo(), Some(b"minimum_lgtm: 4\n"))
            .unwrap();
        assert_eq!(config.merge.minimum_lgtm, 4);
    }

    #[test]
    fn structured_keys_replace_whole_object() {
        let doc = "\
defaults:
  size_thresholds:
    - { label: tiny, max_lines: 5 }
    - { label: huge }
";
        let config = resolver(doc)
            .resolve(
                &repo(),
                Some(b"size_thresholds:\n  - { label: only }\n"),
            )
            .unwrap();
        // The override's table replaces the global table entirely; the
        // `tiny` bucket does not survive.
        assert_eq!(config.size_thresholds.len(), 1);
        assert_eq!(config.size_thresholds[0].label, "only");
    }

    #[test]
    fn unknown_repository_fails_only_when_required() {
        let strict = resolver("require_repository_entry: true\n");
        assert!(matches!(
            strict.resolve(&repo(), None),
            Err(ConfigError::UnknownRepository(_))
        ));

        let lax = resolver("{}");
        assert!(lax.resolve(&repo(), None).is_ok());
    }

    #[test]
    fn threshold_table_sorts_with_unbounded_last() {
        let doc = "\
defaults:
  size_thresholds:
    - { label: huge }
    - { label: big, max_lines: 300 }
    - { label: small, max_lines: 10 }
";
        let config = resolver(doc).resolve(&repo(), None).unwrap();
        let labels: Vec<_> = config.size_thresholds.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["small", "big", "huge"]);
        assert_eq!(config.size_thresholds.last().unwrap().max_lines, None);
    }

    #[test]
    fn invalid_color_falls_back_instead_of_failing() {
        let doc = "\
defaults:
  label_colors:
    hold: \"not-a-color\"
    wip: \"fbca04\"
";
        let config = resolver(doc).resolve(&repo(), None).unwrap();
        assert_eq!(config.label_color("hold"), DEFAULT_LABEL_COLOR);
        assert_eq!(config.label_color("wip"), "fbca04");
    }

    #[test]
    fn malformed_override_file_is_an_error() {
        let result = resolver("{}").resolve(&repo(), Some(b"{{{not yaml"));
        assert!(matches!(result, Err(ConfigError::InvalidDocument(_))));
    }

    #[test]
    fn branch_checks_include_and_exclude() {
        let doc = "\
defaults:
  required_checks: [ci/test, ci/lint]
  branch_checks:
    release:
      include: [ci/backport]
      exclude: [ci/lint]
";
        let config = resolver(doc).resolve(&repo(), None).unwrap();
        assert_eq!(
            config.merge.required_checks_for("release"),
            vec!["ci/test".to_string(), "ci/backport".to_string()]
        );
        assert_eq!(
            config.merge.required_checks_for("main"),
            vec!["ci/test".to_string(), "ci/lint".to_string()]
        );
    }

    #[test]
    fn manages_label_covers_palette_and_size_buckets() {
        let config = resolver("{}").resolve(&repo(), None).unwrap();
        assert!(config.manages_label("hold"));
        assert!(config.manages_label("size/XL"));
        assert!(!config.manages_label("user-applied-label"));
    }
}
