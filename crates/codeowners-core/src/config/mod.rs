//! Plugin configuration: general defaults, per-project settings, and
//! per-branch overrides, resolved into a flat [`BranchSettings`].
//!
//! ```json
//! {
//!   "general": { "backend": "find-owners", "required_approval": "Code-Review+1" },
//!   "projects": {
//!     "platform": {
//!       "settings": { "fallback_code_owners": "ALL_USERS" },
//!       "branches": { "refs/heads/stable": { "required_approval": "Code-Review+2" } }
//!     }
//!   }
//! }
//! ```
//!
//! Branch overrides win over project settings, project settings win over
//! settings inherited from parent projects, and those win over `general`.

pub mod approval;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{find_owners, BackendRegistry};
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{BranchNameKey, CodeOwnerReference};
use crate::query::guards::{clamp_import_depth, parse_flag, DEFAULT_MAX_IMPORT_DEPTH};
use crate::store::RepositoryStorage;

pub use approval::RequiredApproval;

pub const ENV_DISABLED: &str = "CODEOWNERS_DISABLED";
pub const ENV_FALLBACK: &str = "CODEOWNERS_FALLBACK";
pub const ENV_MAX_IMPORT_DEPTH: &str = "CODEOWNERS_MAX_IMPORT_DEPTH";

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Who owns paths for which no declaration defines owners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackCodeOwners {
    #[default]
    None,
    AllUsers,
    ProjectOwners,
}

impl FromStr for FallbackCodeOwners {
    type Err = OwnersError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "NONE" => Ok(FallbackCodeOwners::None),
            "ALL_USERS" => Ok(FallbackCodeOwners::AllUsers),
            "PROJECT_OWNERS" => Ok(FallbackCodeOwners::ProjectOwners),
            other => Err(OwnersError::configuration(format!(
                "invalid fallback code owners '{other}' (expected NONE, ALL_USERS or PROJECT_OWNERS)"
            ))),
        }
    }
}

impl fmt::Display for FallbackCodeOwners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackCodeOwners::None => "NONE",
            FallbackCodeOwners::AllUsers => "ALL_USERS",
            FallbackCodeOwners::ProjectOwners => "PROJECT_OWNERS",
        })
    }
}

/// Which files of a merge commit need code owner approval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeCommitStrategy {
    /// Every file that differs from the first parent.
    #[default]
    AllChangedFiles,
    /// Only files that differ from the auto-merge, i.e. conflict resolutions.
    FilesWithConflictResolution,
}

// ---------------------------------------------------------------------------
// Raw settings
// ---------------------------------------------------------------------------

/// One layer of settings; unset fields fall through to the layer below.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsOverlay {
    pub disabled: Option<bool>,
    /// Regular expressions matched against full branch names.
    pub disabled_branches: Option<Vec<String>>,
    pub backend: Option<String>,
    pub file_extension: Option<String>,
    pub required_approval: Option<String>,
    pub override_approvals: Option<Vec<String>>,
    pub fallback_code_owners: Option<FallbackCodeOwners>,
    pub global_code_owners: Option<Vec<String>>,
    pub exempted_users: Option<Vec<String>>,
    pub enable_implicit_approvals: Option<bool>,
    pub ignore_self_approval: Option<bool>,
    pub merge_commit_strategy: Option<MergeCommitStrategy>,
    pub max_import_depth: Option<usize>,
    pub allowed_email_domains: Option<Vec<String>>,
    pub reject_non_resolvable_code_owners: Option<bool>,
    pub reject_non_resolvable_imports: Option<bool>,
    pub enforce_visibility: Option<bool>,
}

macro_rules! overlay_fields {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$source.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

impl SettingsOverlay {
    /// Apply `other` on top of `self`.
    pub fn overlay(&mut self, other: &SettingsOverlay) {
        overlay_fields!(
            self,
            other,
            disabled,
            disabled_branches,
            backend,
            file_extension,
            required_approval,
            override_approvals,
            fallback_code_owners,
            global_code_owners,
            exempted_users,
            enable_implicit_approvals,
            ignore_self_approval,
            merge_commit_strategy,
            max_import_depth,
            allowed_email_domains,
            reject_non_resolvable_code_owners,
            reject_non_resolvable_imports,
            enforce_visibility,
        );
    }

    fn validate(&self, scope: &str, registry: &BackendRegistry) -> OwnersResult<()> {
        let scoped = |e: OwnersError| match e {
            OwnersError::Configuration(message) => {
                OwnersError::configuration(format!("{scope}: {message}"))
            }
            other => other,
        };
        if let Some(backend) = &self.backend {
            registry.get(backend).map_err(scoped)?;
        }
        if let Some(spec) = &self.required_approval {
            spec.parse::<RequiredApproval>().map_err(scoped)?;
        }
        for spec in self.override_approvals.iter().flatten() {
            spec.parse::<RequiredApproval>().map_err(scoped)?;
        }
        for pattern in self.disabled_branches.iter().flatten() {
            compile_branch_pattern(pattern).map_err(scoped)?;
        }
        if self.max_import_depth == Some(0) {
            return Err(OwnersError::configuration(format!(
                "{scope}: max_import_depth must be at least 1"
            )));
        }
        if let Some(ext) = &self.file_extension {
            if ext.contains('/') || ext.contains('.') {
                return Err(OwnersError::configuration(format!(
                    "{scope}: file_extension '{ext}' must not contain '/' or '.'"
                )));
            }
        }
        Ok(())
    }
}

fn compile_branch_pattern(pattern: &str) -> OwnersResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        OwnersError::configuration(format!("invalid disabled branch pattern '{pattern}': {e}"))
    })
}

/// Plugin-wide defaults are a plain overlay.
pub type GeneralConfig = SettingsOverlay;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub settings: SettingsOverlay,
    /// Overrides keyed by full branch name.
    pub branches: BTreeMap<String, SettingsOverlay>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeOwnersConfig {
    pub general: GeneralConfig,
    pub projects: BTreeMap<String, ProjectConfig>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl CodeOwnersConfig {
    pub fn from_json(json: &str) -> OwnersResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| OwnersError::configuration(format!("invalid code owners config: {e}")))
    }

    pub fn from_path(path: &Path) -> OwnersResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        info!("Loaded code owners config from {}", path.display());
        Ok(config)
    }

    /// Apply `CODEOWNERS_*` environment overrides to the general settings.
    pub fn apply_env_overrides(&mut self) -> OwnersResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> OwnersResult<()> {
        if let Some(raw) = lookup(ENV_DISABLED) {
            match parse_flag(Some(&raw)) {
                Some(disabled) => self.general.disabled = Some(disabled),
                None => {
                    return Err(OwnersError::configuration(format!(
                        "{ENV_DISABLED} must be a boolean, got '{raw}'"
                    )))
                }
            }
        }
        if let Some(raw) = lookup(ENV_FALLBACK) {
            self.general.fallback_code_owners = Some(raw.parse()?);
        }
        if let Some(raw) = lookup(ENV_MAX_IMPORT_DEPTH) {
            let depth: usize = raw.trim().parse().map_err(|_| {
                OwnersError::configuration(format!(
                    "{ENV_MAX_IMPORT_DEPTH} must be a positive number, got '{raw}'"
                ))
            })?;
            self.general.max_import_depth = Some(depth);
        }
        Ok(())
    }

    /// Reject configurations that would fail at request time.
    pub fn validate(
        &self,
        registry: &BackendRegistry,
        storage: &dyn RepositoryStorage,
    ) -> OwnersResult<()> {
        self.general.validate("general", registry)?;
        for (name, project) in &self.projects {
            if !storage.project_exists(name) {
                return Err(OwnersError::configuration(format!(
                    "code owners config references unknown project '{name}'"
                )));
            }
            project.settings.validate(&format!("project '{name}'"), registry)?;
            for (branch, overlay) in &project.branches {
                overlay.validate(&format!("project '{name}' branch '{branch}'"), registry)?;
            }
        }
        Ok(())
    }

    /// Resolve the effective settings for one branch.
    pub fn settings_for(
        &self,
        branch: &BranchNameKey,
        storage: &dyn RepositoryStorage,
    ) -> OwnersResult<BranchSettings> {
        let mut lineage = vec![branch.project.clone()];
        let mut seen: HashSet<String> = lineage.iter().cloned().collect();
        let mut current = branch.project.clone();
        while let Some(parent) = storage.parent_project(&current) {
            if !seen.insert(parent.clone()) {
                break;
            }
            lineage.push(parent.clone());
            current = parent;
        }

        let mut merged = self.general.clone();
        for project in lineage.iter().rev() {
            if let Some(config) = self.projects.get(project) {
                merged.overlay(&config.settings);
            }
        }
        if let Some(overlay) = self
            .projects
            .get(&branch.project)
            .and_then(|config| config.branches.get(&branch.branch))
        {
            merged.overlay(overlay);
        }
        BranchSettings::resolve(branch, &merged)
    }
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Fully resolved settings of one branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchSettings {
    pub branch: BranchNameKey,
    pub disabled: bool,
    pub backend_id: String,
    pub file_extension: Option<String>,
    pub required_approval: RequiredApproval,
    pub override_approvals: Vec<RequiredApproval>,
    pub fallback_code_owners: FallbackCodeOwners,
    pub global_code_owners: Vec<CodeOwnerReference>,
    pub exempted_users: Vec<String>,
    pub enable_implicit_approvals: bool,
    pub ignore_self_approval: bool,
    pub merge_commit_strategy: MergeCommitStrategy,
    pub max_import_depth: usize,
    pub allowed_email_domains: Vec<String>,
    pub reject_non_resolvable_code_owners: bool,
    pub reject_non_resolvable_imports: bool,
    pub enforce_visibility: bool,
}

impl BranchSettings {
    pub fn defaults(branch: &BranchNameKey) -> Self {
        Self {
            branch: branch.clone(),
            disabled: false,
            backend_id: find_owners::BACKEND_ID.to_string(),
            file_extension: None,
            required_approval: RequiredApproval::default(),
            override_approvals: Vec::new(),
            fallback_code_owners: FallbackCodeOwners::None,
            global_code_owners: Vec::new(),
            exempted_users: Vec::new(),
            enable_implicit_approvals: false,
            ignore_self_approval: false,
            merge_commit_strategy: MergeCommitStrategy::AllChangedFiles,
            max_import_depth: DEFAULT_MAX_IMPORT_DEPTH,
            allowed_email_domains: Vec::new(),
            reject_non_resolvable_code_owners: true,
            reject_non_resolvable_imports: true,
            enforce_visibility: true,
        }
    }

    fn resolve(branch: &BranchNameKey, raw: &SettingsOverlay) -> OwnersResult<Self> {
        let mut settings = Self::defaults(branch);

        let mut disabled = raw.disabled.unwrap_or(false);
        for pattern in raw.disabled_branches.iter().flatten() {
            if compile_branch_pattern(pattern)?.is_match(&branch.branch) {
                debug!("Code owners disabled for {} by pattern '{}'", branch, pattern);
                disabled = true;
            }
        }
        settings.disabled = disabled;

        if let Some(backend) = &raw.backend {
            settings.backend_id = backend.clone();
        }
        settings.file_extension = raw.file_extension.clone().filter(|ext| !ext.is_empty());
        if let Some(spec) = &raw.required_approval {
            settings.required_approval = spec.parse()?;
        }
        settings.override_approvals = raw
            .override_approvals
            .iter()
            .flatten()
            .map(|spec| spec.parse::<RequiredApproval>())
            .collect::<OwnersResult<_>>()?;
        settings.fallback_code_owners = raw.fallback_code_owners.unwrap_or_default();
        settings.global_code_owners = raw
            .global_code_owners
            .iter()
            .flatten()
            .map(|email| CodeOwnerReference::new(email.trim()))
            .collect();
        settings.exempted_users = raw.exempted_users.clone().unwrap_or_default();
        settings.enable_implicit_approvals = raw.enable_implicit_approvals.unwrap_or(false);
        settings.ignore_self_approval = raw.ignore_self_approval.unwrap_or(false);
        settings.merge_commit_strategy = raw.merge_commit_strategy.unwrap_or_default();
        settings.max_import_depth =
            clamp_import_depth(raw.max_import_depth.unwrap_or(DEFAULT_MAX_IMPORT_DEPTH));
        settings.allowed_email_domains = raw
            .allowed_email_domains
            .iter()
            .flatten()
            .map(|domain| domain.trim().trim_start_matches('@').to_lowercase())
            .collect();
        settings.reject_non_resolvable_code_owners =
            raw.reject_non_resolvable_code_owners.unwrap_or(true);
        settings.reject_non_resolvable_imports = raw.reject_non_resolvable_imports.unwrap_or(true);
        settings.enforce_visibility = raw.enforce_visibility.unwrap_or(true);
        Ok(settings)
    }

    /// Whether `email` belongs to an allowed domain; no domains means all are.
    pub fn is_email_domain_allowed(&self, email: &str) -> bool {
        if self.allowed_email_domains.is_empty() {
            return true;
        }
        match email.rsplit_once('@') {
            Some((_, domain)) => {
                let domain = domain.to_lowercase();
                self.allowed_email_domains.iter().any(|d| *d == domain)
            }
            None => false,
        }
    }

    /// Implicit approvals are suppressed when self approvals are ignored.
    pub fn implicit_approvals_active(&self) -> bool {
        self.enable_implicit_approvals && !self.ignore_self_approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStorage;

    fn storage() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage.create_project("All-Projects", None);
        storage.create_project("platform", Some("All-Projects"));
        storage
    }

    #[test]
    fn test_defaults() {
        let config = CodeOwnersConfig::default();
        let branch = BranchNameKey::new("platform", "main");
        let settings = config.settings_for(&branch, &storage()).unwrap();
        assert_eq!(settings, BranchSettings::defaults(&branch));
        assert_eq!(settings.required_approval.to_string(), "Code-Review+1");
        assert_eq!(settings.max_import_depth, 5);
    }

    #[test]
    fn test_layering_branch_over_project_over_parent_over_general() {
        let config = CodeOwnersConfig::from_json(
            r#"{
                "general": { "required_approval": "Code-Review+1", "backend": "json" },
                "projects": {
                    "All-Projects": { "settings": { "fallback_code_owners": "ALL_USERS" } },
                    "platform": {
                        "settings": { "backend": "find-owners" },
                        "branches": { "refs/heads/stable": { "required_approval": "Code-Review+2" } }
                    }
                }
            }"#,
        )
        .unwrap();
        let storage = storage();

        let main = config
            .settings_for(&BranchNameKey::new("platform", "main"), &storage)
            .unwrap();
        assert_eq!(main.backend_id, "find-owners");
        assert_eq!(main.fallback_code_owners, FallbackCodeOwners::AllUsers);
        assert_eq!(main.required_approval.value, 1);

        let stable = config
            .settings_for(&BranchNameKey::new("platform", "stable"), &storage)
            .unwrap();
        assert_eq!(stable.required_approval.value, 2);
    }

    #[test]
    fn test_disabled_branches() {
        let config = CodeOwnersConfig::from_json(
            r#"{ "general": { "disabled_branches": ["refs/heads/experimental/.*"] } }"#,
        )
        .unwrap();
        let storage = storage();
        assert!(config
            .settings_for(&BranchNameKey::new("platform", "experimental/x"), &storage)
            .unwrap()
            .disabled);
        assert!(!config
            .settings_for(&BranchNameKey::new("platform", "main"), &storage)
            .unwrap()
            .disabled);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = CodeOwnersConfig::from_json(r#"{ "general": { "bakend": "json" } }"#);
        assert!(matches!(err, Err(OwnersError::Configuration(_))));
    }

    #[test]
    fn test_validate_reports_actionable_errors() {
        let registry = BackendRegistry::default();
        let storage = storage();

        let unknown_backend =
            CodeOwnersConfig::from_json(r#"{ "general": { "backend": "proto" } }"#).unwrap();
        match unknown_backend.validate(&registry, &storage) {
            Err(OwnersError::Configuration(message)) => {
                assert!(message.contains("general"));
                assert!(message.contains("proto"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let bad_approval = CodeOwnersConfig::from_json(
            r#"{ "projects": { "platform": { "settings": { "required_approval": "CR" } } } }"#,
        )
        .unwrap();
        assert!(bad_approval.validate(&registry, &storage).is_err());

        let unknown_project =
            CodeOwnersConfig::from_json(r#"{ "projects": { "nope": {} } }"#).unwrap();
        assert!(unknown_project.validate(&registry, &storage).is_err());

        let bad_pattern =
            CodeOwnersConfig::from_json(r#"{ "general": { "disabled_branches": ["("] } }"#)
                .unwrap();
        assert!(bad_pattern.validate(&registry, &storage).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = CodeOwnersConfig::default();
        config
            .apply_overrides_from(|name| match name {
                ENV_DISABLED => Some("off".to_string()),
                ENV_FALLBACK => Some("all_users".to_string()),
                ENV_MAX_IMPORT_DEPTH => Some("3".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.general.disabled, Some(false));
        assert_eq!(config.general.fallback_code_owners, Some(FallbackCodeOwners::AllUsers));
        assert_eq!(config.general.max_import_depth, Some(3));

        let mut bad = CodeOwnersConfig::default();
        assert!(bad
            .apply_overrides_from(|name| (name == ENV_FALLBACK).then(|| "SOME".to_string()))
            .is_err());
    }

    #[test]
    fn test_email_domains() {
        let mut settings = BranchSettings::defaults(&BranchNameKey::new("p", "main"));
        assert!(settings.is_email_domain_allowed("a@anything.org"));
        settings.allowed_email_domains = vec!["x.com".to_string()];
        assert!(settings.is_email_domain_allowed("a@X.com"));
        assert!(!settings.is_email_domain_allowed("a@y.com"));
    }
}
