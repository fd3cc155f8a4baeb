//! Shared typed models used across the backend, resolver, and query layers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Owner reference that stands for every user.
pub const ALL_USERS_WILDCARD: &str = "*";

/// Branch that holds repository metadata and the project's default config.
pub const META_CONFIG_BRANCH: &str = "refs/meta/config";

const BRANCH_PREFIX: &str = "refs/heads/";

// ---------------------------------------------------------------------------
// 1. Identifiers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(pub u64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change {}", self.0)
    }
}

/// A branch of a project.  Short branch names are expanded to `refs/heads/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchNameKey {
    pub project: String,
    pub branch: String,
}

impl BranchNameKey {
    pub fn new(project: impl Into<String>, branch: impl AsRef<str>) -> Self {
        let branch = branch.as_ref();
        let branch = if branch.starts_with("refs/") {
            branch.to_string()
        } else {
            format!("{BRANCH_PREFIX}{branch}")
        };
        Self {
            project: project.into(),
            branch,
        }
    }

    pub fn meta_config(project: impl Into<String>) -> Self {
        Self::new(project, META_CONFIG_BRANCH)
    }

    pub fn is_meta_config(&self) -> bool {
        self.branch == META_CONFIG_BRANCH
    }

    pub fn short_name(&self) -> &str {
        self.branch
            .strip_prefix(BRANCH_PREFIX)
            .unwrap_or(&self.branch)
    }
}

impl fmt::Display for BranchNameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.branch)
    }
}

/// Identifies one declaration file: the folder it governs plus an optional
/// non-default file name (set for imported files such as `OWNERS_build`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeOwnerConfigKey {
    pub project: String,
    pub branch: String,
    pub folder_path: String,
    pub file_name: Option<String>,
}

impl CodeOwnerConfigKey {
    pub fn new(branch: &BranchNameKey, folder_path: impl Into<String>) -> Self {
        Self {
            project: branch.project.clone(),
            branch: branch.branch.clone(),
            folder_path: folder_path.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn branch_key(&self) -> BranchNameKey {
        BranchNameKey {
            project: self.project.clone(),
            branch: self.branch.clone(),
        }
    }

    /// Absolute path of the declaration file, given the backend's default name.
    pub fn file_path(&self, default_file_name: &str) -> String {
        let name = self.file_name.as_deref().unwrap_or(default_file_name);
        if self.folder_path.ends_with('/') {
            format!("{}{}", self.folder_path, name)
        } else {
            format!("{}/{}", self.folder_path, name)
        }
    }
}

impl fmt::Display for CodeOwnerConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_name {
            Some(name) => write!(
                f,
                "{}:{}:{} ({})",
                self.project, self.branch, self.folder_path, name
            ),
            None => write!(f, "{}:{}:{}", self.project, self.branch, self.folder_path),
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Owner references and annotations
// ---------------------------------------------------------------------------

/// An unresolved owner reference: an email or the all-users wildcard.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeOwnerReference {
    pub email: String,
}

impl CodeOwnerReference {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }

    pub fn all_users() -> Self {
        Self::new(ALL_USERS_WILDCARD)
    }

    pub fn is_all_users(&self) -> bool {
        self.email == ALL_USERS_WILDCARD
    }

    /// Emails are compared without regard to ASCII case.
    pub fn names(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email)
    }
}

impl fmt::Display for CodeOwnerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.email)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeOwnerAnnotation(pub String);

impl CodeOwnerAnnotation {
    pub const NEVER_SUGGEST: &'static str = "NEVER_SUGGEST";
    pub const LAST_RESORT_SUGGESTION: &'static str = "LAST_RESORT_SUGGESTION";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn never_suggest() -> Self {
        Self::new(Self::NEVER_SUGGEST)
    }

    pub fn last_resort_suggestion() -> Self {
        Self::new(Self::LAST_RESORT_SUGGESTION)
    }

    pub fn is_known(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::NEVER_SUGGEST | Self::LAST_RESORT_SUGGESTION
        )
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

/// Annotations keyed by the email of the reference they are attached to.
pub type Annotations = BTreeMap<String, BTreeSet<CodeOwnerAnnotation>>;

// ---------------------------------------------------------------------------
// 3. Imports
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeOwnerConfigImportMode {
    /// Global owners, matching per-file owners, nested imports, and the
    /// `ignore_parent_code_owners` flag of the imported file.
    All,
    /// Only owner sets without path expressions.
    GlobalCodeOwnerSetsOnly,
}

impl CodeOwnerConfigImportMode {
    pub fn imports_per_file_code_owners(self) -> bool {
        self == CodeOwnerConfigImportMode::All
    }

    pub fn imports_ignore_parent_code_owners(self) -> bool {
        self == CodeOwnerConfigImportMode::All
    }

    /// Whether importing with `self` takes at least what `other` takes.
    pub fn covers(self, other: CodeOwnerConfigImportMode) -> bool {
        self == CodeOwnerConfigImportMode::All || self == other
    }

    /// Mode for an import nested inside a file that was imported with `self`.
    pub fn narrow(self, nested: CodeOwnerConfigImportMode) -> CodeOwnerConfigImportMode {
        match self {
            CodeOwnerConfigImportMode::All => nested,
            CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly => {
                CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly
            }
        }
    }
}

/// A reference from one declaration file to another.
///
/// `project` and `branch` default to the importing file's project and
/// branch; `file_path` is absolute or relative to the importing folder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeOwnerConfigReference {
    pub import_mode: CodeOwnerConfigImportMode,
    pub project: Option<String>,
    pub branch: Option<String>,
    pub file_path: String,
}

impl CodeOwnerConfigReference {
    pub fn new(import_mode: CodeOwnerConfigImportMode, file_path: impl Into<String>) -> Self {
        Self {
            import_mode,
            project: None,
            branch: None,
            file_path: file_path.into(),
        }
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn in_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

impl fmt::Display for CodeOwnerConfigReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{project}:")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "{branch}:")?;
        }
        f.write_str(&self.file_path)
    }
}

// ---------------------------------------------------------------------------
// 4. Owner sets and declaration files
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeOwnerSet {
    /// Empty for a global owner set of the folder.
    pub path_expressions: Vec<String>,
    pub exclusions: Vec<String>,
    pub ignore_global_and_parent_code_owners: bool,
    pub code_owners: IndexSet<CodeOwnerReference>,
    pub annotations: Annotations,
    pub imports: Vec<CodeOwnerConfigReference>,
}

impl CodeOwnerSet {
    pub fn global<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code_owners: emails.into_iter().map(CodeOwnerReference::new).collect(),
            ..Self::default()
        }
    }

    pub fn per_file<I, S>(path_expressions: &[&str], emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_expressions: path_expressions.iter().map(|e| e.to_string()).collect(),
            ..Self::global(emails)
        }
    }

    pub fn is_global(&self) -> bool {
        self.path_expressions.is_empty()
    }

    pub fn annotate(&mut self, email: &str, annotation: CodeOwnerAnnotation) {
        self.annotations
            .entry(email.to_string())
            .or_default()
            .insert(annotation);
    }
}

/// A parsed declaration file (`OwnershipDeclaration`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeOwnerConfig {
    pub key: CodeOwnerConfigKey,
    /// Revision the file was read from.
    pub revision: String,
    pub ignore_parent_code_owners: bool,
    pub code_owner_sets: Vec<CodeOwnerSet>,
    pub imports: Vec<CodeOwnerConfigReference>,
}

impl CodeOwnerConfig {
    pub fn new(key: CodeOwnerConfigKey, revision: impl Into<String>) -> Self {
        Self {
            key,
            revision: revision.into(),
            ignore_parent_code_owners: false,
            code_owner_sets: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn global_code_owner_sets(&self) -> impl Iterator<Item = &CodeOwnerSet> {
        self.code_owner_sets.iter().filter(|set| set.is_global())
    }

    pub fn per_file_code_owner_sets(&self) -> impl Iterator<Item = &CodeOwnerSet> {
        self.code_owner_sets.iter().filter(|set| !set.is_global())
    }

    /// Every email referenced by this file, in declaration order.
    pub fn referenced_emails(&self) -> IndexSet<String> {
        self.code_owner_sets
            .iter()
            .flat_map(|set| set.code_owners.iter())
            .filter(|reference| !reference.is_all_users())
            .map(|reference| reference.email.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 5. Resolved owners
// ---------------------------------------------------------------------------

/// A permission-checked account that owns a path.
///
/// Equality and hashing only consider the account, so two references that
/// resolve to the same account collapse into one owner.
#[derive(Clone, Debug, Serialize)]
pub struct CodeOwner {
    pub account_id: AccountId,
    pub email: String,
}

impl CodeOwner {
    pub fn new(account_id: AccountId, email: impl Into<String>) -> Self {
        Self {
            account_id,
            email: email.into(),
        }
    }
}

impl PartialEq for CodeOwner {
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id
    }
}

impl Eq for CodeOwner {}

impl Hash for CodeOwner {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.account_id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// 6. Changes and statuses
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub change_kind: ChangeKind,
}

impl ChangedFile {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            old_path: None,
            new_path: Some(path.into()),
            change_kind: ChangeKind::Added,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            old_path: None,
            new_path: Some(path.into()),
            change_kind: ChangeKind::Modified,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            old_path: Some(path.into()),
            new_path: None,
            change_kind: ChangeKind::Deleted,
        }
    }

    pub fn renamed(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: Some(old_path.into()),
            new_path: Some(new_path.into()),
            change_kind: ChangeKind::Renamed,
        }
    }

    pub fn copied(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            change_kind: ChangeKind::Copied,
            ..Self::renamed(old_path, new_path)
        }
    }

    /// Paths whose ownership has to be checked, new path first.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.new_path
            .as_deref()
            .into_iter()
            .chain(self.old_path.as_deref())
    }
}

/// Ordered from worst to best: `a < b` means `b` is closer to approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeOwnerStatus {
    InsufficientReviewers,
    Pending,
    Approved,
}

impl fmt::Display for CodeOwnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodeOwnerStatus::InsufficientReviewers => "INSUFFICIENT_REVIEWERS",
            CodeOwnerStatus::Pending => "PENDING",
            CodeOwnerStatus::Approved => "APPROVED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PathCodeOwnerStatus {
    pub path: String,
    pub status: CodeOwnerStatus,
    pub reasons: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileCodeOwnerStatus {
    pub change_kind: ChangeKind,
    pub old_path_status: Option<PathCodeOwnerStatus>,
    pub new_path_status: Option<PathCodeOwnerStatus>,
}

impl FileCodeOwnerStatus {
    pub fn statuses(&self) -> impl Iterator<Item = &PathCodeOwnerStatus> {
        self.new_path_status
            .iter()
            .chain(self.old_path_status.iter())
    }

    pub fn is_approved(&self) -> bool {
        self.statuses()
            .all(|status| status.status == CodeOwnerStatus::Approved)
    }
}

/// The change metadata the approval check needs from the review tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub project: String,
    pub branch: String,
    pub owner: AccountId,
    /// Uploader of the current revision.
    pub uploader: AccountId,
    pub current_revision: String,
    /// Parents of the current revision; more than one for merge commits.
    pub parent_revisions: Vec<String>,
    pub auto_merge_revision: Option<String>,
}

impl Change {
    pub fn branch_key(&self) -> BranchNameKey {
        BranchNameKey::new(self.project.clone(), &self.branch)
    }

    pub fn is_merge(&self) -> bool {
        self.parent_revisions.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_key_expands_short_names() {
        let branch = BranchNameKey::new("p", "main");
        assert_eq!(branch.branch, "refs/heads/main");
        assert_eq!(branch.short_name(), "main");
        assert!(!branch.is_meta_config());
        assert!(BranchNameKey::meta_config("p").is_meta_config());
    }

    #[test]
    fn test_config_key_file_path() {
        let branch = BranchNameKey::new("p", "main");
        assert_eq!(CodeOwnerConfigKey::new(&branch, "/").file_path("OWNERS"), "/OWNERS");
        assert_eq!(
            CodeOwnerConfigKey::new(&branch, "/a/b").file_path("OWNERS"),
            "/a/b/OWNERS"
        );
        assert_eq!(
            CodeOwnerConfigKey::new(&branch, "/a")
                .with_file_name("OWNERS_build")
                .file_path("OWNERS"),
            "/a/OWNERS_build"
        );
    }

    #[test]
    fn test_code_owner_equality_ignores_email() {
        let a = CodeOwner::new(AccountId(1), "a@x.com");
        let b = CodeOwner::new(AccountId(1), "alias@x.com");
        assert_eq!(a, b);
        let set: IndexSet<CodeOwner> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_status_ordering_is_monotonic() {
        assert!(CodeOwnerStatus::InsufficientReviewers < CodeOwnerStatus::Pending);
        assert!(CodeOwnerStatus::Pending < CodeOwnerStatus::Approved);
    }

    #[test]
    fn test_import_mode_narrowing() {
        use CodeOwnerConfigImportMode::*;
        assert_eq!(All.narrow(GlobalCodeOwnerSetsOnly), GlobalCodeOwnerSetsOnly);
        assert_eq!(GlobalCodeOwnerSetsOnly.narrow(All), GlobalCodeOwnerSetsOnly);
        assert_eq!(All.narrow(All), All);
    }

    #[test]
    fn test_changed_file_paths_new_first() {
        let file = ChangedFile::renamed("/old.txt", "/new.txt");
        let paths: Vec<&str> = file.paths().collect();
        assert_eq!(paths, vec!["/new.txt", "/old.txt"]);
    }
}
