//! In-memory collaborators for embedding and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use crate::backend::matchers::glob_matches;
use crate::errors::OwnersResult;
use crate::models::{AccountId, BranchNameKey, Change, ChangeId, ChangedFile};
use crate::store::{AccountDirectory, DiffProvider, PermissionBackend, RepositoryStorage, ReviewBackend};

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct ProjectState {
    parent: Option<String>,
    refs: BTreeMap<String, String>,
    trees: HashMap<String, Tree>,
    next_revision: u64,
}

/// Projects with branches of immutable file trees.
///
/// Every commit creates a new revision id, so callers can evaluate older
/// revisions while newer ones exist.
#[derive(Default)]
pub struct InMemoryStorage {
    projects: RwLock<BTreeMap<String, ProjectState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_project(&self, name: &str, parent: Option<&str>) {
        let mut projects = self.projects.write();
        let project = projects.entry(name.to_string()).or_default();
        project.parent = parent.map(str::to_string);
    }

    /// Write files on top of the branch head and return the new revision.
    pub fn commit(&self, branch: &BranchNameKey, files: &[(&str, &str)]) -> String {
        self.apply(branch, |tree| {
            for (path, content) in files {
                tree.insert(absolute(path), content.as_bytes().to_vec());
            }
        })
    }

    /// Like [`InMemoryStorage::commit`] for content that need not be text.
    pub fn commit_bytes(&self, branch: &BranchNameKey, files: &[(&str, Vec<u8>)]) -> String {
        self.apply(branch, |tree| {
            for (path, content) in files {
                tree.insert(absolute(path), content.clone());
            }
        })
    }

    pub fn delete_file(&self, branch: &BranchNameKey, path: &str) -> String {
        self.apply(branch, |tree| {
            tree.remove(&absolute(path));
        })
    }

    fn apply(&self, branch: &BranchNameKey, change: impl FnOnce(&mut Tree)) -> String {
        let mut projects = self.projects.write();
        let project = projects.entry(branch.project.clone()).or_default();
        let mut tree = project
            .refs
            .get(&branch.branch)
            .and_then(|rev| project.trees.get(rev))
            .cloned()
            .unwrap_or_default();
        change(&mut tree);
        project.next_revision += 1;
        let revision = format!("{}-r{}", branch.project, project.next_revision);
        project.trees.insert(revision.clone(), tree);
        project.refs.insert(branch.branch.clone(), revision.clone());
        revision
    }
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl RepositoryStorage for InMemoryStorage {
    fn read_file(&self, project: &str, revision: &str, path: &str) -> OwnersResult<Option<Vec<u8>>> {
        let projects = self.projects.read();
        Ok(projects
            .get(project)
            .and_then(|p| p.trees.get(revision))
            .and_then(|tree| tree.get(&absolute(path)))
            .cloned())
    }

    fn list_files(
        &self,
        project: &str,
        revision: &str,
        glob: Option<&str>,
    ) -> OwnersResult<Vec<String>> {
        let projects = self.projects.read();
        let Some(tree) = projects.get(project).and_then(|p| p.trees.get(revision)) else {
            return Ok(vec![]);
        };
        Ok(tree
            .keys()
            .filter(|path| glob.map_or(true, |g| glob_matches(g, &path[1..])))
            .cloned()
            .collect())
    }

    fn resolve_ref(&self, project: &str, reference: &str) -> OwnersResult<Option<String>> {
        let projects = self.projects.read();
        Ok(projects
            .get(project)
            .and_then(|p| p.refs.get(reference))
            .cloned())
    }

    fn project_exists(&self, project: &str) -> bool {
        self.projects.read().contains_key(project)
    }

    fn parent_project(&self, project: &str) -> Option<String> {
        self.projects
            .read()
            .get(project)
            .and_then(|p| p.parent.clone())
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

struct AccountEntry {
    emails: Vec<String>,
    service_user: bool,
    active: bool,
}

#[derive(Default)]
struct AccountsState {
    accounts: BTreeMap<AccountId, AccountEntry>,
    hidden: HashSet<(AccountId, AccountId)>,
}

#[derive(Default)]
pub struct InMemoryAccounts {
    state: RwLock<AccountsState>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, id: u64, email: &str) -> AccountId {
        let account = AccountId(id);
        self.state.write().accounts.insert(
            account,
            AccountEntry {
                emails: vec![email.to_string()],
                service_user: false,
                active: true,
            },
        );
        account
    }

    pub fn add_email(&self, account: AccountId, email: &str) {
        if let Some(entry) = self.state.write().accounts.get_mut(&account) {
            entry.emails.push(email.to_string());
        }
    }

    pub fn mark_service_user(&self, account: AccountId) {
        if let Some(entry) = self.state.write().accounts.get_mut(&account) {
            entry.service_user = true;
        }
    }

    pub fn deactivate(&self, account: AccountId) {
        if let Some(entry) = self.state.write().accounts.get_mut(&account) {
            entry.active = false;
        }
    }

    /// Make `target` invisible to `viewer`.
    pub fn hide(&self, viewer: AccountId, target: AccountId) {
        self.state.write().hidden.insert((viewer, target));
    }
}

impl AccountDirectory for InMemoryAccounts {
    fn accounts_by_email(&self, email: &str) -> OwnersResult<BTreeSet<AccountId>> {
        let state = self.state.read();
        Ok(state
            .accounts
            .iter()
            .filter(|(_, entry)| {
                entry.active && entry.emails.iter().any(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|(id, _)| *id)
            .collect())
    }

    fn is_service_user(&self, account: AccountId) -> OwnersResult<bool> {
        Ok(self
            .state
            .read()
            .accounts
            .get(&account)
            .map(|entry| entry.service_user)
            .unwrap_or(false))
    }

    fn preferred_email(&self, account: AccountId) -> OwnersResult<Option<String>> {
        Ok(self
            .state
            .read()
            .accounts
            .get(&account)
            .and_then(|entry| entry.emails.first().cloned()))
    }

    fn can_see(&self, viewer: AccountId, target: AccountId) -> OwnersResult<bool> {
        Ok(!self.state.read().hidden.contains(&(viewer, target)))
    }

    fn active_accounts(&self, start: usize, limit: usize) -> OwnersResult<Vec<AccountId>> {
        Ok(self
            .state
            .read()
            .accounts
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(id, _)| *id)
            .skip(start)
            .take(limit)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PermissionState {
    read_denied: HashSet<(AccountId, BranchNameKey)>,
    read_denied_everywhere: HashSet<AccountId>,
    writers: HashSet<(AccountId, BranchNameKey)>,
    checkers: HashSet<AccountId>,
    project_owners: HashSet<(AccountId, String)>,
}

/// Everyone can read everything unless denied; everything else must be granted.
#[derive(Default)]
pub struct InMemoryPermissions {
    state: RwLock<PermissionState>,
}

impl InMemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_read(&self, account: AccountId, branch: &BranchNameKey) {
        self.state.write().read_denied.insert((account, branch.clone()));
    }

    pub fn deny_read_everywhere(&self, account: AccountId) {
        self.state.write().read_denied_everywhere.insert(account);
    }

    pub fn grant_write(&self, account: AccountId, branch: &BranchNameKey) {
        self.state.write().writers.insert((account, branch.clone()));
    }

    pub fn grant_check_code_owner(&self, account: AccountId) {
        self.state.write().checkers.insert(account);
    }

    pub fn add_project_owner(&self, account: AccountId, project: &str) {
        self.state
            .write()
            .project_owners
            .insert((account, project.to_string()));
    }
}

impl PermissionBackend for InMemoryPermissions {
    fn can_read(&self, account: AccountId, branch: &BranchNameKey) -> OwnersResult<bool> {
        let state = self.state.read();
        Ok(!state.read_denied_everywhere.contains(&account)
            && !state.read_denied.contains(&(account, branch.clone())))
    }

    fn can_write(&self, account: AccountId, branch: &BranchNameKey) -> OwnersResult<bool> {
        Ok(self.state.read().writers.contains(&(account, branch.clone())))
    }

    fn can_check_code_owner(&self, account: AccountId) -> OwnersResult<bool> {
        Ok(self.state.read().checkers.contains(&account))
    }

    fn is_project_owner(&self, account: AccountId, project: &str) -> OwnersResult<bool> {
        Ok(self
            .state
            .read()
            .project_owners
            .contains(&(account, project.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Reviews and diffs
// ---------------------------------------------------------------------------

type DiffKey = (String, Option<String>, String);

#[derive(Default)]
struct ReviewState {
    changes: HashMap<ChangeId, Change>,
    reviewers: HashMap<ChangeId, BTreeSet<AccountId>>,
    votes: HashMap<(ChangeId, AccountId, String), i16>,
    diffs: HashMap<DiffKey, Vec<ChangedFile>>,
}

/// Changes, reviewers, votes, and the diffs between revisions.
#[derive(Default)]
pub struct InMemoryReviews {
    state: RwLock<ReviewState>,
}

impl InMemoryReviews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a change; `files` is its diff against the first parent.
    pub fn create_change(&self, change: Change, files: Vec<ChangedFile>) {
        let mut state = self.state.write();
        let key = (
            change.project.clone(),
            change.parent_revisions.first().cloned(),
            change.current_revision.clone(),
        );
        state.diffs.insert(key, files);
        state.changes.insert(change.id, change);
    }

    pub fn set_changed_files(
        &self,
        project: &str,
        base: Option<&str>,
        revision: &str,
        files: Vec<ChangedFile>,
    ) {
        self.state.write().diffs.insert(
            (project.to_string(), base.map(str::to_string), revision.to_string()),
            files,
        );
    }

    pub fn add_reviewer(&self, change: ChangeId, account: AccountId) {
        self.state
            .write()
            .reviewers
            .entry(change)
            .or_default()
            .insert(account);
    }

    pub fn remove_reviewer(&self, change: ChangeId, account: AccountId) {
        let mut state = self.state.write();
        if let Some(reviewers) = state.reviewers.get_mut(&change) {
            reviewers.remove(&account);
        }
        state.votes.retain(|(c, a, _), _| !(*c == change && *a == account));
    }

    /// Record a vote; voting makes the account a reviewer.
    pub fn vote(&self, change: ChangeId, account: AccountId, label: &str, value: i16) {
        let mut state = self.state.write();
        state.reviewers.entry(change).or_default().insert(account);
        state
            .votes
            .insert((change, account, label.to_string()), value);
    }

    pub fn remove_vote(&self, change: ChangeId, account: AccountId, label: &str) {
        self.state
            .write()
            .votes
            .remove(&(change, account, label.to_string()));
    }
}

impl ReviewBackend for InMemoryReviews {
    fn change(&self, change: ChangeId) -> OwnersResult<Option<Change>> {
        Ok(self.state.read().changes.get(&change).cloned())
    }

    fn current_reviewers(&self, change: ChangeId) -> OwnersResult<BTreeSet<AccountId>> {
        Ok(self
            .state
            .read()
            .reviewers
            .get(&change)
            .cloned()
            .unwrap_or_default())
    }

    fn label_vote(
        &self,
        account: AccountId,
        change: ChangeId,
        label: &str,
    ) -> OwnersResult<Option<i16>> {
        Ok(self
            .state
            .read()
            .votes
            .get(&(change, account, label.to_string()))
            .copied())
    }
}

impl DiffProvider for InMemoryReviews {
    fn changed_files(
        &self,
        project: &str,
        base: Option<&str>,
        revision: &str,
    ) -> OwnersResult<Vec<ChangedFile>> {
        let key = (
            project.to_string(),
            base.map(str::to_string),
            revision.to_string(),
        );
        Ok(self
            .state
            .read()
            .diffs
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commits_create_new_revisions() {
        let storage = InMemoryStorage::new();
        let branch = BranchNameKey::new("p", "main");
        let r1 = storage.commit(&branch, &[("/OWNERS", "a@x.com\n")]);
        let r2 = storage.commit(&branch, &[("docs/OWNERS", "b@x.com\n")]);
        assert_ne!(r1, r2);
        assert_eq!(storage.resolve_ref("p", "refs/heads/main").unwrap(), Some(r2.clone()));
        assert!(storage.read_file("p", &r1, "/docs/OWNERS").unwrap().is_none());
        assert!(storage.read_file("p", &r2, "/docs/OWNERS").unwrap().is_some());
        assert_eq!(
            storage.list_files("p", &r2, Some("**/OWNERS")).unwrap(),
            vec!["/OWNERS".to_string(), "/docs/OWNERS".to_string()]
        );
    }

    #[test]
    fn test_accounts_by_email_skips_inactive() {
        let accounts = InMemoryAccounts::new();
        let a = accounts.add_account(1, "a@x.com");
        let b = accounts.add_account(2, "b@x.com");
        accounts.add_email(b, "a@x.com");
        assert_eq!(accounts.accounts_by_email("a@x.com").unwrap().len(), 2);
        accounts.deactivate(b);
        assert_eq!(
            accounts.accounts_by_email("a@x.com").unwrap(),
            [a].into_iter().collect()
        );
        assert_eq!(accounts.active_accounts(0, 10).unwrap(), vec![a]);
    }

    #[test]
    fn test_vote_adds_reviewer() {
        let reviews = InMemoryReviews::new();
        reviews.vote(ChangeId(1), AccountId(7), "Code-Review", 2);
        assert!(reviews.current_reviewers(ChangeId(1)).unwrap().contains(&AccountId(7)));
        assert_eq!(
            reviews.label_vote(AccountId(7), ChangeId(1), "Code-Review").unwrap(),
            Some(2)
        );
    }
}
