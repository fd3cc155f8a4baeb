//! Interfaces of the external collaborators the core consumes, plus
//! in-memory and filesystem implementations of them.
//!
//! The core treats every collaborator as a pure function of its inputs for
//! the duration of one request; caching and retries are their business.

pub mod filesystem;
pub mod memory;
pub mod paths;

use std::collections::BTreeSet;

use crate::errors::OwnersResult;
use crate::models::{AccountId, BranchNameKey, Change, ChangeId, ChangedFile};

/// Version-control storage.
pub trait RepositoryStorage: Send + Sync {
    /// Raw file content at a revision, `None` if the file does not exist.
    fn read_file(&self, project: &str, revision: &str, path: &str) -> OwnersResult<Option<Vec<u8>>>;

    /// Absolute paths of all files at a revision, optionally filtered by a
    /// root-relative glob.
    fn list_files(&self, project: &str, revision: &str, glob: Option<&str>)
        -> OwnersResult<Vec<String>>;

    /// Revision a ref points to, `None` if the ref does not exist.
    fn resolve_ref(&self, project: &str, reference: &str) -> OwnersResult<Option<String>>;

    fn project_exists(&self, project: &str) -> bool;

    /// Project whose `refs/meta/config` defaults this project inherits.
    fn parent_project(&self, _project: &str) -> Option<String> {
        None
    }
}

/// Account directory.
pub trait AccountDirectory: Send + Sync {
    /// Active accounts that own `email`; more than one means ambiguous.
    fn accounts_by_email(&self, email: &str) -> OwnersResult<BTreeSet<AccountId>>;

    fn is_service_user(&self, account: AccountId) -> OwnersResult<bool>;

    fn preferred_email(&self, account: AccountId) -> OwnersResult<Option<String>>;

    /// Whether `viewer` may see `target` at all (account visibility).
    fn can_see(&self, _viewer: AccountId, _target: AccountId) -> OwnersResult<bool> {
        Ok(true)
    }

    /// A page of active accounts in a stable order.
    fn active_accounts(&self, start: usize, limit: usize) -> OwnersResult<Vec<AccountId>>;
}

/// Permission checks, always scoped to a single question.
pub trait PermissionBackend: Send + Sync {
    fn can_read(&self, account: AccountId, branch: &BranchNameKey) -> OwnersResult<bool>;

    fn can_write(&self, account: AccountId, branch: &BranchNameKey) -> OwnersResult<bool>;

    /// Administrative capability to run ownership checks for other users.
    fn can_check_code_owner(&self, account: AccountId) -> OwnersResult<bool>;

    fn is_project_owner(&self, _account: AccountId, _project: &str) -> OwnersResult<bool> {
        Ok(false)
    }
}

/// Review state of changes.
pub trait ReviewBackend: Send + Sync {
    fn change(&self, change: ChangeId) -> OwnersResult<Option<Change>>;

    fn current_reviewers(&self, change: ChangeId) -> OwnersResult<BTreeSet<AccountId>>;

    /// The account's current vote on `label`, if any.
    fn label_vote(&self, account: AccountId, change: ChangeId, label: &str)
        -> OwnersResult<Option<i16>>;
}

/// Changed files between two revisions.
pub trait DiffProvider: Send + Sync {
    /// `base` is `None` for root commits.
    fn changed_files(
        &self,
        project: &str,
        base: Option<&str>,
        revision: &str,
    ) -> OwnersResult<Vec<ChangedFile>>;
}
