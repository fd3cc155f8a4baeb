//! Entry point bundling the collaborators, the configuration, and the
//! backend registry that every query operation needs.

use std::sync::Arc;

use tracing::info;

use crate::backend::BackendRegistry;
use crate::config::{BranchSettings, CodeOwnersConfig};
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{AccountId, BranchNameKey, Change, ChangeId};
use crate::resolver::loader::CodeOwnerConfigLoader;
use crate::store::{AccountDirectory, DiffProvider, PermissionBackend, RepositoryStorage, ReviewBackend};

/// Worker threads used for per-file approval computations by default.
pub const DEFAULT_APPROVAL_WORKERS: usize = 4;

/// The external collaborators the core consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn RepositoryStorage>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub permissions: Arc<dyn PermissionBackend>,
    pub reviews: Arc<dyn ReviewBackend>,
    pub diffs: Arc<dyn DiffProvider>,
}

pub struct CodeOwnersService {
    collaborators: Collaborators,
    config: CodeOwnersConfig,
    registry: BackendRegistry,
    workers: usize,
}

impl CodeOwnersService {
    /// Validates `config` against the built-in backends and the storage.
    pub fn new(collaborators: Collaborators, config: CodeOwnersConfig) -> OwnersResult<Self> {
        Self::with_registry(collaborators, config, BackendRegistry::default())
    }

    pub fn with_registry(
        collaborators: Collaborators,
        config: CodeOwnersConfig,
        registry: BackendRegistry,
    ) -> OwnersResult<Self> {
        config.validate(&registry, collaborators.storage.as_ref())?;
        info!(
            "Code owners service ready (backends: {}, {} configured projects)",
            registry.ids().join(", "),
            config.projects.len()
        );
        Ok(Self {
            collaborators,
            config,
            registry,
            workers: DEFAULT_APPROVAL_WORKERS,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn storage(&self) -> &dyn RepositoryStorage {
        self.collaborators.storage.as_ref()
    }

    pub fn accounts(&self) -> &dyn AccountDirectory {
        self.collaborators.accounts.as_ref()
    }

    pub fn permissions(&self) -> &dyn PermissionBackend {
        self.collaborators.permissions.as_ref()
    }

    pub fn reviews(&self) -> &dyn ReviewBackend {
        self.collaborators.reviews.as_ref()
    }

    pub fn diffs(&self) -> &dyn DiffProvider {
        self.collaborators.diffs.as_ref()
    }

    pub fn config(&self) -> &CodeOwnersConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// A fresh loader; its caches live as long as the request using it.
    pub fn loader(&self) -> CodeOwnerConfigLoader<'_> {
        CodeOwnerConfigLoader::new(self.storage(), &self.registry, &self.config)
    }

    pub fn branch_settings(&self, branch: &BranchNameKey) -> OwnersResult<BranchSettings> {
        self.config.settings_for(branch, self.storage())
    }

    pub fn is_enabled(&self, branch: &BranchNameKey) -> OwnersResult<bool> {
        Ok(!self.branch_settings(branch)?.disabled)
    }

    /// The change, or `NotFound`.
    pub fn change(&self, id: ChangeId) -> OwnersResult<Change> {
        self.reviews()
            .change(id)?
            .ok_or_else(|| OwnersError::NotFound(id.to_string()))
    }

    /// Head of `branch`, or `NotFound` if the branch does not exist.
    pub fn branch_head(&self, branch: &BranchNameKey) -> OwnersResult<String> {
        if !self.storage().project_exists(&branch.project) {
            return Err(OwnersError::NotFound(format!("project {}", branch.project)));
        }
        self.storage()
            .resolve_ref(&branch.project, &branch.branch)?
            .ok_or_else(|| OwnersError::NotFound(format!("branch {branch}")))
    }

    /// `PermissionDenied` unless `account` may write to `branch`.
    pub fn ensure_can_write(&self, account: AccountId, branch: &BranchNameKey) -> OwnersResult<()> {
        if self.permissions().can_write(account, branch)? {
            Ok(())
        } else {
            Err(OwnersError::PermissionDenied(format!(
                "{account} cannot write to {branch}"
            )))
        }
    }
}
