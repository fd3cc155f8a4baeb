//! Per-request loading of declaration files with in-memory caching.
//!
//! A loader lives for one request.  Branch settings, ref resolutions, and
//! parsed declaration files are cached so that hierarchy levels and imports
//! that hit the same file read and parse it once.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{BackendRegistry, CodeOwnerBackend};
use crate::config::{BranchSettings, CodeOwnersConfig};
use crate::errors::OwnersResult;
use crate::models::{BranchNameKey, CodeOwnerConfig, CodeOwnerConfigKey};
use crate::store::paths::{file_name, parent_folder};
use crate::store::RepositoryStorage;

/// Outcome of loading one declaration file.
#[derive(Clone, Debug)]
pub enum LoadedConfig {
    Found(Arc<CodeOwnerConfig>),
    Missing,
    /// The file exists but cannot be parsed; carries the parser message.
    Invalid(String),
}

impl LoadedConfig {
    pub fn found(&self) -> Option<&Arc<CodeOwnerConfig>> {
        match self {
            LoadedConfig::Found(config) => Some(config),
            _ => None,
        }
    }
}

type FileCacheKey = (String, String, String, &'static str);

pub struct CodeOwnerConfigLoader<'a> {
    storage: &'a dyn RepositoryStorage,
    registry: &'a BackendRegistry,
    config: &'a CodeOwnersConfig,
    settings: Mutex<IndexMap<BranchNameKey, Arc<BranchSettings>>>,
    revisions: Mutex<IndexMap<BranchNameKey, Option<String>>>,
    files: Mutex<IndexMap<FileCacheKey, LoadedConfig>>,
}

impl<'a> CodeOwnerConfigLoader<'a> {
    pub fn new(
        storage: &'a dyn RepositoryStorage,
        registry: &'a BackendRegistry,
        config: &'a CodeOwnersConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            config,
            settings: Mutex::new(IndexMap::new()),
            revisions: Mutex::new(IndexMap::new()),
            files: Mutex::new(IndexMap::new()),
        }
    }

    pub fn storage(&self) -> &'a dyn RepositoryStorage {
        self.storage
    }

    pub fn settings(&self, branch: &BranchNameKey) -> OwnersResult<Arc<BranchSettings>> {
        if let Some(settings) = self.settings.lock().get(branch) {
            return Ok(settings.clone());
        }
        let settings = Arc::new(self.config.settings_for(branch, self.storage)?);
        self.settings.lock().insert(branch.clone(), settings.clone());
        Ok(settings)
    }

    pub fn backend(&self, branch: &BranchNameKey) -> OwnersResult<Arc<dyn CodeOwnerBackend>> {
        let settings = self.settings(branch)?;
        self.registry.get(&settings.backend_id)
    }

    /// Current revision of a branch, `None` if the branch does not exist.
    pub fn revision(&self, branch: &BranchNameKey) -> OwnersResult<Option<String>> {
        if let Some(revision) = self.revisions.lock().get(branch) {
            return Ok(revision.clone());
        }
        let revision = if self.storage.project_exists(&branch.project) {
            self.storage.resolve_ref(&branch.project, &branch.branch)?
        } else {
            None
        };
        self.revisions.lock().insert(branch.clone(), revision.clone());
        Ok(revision)
    }

    /// Absolute path of the declaration file a key points to.
    pub fn file_path(&self, key: &CodeOwnerConfigKey) -> OwnersResult<String> {
        let branch = key.branch_key();
        let backend = self.backend(&branch)?;
        let settings = self.settings(&branch)?;
        Ok(key.file_path(&backend.file_name(settings.file_extension.as_deref())))
    }

    /// Key of the declaration file at `path`.
    ///
    /// Files with the backend's default name are keyed by folder only, so a
    /// file reached through an import and through the hierarchy shares a key.
    pub fn key_for_path(&self, branch: &BranchNameKey, path: &str) -> OwnersResult<CodeOwnerConfigKey> {
        let backend = self.backend(branch)?;
        let settings = self.settings(branch)?;
        let key = CodeOwnerConfigKey::new(branch, parent_folder(path));
        let name = file_name(path);
        if name == backend.file_name(settings.file_extension.as_deref()) {
            Ok(key)
        } else {
            Ok(key.with_file_name(name))
        }
    }

    /// Load the declaration file for `key` at `revision`.
    pub fn load(&self, key: &CodeOwnerConfigKey, revision: &str) -> OwnersResult<LoadedConfig> {
        let branch = key.branch_key();
        let backend = self.backend(&branch)?;
        let path = self.file_path(key)?;
        let cache_key = (
            key.project.clone(),
            revision.to_string(),
            path.clone(),
            backend.id(),
        );
        if let Some(loaded) = self.files.lock().get(&cache_key) {
            return Ok(loaded.clone());
        }

        let loaded = match self.storage.read_file(&key.project, revision, &path)? {
            None => LoadedConfig::Missing,
            Some(bytes) => match String::from_utf8(bytes) {
                Err(_) => LoadedConfig::Invalid(format!("{path} is not valid UTF-8")),
                Ok(content) => match backend.parse(key, revision, &content) {
                    Ok(config) => {
                        debug!("Parsed {} at {} with {}", path, revision, backend.id());
                        LoadedConfig::Found(Arc::new(config))
                    }
                    Err(e) => {
                        warn!("Invalid code owner config {} in {}: {}", path, key.project, e);
                        LoadedConfig::Invalid(format!("invalid code owner config file '{path}': {e}"))
                    }
                },
            },
        };
        self.files.lock().insert(cache_key, loaded.clone());
        Ok(loaded)
    }

    pub fn cached_files(&self) -> usize {
        self.files.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStorage;

    #[test]
    fn test_load_caches_and_reports_states() {
        let storage = InMemoryStorage::new();
        storage.create_project("p", None);
        let branch = BranchNameKey::new("p", "main");
        let revision = storage.commit(
            &branch,
            &[("/OWNERS", "a@x.com\n"), ("/bad/OWNERS", "per-file =\n")],
        );
        let registry = BackendRegistry::default();
        let config = CodeOwnersConfig::default();
        let loader = CodeOwnerConfigLoader::new(&storage, &registry, &config);

        let root = CodeOwnerConfigKey::new(&branch, "/");
        assert!(loader.load(&root, &revision).unwrap().found().is_some());
        assert!(loader.load(&root, &revision).unwrap().found().is_some());
        assert_eq!(loader.cached_files(), 1);

        let missing = CodeOwnerConfigKey::new(&branch, "/nope");
        assert!(matches!(loader.load(&missing, &revision).unwrap(), LoadedConfig::Missing));

        let bad = CodeOwnerConfigKey::new(&branch, "/bad");
        assert!(matches!(loader.load(&bad, &revision).unwrap(), LoadedConfig::Invalid(_)));
    }

    #[test]
    fn test_key_for_path_uses_folder_for_default_name() {
        let storage = InMemoryStorage::new();
        storage.create_project("p", None);
        let registry = BackendRegistry::default();
        let config = CodeOwnersConfig::default();
        let loader = CodeOwnerConfigLoader::new(&storage, &registry, &config);
        let branch = BranchNameKey::new("p", "main");

        assert_eq!(
            loader.key_for_path(&branch, "/a/OWNERS").unwrap(),
            CodeOwnerConfigKey::new(&branch, "/a")
        );
        assert_eq!(
            loader.key_for_path(&branch, "/a/OWNERS_build").unwrap(),
            CodeOwnerConfigKey::new(&branch, "/a").with_file_name("OWNERS_build")
        );
    }

    #[test]
    fn test_revision_of_unknown_project() {
        let storage = InMemoryStorage::new();
        let registry = BackendRegistry::default();
        let config = CodeOwnersConfig::default();
        let loader = CodeOwnerConfigLoader::new(&storage, &registry, &config);
        assert_eq!(loader.revision(&BranchNameKey::new("nope", "main")).unwrap(), None);
    }
}
