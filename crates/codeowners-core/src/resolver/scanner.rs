//! Bulk visiting of every declaration file in a branch.
//!
//! Slow path used by listing and validation.  A file that cannot be parsed
//! is reported to the error callback and the scan continues.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::OwnersResult;
use crate::models::{BranchNameKey, CodeOwnerConfig};
use crate::resolver::hierarchy::Visit;
use crate::resolver::loader::{CodeOwnerConfigLoader, LoadedConfig};
use crate::resolver::Cancellation;
use crate::store::paths::file_name;

pub struct CodeOwnerConfigScanner<'l, 'a> {
    loader: &'l CodeOwnerConfigLoader<'a>,
    cancellation: Cancellation,
}

impl<'l, 'a> CodeOwnerConfigScanner<'l, 'a> {
    pub fn new(loader: &'l CodeOwnerConfigLoader<'a>) -> Self {
        Self {
            loader,
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Paths of all declaration files, including import-only files, that
    /// match the optional root-relative glob.
    pub fn config_file_paths(
        &self,
        branch: &BranchNameKey,
        revision: &str,
        glob: Option<&str>,
    ) -> OwnersResult<Vec<String>> {
        let backend = self.loader.backend(branch)?;
        let settings = self.loader.settings(branch)?;
        let files = self
            .loader
            .storage()
            .list_files(&branch.project, revision, glob)?;
        Ok(files
            .into_iter()
            .filter(|path| {
                backend.is_code_owner_config_file(file_name(path), settings.file_extension.as_deref())
            })
            .collect())
    }

    pub fn contains_config_files(&self, branch: &BranchNameKey, revision: &str) -> OwnersResult<bool> {
        Ok(!self.config_file_paths(branch, revision, None)?.is_empty())
    }

    /// Visit every parsable declaration file in path order.
    pub fn visit_all(
        &self,
        branch: &BranchNameKey,
        revision: &str,
        glob: Option<&str>,
        on_config: &mut dyn FnMut(&Arc<CodeOwnerConfig>) -> OwnersResult<Visit>,
        on_invalid: &mut dyn FnMut(&str, &str),
    ) -> OwnersResult<()> {
        let paths = self.config_file_paths(branch, revision, glob)?;
        info!(
            "Scanning {} code owner config files in {} at {}",
            paths.len(),
            branch,
            revision
        );
        for path in paths {
            self.cancellation.check()?;
            let key = self.loader.key_for_path(branch, &path)?;
            match self.loader.load(&key, revision)? {
                LoadedConfig::Found(config) => {
                    if on_config(&config)? == Visit::Stop {
                        debug!("Scan of {} stopped at {}", branch, path);
                        return Ok(());
                    }
                }
                LoadedConfig::Invalid(message) => on_invalid(&path, &message),
                LoadedConfig::Missing => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::config::CodeOwnersConfig;
    use crate::store::memory::InMemoryStorage;

    #[test]
    fn test_scan_reports_every_bad_file_and_continues() {
        let storage = InMemoryStorage::new();
        storage.create_project("p", None);
        let branch = BranchNameKey::new("p", "main");
        let revision = storage.commit(
            &branch,
            &[
                ("/OWNERS", "a@x.com\n"),
                ("/a/OWNERS", "garbage line\n"),
                ("/b/OWNERS_build", "b@x.com\n"),
                ("/c/OWNERS", "also garbage\n"),
                ("/c/main.rs", "fn main() {}\n"),
            ],
        );
        let registry = BackendRegistry::default();
        let config = CodeOwnersConfig::default();
        let loader = CodeOwnerConfigLoader::new(&storage, &registry, &config);
        let scanner = CodeOwnerConfigScanner::new(&loader);

        let mut found = Vec::new();
        let mut invalid = Vec::new();
        scanner
            .visit_all(
                &branch,
                &revision,
                None,
                &mut |config| {
                    found.push(config.key.clone());
                    Ok(Visit::Continue)
                },
                &mut |path, _| invalid.push(path.to_string()),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(invalid, vec!["/a/OWNERS", "/c/OWNERS"]);
        assert!(scanner.contains_config_files(&branch, &revision).unwrap());
    }

    #[test]
    fn test_glob_limits_the_scan() {
        let storage = InMemoryStorage::new();
        storage.create_project("p", None);
        let branch = BranchNameKey::new("p", "main");
        let revision = storage.commit(
            &branch,
            &[("/OWNERS", "a@x.com\n"), ("/docs/OWNERS", "d@x.com\n")],
        );
        let registry = BackendRegistry::default();
        let config = CodeOwnersConfig::default();
        let loader = CodeOwnerConfigLoader::new(&storage, &registry, &config);
        let paths = CodeOwnerConfigScanner::new(&loader)
            .config_file_paths(&branch, &revision, Some("/docs/**"))
            .unwrap();
        assert_eq!(paths, vec!["/docs/OWNERS"]);
    }
}
