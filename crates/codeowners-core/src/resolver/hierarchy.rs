//! Walks the declaration files that govern a path, innermost folder first.
//!
//! Order of the levels:
//!
//! 1. the folders from the path's parent up to the root,
//! 2. the default declaration of the project (`refs/meta/config`),
//! 3. the default declarations of the parent projects, nearest first.
//!
//! The walk ends early when a visitor returns [`Visit::Stop`] or when a
//! visited level ignores parent code owners.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::errors::OwnersResult;
use crate::models::{BranchNameKey, CodeOwnerConfig, CodeOwnerConfigKey};
use crate::resolver::loader::{CodeOwnerConfigLoader, LoadedConfig};
use crate::resolver::path_code_owners::{PathCodeOwners, PathCodeOwnersResult};
use crate::resolver::Cancellation;
use crate::store::paths::{ancestor_folders, segment_count};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelKind {
    Folder,
    DefaultConfig,
}

/// One visited declaration file together with its resolution for the path.
#[derive(Debug)]
pub struct HierarchyLevel {
    pub kind: LevelKind,
    pub config: Arc<CodeOwnerConfig>,
    pub resolved: PathCodeOwnersResult,
    pub distance: usize,
}

pub trait CodeOwnerConfigVisitor {
    fn visit(&mut self, level: &HierarchyLevel) -> OwnersResult<Visit>;

    /// Called for a declaration file that exists but cannot be parsed; the
    /// walk treats it as absent.
    fn on_invalid_config(&mut self, _key: &CodeOwnerConfigKey, _message: &str) {}
}

/// Distances of the levels for `path`.
///
/// A folder scores the number of segments between it and the path, so the
/// root scores the segment count of the path.  Default declarations score
/// one more, configured global owners two more.
pub fn folder_distance(path: &str, folder: &str) -> usize {
    segment_count(path).saturating_sub(segment_count(folder))
}

pub fn default_config_distance(path: &str) -> usize {
    segment_count(path) + 1
}

pub fn global_owners_distance(path: &str) -> usize {
    segment_count(path) + 2
}

pub fn max_distance(path: &str) -> usize {
    global_owners_distance(path)
}

pub struct CodeOwnerConfigHierarchy<'l, 'a> {
    loader: &'l CodeOwnerConfigLoader<'a>,
    cancellation: Cancellation,
}

impl<'l, 'a> CodeOwnerConfigHierarchy<'l, 'a> {
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

    /// Visit every declaration level of `path` at `revision` of `branch`.
    pub fn visit(
        &self,
        branch: &BranchNameKey,
        revision: &str,
        path: &str,
        visitor: &mut dyn CodeOwnerConfigVisitor,
    ) -> OwnersResult<()> {
        let settings = self.loader.settings(branch)?;
        let resolver = PathCodeOwners::new(self.loader, settings.max_import_depth);

        for folder in ancestor_folders(path) {
            self.cancellation.check()?;
            let key = CodeOwnerConfigKey::new(branch, folder.as_str());
            let distance = folder_distance(path, &folder);
            let visit = self.visit_level(
                LevelKind::Folder,
                &key,
                revision,
                path,
                distance,
                &resolver,
                visitor,
            )?;
            if visit == Visit::Stop {
                return Ok(());
            }
        }

        if branch.is_meta_config() {
            return Ok(());
        }
        let mut seen = HashSet::new();
        let mut project = Some(branch.project.clone());
        while let Some(name) = project {
            if !seen.insert(name.clone()) {
                break;
            }
            self.cancellation.check()?;
            let meta = BranchNameKey::meta_config(name.as_str());
            if let Some(meta_revision) = self.loader.revision(&meta)? {
                let key = CodeOwnerConfigKey::new(&meta, "/");
                let visit = self.visit_level(
                    LevelKind::DefaultConfig,
                    &key,
                    &meta_revision,
                    path,
                    default_config_distance(path),
                    &resolver,
                    visitor,
                )?;
                if visit == Visit::Stop {
                    return Ok(());
                }
            }
            project = self.loader.storage().parent_project(&name);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_level(
        &self,
        kind: LevelKind,
        key: &CodeOwnerConfigKey,
        revision: &str,
        path: &str,
        distance: usize,
        resolver: &PathCodeOwners<'_, '_>,
        visitor: &mut dyn CodeOwnerConfigVisitor,
    ) -> OwnersResult<Visit> {
        let config = match self.loader.load(key, revision)? {
            LoadedConfig::Missing => return Ok(Visit::Continue),
            LoadedConfig::Invalid(message) => {
                visitor.on_invalid_config(key, &message);
                return Ok(Visit::Continue);
            }
            LoadedConfig::Found(config) => config,
        };
        let resolved = resolver.resolve(&config, path)?;
        let ignore_parent = resolved.ignore_parent_code_owners;
        let level = HierarchyLevel {
            kind,
            config,
            resolved,
            distance,
        };
        if visitor.visit(&level)? == Visit::Stop {
            debug!("Visitor stopped the walk for {} at {}", path, key);
            return Ok(Visit::Stop);
        }
        if ignore_parent {
            debug!("{} ignores parent code owners, stopping walk for {}", key, path);
            return Ok(Visit::Stop);
        }
        Ok(Visit::Continue)
    }
}
