//! Storage backed by checked-out working trees.
//!
//! Every registered project maps to a directory whose content is served as
//! the single revision [`WORKTREE_REVISION`] of every branch.  A separate
//! directory can stand in for the project's `refs/meta/config` branch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::backend::matchers::glob_matches;
use crate::errors::OwnersResult;
use crate::models::META_CONFIG_BRANCH;
use crate::store::RepositoryStorage;

pub const WORKTREE_REVISION: &str = "worktree";
pub const META_CONFIG_REVISION: &str = "meta-config";

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

struct FsProject {
    root: PathBuf,
    meta_config: Option<PathBuf>,
    parent: Option<String>,
}

#[derive(Default)]
pub struct FsStorage {
    projects: BTreeMap<String, FsProject>,
}

impl FsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, name: &str, root: impl Into<PathBuf>) -> Self {
        self.projects.insert(
            name.to_string(),
            FsProject {
                root: root.into(),
                meta_config: None,
                parent: None,
            },
        );
        self
    }

    /// Serve `dir` as the project's `refs/meta/config` branch.
    pub fn with_meta_config(mut self, name: &str, dir: impl Into<PathBuf>) -> Self {
        if let Some(project) = self.projects.get_mut(name) {
            project.meta_config = Some(dir.into());
        }
        self
    }

    pub fn with_parent(mut self, name: &str, parent: &str) -> Self {
        if let Some(project) = self.projects.get_mut(name) {
            project.parent = Some(parent.to_string());
        }
        self
    }

    fn tree_root(&self, project: &str, revision: &str) -> Option<&Path> {
        let entry = self.projects.get(project)?;
        match revision {
            WORKTREE_REVISION => Some(entry.root.as_path()),
            META_CONFIG_REVISION => entry.meta_config.as_deref(),
            _ => None,
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_ignored_dir(name: &str) -> bool {
    IMPLICIT_IGNORED_DIRS.contains(&name)
}

impl RepositoryStorage for FsStorage {
    fn read_file(&self, project: &str, revision: &str, path: &str) -> OwnersResult<Option<Vec<u8>>> {
        let Some(root) = self.tree_root(project, revision) else {
            return Ok(None);
        };
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            return Ok(None);
        }
        let full = root.join(relative);
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(full)?))
    }

    fn list_files(
        &self,
        project: &str,
        revision: &str,
        glob: Option<&str>,
    ) -> OwnersResult<Vec<String>> {
        let Some(root) = self.tree_root(project, revision) else {
            return Ok(vec![]);
        };
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && is_ignored_dir(&entry.file_name().to_string_lossy()))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_path(root, entry.path());
            if glob.map_or(true, |g| glob_matches(g, &rel)) {
                files.push(format!("/{rel}"));
            }
        }
        files.sort();
        Ok(files)
    }

    fn resolve_ref(&self, project: &str, reference: &str) -> OwnersResult<Option<String>> {
        let Some(entry) = self.projects.get(project) else {
            return Ok(None);
        };
        if reference == META_CONFIG_BRANCH {
            return Ok(entry
                .meta_config
                .as_ref()
                .map(|_| META_CONFIG_REVISION.to_string()));
        }
        Ok(Some(WORKTREE_REVISION.to_string()))
    }

    fn project_exists(&self, project: &str) -> bool {
        self.projects.contains_key(project)
    }

    fn parent_project(&self, project: &str) -> Option<String> {
        self.projects.get(project).and_then(|p| p.parent.clone())
    }
}
