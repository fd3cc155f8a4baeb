//! Effective owner references of one path according to one declaration
//! file, with its imports resolved.
//!
//! Imports are followed through an explicit worklist.  Every import carries
//! the chain of files that led to it, which detects cycles and bounds the
//! nesting depth.  An imported file is expanded again only when it is
//! reached with a wider import mode, so diamond-shaped import graphs stay
//! linear and the result does not depend on the order of import lines.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::debug;

use crate::backend::matchers::set_matches;
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{
    Annotations, BranchNameKey, CodeOwnerConfig, CodeOwnerConfigImportMode, CodeOwnerConfigKey,
    CodeOwnerConfigReference, CodeOwnerReference, CodeOwnerSet,
};
use crate::resolver::loader::{CodeOwnerConfigLoader, LoadedConfig};
use crate::store::paths::{file_name, relative_to, resolve_import_path};

// ---------------------------------------------------------------------------
// Import outcomes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnresolvedImportReason {
    ProjectNotFound,
    BranchNotFound,
    InvalidPath,
    NotACodeOwnerConfigFile,
    BackendMismatch,
    FileNotFound,
    ParseFailure,
    Cycle,
    DepthExceeded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedImport {
    pub importing: CodeOwnerConfigKey,
    pub imported: CodeOwnerConfigKey,
    pub import_mode: CodeOwnerConfigImportMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnresolvedImport {
    pub importing: CodeOwnerConfigKey,
    pub reference: CodeOwnerConfigReference,
    pub reason: UnresolvedImportReason,
    pub message: String,
}

impl fmt::Display for UnresolvedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "import of '{}' in {} cannot be resolved: {}",
            self.reference, self.importing, self.message
        )
    }
}

type Unresolved = (UnresolvedImportReason, String);

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathCodeOwnersResult {
    pub config_key: CodeOwnerConfigKey,
    pub path: String,
    /// Whether the hierarchy walk must stop after this file.
    pub ignore_parent_code_owners: bool,
    /// Owners from sets without path expressions, own and imported.
    pub folder_code_owners: IndexSet<CodeOwnerReference>,
    /// Owners from sets whose path expressions match the path.
    pub per_file_code_owners: IndexSet<CodeOwnerReference>,
    pub annotations: Annotations,
    pub resolved_imports: Vec<ResolvedImport>,
    pub unresolved_imports: Vec<UnresolvedImport>,
}

impl PathCodeOwnersResult {
    fn new(config_key: CodeOwnerConfigKey, path: &str) -> Self {
        Self {
            config_key,
            path: path.to_string(),
            ignore_parent_code_owners: false,
            folder_code_owners: IndexSet::new(),
            per_file_code_owners: IndexSet::new(),
            annotations: Annotations::new(),
            resolved_imports: Vec::new(),
            unresolved_imports: Vec::new(),
        }
    }

    pub fn code_owners(&self) -> IndexSet<CodeOwnerReference> {
        self.per_file_code_owners
            .iter()
            .chain(self.folder_code_owners.iter())
            .cloned()
            .collect()
    }

    pub fn has_code_owners(&self) -> bool {
        !self.folder_code_owners.is_empty() || !self.per_file_code_owners.is_empty()
    }

    pub fn owned_by_all_users(&self) -> bool {
        self.code_owners().iter().any(CodeOwnerReference::is_all_users)
    }

    pub fn has_unresolved_imports(&self) -> bool {
        !self.unresolved_imports.is_empty()
    }

    fn add(&mut self, bucket: Bucket, set: &CodeOwnerSet) {
        let target = match bucket {
            Bucket::Folder => &mut self.folder_code_owners,
            Bucket::PerFile => &mut self.per_file_code_owners,
        };
        target.extend(set.code_owners.iter().cloned());
        for (email, annotations) in &set.annotations {
            self.annotations
                .entry(email.clone())
                .or_default()
                .extend(annotations.iter().cloned());
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Where the global owner sets of an imported file end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Bucket {
    /// Imported by the file itself; applies to every path in the folder.
    Folder,
    /// Imported by a per-file set; applies only where that set matches.
    PerFile,
}

struct ImportTask {
    importing: Arc<CodeOwnerConfig>,
    reference: CodeOwnerConfigReference,
    mode: CodeOwnerConfigImportMode,
    bucket: Bucket,
    chain: Vec<CodeOwnerConfigKey>,
}

pub struct PathCodeOwners<'l, 'a> {
    loader: &'l CodeOwnerConfigLoader<'a>,
    max_import_depth: usize,
}

impl<'l, 'a> PathCodeOwners<'l, 'a> {
    pub fn new(loader: &'l CodeOwnerConfigLoader<'a>, max_import_depth: usize) -> Self {
        Self {
            loader,
            max_import_depth,
        }
    }

    /// Resolve the owners `config` assigns to `path`.
    ///
    /// `path` must be below the folder of `config`.  Per-file sets of
    /// imported files are matched against the path relative to this folder.
    pub fn resolve(
        &self,
        config: &Arc<CodeOwnerConfig>,
        path: &str,
    ) -> OwnersResult<PathCodeOwnersResult> {
        let relative = relative_to(&config.key.folder_path, path).ok_or_else(|| {
            OwnersError::invalid_input(format!(
                "path '{}' is not below folder '{}'",
                path, config.key.folder_path
            ))
        })?;
        let backend = self.loader.backend(&config.key.branch_key())?;
        let matcher = backend.path_expression_matcher();

        let mut result = PathCodeOwnersResult::new(config.key.clone(), path);
        result.ignore_parent_code_owners = config.ignore_parent_code_owners;
        let mut ignore_global = false;
        let mut queue = VecDeque::new();
        let root_chain = vec![config.key.clone()];

        for set in &config.code_owner_sets {
            if set.is_global() {
                result.add(Bucket::Folder, set);
            } else if set_matches(matcher, &set.path_expressions, &set.exclusions, &relative) {
                result.add(Bucket::PerFile, set);
                ignore_global |= set.ignore_global_and_parent_code_owners;
                queue.extend(per_set_tasks(config, set, &root_chain));
            }
        }
        for reference in &config.imports {
            queue.push_back(ImportTask {
                importing: config.clone(),
                reference: reference.clone(),
                mode: reference.import_mode,
                bucket: Bucket::Folder,
                chain: root_chain.clone(),
            });
        }

        // Widest mode each file was expanded with, so that a later `include`
        // of a file first reached through `file:` still adds its per-file
        // owners.
        let mut visited: HashMap<(CodeOwnerConfigKey, Bucket), CodeOwnerConfigImportMode> =
            HashMap::new();
        while let Some(task) = queue.pop_front() {
            let unresolved = |reason, message: String| UnresolvedImport {
                importing: task.importing.key.clone(),
                reference: task.reference.clone(),
                reason,
                message,
            };

            let (key, revision) = match self.locate(&task.importing, &task.reference)? {
                Ok(target) => target,
                Err((reason, message)) => {
                    result.unresolved_imports.push(unresolved(reason, message));
                    continue;
                }
            };
            if task.chain.contains(&key) {
                let cycle: Vec<String> = task
                    .chain
                    .iter()
                    .chain(std::iter::once(&key))
                    .map(|k| k.to_string())
                    .collect();
                result.unresolved_imports.push(unresolved(
                    UnresolvedImportReason::Cycle,
                    format!("cyclic import: {}", cycle.join(" -> ")),
                ));
                continue;
            }
            if task.chain.len() > self.max_import_depth {
                result.unresolved_imports.push(unresolved(
                    UnresolvedImportReason::DepthExceeded,
                    format!(
                        "import depth exceeds the maximum of {}",
                        self.max_import_depth
                    ),
                ));
                continue;
            }
            match visited.entry((key.clone(), task.bucket)) {
                Entry::Occupied(seen) if seen.get().covers(task.mode) => continue,
                Entry::Occupied(mut seen) => {
                    seen.insert(task.mode);
                }
                Entry::Vacant(slot) => {
                    slot.insert(task.mode);
                }
            }
            let imported = match self.load_target(&key, &revision)? {
                Ok(imported) => imported,
                Err((reason, message)) => {
                    result.unresolved_imports.push(unresolved(reason, message));
                    continue;
                }
            };
            debug!(
                "Resolved import of {} from {} ({:?})",
                imported.key, task.importing.key, task.mode
            );
            result.resolved_imports.push(ResolvedImport {
                importing: task.importing.key.clone(),
                imported: imported.key.clone(),
                import_mode: task.mode,
            });

            let mut chain = task.chain.clone();
            chain.push(imported.key.clone());
            for set in &imported.code_owner_sets {
                if set.is_global() {
                    result.add(task.bucket, set);
                } else if task.mode.imports_per_file_code_owners()
                    && set_matches(matcher, &set.path_expressions, &set.exclusions, &relative)
                {
                    result.add(Bucket::PerFile, set);
                    ignore_global |= set.ignore_global_and_parent_code_owners;
                    queue.extend(per_set_tasks(&imported, set, &chain));
                }
            }
            if task.mode.imports_ignore_parent_code_owners() && imported.ignore_parent_code_owners {
                result.ignore_parent_code_owners = true;
            }
            for reference in &imported.imports {
                queue.push_back(ImportTask {
                    importing: imported.clone(),
                    reference: reference.clone(),
                    mode: task.mode.narrow(reference.import_mode),
                    bucket: task.bucket,
                    chain: chain.clone(),
                });
            }
        }

        for unresolved in &result.unresolved_imports {
            debug!("{}", unresolved);
        }
        if ignore_global {
            result.folder_code_owners.clear();
            result.ignore_parent_code_owners = true;
        }
        Ok(result)
    }

    /// Check a single import without following nested imports.
    pub fn check_import(
        &self,
        importing: &CodeOwnerConfig,
        reference: &CodeOwnerConfigReference,
    ) -> OwnersResult<Option<UnresolvedImport>> {
        let unresolved = |(reason, message): Unresolved| UnresolvedImport {
            importing: importing.key.clone(),
            reference: reference.clone(),
            reason,
            message,
        };
        let (key, revision) = match self.locate(importing, reference)? {
            Ok(target) => target,
            Err(e) => return Ok(Some(unresolved(e))),
        };
        if key == importing.key {
            return Ok(Some(unresolved((
                UnresolvedImportReason::Cycle,
                "code owner config imports itself".to_string(),
            ))));
        }
        Ok(self.load_target(&key, &revision)?.err().map(unresolved))
    }

    /// Key and revision of the file an import points to.
    fn locate(
        &self,
        importing: &CodeOwnerConfig,
        reference: &CodeOwnerConfigReference,
    ) -> OwnersResult<Result<(CodeOwnerConfigKey, String), Unresolved>> {
        let importing_branch = importing.key.branch_key();
        let project = reference
            .project
            .clone()
            .unwrap_or_else(|| importing.key.project.clone());
        if !self.loader.storage().project_exists(&project) {
            return Ok(Err((
                UnresolvedImportReason::ProjectNotFound,
                format!("project '{project}' not found"),
            )));
        }
        let branch = match &reference.branch {
            Some(branch) => BranchNameKey::new(project, branch),
            None => BranchNameKey::new(project, &importing_branch.branch),
        };
        let revision = if branch == importing_branch {
            importing.revision.clone()
        } else {
            match self.loader.revision(&branch)? {
                Some(revision) => revision,
                None => {
                    return Ok(Err((
                        UnresolvedImportReason::BranchNotFound,
                        format!("branch '{}' not found in project '{}'", branch.branch, branch.project),
                    )))
                }
            }
        };
        let path = match resolve_import_path(&importing.key.folder_path, &reference.file_path) {
            Ok(path) => path,
            Err(e) => return Ok(Err((UnresolvedImportReason::InvalidPath, e.to_string()))),
        };

        let importing_backend = self.loader.backend(&importing_branch)?;
        let target_backend = self.loader.backend(&branch)?;
        if importing_backend.id() != target_backend.id() {
            return Ok(Err((
                UnresolvedImportReason::BackendMismatch,
                format!(
                    "'{}' uses backend '{}', the importing file uses '{}'",
                    branch,
                    target_backend.id(),
                    importing_backend.id()
                ),
            )));
        }
        let settings = self.loader.settings(&branch)?;
        if !target_backend
            .is_code_owner_config_file(file_name(&path), settings.file_extension.as_deref())
        {
            return Ok(Err((
                UnresolvedImportReason::NotACodeOwnerConfigFile,
                format!("'{path}' is not a code owner config file"),
            )));
        }
        Ok(Ok((self.loader.key_for_path(&branch, &path)?, revision)))
    }

    fn load_target(
        &self,
        key: &CodeOwnerConfigKey,
        revision: &str,
    ) -> OwnersResult<Result<Arc<CodeOwnerConfig>, Unresolved>> {
        Ok(match self.loader.load(key, revision)? {
            LoadedConfig::Found(config) => Ok(config),
            LoadedConfig::Missing => Err((
                UnresolvedImportReason::FileNotFound,
                format!("'{}' does not exist", self.loader.file_path(key)?),
            )),
            LoadedConfig::Invalid(message) => Err((UnresolvedImportReason::ParseFailure, message)),
        })
    }
}

/// Imports of a matching per-file set; they only pull in global owner sets.
fn per_set_tasks(
    importing: &Arc<CodeOwnerConfig>,
    set: &CodeOwnerSet,
    chain: &[CodeOwnerConfigKey],
) -> Vec<ImportTask> {
    set.imports
        .iter()
        .map(|reference| ImportTask {
            importing: importing.clone(),
            reference: reference.clone(),
            mode: CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly,
            bucket: Bucket::PerFile,
            chain: chain.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::config::CodeOwnersConfig;
    use crate::store::memory::InMemoryStorage;

    struct World {
        storage: InMemoryStorage,
        registry: BackendRegistry,
        config: CodeOwnersConfig,
        branch: BranchNameKey,
        revision: String,
    }

    fn world(files: &[(&str, &str)]) -> World {
        let storage = InMemoryStorage::new();
        storage.create_project("p", None);
        storage.create_project("shared", None);
        let branch = BranchNameKey::new("p", "main");
        let revision = storage.commit(&branch, files);
        World {
            storage,
            registry: BackendRegistry::default(),
            config: CodeOwnersConfig::default(),
            branch,
            revision,
        }
    }

    fn emails(set: &IndexSet<CodeOwnerReference>) -> Vec<&str> {
        set.iter().map(|r| r.email.as_str()).collect()
    }

    impl World {
        fn resolve(&self, folder: &str, path: &str, depth: usize) -> PathCodeOwnersResult {
            let loader = CodeOwnerConfigLoader::new(&self.storage, &self.registry, &self.config);
            let key = CodeOwnerConfigKey::new(&self.branch, folder);
            let config = loader.load(&key, &self.revision).unwrap().found().unwrap().clone();
            PathCodeOwners::new(&loader, depth).resolve(&config, path).unwrap()
        }
    }

    #[test]
    fn test_global_and_matching_per_file_owners_union() {
        let w = world(&[(
            "/OWNERS",
            "a@x.com\nper-file *.md=docs@x.com\nper-file *.rs=rust@x.com\n",
        )]);
        let result = w.resolve("/", "/guide/intro.md", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["a@x.com"]);
        assert_eq!(emails(&result.per_file_code_owners), vec!["docs@x.com"]);
        assert!(!result.ignore_parent_code_owners);
    }

    #[test]
    fn test_per_file_set_noparent_drops_global_owners() {
        let w = world(&[("/OWNERS", "a@x.com\nper-file BUILD=set noparent,build@x.com\n")]);
        let result = w.resolve("/", "/BUILD", 5);
        assert!(result.folder_code_owners.is_empty());
        assert_eq!(emails(&result.per_file_code_owners), vec!["build@x.com"]);
        assert!(result.ignore_parent_code_owners);
    }

    #[test]
    fn test_include_imports_per_file_and_noparent() {
        let w = world(&[
            ("/OWNERS", "include /common/OWNERS_shared\nroot@x.com\n"),
            (
                "/common/OWNERS_shared",
                "set noparent\nshared@x.com\nper-file *.txt=txt@x.com\n",
            ),
        ]);
        let result = w.resolve("/", "/a/b.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["root@x.com", "shared@x.com"]);
        assert_eq!(emails(&result.per_file_code_owners), vec!["txt@x.com"]);
        assert!(result.ignore_parent_code_owners);
        assert_eq!(result.resolved_imports.len(), 1);
    }

    #[test]
    fn test_file_import_only_takes_global_sets() {
        let w = world(&[
            ("/OWNERS", "file: /common/OWNERS_shared\n"),
            (
                "/common/OWNERS_shared",
                "set noparent\nshared@x.com\nper-file *.txt=txt@x.com\n",
            ),
        ]);
        let result = w.resolve("/", "/a/b.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["shared@x.com"]);
        assert!(result.per_file_code_owners.is_empty());
        assert!(!result.ignore_parent_code_owners);
    }

    #[test]
    fn test_per_set_import_applies_only_to_matching_files() {
        let w = world(&[
            ("/OWNERS", "per-file *.md=file:/docs/OWNERS_writers\n"),
            ("/docs/OWNERS_writers", "writer@x.com\n"),
        ]);
        let md = w.resolve("/", "/README.md", 5);
        assert_eq!(emails(&md.per_file_code_owners), vec!["writer@x.com"]);
        let rs = w.resolve("/", "/main.rs", 5);
        assert!(!rs.has_code_owners());
    }

    #[test]
    fn test_self_import_is_reported_as_cycle() {
        let w = world(&[("/OWNERS", "include /OWNERS\na@x.com\n")]);
        let result = w.resolve("/", "/x.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["a@x.com"]);
        assert_eq!(result.unresolved_imports.len(), 1);
        assert_eq!(result.unresolved_imports[0].reason, UnresolvedImportReason::Cycle);
    }

    #[test]
    fn test_two_file_cycle_terminates() {
        let w = world(&[
            ("/a/OWNERS", "include /b/OWNERS\na@x.com\n"),
            ("/b/OWNERS", "include /a/OWNERS\nb@x.com\n"),
        ]);
        let result = w.resolve("/a", "/a/x.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["a@x.com", "b@x.com"]);
        assert_eq!(result.unresolved_imports.len(), 1);
        assert_eq!(result.unresolved_imports[0].reason, UnresolvedImportReason::Cycle);
    }

    #[test]
    fn test_depth_limit() {
        let w = world(&[
            ("/OWNERS", "include /1/OWNERS\n"),
            ("/1/OWNERS", "include /2/OWNERS\none@x.com\n"),
            ("/2/OWNERS", "include /3/OWNERS\ntwo@x.com\n"),
            ("/3/OWNERS", "three@x.com\n"),
        ]);
        let result = w.resolve("/", "/x.txt", 2);
        assert_eq!(emails(&result.folder_code_owners), vec!["one@x.com", "two@x.com"]);
        assert_eq!(result.unresolved_imports.len(), 1);
        assert_eq!(
            result.unresolved_imports[0].reason,
            UnresolvedImportReason::DepthExceeded
        );
    }

    #[test]
    fn test_diamond_is_expanded_once() {
        let w = world(&[
            ("/OWNERS", "include /l/OWNERS\ninclude /r/OWNERS\n"),
            ("/l/OWNERS", "include /base/OWNERS\nl@x.com\n"),
            ("/r/OWNERS", "include /base/OWNERS\nr@x.com\n"),
            ("/base/OWNERS", "base@x.com\n"),
        ]);
        let result = w.resolve("/", "/x.txt", 5);
        assert_eq!(result.resolved_imports.len(), 3);
        assert!(result.unresolved_imports.is_empty());
        assert_eq!(
            emails(&result.folder_code_owners),
            vec!["l@x.com", "r@x.com", "base@x.com"]
        );
    }

    #[test]
    fn test_wider_import_mode_is_order_independent() {
        let shared = "set noparent\nshared@x.com\nper-file *.txt=txt@x.com\n";
        let include_first = world(&[
            ("/OWNERS", "include /common/OWNERS_shared\nfile: /common/OWNERS_shared\n"),
            ("/common/OWNERS_shared", shared),
        ]);
        let file_first = world(&[
            ("/OWNERS", "file: /common/OWNERS_shared\ninclude /common/OWNERS_shared\n"),
            ("/common/OWNERS_shared", shared),
        ]);
        for w in [&include_first, &file_first] {
            let result = w.resolve("/", "/a/b.txt", 5);
            assert_eq!(emails(&result.folder_code_owners), vec!["shared@x.com"]);
            assert_eq!(emails(&result.per_file_code_owners), vec!["txt@x.com"]);
            assert!(result.ignore_parent_code_owners);
            assert!(result.unresolved_imports.is_empty());
        }
    }

    #[test]
    fn test_unresolved_imports_keep_own_owners() {
        let w = world(&[(
            "/OWNERS",
            "include /missing/OWNERS\ninclude nope:/OWNERS\ninclude /README.md\nown@x.com\n",
        )]);
        let result = w.resolve("/", "/x.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["own@x.com"]);
        let reasons: Vec<UnresolvedImportReason> =
            result.unresolved_imports.iter().map(|u| u.reason).collect();
        assert_eq!(
            reasons,
            vec![
                UnresolvedImportReason::FileNotFound,
                UnresolvedImportReason::ProjectNotFound,
                UnresolvedImportReason::NotACodeOwnerConfigFile,
            ]
        );
    }

    #[test]
    fn test_cross_project_import_uses_branch_head() {
        let w = world(&[("/OWNERS", "include shared:/OWNERS\n")]);
        w.storage
            .commit(&BranchNameKey::new("shared", "main"), &[("/OWNERS", "s@x.com\n")]);
        let result = w.resolve("/", "/x.txt", 5);
        assert_eq!(emails(&result.folder_code_owners), vec!["s@x.com"]);

        let missing_branch = world(&[("/OWNERS", "include shared:stable:/OWNERS\n")]);
        let result = missing_branch.resolve("/", "/x.txt", 5);
        assert_eq!(
            result.unresolved_imports[0].reason,
            UnresolvedImportReason::BranchNotFound
        );
    }
}
