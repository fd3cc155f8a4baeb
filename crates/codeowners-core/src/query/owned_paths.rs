//! Which files of a change a given account owns.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::config::FallbackCodeOwners;
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{AccountId, ChangeId};
use crate::query::approval::load_change_context;
use crate::query::guards::{validate_limit, validate_start};
use crate::query::ownership::collect_path_ownership;
use crate::resolver::owners::CodeOwnerResolver;
use crate::resolver::Cancellation;
use crate::service::CodeOwnersService;

#[derive(Clone, Debug)]
pub struct OwnedPathsRequest {
    pub change: ChangeId,
    /// Current revision when absent.
    pub revision: Option<String>,
    pub account: AccountId,
    /// Also report which current reviewers own each path.
    pub check_reviewers: bool,
    pub limit: Option<i64>,
    pub start: Option<i64>,
    pub cancellation: Cancellation,
}

impl OwnedPathsRequest {
    pub fn new(change: ChangeId, account: AccountId) -> Self {
        Self {
            change,
            revision: None,
            account,
            check_reviewers: false,
            limit: None,
            start: None,
            cancellation: Cancellation::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OwnedPath {
    pub path: String,
    pub owned: bool,
    /// Reviewers that own the path, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<AccountId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OwnedChangedFile {
    pub new_path: Option<OwnedPath>,
    pub old_path: Option<OwnedPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OwnedPaths {
    /// Changed files with at least one side owned by the account.
    pub owned_changed_files: Vec<OwnedChangedFile>,
    /// Owned paths, sorted.
    pub owned_paths: Vec<String>,
    pub more_available: bool,
}

/// Paths of the change owned by `request.account`, paginated by owned path.
pub fn list_owned_paths(
    service: &CodeOwnersService,
    request: &OwnedPathsRequest,
) -> OwnersResult<OwnedPaths> {
    let limit = validate_limit(request.limit)?;
    let start = validate_start(request.start)?;
    let context = load_change_context(service, request.change, request.revision.as_deref())?;
    let settings = &context.settings;
    if settings.disabled {
        return Err(OwnersError::Disabled(settings.branch.to_string()));
    }
    let reviewers = if request.check_reviewers {
        service.reviews().current_reviewers(request.change)?
    } else {
        BTreeSet::new()
    };

    let loader = service.loader();
    let resolver = CodeOwnerResolver::new(service.accounts(), service.permissions(), settings);
    let owned_path = |path: &str| -> OwnersResult<OwnedPath> {
        let ownership = collect_path_ownership(
            &loader,
            settings,
            &context.owners_revision,
            path,
            &request.cancellation,
        )?;
        let resolved = resolver.resolve_all(ownership.references().iter())?;
        let owned_by_all_users = resolved.owned_by_all_users
            || (!ownership.has_declared_owners()
                && settings.fallback_code_owners == FallbackCodeOwners::AllUsers);
        let owns = |account: AccountId| -> OwnersResult<bool> {
            if owned_by_all_users || resolved.contains(account) {
                return Ok(true);
            }
            if !ownership.has_declared_owners()
                && settings.fallback_code_owners == FallbackCodeOwners::ProjectOwners
            {
                return service
                    .permissions()
                    .is_project_owner(account, &context.change.project);
            }
            Ok(false)
        };
        let mut owners = Vec::new();
        for reviewer in &reviewers {
            if owns(*reviewer)? {
                owners.push(*reviewer);
            }
        }
        Ok(OwnedPath {
            path: path.to_string(),
            owned: owns(request.account)?,
            owners,
        })
    };

    let mut owned_changed_files = Vec::new();
    let mut owned_paths = BTreeSet::new();
    for file in &context.files {
        request.cancellation.check()?;
        let new_path = file.new_path.as_deref().map(&owned_path).transpose()?;
        let old_path = file.old_path.as_deref().map(&owned_path).transpose()?;
        let sides = [new_path.as_ref(), old_path.as_ref()];
        let owned_sides: Vec<&OwnedPath> = sides.into_iter().flatten().filter(|p| p.owned).collect();
        if owned_sides.is_empty() {
            continue;
        }
        owned_paths.extend(owned_sides.iter().map(|p| p.path.clone()));
        owned_changed_files.push(OwnedChangedFile { new_path, old_path });
    }

    let total = owned_paths.len();
    let owned_paths: Vec<String> = owned_paths.into_iter().skip(start).take(limit).collect();
    let page: BTreeSet<&str> = owned_paths.iter().map(String::as_str).collect();
    owned_changed_files.retain(|file| {
        [file.new_path.as_ref(), file.old_path.as_ref()]
            .into_iter()
            .flatten()
            .any(|p| p.owned && page.contains(p.path.as_str()))
    });
    debug!(
        "{} owns {} paths of {}",
        request.account, total, request.change
    );
    Ok(OwnedPaths {
        owned_changed_files,
        owned_paths,
        more_available: total > start.saturating_add(limit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchNameKey, Change, ChangedFile};
    use crate::service::testing::World;

    const CHANGE: ChangeId = ChangeId(3);

    fn setup(world: &World, files: Vec<ChangedFile>) {
        let author = world.accounts.add_account(50, "author@x.com");
        let base = world.commit(&[
            ("/OWNERS", "root@x.com\n"),
            ("/docs/OWNERS", "set noparent\ndocs@x.com\n"),
            ("/src/OWNERS", "dev@x.com\n"),
        ]);
        let revision = world
            .storage
            .commit(&BranchNameKey::new("p", "refs/changes/03/3/1"), &[("/y", "y")]);
        world.reviews.create_change(
            Change {
                id: CHANGE,
                project: "p".to_string(),
                branch: "refs/heads/main".to_string(),
                owner: author,
                uploader: author,
                current_revision: revision,
                parent_revisions: vec![base],
                auto_merge_revision: None,
            },
            files,
        );
    }

    #[test]
    fn test_lists_owned_paths_of_an_account() {
        let world = World::new();
        let dev = world.accounts.add_account(1, "dev@x.com");
        let root = world.accounts.add_account(2, "root@x.com");
        setup(
            &world,
            vec![
                ChangedFile::modified("/src/a.rs"),
                ChangedFile::modified("/docs/guide.md"),
                ChangedFile::renamed("/src/old.rs", "/lib/new.rs"),
            ],
        );
        let service = world.service();

        let result = list_owned_paths(&service, &OwnedPathsRequest::new(CHANGE, dev)).unwrap();
        assert_eq!(result.owned_paths, vec!["/src/a.rs", "/src/old.rs"]);
        assert_eq!(result.owned_changed_files.len(), 2);

        let result = list_owned_paths(&service, &OwnedPathsRequest::new(CHANGE, root)).unwrap();
        assert_eq!(result.owned_paths, vec!["/lib/new.rs", "/src/a.rs", "/src/old.rs"]);
    }

    #[test]
    fn test_reviewer_owners_and_pagination() {
        let world = World::new();
        let dev = world.accounts.add_account(1, "dev@x.com");
        let docs = world.accounts.add_account(3, "docs@x.com");
        setup(
            &world,
            vec![
                ChangedFile::modified("/src/a.rs"),
                ChangedFile::modified("/src/b.rs"),
                ChangedFile::modified("/docs/guide.md"),
            ],
        );
        world.reviews.add_reviewer(CHANGE, docs);
        world.reviews.add_reviewer(CHANGE, dev);
        let service = world.service();

        let mut request = OwnedPathsRequest::new(CHANGE, dev);
        request.check_reviewers = true;
        request.limit = Some(1);
        let page = list_owned_paths(&service, &request).unwrap();
        assert_eq!(page.owned_paths, vec!["/src/a.rs"]);
        assert!(page.more_available);
        assert_eq!(page.owned_changed_files.len(), 1);
        let file = page.owned_changed_files[0].new_path.clone().unwrap();
        assert_eq!(file.owners, vec![dev]);
    }
}
