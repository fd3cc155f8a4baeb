//! Diagnostic check whether an email owns a path, and why.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::config::FallbackCodeOwners;
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{AccountId, BranchNameKey, CodeOwnerReference};
use crate::query::guards::validate_email;
use crate::query::ownership::{collect_path_ownership, OwnerSource};
use crate::resolver::owners::{CodeOwnerResolver, ResolvedReference, UnresolvedReason};
use crate::resolver::Cancellation;
use crate::service::CodeOwnersService;
use crate::store::paths::normalize_file_path;

#[derive(Clone, Debug)]
pub struct OwnershipCheckRequest {
    pub branch: BranchNameKey,
    /// Branch head when absent.
    pub revision: Option<String>,
    pub email: String,
    pub path: String,
    /// Additionally check that the owner is visible to this user.
    pub calling_user: Option<AccountId>,
    /// The administrator running the check.
    pub invoker: AccountId,
    pub cancellation: Cancellation,
}

impl OwnershipCheckRequest {
    pub fn new(
        branch: BranchNameKey,
        email: impl Into<String>,
        path: impl Into<String>,
        invoker: AccountId,
    ) -> Self {
        Self {
            branch,
            revision: None,
            email: email.into(),
            path: path.into(),
            calling_user: None,
            invoker,
            cancellation: Cancellation::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodeOwnerCheckInfo {
    pub is_code_owner: bool,
    pub is_resolvable: bool,
    pub is_ambiguous: bool,
    pub can_read_ref: Option<bool>,
    pub can_see: Option<bool>,
    /// Declaration files that name the email or the all-users wildcard.
    pub code_owner_config_file_paths: Vec<String>,
    pub is_fallback_code_owner: bool,
    pub is_default_code_owner: bool,
    pub is_global_code_owner: bool,
    pub is_owned_by_all_users: bool,
    pub annotations: Vec<String>,
    pub debug_logs: Vec<String>,
}

/// Explain whether `request.email` is a code owner of `request.path`.
///
/// Requires the invoker to hold the check capability.
pub fn check_code_ownership(
    service: &CodeOwnersService,
    request: &OwnershipCheckRequest,
) -> OwnersResult<CodeOwnerCheckInfo> {
    if !service.permissions().can_check_code_owner(request.invoker)? {
        return Err(OwnersError::PermissionDenied(format!(
            "{} may not check code ownership",
            request.invoker
        )));
    }
    let email = validate_email(&request.email)?;
    let path = normalize_file_path(&request.path)?;
    let branch = &request.branch;
    let revision = match &request.revision {
        Some(revision) => revision.clone(),
        None => service.branch_head(branch)?,
    };

    let loader = service.loader();
    let settings = loader.settings(branch)?;
    if settings.disabled {
        return Err(OwnersError::Disabled(branch.to_string()));
    }
    let ownership =
        collect_path_ownership(&loader, &settings, &revision, &path, &request.cancellation)?;

    let mut info = CodeOwnerCheckInfo::default();
    let resolver = CodeOwnerResolver::new(service.accounts(), service.permissions(), &settings)
        .for_calling_user(request.calling_user);
    let (resolved, messages) = resolver.resolve_with_messages(&CodeOwnerReference::new(email.as_str()))?;
    info.debug_logs.extend(messages);
    info.is_resolvable = resolved.owner().is_some();

    let accounts = service.accounts().accounts_by_email(&email)?;
    let account = match &resolved {
        ResolvedReference::Owner(owner) => Some(owner.account_id),
        ResolvedReference::Unresolved(UnresolvedReason::Ambiguous { .. }) => {
            info.is_ambiguous = true;
            None
        }
        _ if accounts.len() == 1 => accounts.iter().next().copied(),
        _ => None,
    };
    if let Some(account) = account {
        info.can_read_ref = Some(service.permissions().can_read(account, branch)?);
        if let Some(viewer) = request.calling_user {
            info.can_see = Some(service.accounts().can_see(viewer, account)?);
        }
    }

    let mut config_files = BTreeSet::new();
    for entry in &ownership.entries {
        let names_email = entry.reference.names(&email);
        let wildcard = entry.reference.is_all_users();
        if !names_email && !wildcard {
            continue;
        }
        if wildcard {
            info.is_owned_by_all_users = true;
        }
        let location = match &entry.config {
            Some(key) => {
                let file = loader.file_path(key)?;
                config_files.insert(file.clone());
                file
            }
            None => "the global code owners setting".to_string(),
        };
        match entry.source {
            OwnerSource::DefaultConfig if names_email => info.is_default_code_owner = true,
            OwnerSource::GlobalOwners if names_email => info.is_global_code_owner = true,
            _ => {}
        }
        info.debug_logs.push(format!(
            "found '{}' in {} (distance {})",
            entry.reference, location, entry.distance
        ));
    }
    info.code_owner_config_file_paths = config_files.into_iter().collect();

    if let Some(key) = &ownership.stopped_at {
        info.debug_logs
            .push(format!("parent code owners are ignored from {key} upwards"));
    }
    for (key, message) in &ownership.invalid_configs {
        info.debug_logs
            .push(format!("skipped invalid code owner config {key}: {message}"));
    }
    for unresolved in &ownership.unresolved_imports {
        info.debug_logs.push(format!("unresolved import: {unresolved}"));
    }

    if !ownership.has_declared_owners() {
        match settings.fallback_code_owners {
            FallbackCodeOwners::None => info
                .debug_logs
                .push("no code owners defined, no fallback configured".to_string()),
            FallbackCodeOwners::AllUsers => {
                info.is_fallback_code_owner = true;
                info.debug_logs
                    .push("no code owners defined, all users are fallback code owners".to_string());
            }
            FallbackCodeOwners::ProjectOwners => {
                if let Some(account) = account {
                    info.is_fallback_code_owner =
                        service.permissions().is_project_owner(account, &branch.project)?;
                }
                info.debug_logs.push(format!(
                    "no code owners defined, project owners are fallback code owners (is project owner: {})",
                    info.is_fallback_code_owner
                ));
            }
        }
    }

    let annotations: BTreeSet<String> = ownership
        .annotations_of(&email)
        .map(|a| a.key().to_string())
        .collect();
    info.annotations = annotations.into_iter().collect();

    let names_email = ownership.entries.iter().any(|e| e.reference.names(&email));
    info.is_code_owner = info.is_resolvable
        && (names_email || info.is_owned_by_all_users || info.is_fallback_code_owner);
    debug!(
        "Checked code ownership of {} for {} in {}: {}",
        email, path, branch, info.is_code_owner
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::World;

    const ADMIN: AccountId = AccountId(100);

    fn world() -> World {
        let world = World::new();
        world.accounts.add_account(100, "admin@x.com");
        world.permissions.grant_check_code_owner(ADMIN);
        world
    }

    fn check(service: &CodeOwnersService, branch: BranchNameKey, email: &str, path: &str) -> CodeOwnerCheckInfo {
        check_code_ownership(service, &OwnershipCheckRequest::new(branch, email, path, ADMIN)).unwrap()
    }

    #[test]
    fn test_owner_in_folder_file() {
        let world = world();
        world.accounts.add_account(1, "a@x.com");
        world.commit(&[("/OWNERS", "b@x.com\n"), ("/foo/OWNERS", "a@x.com #{NEVER_SUGGEST}\n")]);
        let service = world.service();
        let info = check(&service, world.branch(), "a@x.com", "/foo/bar.txt");
        assert!(info.is_code_owner);
        assert!(info.is_resolvable);
        assert_eq!(info.code_owner_config_file_paths, vec!["/foo/OWNERS"]);
        assert_eq!(info.annotations, vec!["NEVER_SUGGEST"]);
        assert_eq!(info.can_read_ref, Some(true));
        assert!(!info.is_global_code_owner);
    }

    #[test]
    fn test_email_case_does_not_matter() {
        let world = world();
        world.accounts.add_account(1, "foo@x.com");
        world.commit(&[("/OWNERS", "Foo@x.com #{LAST_RESORT_SUGGESTION}\n")]);
        let service = world.service();
        let info = check(&service, world.branch(), "foo@x.com", "/bar.txt");
        assert!(info.is_code_owner);
        assert_eq!(info.code_owner_config_file_paths, vec!["/OWNERS"]);
        assert_eq!(info.annotations, vec!["LAST_RESORT_SUGGESTION"]);
    }

    #[test]
    fn test_global_and_default_owners() {
        let world = world();
        world.accounts.add_account(1, "g@x.com");
        world.accounts.add_account(2, "d@x.com");
        world.commit(&[("/README", "hi\n")]);
        world
            .storage
            .commit(&BranchNameKey::meta_config("p"), &[("/OWNERS", "d@x.com\n")]);
        let service = world.service_json(r#"{ "general": { "global_code_owners": ["g@x.com"] } }"#);
        let global = check(&service, world.branch(), "g@x.com", "/x.txt");
        assert!(global.is_code_owner && global.is_global_code_owner);
        assert!(global.code_owner_config_file_paths.is_empty());
        let default = check(&service, world.branch(), "d@x.com", "/x.txt");
        assert!(default.is_code_owner && default.is_default_code_owner);
    }

    #[test]
    fn test_ambiguous_email_is_reported() {
        let world = world();
        world.accounts.add_account(1, "dup@x.com");
        world.accounts.add_account(2, "dup@x.com");
        world.commit(&[("/OWNERS", "dup@x.com\n")]);
        let service = world.service();
        let info = check(&service, world.branch(), "dup@x.com", "/x.txt");
        assert!(!info.is_code_owner);
        assert!(info.is_ambiguous);
        assert!(info.debug_logs.iter().any(|l| l.contains("ambiguous")));
    }

    #[test]
    fn test_fallback_and_visibility() {
        let world = world();
        let a = world.accounts.add_account(1, "a@x.com");
        world.accounts.hide(AccountId(9), a);
        world.commit(&[("/README", "hi\n")]);
        let service =
            world.service_json(r#"{ "general": { "fallback_code_owners": "ALL_USERS" } }"#);
        let info = check(&service, world.branch(), "a@x.com", "/x.txt");
        assert!(info.is_fallback_code_owner && info.is_code_owner);

        let mut request = OwnershipCheckRequest::new(world.branch(), "a@x.com", "/x.txt", ADMIN);
        request.calling_user = Some(AccountId(9));
        let hidden = check_code_ownership(&service, &request).unwrap();
        assert_eq!(hidden.can_see, Some(false));
        assert!(!hidden.is_code_owner);
    }

    #[test]
    fn test_requires_check_capability() {
        let world = world();
        world.commit(&[("/OWNERS", "a@x.com\n")]);
        let service = world.service();
        let request = OwnershipCheckRequest::new(world.branch(), "a@x.com", "/x.txt", AccountId(1));
        assert!(matches!(
            check_code_ownership(&service, &request),
            Err(OwnersError::PermissionDenied(_))
        ));
    }
}
