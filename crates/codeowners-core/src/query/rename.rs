//! Rewrite of an owner email across all declaration files of a branch.
//!
//! The rewrite is textual: each backend substitutes the email in the raw
//! content, so comments and formatting survive.  Persisting the rewritten
//! files is up to the caller.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{OwnersError, OwnersResult};
use crate::models::{AccountId, BranchNameKey};
use crate::query::guards::{validate_email, MAX_RENAME_FILES};
use crate::resolver::scanner::CodeOwnerConfigScanner;
use crate::service::CodeOwnersService;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmailRename {
    /// Revision the rewrite is based on.
    pub revision: String,
    /// New content per rewritten file.
    pub files: BTreeMap<String, String>,
}

/// Replace `old_email` by `new_email` in every declaration file of `branch`.
///
/// Both emails must belong to the same account and `caller` must be allowed
/// to write to the branch.
pub fn rename_email(
    service: &CodeOwnersService,
    branch: &BranchNameKey,
    old_email: &str,
    new_email: &str,
    caller: AccountId,
) -> OwnersResult<EmailRename> {
    let old_email = validate_email(old_email)?;
    let new_email = validate_email(new_email)?;
    if old_email == new_email {
        return Err(OwnersError::invalid_input(
            "old and new email must be different",
        ));
    }
    service.ensure_can_write(caller, branch)?;
    let loader = service.loader();
    let settings = loader.settings(branch)?;
    if settings.disabled {
        return Err(OwnersError::Disabled(branch.to_string()));
    }

    let account = single_account(service, &old_email)?;
    if single_account(service, &new_email)? != account {
        return Err(OwnersError::invalid_input(format!(
            "emails '{old_email}' and '{new_email}' must belong to the same account"
        )));
    }

    let revision = service.branch_head(branch)?;
    let paths = CodeOwnerConfigScanner::new(&loader).config_file_paths(branch, &revision, None)?;
    if paths.len() > MAX_RENAME_FILES {
        return Err(OwnersError::invalid_input(format!(
            "{} has {} code owner config files, at most {} can be rewritten at once",
            branch,
            paths.len(),
            MAX_RENAME_FILES
        )));
    }
    let backend = loader.backend(branch)?;
    let mut files = BTreeMap::new();
    for path in paths {
        let Some(bytes) = service.storage().read_file(&branch.project, &revision, &path)? else {
            continue;
        };
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                warn!("Skipping {} in {}: not valid UTF-8", path, branch);
                continue;
            }
        };
        let rewritten = backend.replace_email(&content, &old_email, &new_email);
        if rewritten != content {
            files.insert(path, rewritten);
        }
    }
    info!(
        "Renaming {} to {} for {} touches {} files in {}",
        old_email,
        new_email,
        account,
        files.len(),
        branch
    );
    Ok(EmailRename { revision, files })
}

fn single_account(service: &CodeOwnersService, email: &str) -> OwnersResult<AccountId> {
    let accounts = service.accounts().accounts_by_email(email)?;
    match (accounts.len(), accounts.iter().next()) {
        (1, Some(account)) => Ok(*account),
        (0, _) => Err(OwnersError::invalid_input(format!(
            "email '{email}' does not belong to any account"
        ))),
        _ => Err(OwnersError::invalid_input(format!(
            "email '{email}' is ambiguous"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::World;

    fn world() -> (World, AccountId) {
        let world = World::new();
        let account = world.accounts.add_account(1, "old@x.com");
        world.accounts.add_email(account, "new@x.com");
        world.accounts.add_account(2, "other@x.com");
        world.permissions.grant_write(AccountId(7), &world.branch());
        world.commit(&[
            ("/OWNERS", "old@x.com\nother@x.com\n"),
            ("/a/OWNERS", "# owners\nper-file *.md=old@x.com,bold@x.com\n"),
            ("/b/OWNERS", "other@x.com\n"),
        ]);
        (world, account)
    }

    #[test]
    fn test_rewrites_only_files_with_the_email() {
        let (world, _) = world();
        let service = world.service();
        let rename =
            rename_email(&service, &world.branch(), "old@x.com", "new@x.com", AccountId(7)).unwrap();
        assert_eq!(
            rename.files.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["/OWNERS", "/a/OWNERS"]
        );
        assert_eq!(rename.files["/OWNERS"], "new@x.com\nother@x.com\n");
        assert_eq!(
            rename.files["/a/OWNERS"],
            "# owners\nper-file *.md=new@x.com,bold@x.com\n"
        );
    }

    #[test]
    fn test_skips_files_that_are_not_utf8() {
        let (world, _) = world();
        let mut broken = b"old@x.com\n# caf".to_vec();
        broken.push(0xe9);
        broken.push(b'\n');
        world.storage.commit_bytes(&world.branch(), &[("/c/OWNERS", broken)]);
        let service = world.service();
        let rename =
            rename_email(&service, &world.branch(), "old@x.com", "new@x.com", AccountId(7)).unwrap();
        assert!(!rename.files.contains_key("/c/OWNERS"));
        assert!(rename.files.contains_key("/OWNERS"));
    }

    #[test]
    fn test_guards() {
        let (world, _) = world();
        let service = world.service();
        assert!(matches!(
            rename_email(&service, &world.branch(), "old@x.com", "new@x.com", AccountId(8)),
            Err(OwnersError::PermissionDenied(_))
        ));
        assert!(matches!(
            rename_email(&service, &world.branch(), "old@x.com", "other@x.com", AccountId(7)),
            Err(OwnersError::InvalidInput(_))
        ));
        assert!(matches!(
            rename_email(&service, &world.branch(), "old@x.com", "old@x.com", AccountId(7)),
            Err(OwnersError::InvalidInput(_))
        ));
    }
}
