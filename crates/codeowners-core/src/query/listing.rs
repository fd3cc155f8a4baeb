//! Listing of the declaration files of a branch.

use indexmap::IndexSet;
use serde::Serialize;

use crate::errors::OwnersResult;
use crate::models::BranchNameKey;
use crate::resolver::hierarchy::Visit;
use crate::resolver::scanner::CodeOwnerConfigScanner;
use crate::resolver::Cancellation;
use crate::service::CodeOwnersService;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidConfigFile {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodeOwnerConfigFiles {
    /// Parsable declaration files, in path order.
    pub files: Vec<String>,
    pub invalid_files: Vec<InvalidConfigFile>,
    /// Owner emails referenced by the listed files, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
}

/// Every declaration file of `branch` matching the root-relative `glob`.
pub fn list_code_owner_config_files(
    service: &CodeOwnersService,
    branch: &BranchNameKey,
    glob: Option<&str>,
    with_emails: bool,
    cancellation: &Cancellation,
) -> OwnersResult<CodeOwnerConfigFiles> {
    let revision = service.branch_head(branch)?;
    let loader = service.loader();
    let mut listing = CodeOwnerConfigFiles::default();
    let mut emails = IndexSet::new();
    let mut invalid = Vec::new();
    CodeOwnerConfigScanner::new(&loader)
        .with_cancellation(cancellation.clone())
        .visit_all(
            branch,
            &revision,
            glob,
            &mut |config| {
                listing.files.push(loader.file_path(&config.key)?);
                if with_emails {
                    emails.extend(config.referenced_emails());
                }
                Ok(Visit::Continue)
            },
            &mut |path, message| {
                invalid.push(InvalidConfigFile {
                    path: path.to_string(),
                    message: message.to_string(),
                })
            },
        )?;
    listing.invalid_files = invalid;
    listing.emails = emails.into_iter().collect();
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::World;

    #[test]
    fn test_lists_valid_and_invalid_files() {
        let world = World::new();
        world.commit(&[
            ("/OWNERS", "a@x.com\n"),
            ("/docs/OWNERS", "b@x.com\na@x.com\n"),
            ("/src/OWNERS", "broken line\n"),
            ("/src/main.rs", "fn main() {}\n"),
        ]);
        let service = world.service();
        let listing =
            list_code_owner_config_files(&service, &world.branch(), None, true, &Cancellation::new())
                .unwrap();
        assert_eq!(listing.files, vec!["/OWNERS", "/docs/OWNERS"]);
        assert_eq!(listing.invalid_files.len(), 1);
        assert_eq!(listing.invalid_files[0].path, "/src/OWNERS");
        assert_eq!(listing.emails, vec!["a@x.com", "b@x.com"]);

        let docs = list_code_owner_config_files(
            &service,
            &world.branch(),
            Some("/docs/**"),
            false,
            &Cancellation::new(),
        )
        .unwrap();
        assert_eq!(docs.files, vec!["/docs/OWNERS"]);
        assert!(docs.emails.is_empty());
    }
}
