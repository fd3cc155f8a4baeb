//! Validation of declaration files, for pre-submit checks of edited files
//! and for auditing a whole branch.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::errors::OwnersResult;
use crate::models::{BranchNameKey, CodeOwnerConfig, CodeOwnerReference};
use crate::resolver::owners::{CodeOwnerResolver, ResolvedReference};
use crate::resolver::path_code_owners::PathCodeOwners;
use crate::resolver::scanner::CodeOwnerConfigScanner;
use crate::service::CodeOwnersService;
use crate::store::paths::{file_name, normalize_file_path};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationSeverity {
    Fatal,
    Error,
    Warning,
    Hint,
}

impl ValidationSeverity {
    /// Whether a message of this severity blocks the submission.
    pub fn is_blocking(self) -> bool {
        matches!(self, ValidationSeverity::Fatal | ValidationSeverity::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationMessage {
    fn new(severity: ValidationSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)
    }
}

pub fn has_blocking_messages(messages: &[ValidationMessage]) -> bool {
    messages.iter().any(|m| m.severity.is_blocking())
}

/// Validate the new `content` of the declaration file at `path`.
///
/// Imports of the same branch are checked at `revision` (the branch head when
/// absent).  Files that are not declaration files yield no messages.
pub fn validate_declaration_file(
    service: &CodeOwnersService,
    branch: &BranchNameKey,
    revision: Option<&str>,
    path: &str,
    content: &str,
) -> OwnersResult<Vec<ValidationMessage>> {
    let path = normalize_file_path(path)?;
    let loader = service.loader();
    let settings = loader.settings(branch)?;
    if settings.disabled {
        return Ok(vec![ValidationMessage::new(
            ValidationSeverity::Hint,
            format!("code owners functionality is disabled for {branch}, '{path}' was not validated"),
        )]);
    }
    let backend = loader.backend(branch)?;
    if !backend.is_code_owner_config_file(file_name(&path), settings.file_extension.as_deref()) {
        return Ok(Vec::new());
    }
    let revision = match revision {
        Some(revision) => revision.to_string(),
        None => loader.revision(branch)?.unwrap_or_default(),
    };
    let key = loader.key_for_path(branch, &path)?;
    let config = match backend.parse(&key, &revision, content) {
        Ok(config) => config,
        Err(e) => {
            return Ok(vec![ValidationMessage::new(
                ValidationSeverity::Fatal,
                format!("invalid code owner config file '{path}': {e}"),
            )])
        }
    };

    let mut messages = Vec::new();
    let unresolvable = |reject: bool| {
        if reject {
            ValidationSeverity::Error
        } else {
            ValidationSeverity::Warning
        }
    };

    let matcher = backend.path_expression_matcher();
    for set in &config.code_owner_sets {
        for expression in set.path_expressions.iter().chain(set.exclusions.iter()) {
            if let Err(problem) = matcher.validate(expression) {
                messages.push(ValidationMessage::new(
                    ValidationSeverity::Error,
                    format!("invalid path expression '{expression}' in '{path}': {problem}"),
                ));
            }
        }
        for (email, annotations) in &set.annotations {
            for annotation in annotations.iter().filter(|a| !a.is_known()) {
                messages.push(ValidationMessage::new(
                    ValidationSeverity::Warning,
                    format!(
                        "unknown annotation '{}' for email '{}' in '{}' is ignored",
                        annotation.key(),
                        email,
                        path
                    ),
                ));
            }
        }
    }

    let resolver = CodeOwnerResolver::new(service.accounts(), service.permissions(), &settings);
    for email in config.referenced_emails() {
        if let ResolvedReference::Unresolved(reason) =
            resolver.resolve(&CodeOwnerReference::new(email.as_str()))?
        {
            messages.push(ValidationMessage::new(
                unresolvable(settings.reject_non_resolvable_code_owners),
                format!("code owner email '{email}' in '{path}' cannot be resolved: {reason}"),
            ));
        }
    }

    let imports = PathCodeOwners::new(&loader, settings.max_import_depth);
    for reference in all_imports(&config) {
        if let Some(unresolved) = imports.check_import(&config, reference)? {
            messages.push(ValidationMessage::new(
                unresolvable(settings.reject_non_resolvable_imports),
                format!(
                    "invalid import '{}' in '{}': {}",
                    reference, path, unresolved.message
                ),
            ));
        }
    }
    debug!("Validated {} in {}: {} messages", path, branch, messages.len());
    Ok(messages)
}

fn all_imports(
    config: &CodeOwnerConfig,
) -> impl Iterator<Item = &crate::models::CodeOwnerConfigReference> {
    config
        .imports
        .iter()
        .chain(config.code_owner_sets.iter().flat_map(|set| set.imports.iter()))
}

/// Validate every declaration file of a branch; files without findings are
/// omitted.  A file that cannot be read aborts the scan, a file that cannot
/// be parsed is reported as fatal.
pub fn check_branch_config_files(
    service: &CodeOwnersService,
    branch: &BranchNameKey,
) -> OwnersResult<BTreeMap<String, Vec<ValidationMessage>>> {
    let revision = service.branch_head(branch)?;
    let loader = service.loader();
    let paths = CodeOwnerConfigScanner::new(&loader).config_file_paths(branch, &revision, None)?;
    let mut findings = BTreeMap::new();
    for path in paths {
        let Some(bytes) = service.storage().read_file(&branch.project, &revision, &path)? else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        let messages =
            validate_declaration_file(service, branch, Some(&revision), &path, &content)?;
        if !messages.is_empty() {
            findings.insert(path, messages);
        }
    }
    info!(
        "Checked code owner config files of {}: {} files with findings",
        branch,
        findings.len()
    );
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::World;

    fn validate(service: &CodeOwnersService, world: &World, path: &str, content: &str) -> Vec<ValidationMessage> {
        validate_declaration_file(service, &world.branch(), None, path, content).unwrap()
    }

    fn severities(messages: &[ValidationMessage]) -> Vec<ValidationSeverity> {
        messages.iter().map(|m| m.severity).collect()
    }

    #[test]
    fn test_valid_file_has_no_messages() {
        let world = World::new();
        world.accounts.add_account(1, "a@x.com");
        world.commit(&[("/README", "hi\n")]);
        let service = world.service();
        assert!(validate(&service, &world, "/OWNERS", "a@x.com\n*\n").is_empty());
        assert!(validate(&service, &world, "/src/main.rs", "not owners").is_empty());
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let world = World::new();
        world.commit(&[("/README", "hi\n")]);
        let service = world.service();
        let messages = validate(&service, &world, "/OWNERS", "this is not valid\n");
        assert_eq!(severities(&messages), vec![ValidationSeverity::Fatal]);
        assert!(has_blocking_messages(&messages));
    }

    #[test]
    fn test_unresolvable_owner_severity_follows_settings() {
        let world = World::new();
        world.commit(&[("/README", "hi\n")]);
        let strict = world.service();
        let messages = validate(&strict, &world, "/OWNERS", "ghost@x.com\n");
        assert_eq!(severities(&messages), vec![ValidationSeverity::Error]);

        let lenient = world
            .service_json(r#"{ "general": { "reject_non_resolvable_code_owners": false } }"#);
        let messages = validate(&lenient, &world, "/OWNERS", "ghost@x.com\n");
        assert_eq!(severities(&messages), vec![ValidationSeverity::Warning]);
        assert!(!has_blocking_messages(&messages));
    }

    #[test]
    fn test_unresolvable_import_and_unknown_annotation() {
        let world = World::new();
        world.accounts.add_account(1, "a@x.com");
        world.commit(&[("/README", "hi\n")]);
        let service = world.service();
        let messages = validate(
            &service,
            &world,
            "/OWNERS",
            "a@x.com #{SOMETIMES}\ninclude /missing/OWNERS\n",
        );
        assert_eq!(
            severities(&messages),
            vec![ValidationSeverity::Warning, ValidationSeverity::Error]
        );
        assert!(messages[1].message.contains("/missing/OWNERS"));
    }

    #[test]
    fn test_disabled_branch_gives_hint() {
        let world = World::new();
        world.commit(&[("/README", "hi\n")]);
        let service = world.service_json(r#"{ "general": { "disabled": true } }"#);
        let messages = validate(&service, &world, "/OWNERS", "garbage line\n");
        assert_eq!(severities(&messages), vec![ValidationSeverity::Hint]);
    }

    #[test]
    fn test_branch_check_reports_every_bad_file() {
        let world = World::new();
        world.accounts.add_account(1, "a@x.com");
        world.commit(&[
            ("/OWNERS", "a@x.com\n"),
            ("/a/OWNERS", "garbage line\n"),
            ("/b/OWNERS", "ghost@x.com\n"),
        ]);
        let service = world.service();
        let findings = check_branch_config_files(&service, &world.branch()).unwrap();
        assert_eq!(
            findings.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["/a/OWNERS", "/b/OWNERS"]
        );
        assert_eq!(findings["/a/OWNERS"][0].severity, ValidationSeverity::Fatal);
        assert_eq!(findings["/b/OWNERS"][0].severity, ValidationSeverity::Error);
    }
}
