//! Line-oriented `OWNERS` backend.
//!
//! Supported lines:
//!
//! ```text
//! # comment
//! set noparent
//! include [project:[branch:]]path
//! file: [project:[branch:]]path
//! per-file expr[,!exclusion]=directive[,directive] [#{ANNOTATION}]
//! *
//! user@example.com [#{ANNOTATION}]
//! ```
//!
//! Per-file directives are emails, `*`, `set noparent`, and `file:path`.

use std::sync::LazyLock;

use regex::Regex;

use crate::backend::matchers::{BackendPathMatcher, GlobMatcher, PathExpressionMatcher};
use crate::backend::{CodeOwnerBackend, ParseError};
use crate::models::{
    CodeOwnerAnnotation, CodeOwnerConfig, CodeOwnerConfigImportMode, CodeOwnerConfigKey,
    CodeOwnerConfigReference, CodeOwnerReference, CodeOwnerSet, ALL_USERS_WILDCARD,
};

pub const BACKEND_ID: &str = "find-owners";
pub const FILE_NAME: &str = "OWNERS";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@,=#]+@[^\s@,=#]+$").unwrap());
static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\{([A-Za-z0-9_]+)\}").unwrap());
static SET_NOPARENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^set\s+noparent$").unwrap());
static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^include\s+(\S+)$").unwrap());
static FILE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^file:\s*(\S+)$").unwrap());
static PER_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^per-file\s+([^=]+?)\s*=\s*(.+)$").unwrap());

pub struct FindOwnersBackend {
    matcher: BackendPathMatcher,
}

impl FindOwnersBackend {
    pub fn new() -> Self {
        Self {
            matcher: BackendPathMatcher::new(GlobMatcher::unanchored()),
        }
    }
}

impl Default for FindOwnersBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a raw line into its content and trailing `#{...}` annotations,
/// dropping a plain `#` comment.
fn split_line(raw: &str) -> (String, Vec<String>) {
    let mut content = String::new();
    let mut annotations = Vec::new();
    let mut rest = raw;
    while let Some(idx) = rest.find('#') {
        content.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        match ANNOTATION_RE.captures(tail) {
            Some(caps) => {
                annotations.push(caps[1].to_string());
                rest = &tail[caps[0].len()..];
            }
            None => {
                rest = "";
                break;
            }
        }
    }
    content.push_str(rest);
    (content.trim().to_string(), annotations)
}

fn parse_import(
    mode: CodeOwnerConfigImportMode,
    spec: &str,
    line: usize,
) -> Result<CodeOwnerConfigReference, ParseError> {
    let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ParseError::at_line(line, format!("invalid import '{spec}'")));
    }
    match parts.as_slice() {
        [path] => Ok(CodeOwnerConfigReference::new(mode, *path)),
        [project, path] => Ok(CodeOwnerConfigReference::new(mode, *path).in_project(*project)),
        [project, branch, path] => Ok(CodeOwnerConfigReference::new(mode, *path)
            .in_project(*project)
            .in_branch(*branch)),
        _ => Err(ParseError::at_line(line, format!("invalid import '{spec}'"))),
    }
}

fn annotate_all(set: &mut CodeOwnerSet, emails: &[String], annotations: &[String]) {
    for email in emails {
        for annotation in annotations {
            set.annotate(email, CodeOwnerAnnotation::new(annotation.clone()));
        }
    }
}

fn parse_per_file(
    expressions: &str,
    directives: &str,
    annotations: &[String],
    line: usize,
) -> Result<CodeOwnerSet, ParseError> {
    let mut set = CodeOwnerSet::default();
    for expr in expressions.split(',').map(str::trim) {
        if expr.is_empty() {
            return Err(ParseError::at_line(line, "empty path expression"));
        }
        match expr.strip_prefix('!') {
            Some(exclusion) => set.exclusions.push(exclusion.to_string()),
            None => set.path_expressions.push(expr.to_string()),
        }
    }
    if set.path_expressions.is_empty() {
        return Err(ParseError::at_line(
            line,
            "per-file line needs at least one path expression that is not an exclusion",
        ));
    }

    let mut annotated = Vec::new();
    for directive in directives.split(',').map(str::trim) {
        if SET_NOPARENT_RE.is_match(directive) {
            set.ignore_global_and_parent_code_owners = true;
        } else if directive == ALL_USERS_WILDCARD {
            set.code_owners.insert(CodeOwnerReference::all_users());
            annotated.push(ALL_USERS_WILDCARD.to_string());
        } else if let Some(target) = directive.strip_prefix("file:") {
            set.imports.push(parse_import(
                CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly,
                target.trim(),
                line,
            )?);
        } else if EMAIL_RE.is_match(directive) {
            set.code_owners.insert(CodeOwnerReference::new(directive));
            annotated.push(directive.to_string());
        } else {
            return Err(ParseError::at_line(
                line,
                format!("invalid per-file directive '{directive}'"),
            ));
        }
    }
    annotate_all(&mut set, &annotated, annotations);
    Ok(set)
}

fn format_annotations(set: &CodeOwnerSet, email: &str) -> String {
    set.annotations
        .get(email)
        .map(|annotations| {
            annotations
                .iter()
                .map(|a| format!(" #{{{}}}", a.key()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

impl CodeOwnerBackend for FindOwnersBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn default_file_name(&self) -> &'static str {
        FILE_NAME
    }

    fn is_code_owner_config_file(&self, file_name: &str, file_extension: Option<&str>) -> bool {
        let base = match file_extension.filter(|ext| !ext.is_empty()) {
            Some(ext) => match file_name.strip_suffix(&format!(".{ext}")) {
                Some(base) => base,
                None => return false,
            },
            None => file_name,
        };
        if base.contains('.') {
            return false;
        }
        base == FILE_NAME
            || (base.len() > FILE_NAME.len() + 1
                && (base.starts_with("OWNERS_") || base.ends_with("_OWNERS")))
    }

    fn parse(
        &self,
        key: &CodeOwnerConfigKey,
        revision: &str,
        content: &str,
    ) -> Result<CodeOwnerConfig, ParseError> {
        let mut config = CodeOwnerConfig::new(key.clone(), revision);
        let mut global = CodeOwnerSet::default();

        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let (text, annotations) = split_line(raw);
            if text.is_empty() {
                if !annotations.is_empty() {
                    return Err(ParseError::at_line(line, "annotation without code owner"));
                }
                continue;
            }

            let owner_line = text == ALL_USERS_WILDCARD || EMAIL_RE.is_match(&text);
            let per_file = PER_FILE_RE.captures(&text);
            if !annotations.is_empty() && !owner_line && per_file.is_none() {
                return Err(ParseError::at_line(
                    line,
                    "annotations are only allowed on code owner lines",
                ));
            }

            if SET_NOPARENT_RE.is_match(&text) {
                config.ignore_parent_code_owners = true;
            } else if let Some(caps) = INCLUDE_RE.captures(&text) {
                config
                    .imports
                    .push(parse_import(CodeOwnerConfigImportMode::All, &caps[1], line)?);
            } else if let Some(caps) = FILE_RE.captures(&text) {
                config.imports.push(parse_import(
                    CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly,
                    &caps[1],
                    line,
                )?);
            } else if let Some(caps) = per_file {
                config
                    .code_owner_sets
                    .push(parse_per_file(&caps[1], &caps[2], &annotations, line)?);
            } else if owner_line {
                global.code_owners.insert(CodeOwnerReference::new(text.as_str()));
                annotate_all(&mut global, &[text.clone()], &annotations);
            } else {
                return Err(ParseError::at_line(
                    line,
                    format!("invalid line: {}", raw.trim()),
                ));
            }
        }

        if !global.code_owners.is_empty() {
            config.code_owner_sets.insert(0, global);
        }
        Ok(config)
    }

    fn format(&self, config: &CodeOwnerConfig) -> String {
        let mut out = String::new();
        if config.ignore_parent_code_owners {
            out.push_str("set noparent\n");
        }
        for import in &config.imports {
            match import.import_mode {
                CodeOwnerConfigImportMode::All => out.push_str(&format!("include {import}\n")),
                CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly => {
                    out.push_str(&format!("file: {import}\n"))
                }
            }
        }
        for set in config.global_code_owner_sets() {
            for owner in &set.code_owners {
                out.push_str(&format!("{}{}\n", owner, format_annotations(set, &owner.email)));
            }
        }
        for set in config.per_file_code_owner_sets() {
            let expressions: Vec<String> = set
                .path_expressions
                .iter()
                .cloned()
                .chain(set.exclusions.iter().map(|e| format!("!{e}")))
                .collect();
            let expressions = expressions.join(",");

            let mut directives = Vec::new();
            if set.ignore_global_and_parent_code_owners {
                directives.push("set noparent".to_string());
            }
            directives.extend(set.code_owners.iter().map(|o| o.email.clone()));
            directives.extend(set.imports.iter().map(|i| format!("file:{i}")));
            if !directives.is_empty() {
                out.push_str(&format!("per-file {}={}\n", expressions, directives.join(",")));
            }
            for owner in &set.code_owners {
                let annotations = format_annotations(set, &owner.email);
                if !annotations.is_empty() {
                    out.push_str(&format!("per-file {}={}{}\n", expressions, owner, annotations));
                }
            }
        }
        out
    }

    fn path_expression_matcher(&self) -> &dyn PathExpressionMatcher {
        &self.matcher
    }

    fn replace_email(&self, content: &str, old_email: &str, new_email: &str) -> String {
        if old_email == new_email {
            return content.to_string();
        }
        let pattern = format!(r"(?m)(^|[\s,=]){}($|[\s,#])", regex::escape(old_email));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => return content.to_string(),
        };
        let replacement = format!("${{1}}{}${{2}}", new_email.replace('$', "$$"));
        // Adjacent occurrences share a separator, so a second pass is needed.
        let first = re.replace_all(content, replacement.as_str()).into_owned();
        re.replace_all(&first, replacement.as_str()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchNameKey;

    fn key() -> CodeOwnerConfigKey {
        CodeOwnerConfigKey::new(&BranchNameKey::new("p", "main"), "/foo")
    }

    fn parse(content: &str) -> CodeOwnerConfig {
        FindOwnersBackend::new().parse(&key(), "r1", content).unwrap()
    }

    #[test]
    fn test_parse_global_owners_and_comments() {
        let config = parse("# owners\na@x.com\n\nb@x.com # lead\n*\n");
        assert_eq!(config.code_owner_sets.len(), 1);
        let emails: Vec<&str> = config.code_owner_sets[0]
            .code_owners
            .iter()
            .map(|o| o.email.as_str())
            .collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "*"]);
        assert!(!config.ignore_parent_code_owners);
    }

    #[test]
    fn test_parse_set_noparent_and_imports() {
        let config = parse("set noparent\ninclude /OWNERS\nfile: other:refs/heads/dev:/x/OWNERS\n");
        assert!(config.ignore_parent_code_owners);
        assert_eq!(config.imports.len(), 2);
        assert_eq!(config.imports[0].import_mode, CodeOwnerConfigImportMode::All);
        assert_eq!(config.imports[0].file_path, "/OWNERS");
        let second = &config.imports[1];
        assert_eq!(second.import_mode, CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly);
        assert_eq!(second.project.as_deref(), Some("other"));
        assert_eq!(second.branch.as_deref(), Some("refs/heads/dev"));
        assert_eq!(second.file_path, "/x/OWNERS");
    }

    #[test]
    fn test_parse_per_file() {
        let config =
            parse("per-file *.md,!CHANGELOG.md=set noparent,doc@x.com,file:/docs/OWNERS #{NEVER_SUGGEST}\n");
        let set = &config.code_owner_sets[0];
        assert_eq!(set.path_expressions, vec!["*.md"]);
        assert_eq!(set.exclusions, vec!["CHANGELOG.md"]);
        assert!(set.ignore_global_and_parent_code_owners);
        assert!(set.code_owners.contains(&CodeOwnerReference::new("doc@x.com")));
        assert_eq!(set.imports.len(), 1);
        assert!(set.annotations["doc@x.com"].contains(&CodeOwnerAnnotation::never_suggest()));
    }

    #[test]
    fn test_parse_annotation_on_global_owner() {
        let config = parse("a@x.com #{LAST_RESORT_SUGGESTION}\n");
        let set = &config.code_owner_sets[0];
        assert!(set.annotations["a@x.com"].contains(&CodeOwnerAnnotation::last_resort_suggestion()));
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = FindOwnersBackend::new()
            .parse(&key(), "r1", "a@x.com\nnot an owner\n")
            .unwrap_err();
        assert_eq!(err.line, Some(2));
        let err = FindOwnersBackend::new()
            .parse(&key(), "r1", "set noparent #{NEVER_SUGGEST}\n")
            .unwrap_err();
        assert_eq!(err.line, Some(1));
        assert!(FindOwnersBackend::new()
            .parse(&key(), "r1", "per-file !a.txt=a@x.com\n")
            .is_err());
    }

    #[test]
    fn test_format_reparses_to_same_owners() {
        let backend = FindOwnersBackend::new();
        let original = parse("set noparent\ninclude /OWNERS\na@x.com #{NEVER_SUGGEST}\nper-file *.md=b@x.com\n");
        let formatted = backend.format(&original);
        let reparsed = backend.parse(&key(), "r1", &formatted).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_config_file_names() {
        let backend = FindOwnersBackend::new();
        assert!(backend.is_code_owner_config_file("OWNERS", None));
        assert!(backend.is_code_owner_config_file("OWNERS_build", None));
        assert!(backend.is_code_owner_config_file("build_OWNERS", None));
        assert!(!backend.is_code_owner_config_file("OWNERS_", None));
        assert!(!backend.is_code_owner_config_file("OWNERS.md", None));
        assert!(backend.is_code_owner_config_file("OWNERS.foo", Some("foo")));
        assert!(!backend.is_code_owner_config_file("OWNERS", Some("foo")));
    }

    #[test]
    fn test_replace_email_respects_boundaries() {
        let backend = FindOwnersBackend::new();
        let content = "a@x.com\naa@x.com\nper-file *.md=a@x.com,a@x.com,b@x.com\nc@x.com #{NEVER_SUGGEST}\n";
        let replaced = backend.replace_email(content, "a@x.com", "n@x.com");
        assert_eq!(
            replaced,
            "n@x.com\naa@x.com\nper-file *.md=n@x.com,n@x.com,b@x.com\nc@x.com #{NEVER_SUGGEST}\n"
        );
    }
}
