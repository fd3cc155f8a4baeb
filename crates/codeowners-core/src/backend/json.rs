//! Structured `CODE_OWNERS.json` backend.
//!
//! ```json
//! {
//!   "ignore_parent_code_owners": false,
//!   "imports": [{"project": "common", "path": "/OWNERS_SHARED.json", "mode": "ALL"}],
//!   "owner_sets": [
//!     {"owners": [{"email": "lead@example.com"}]},
//!     {"path_expressions": ["*.md"], "owners": [{"email": "docs@example.com",
//!       "annotations": ["LAST_RESORT_SUGGESTION"]}]}
//!   ]
//! }
//! ```
//!
//! Globs are anchored at the folder of the file.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::matchers::{BackendPathMatcher, GlobMatcher, PathExpressionMatcher};
use crate::backend::{CodeOwnerBackend, ParseError};
use crate::models::{
    CodeOwnerAnnotation, CodeOwnerConfig, CodeOwnerConfigImportMode, CodeOwnerConfigKey,
    CodeOwnerConfigReference, CodeOwnerReference, CodeOwnerSet,
};

pub const BACKEND_ID: &str = "json";
pub const FILE_NAME: &str = "CODE_OWNERS.json";
const FILE_SUFFIX: &str = "_CODE_OWNERS.json";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@,=#]+@[^\s@,=#]+$").unwrap());

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonCodeOwnerConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ignore_parent_code_owners: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    imports: Vec<JsonImport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    owner_sets: Vec<JsonOwnerSet>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonImport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    path: String,
    #[serde(default = "default_import_mode")]
    mode: CodeOwnerConfigImportMode,
}

fn default_import_mode() -> CodeOwnerConfigImportMode {
    CodeOwnerConfigImportMode::All
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonOwnerSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    path_expressions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ignore_global_and_parent_code_owners: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    owners: Vec<JsonOwner>,
    /// Always imported as global owner sets only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    imports: Vec<JsonImport>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonOwner {
    email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<String>,
}

impl JsonImport {
    fn into_reference(self, mode: CodeOwnerConfigImportMode) -> CodeOwnerConfigReference {
        CodeOwnerConfigReference {
            import_mode: mode,
            project: self.project,
            branch: self.branch,
            file_path: self.path,
        }
    }

    fn from_reference(reference: &CodeOwnerConfigReference) -> Self {
        Self {
            project: reference.project.clone(),
            branch: reference.branch.clone(),
            path: reference.file_path.clone(),
            mode: reference.import_mode,
        }
    }
}

pub struct JsonBackend {
    matcher: BackendPathMatcher,
}

impl JsonBackend {
    pub fn new() -> Self {
        Self {
            matcher: BackendPathMatcher::new(GlobMatcher::anchored()),
        }
    }
}

impl Default for JsonBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_set(set: JsonOwnerSet, index: usize) -> Result<CodeOwnerSet, ParseError> {
    if set.path_expressions.is_empty()
        && (!set.exclusions.is_empty() || set.ignore_global_and_parent_code_owners)
    {
        return Err(ParseError::new(format!(
            "owner set {index} has exclusions or ignores global owners but no path expressions"
        )));
    }
    let mut converted = CodeOwnerSet {
        path_expressions: set.path_expressions,
        exclusions: set.exclusions,
        ignore_global_and_parent_code_owners: set.ignore_global_and_parent_code_owners,
        ..CodeOwnerSet::default()
    };
    for owner in set.owners {
        let reference = CodeOwnerReference::new(owner.email.trim());
        if !reference.is_all_users() && !EMAIL_RE.is_match(&reference.email) {
            return Err(ParseError::new(format!(
                "owner set {index}: invalid email '{}'",
                owner.email
            )));
        }
        for annotation in owner.annotations {
            converted.annotate(&reference.email, CodeOwnerAnnotation::new(annotation));
        }
        converted.code_owners.insert(reference);
    }
    converted.imports = set
        .imports
        .into_iter()
        .map(|import| import.into_reference(CodeOwnerConfigImportMode::GlobalCodeOwnerSetsOnly))
        .collect();
    Ok(converted)
}

impl CodeOwnerBackend for JsonBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn default_file_name(&self) -> &'static str {
        FILE_NAME
    }

    fn file_name(&self, file_extension: Option<&str>) -> String {
        match file_extension {
            Some(ext) if !ext.is_empty() => format!("{FILE_NAME}.{ext}"),
            _ => FILE_NAME.to_string(),
        }
    }

    fn is_code_owner_config_file(&self, file_name: &str, file_extension: Option<&str>) -> bool {
        let base = match file_extension.filter(|ext| !ext.is_empty()) {
            Some(ext) => match file_name.strip_suffix(&format!(".{ext}")) {
                Some(base) => base,
                None => return false,
            },
            None => file_name,
        };
        base == FILE_NAME || (base.ends_with(FILE_SUFFIX) && base.len() > FILE_SUFFIX.len())
    }

    fn parse(
        &self,
        key: &CodeOwnerConfigKey,
        revision: &str,
        content: &str,
    ) -> Result<CodeOwnerConfig, ParseError> {
        let document: JsonCodeOwnerConfig = if content.trim().is_empty() {
            JsonCodeOwnerConfig::default()
        } else {
            serde_json::from_str(content).map_err(|e| ParseError {
                line: Some(e.line()),
                message: e.to_string(),
            })?
        };

        let mut config = CodeOwnerConfig::new(key.clone(), revision);
        config.ignore_parent_code_owners = document.ignore_parent_code_owners;
        config.imports = document
            .imports
            .into_iter()
            .map(|import| {
                let mode = import.mode;
                import.into_reference(mode)
            })
            .collect();
        for (index, set) in document.owner_sets.into_iter().enumerate() {
            config.code_owner_sets.push(convert_set(set, index)?);
        }
        Ok(config)
    }

    fn format(&self, config: &CodeOwnerConfig) -> String {
        let document = JsonCodeOwnerConfig {
            ignore_parent_code_owners: config.ignore_parent_code_owners,
            imports: config.imports.iter().map(JsonImport::from_reference).collect(),
            owner_sets: config
                .code_owner_sets
                .iter()
                .map(|set| JsonOwnerSet {
                    path_expressions: set.path_expressions.clone(),
                    exclusions: set.exclusions.clone(),
                    ignore_global_and_parent_code_owners: set.ignore_global_and_parent_code_owners,
                    owners: set
                        .code_owners
                        .iter()
                        .map(|owner| JsonOwner {
                            email: owner.email.clone(),
                            annotations: set
                                .annotations
                                .get(&owner.email)
                                .map(|a| a.iter().map(|a| a.key().to_string()).collect())
                                .unwrap_or_default(),
                        })
                        .collect(),
                    imports: set.imports.iter().map(JsonImport::from_reference).collect(),
                })
                .collect(),
        };
        let mut out = serde_json::to_string_pretty(&document).unwrap_or_default();
        out.push('\n');
        out
    }

    fn path_expression_matcher(&self) -> &dyn PathExpressionMatcher {
        &self.matcher
    }

    fn replace_email(&self, content: &str, old_email: &str, new_email: &str) -> String {
        content.replace(&format!("\"{old_email}\""), &format!("\"{new_email}\""))
    }
}
