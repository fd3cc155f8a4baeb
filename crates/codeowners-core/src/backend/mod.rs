//! Pluggable parsers/serializers for declaration files.
//!
//! A backend knows the on-disk syntax and file names of declaration files
//! and how per-file path expressions are matched.  Backends are registered
//! in a [`BackendRegistry`] and selected per branch by their string id.

pub mod find_owners;
pub mod json;
pub mod matchers;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::{OwnersError, OwnersResult};
use crate::models::{CodeOwnerConfig, CodeOwnerConfigKey};

pub use find_owners::FindOwnersBackend;
pub use json::JsonBackend;
pub use matchers::PathExpressionMatcher;

/// Failure to parse one declaration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    pub fn at_line(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

pub trait CodeOwnerBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// File name used in every folder, e.g. `OWNERS`.
    fn default_file_name(&self) -> &'static str;

    fn file_name(&self, file_extension: Option<&str>) -> String {
        match file_extension {
            Some(ext) if !ext.is_empty() => format!("{}.{}", self.default_file_name(), ext),
            _ => self.default_file_name().to_string(),
        }
    }

    /// Whether `file_name` may hold a declaration (also the names that are
    /// only valid as import targets).
    fn is_code_owner_config_file(&self, file_name: &str, file_extension: Option<&str>) -> bool;

    fn parse(
        &self,
        key: &CodeOwnerConfigKey,
        revision: &str,
        content: &str,
    ) -> Result<CodeOwnerConfig, ParseError>;

    fn format(&self, config: &CodeOwnerConfig) -> String;

    fn path_expression_matcher(&self) -> &dyn PathExpressionMatcher;

    /// Textually replace an owner email in raw file content.
    fn replace_email(&self, content: &str, old_email: &str, new_email: &str) -> String;
}

/// Backends by id, in registration order.
pub struct BackendRegistry {
    backends: IndexMap<&'static str, Arc<dyn CodeOwnerBackend>>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            backends: IndexMap::new(),
        }
    }

    pub fn register(&mut self, backend: Arc<dyn CodeOwnerBackend>) {
        self.backends.insert(backend.id(), backend);
    }

    pub fn get(&self, id: &str) -> OwnersResult<Arc<dyn CodeOwnerBackend>> {
        self.backends.get(id).cloned().ok_or_else(|| {
            OwnersError::configuration(format!(
                "unknown code owner backend '{}' (available: {})",
                id,
                self.ids().join(", ")
            ))
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(FindOwnersBackend::new()));
        registry.register(Arc::new(JsonBackend::new()));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_builtin_backends() {
        let registry = BackendRegistry::default();
        assert_eq!(registry.ids(), vec!["find-owners", "json"]);
        assert!(registry.get("find-owners").is_ok());
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let registry = BackendRegistry::default();
        match registry.get("proto") {
            Err(OwnersError::Configuration(message)) => assert!(message.contains("proto")),
            other => panic!("expected configuration error, got {:?}", other.map(|b| b.id())),
        }
    }

    #[test]
    fn test_file_name_with_extension() {
        let backend = FindOwnersBackend::new();
        assert_eq!(backend.file_name(None), "OWNERS");
        assert_eq!(backend.file_name(Some("foo")), "OWNERS.foo");
    }
}
