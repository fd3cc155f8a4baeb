//! Path expression matchers for per-file owner sets.
//!
//! Expressions are matched against the file path relative to the folder of
//! the declaration file.  Expressions starting with `^` are regular
//! expressions that must match the whole relative path; everything else is a
//! glob.

use std::collections::HashMap;

use ignore::overrides::{Override, OverrideBuilder};
use parking_lot::Mutex;
use regex::Regex;
use tracing::warn;

pub trait PathExpressionMatcher: Send + Sync {
    fn matches(&self, expression: &str, relative_path: &str) -> bool;

    /// Returns a human readable problem if the expression can never match.
    fn validate(&self, expression: &str) -> Result<(), String>;
}

fn build_override(pattern: &str) -> Result<Override, ignore::Error> {
    let mut builder = OverrideBuilder::new("/");
    builder.add(pattern)?;
    builder.build()
}

/// Match a glob against a root relative path.
///
/// Globs without a `/` match the file name at any depth, like gitignore
/// patterns; a leading `/` anchors the glob.
pub fn glob_matches(glob: &str, relative_path: &str) -> bool {
    match build_override(glob) {
        Ok(over) => over.matched(relative_path, false).is_whitelist(),
        Err(e) => {
            warn!("Invalid glob '{}': {}", glob, e);
            false
        }
    }
}

/// Glob matcher.
///
/// Unanchored globs follow gitignore rules (`*.md` matches `a/b.md`);
/// anchored globs are matched from the folder (`*.md` only matches files
/// directly inside it, `**/*.md` reaches into subfolders).
pub struct GlobMatcher {
    anchored: bool,
}

impl GlobMatcher {
    pub fn anchored() -> Self {
        Self { anchored: true }
    }

    pub fn unanchored() -> Self {
        Self { anchored: false }
    }

    fn pattern(&self, expression: &str) -> String {
        if self.anchored && !expression.starts_with('/') {
            format!("/{expression}")
        } else {
            expression.to_string()
        }
    }
}

impl PathExpressionMatcher for GlobMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        glob_matches(&self.pattern(expression), relative_path)
    }

    fn validate(&self, expression: &str) -> Result<(), String> {
        if expression.trim().is_empty() {
            return Err("empty path expression".to_string());
        }
        build_override(&self.pattern(expression))
            .map(|_| ())
            .map_err(|e| format!("invalid glob '{expression}': {e}"))
    }
}

/// Full-match regular expressions, compiled once per matcher.
#[derive(Default)]
pub struct RegexMatcher {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl RegexMatcher {
    fn compile(expression: &str) -> Result<Regex, regex::Error> {
        Regex::new(&format!("^(?:{expression})$"))
    }
}

impl PathExpressionMatcher for RegexMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        let mut compiled = self.compiled.lock();
        let regex = compiled
            .entry(expression.to_string())
            .or_insert_with(|| match Self::compile(expression) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Invalid path regex '{}': {}", expression, e);
                    None
                }
            });
        regex
            .as_ref()
            .map(|re| re.is_match(relative_path))
            .unwrap_or(false)
    }

    fn validate(&self, expression: &str) -> Result<(), String> {
        Self::compile(expression)
            .map(|_| ())
            .map_err(|e| format!("invalid regular expression '{expression}': {e}"))
    }
}

/// Dispatches `^` expressions to regex matching and the rest to globs.
pub struct BackendPathMatcher {
    glob: GlobMatcher,
    regex: RegexMatcher,
}

impl BackendPathMatcher {
    pub fn new(glob: GlobMatcher) -> Self {
        Self {
            glob,
            regex: RegexMatcher::default(),
        }
    }
}

impl PathExpressionMatcher for BackendPathMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        if expression.starts_with('^') {
            self.regex.matches(expression, relative_path)
        } else {
            self.glob.matches(expression, relative_path)
        }
    }

    fn validate(&self, expression: &str) -> Result<(), String> {
        if expression.starts_with('^') {
            self.regex.validate(expression)
        } else {
            self.glob.validate(expression)
        }
    }
}

/// Whether an owner set with these expressions applies to `relative_path`.
pub fn set_matches(
    matcher: &dyn PathExpressionMatcher,
    path_expressions: &[String],
    exclusions: &[String],
    relative_path: &str,
) -> bool {
    path_expressions
        .iter()
        .any(|expr| matcher.matches(expr, relative_path))
        && !exclusions
            .iter()
            .any(|expr| matcher.matches(expr, relative_path))
}
