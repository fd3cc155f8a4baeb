//! Owner references of one path across the whole hierarchy, with the
//! distance of the level that declared them.

use indexmap::IndexSet;
use serde::Serialize;

use crate::config::BranchSettings;
use crate::errors::OwnersResult;
use crate::models::{Annotations, CodeOwnerAnnotation, CodeOwnerConfigKey, CodeOwnerReference};
use crate::resolver::hierarchy::{
    global_owners_distance, max_distance, CodeOwnerConfigHierarchy, CodeOwnerConfigVisitor,
    HierarchyLevel, LevelKind, Visit,
};
use crate::resolver::loader::CodeOwnerConfigLoader;
use crate::resolver::path_code_owners::UnresolvedImport;
use crate::resolver::Cancellation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerSource {
    Folder,
    DefaultConfig,
    GlobalOwners,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerEntry {
    pub reference: CodeOwnerReference,
    pub distance: usize,
    pub source: OwnerSource,
    /// Declaration file of the level, `None` for configured global owners.
    pub config: Option<CodeOwnerConfigKey>,
}

#[derive(Clone, Debug, Default)]
pub struct PathOwnership {
    pub path: String,
    pub max_distance: usize,
    /// In walk order, innermost level first, global owners last.
    pub entries: Vec<OwnerEntry>,
    pub annotations: Annotations,
    /// Levels that assigned at least one owner to the path.
    pub config_files: Vec<CodeOwnerConfigKey>,
    pub invalid_configs: Vec<(CodeOwnerConfigKey, String)>,
    pub unresolved_imports: Vec<UnresolvedImport>,
    /// Level that ended the walk by ignoring parent code owners.
    pub stopped_at: Option<CodeOwnerConfigKey>,
}

impl PathOwnership {
    pub fn references(&self) -> IndexSet<CodeOwnerReference> {
        self.entries.iter().map(|e| e.reference.clone()).collect()
    }

    /// Whether any level or the global owners declare owners for the path;
    /// the fallback policy only applies when this is false.
    pub fn has_declared_owners(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn has_annotation(&self, email: &str, annotation: &str) -> bool {
        let annotation = CodeOwnerAnnotation::new(annotation);
        self.annotations_of(email).any(|a| *a == annotation)
    }

    /// Annotations attached to `email`, whatever the case it was written in.
    pub fn annotations_of<'a>(
        &'a self,
        email: &'a str,
    ) -> impl Iterator<Item = &'a CodeOwnerAnnotation> + 'a {
        self.annotations
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(email))
            .flat_map(|(_, set)| set.iter())
    }
}

struct Collector<'o> {
    ownership: &'o mut PathOwnership,
}

impl CodeOwnerConfigVisitor for Collector<'_> {
    fn visit(&mut self, level: &HierarchyLevel) -> OwnersResult<Visit> {
        let resolved = &level.resolved;
        let source = match level.kind {
            LevelKind::Folder => OwnerSource::Folder,
            LevelKind::DefaultConfig => OwnerSource::DefaultConfig,
        };
        for reference in resolved.code_owners() {
            self.ownership.entries.push(OwnerEntry {
                reference,
                distance: level.distance,
                source,
                config: Some(level.config.key.clone()),
            });
        }
        for (email, annotations) in &resolved.annotations {
            self.ownership
                .annotations
                .entry(email.clone())
                .or_default()
                .extend(annotations.iter().cloned());
        }
        if resolved.has_code_owners() {
            self.ownership.config_files.push(level.config.key.clone());
        }
        self.ownership
            .unresolved_imports
            .extend(resolved.unresolved_imports.iter().cloned());
        if resolved.ignore_parent_code_owners {
            self.ownership.stopped_at = Some(level.config.key.clone());
        }
        Ok(Visit::Continue)
    }

    fn on_invalid_config(&mut self, key: &CodeOwnerConfigKey, message: &str) {
        self.ownership
            .invalid_configs
            .push((key.clone(), message.to_string()));
    }
}

/// Walk the hierarchy of `path` and append the configured global owners.
pub fn collect_path_ownership(
    loader: &CodeOwnerConfigLoader<'_>,
    settings: &BranchSettings,
    revision: &str,
    path: &str,
    cancellation: &Cancellation,
) -> OwnersResult<PathOwnership> {
    let mut ownership = PathOwnership {
        path: path.to_string(),
        max_distance: max_distance(path),
        ..PathOwnership::default()
    };
    CodeOwnerConfigHierarchy::new(loader)
        .with_cancellation(cancellation.clone())
        .visit(
            &settings.branch,
            revision,
            path,
            &mut Collector {
                ownership: &mut ownership,
            },
        )?;
    for reference in &settings.global_code_owners {
        ownership.entries.push(OwnerEntry {
            reference: reference.clone(),
            distance: global_owners_distance(path),
            source: OwnerSource::GlobalOwners,
            config: None,
        });
    }
    Ok(ownership)
}
