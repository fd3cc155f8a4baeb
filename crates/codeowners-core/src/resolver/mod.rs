//! Declaration loading, import resolution, hierarchy walking, and owner
//! resolution.

pub mod hierarchy;
pub mod loader;
pub mod owners;
pub mod path_code_owners;
pub mod scanner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{OwnersError, OwnersResult};

pub use hierarchy::{CodeOwnerConfigHierarchy, CodeOwnerConfigVisitor, HierarchyLevel, LevelKind, Visit};
pub use loader::{CodeOwnerConfigLoader, LoadedConfig};
pub use owners::{CodeOwnerResolver, CodeOwnerResolverResult, ResolvedReference, UnresolvedReason};
pub use path_code_owners::{
    PathCodeOwners, PathCodeOwnersResult, ResolvedImport, UnresolvedImport, UnresolvedImportReason,
};

/// Cooperative cancellation shared between a caller and a running request.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> OwnersResult<()> {
        if self.is_cancelled() {
            Err(OwnersError::Cancelled)
        } else {
            Ok(())
        }
    }
}
