//! Code owners core library: code owner resolution and approval checking
//! for a code review tool.
//!
//! Ownership is declared in per-folder declaration files (`OWNERS`,
//! `CODE_OWNERS.json`, ...) that may import each other.  For a path the
//! library walks those files from the innermost folder to the root, then the
//! project defaults and the configured global owners, resolves the owner
//! emails to permission-checked accounts, and uses the result to
//!
//! * suggest ranked code owners for a path or change,
//! * explain whether an email owns a path,
//! * compute the code owner approval status of every file of a change,
//! * list the paths of a change an account owns,
//! * validate, list, and rewrite declaration files.
//!
//! Storage, accounts, permissions, reviews, and diffs are external
//! collaborators behind the traits in [`store`]; [`store::memory`] and
//! [`store::filesystem`] provide implementations for embedding and tests.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use codeowners_core::query::suggest::{resolve_owners_for_path, SuggestionRequest};
//! use codeowners_core::store::memory::{
//!     InMemoryAccounts, InMemoryPermissions, InMemoryReviews, InMemoryStorage,
//! };
//! use codeowners_core::{BranchNameKey, CodeOwnersConfig, CodeOwnersService, Collaborators};
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! storage.create_project("p", None);
//! let branch = BranchNameKey::new("p", "main");
//! storage.commit(&branch, &[("/OWNERS", "a@x.com\n")]);
//! let accounts = Arc::new(InMemoryAccounts::new());
//! accounts.add_account(1, "a@x.com");
//! let reviews = Arc::new(InMemoryReviews::new());
//!
//! let service = CodeOwnersService::new(
//!     Collaborators {
//!         storage,
//!         accounts,
//!         permissions: Arc::new(InMemoryPermissions::new()),
//!         reviews: reviews.clone(),
//!         diffs: reviews,
//!     },
//!     CodeOwnersConfig::default(),
//! )?;
//! let suggestions =
//!     resolve_owners_for_path(&service, &SuggestionRequest::for_branch(branch, "/src/lib.rs"))?;
//! assert_eq!(suggestions.emails(), vec!["a@x.com"]);
//! # Ok::<(), codeowners_core::OwnersError>(())
//! ```

pub mod backend;
pub mod config;
pub mod errors;
pub mod models;
pub mod query;
pub mod resolver;
pub mod service;
pub mod store;

pub use backend::{BackendRegistry, CodeOwnerBackend};
pub use config::{BranchSettings, CodeOwnersConfig, FallbackCodeOwners, RequiredApproval};
pub use errors::{OwnersError, OwnersResult};
pub use models::{
    AccountId, BranchNameKey, Change, ChangeId, ChangedFile, CodeOwner, CodeOwnerConfig,
    CodeOwnerConfigKey, CodeOwnerReference, CodeOwnerStatus, FileCodeOwnerStatus,
    PathCodeOwnerStatus,
};
pub use resolver::Cancellation;
pub use service::{CodeOwnersService, Collaborators};
