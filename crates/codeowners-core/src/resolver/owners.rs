//! Turns owner references into permission-checked accounts.
//!
//! Steps per reference, each of which can reject it:
//!
//! 1. the all-users wildcard short-circuits to [`ResolvedReference::AllUsers`],
//! 2. the email must be well formed and in an allowed domain,
//! 3. the email must belong to exactly one active account,
//! 4. the account must be able to read the branch (unless visibility is
//!    not enforced) and be visible to the calling user, if there is one,
//! 5. service users are dropped when requested.
//!
//! Results are memoised per resolver, so one request sees a consistent
//! answer for every reference.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::BranchSettings;
use crate::errors::OwnersResult;
use crate::models::{AccountId, BranchNameKey, CodeOwner, CodeOwnerReference};
use crate::store::{AccountDirectory, PermissionBackend};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnresolvedReason {
    InvalidEmail,
    EmailDomainNotAllowed,
    NotFound,
    Ambiguous { accounts: Vec<AccountId> },
    CannotReadBranch { account: AccountId },
    NotVisibleToCaller { account: AccountId },
    ServiceUser { account: AccountId },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::InvalidEmail => f.write_str("email is invalid"),
            UnresolvedReason::EmailDomainNotAllowed => f.write_str("email domain is not allowed"),
            UnresolvedReason::NotFound => f.write_str("no account with this email exists"),
            UnresolvedReason::Ambiguous { accounts } => {
                let ids: Vec<String> = accounts.iter().map(|a| a.0.to_string()).collect();
                write!(f, "email is ambiguous, it belongs to accounts {}", ids.join(", "))
            }
            UnresolvedReason::CannotReadBranch { account } => {
                write!(f, "{account} cannot read the branch")
            }
            UnresolvedReason::NotVisibleToCaller { account } => {
                write!(f, "{account} is not visible to the calling user")
            }
            UnresolvedReason::ServiceUser { account } => write!(f, "{account} is a service user"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedReference {
    AllUsers,
    Owner(CodeOwner),
    Unresolved(UnresolvedReason),
}

impl ResolvedReference {
    pub fn owner(&self) -> Option<&CodeOwner> {
        match self {
            ResolvedReference::Owner(owner) => Some(owner),
            _ => None,
        }
    }
}

/// Combined outcome of resolving several references.
#[derive(Clone, Debug, Default)]
pub struct CodeOwnerResolverResult {
    pub code_owners: IndexSet<CodeOwner>,
    pub owned_by_all_users: bool,
    pub unresolved: Vec<(CodeOwnerReference, UnresolvedReason)>,
    pub messages: Vec<String>,
}

impl CodeOwnerResolverResult {
    pub fn has_unresolved_code_owners(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn contains(&self, account: AccountId) -> bool {
        self.owned_by_all_users || self.code_owners.iter().any(|o| o.account_id == account)
    }
}

pub struct CodeOwnerResolver<'a> {
    accounts: &'a dyn AccountDirectory,
    permissions: &'a dyn PermissionBackend,
    branch: BranchNameKey,
    allowed_email_domains: Vec<String>,
    enforce_visibility: bool,
    filter_service_users: bool,
    calling_user: Option<AccountId>,
    cache: Mutex<HashMap<String, ResolvedReference>>,
}

impl<'a> CodeOwnerResolver<'a> {
    pub fn new(
        accounts: &'a dyn AccountDirectory,
        permissions: &'a dyn PermissionBackend,
        settings: &BranchSettings,
    ) -> Self {
        Self {
            accounts,
            permissions,
            branch: settings.branch.clone(),
            allowed_email_domains: settings.allowed_email_domains.clone(),
            enforce_visibility: settings.enforce_visibility,
            filter_service_users: false,
            calling_user: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn enforce_visibility(mut self, enforce: bool) -> Self {
        self.enforce_visibility = enforce;
        self
    }

    pub fn filter_service_users(mut self, filter: bool) -> Self {
        self.filter_service_users = filter;
        self
    }

    /// Additionally require owners to be visible to `user`.
    pub fn for_calling_user(mut self, user: Option<AccountId>) -> Self {
        self.calling_user = user;
        self
    }

    pub fn resolve(&self, reference: &CodeOwnerReference) -> OwnersResult<ResolvedReference> {
        if let Some(resolved) = self.cache.lock().get(&reference.email) {
            return Ok(resolved.clone());
        }
        let resolved = self.resolve_uncached(reference)?;
        if let ResolvedReference::Unresolved(reason) = &resolved {
            debug!("Code owner reference {} is not resolvable: {}", reference, reason);
        }
        self.cache
            .lock()
            .insert(reference.email.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), plus human readable diagnostics.
    pub fn resolve_with_messages(
        &self,
        reference: &CodeOwnerReference,
    ) -> OwnersResult<(ResolvedReference, Vec<String>)> {
        let resolved = self.resolve(reference)?;
        let message = match &resolved {
            ResolvedReference::AllUsers => {
                format!("code owner reference '{reference}' stands for all users")
            }
            ResolvedReference::Owner(owner) => {
                format!("resolved email {} to {}", reference, owner.account_id)
            }
            ResolvedReference::Unresolved(reason) => {
                format!("cannot resolve code owner email {reference}: {reason}")
            }
        };
        Ok((resolved, vec![message]))
    }

    pub fn resolve_all<'r, I>(&self, references: I) -> OwnersResult<CodeOwnerResolverResult>
    where
        I: IntoIterator<Item = &'r CodeOwnerReference>,
    {
        let mut result = CodeOwnerResolverResult::default();
        for reference in references {
            let (resolved, messages) = self.resolve_with_messages(reference)?;
            result.messages.extend(messages);
            match resolved {
                ResolvedReference::AllUsers => result.owned_by_all_users = true,
                ResolvedReference::Owner(owner) => {
                    result.code_owners.insert(owner);
                }
                ResolvedReference::Unresolved(reason) => {
                    result.unresolved.push((reference.clone(), reason));
                }
            }
        }
        Ok(result)
    }

    /// Whether `account` is among the owners the references resolve to.
    pub fn resolve_for_user<'r, I>(&self, references: I, account: AccountId) -> OwnersResult<bool>
    where
        I: IntoIterator<Item = &'r CodeOwnerReference>,
    {
        Ok(self.resolve_all(references)?.contains(account))
    }

    /// Apply the account level checks of step 4 and 5 to an account found by
    /// other means than an email (e.g. sampled for all-users suggestions).
    pub fn check_account(&self, account: AccountId) -> OwnersResult<Option<UnresolvedReason>> {
        if self.enforce_visibility && !self.permissions.can_read(account, &self.branch)? {
            return Ok(Some(UnresolvedReason::CannotReadBranch { account }));
        }
        if let Some(viewer) = self.calling_user {
            if !self.accounts.can_see(viewer, account)? {
                return Ok(Some(UnresolvedReason::NotVisibleToCaller { account }));
            }
        }
        if self.filter_service_users && self.accounts.is_service_user(account)? {
            return Ok(Some(UnresolvedReason::ServiceUser { account }));
        }
        Ok(None)
    }

    fn resolve_uncached(&self, reference: &CodeOwnerReference) -> OwnersResult<ResolvedReference> {
        if reference.is_all_users() {
            return Ok(ResolvedReference::AllUsers);
        }
        let email = reference.email.trim();
        let Some((local, domain)) = email.split_once('@') else {
            return Ok(ResolvedReference::Unresolved(UnresolvedReason::InvalidEmail));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Ok(ResolvedReference::Unresolved(UnresolvedReason::InvalidEmail));
        }
        if !self.allowed_email_domains.is_empty() {
            let domain = domain.to_lowercase();
            if !self.allowed_email_domains.iter().any(|d| *d == domain) {
                return Ok(ResolvedReference::Unresolved(
                    UnresolvedReason::EmailDomainNotAllowed,
                ));
            }
        }

        let accounts = self.accounts.accounts_by_email(email)?;
        let account = match accounts.len() {
            0 => return Ok(ResolvedReference::Unresolved(UnresolvedReason::NotFound)),
            1 => match accounts.iter().next() {
                Some(account) => *account,
                None => return Ok(ResolvedReference::Unresolved(UnresolvedReason::NotFound)),
            },
            _ => {
                return Ok(ResolvedReference::Unresolved(UnresolvedReason::Ambiguous {
                    accounts: accounts.into_iter().collect(),
                }))
            }
        };
        if let Some(reason) = self.check_account(account)? {
            return Ok(ResolvedReference::Unresolved(reason));
        }
        Ok(ResolvedReference::Owner(CodeOwner::new(account, email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryAccounts, InMemoryPermissions};

    fn setup() -> (InMemoryAccounts, InMemoryPermissions, BranchSettings) {
        let accounts = InMemoryAccounts::new();
        accounts.add_account(1, "a@x.com");
        accounts.add_account(2, "b@x.com");
        accounts.add_account(3, "shared@x.com");
        accounts.add_account(4, "shared@x.com");
        let bot = accounts.add_account(5, "bot@x.com");
        accounts.mark_service_user(bot);
        let permissions = InMemoryPermissions::new();
        let settings = BranchSettings::defaults(&BranchNameKey::new("p", "main"));
        (accounts, permissions, settings)
    }

    fn reference(email: &str) -> CodeOwnerReference {
        CodeOwnerReference::new(email)
    }

    #[test]
    fn test_resolves_email_to_account() {
        let (accounts, permissions, settings) = setup();
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        let resolved = resolver.resolve(&reference("a@x.com")).unwrap();
        assert_eq!(resolved.owner().map(|o| o.account_id), Some(AccountId(1)));
        assert_eq!(
            resolver.resolve(&CodeOwnerReference::all_users()).unwrap(),
            ResolvedReference::AllUsers
        );
    }

    #[test]
    fn test_unknown_invalid_and_ambiguous_emails() {
        let (accounts, permissions, settings) = setup();
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        assert_eq!(
            resolver.resolve(&reference("nobody@x.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::NotFound)
        );
        assert_eq!(
            resolver.resolve(&reference("not-an-email")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::InvalidEmail)
        );
        assert_eq!(
            resolver.resolve(&reference("shared@x.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::Ambiguous {
                accounts: vec![AccountId(3), AccountId(4)]
            })
        );
    }

    #[test]
    fn test_visibility_filtering() {
        let (accounts, permissions, settings) = setup();
        permissions.deny_read(AccountId(2), &settings.branch);

        let enforcing = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        assert!(matches!(
            enforcing.resolve(&reference("b@x.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::CannotReadBranch { .. })
        ));

        let lenient =
            CodeOwnerResolver::new(&accounts, &permissions, &settings).enforce_visibility(false);
        assert!(lenient.resolve(&reference("b@x.com")).unwrap().owner().is_some());
    }

    #[test]
    fn test_calling_user_visibility_and_service_users() {
        let (accounts, permissions, settings) = setup();
        accounts.hide(AccountId(9), AccountId(1));
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings)
            .for_calling_user(Some(AccountId(9)))
            .filter_service_users(true);
        assert!(matches!(
            resolver.resolve(&reference("a@x.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::NotVisibleToCaller { .. })
        ));
        assert!(matches!(
            resolver.resolve(&reference("bot@x.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::ServiceUser { .. })
        ));
    }

    #[test]
    fn test_allowed_domains() {
        let (accounts, permissions, mut settings) = setup();
        accounts.add_account(6, "c@y.com");
        settings.allowed_email_domains = vec!["x.com".to_string()];
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        assert_eq!(
            resolver.resolve(&reference("c@y.com")).unwrap(),
            ResolvedReference::Unresolved(UnresolvedReason::EmailDomainNotAllowed)
        );
    }

    #[test]
    fn test_memoised_results_stay_consistent() {
        let (accounts, permissions, settings) = setup();
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        let first = resolver.resolve(&reference("a@x.com")).unwrap();
        accounts.deactivate(AccountId(1));
        assert_eq!(resolver.resolve(&reference("a@x.com")).unwrap(), first);
    }

    #[test]
    fn test_resolve_all_and_for_user() {
        let (accounts, permissions, settings) = setup();
        let resolver = CodeOwnerResolver::new(&accounts, &permissions, &settings);
        let refs = vec![reference("a@x.com"), reference("b@x.com"), reference("nobody@x.com")];
        let result = resolver.resolve_all(&refs).unwrap();
        assert_eq!(result.code_owners.len(), 2);
        assert!(result.has_unresolved_code_owners());
        assert_eq!(result.messages.len(), 3);
        assert!(resolver.resolve_for_user(&refs, AccountId(2)).unwrap());
        assert!(!resolver.resolve_for_user(&refs, AccountId(3)).unwrap());
    }
}
