//! Ranked code owner suggestions for one path, optionally in the context
//! of a change.

use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::FallbackCodeOwners;
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{AccountId, BranchNameKey, Change, ChangeId, CodeOwner, CodeOwnerAnnotation};
use crate::query::guards::{
    validate_limit, validate_start, ACCOUNT_SAMPLE_PAGE_SIZE, MAX_ACCOUNT_SAMPLE_PAGES,
};
use crate::query::approval::{diff_base, owners_revision};
use crate::query::ownership::collect_path_ownership;
use crate::query::scoring::{
    rank_code_owners, seed_from_identity, seeded_rng, CodeOwnerScore, CodeOwnerScoring,
    CodeOwnerScorings,
};
use crate::resolver::owners::{CodeOwnerResolver, ResolvedReference};
use crate::resolver::Cancellation;
use crate::service::CodeOwnersService;
use crate::store::paths::normalize_file_path;
use crate::store::AccountDirectory;

#[derive(Clone, Debug)]
pub enum SuggestionTarget {
    Branch {
        branch: BranchNameKey,
        /// Branch head when absent.
        revision: Option<String>,
    },
    /// The change's destination branch at its current revision.
    Change(ChangeId),
}

#[derive(Clone, Debug)]
pub struct SuggestionRequest {
    pub target: SuggestionTarget,
    pub path: String,
    pub limit: Option<i64>,
    pub start: Option<i64>,
    pub seed: Option<u64>,
    /// Suggestions must be visible to this user.
    pub calling_user: Option<AccountId>,
    /// Fill up from random accounts when all users own the path.
    pub resolve_all_users: bool,
    pub with_scores: bool,
    pub cancellation: Cancellation,
}

impl SuggestionRequest {
    pub fn for_branch(branch: BranchNameKey, path: impl Into<String>) -> Self {
        Self::new(
            SuggestionTarget::Branch {
                branch,
                revision: None,
            },
            path,
        )
    }

    pub fn for_change(change: ChangeId, path: impl Into<String>) -> Self {
        Self::new(SuggestionTarget::Change(change), path)
    }

    fn new(target: SuggestionTarget, path: impl Into<String>) -> Self {
        Self {
            target,
            path: path.into(),
            limit: None,
            start: None,
            seed: None,
            calling_user: None,
            resolve_all_users: true,
            with_scores: false,
            cancellation: Cancellation::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuggestedCodeOwner {
    pub account_id: AccountId,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<CodeOwnerScore, i64>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodeOwnerSuggestions {
    pub code_owners: Vec<SuggestedCodeOwner>,
    pub more_available: bool,
    pub owned_by_all_users: bool,
}

impl CodeOwnerSuggestions {
    pub fn emails(&self) -> Vec<&str> {
        self.code_owners.iter().map(|o| o.email.as_str()).collect()
    }
}

/// Rank the code owners of a path and return one page of them.
pub fn resolve_owners_for_path(
    service: &CodeOwnersService,
    request: &SuggestionRequest,
) -> OwnersResult<CodeOwnerSuggestions> {
    let limit = validate_limit(request.limit)?;
    let start = validate_start(request.start)?;
    let path = normalize_file_path(&request.path)?;

    let (branch, revision, change) = match &request.target {
        SuggestionTarget::Branch { branch, revision } => {
            (branch.clone(), revision.clone(), None)
        }
        SuggestionTarget::Change(id) => {
            let change = service.change(*id)?;
            (change.branch_key(), None, Some(change))
        }
    };

    let loader = service.loader();
    let settings = loader.settings(&branch)?;
    if settings.disabled {
        return Err(OwnersError::Disabled(branch.to_string()));
    }
    // Changes are judged against the destination branch, like approvals.
    let revision = match (revision, &change) {
        (Some(revision), _) => revision,
        (None, Some(change)) => {
            let base = diff_base(change, settings.merge_commit_strategy);
            owners_revision(service, change, base.as_deref(), &change.current_revision)?
        }
        (None, None) => service.branch_head(&branch)?,
    };
    let ownership =
        collect_path_ownership(&loader, &settings, &revision, &path, &request.cancellation)?;
    let resolver = CodeOwnerResolver::new(service.accounts(), service.permissions(), &settings)
        .filter_service_users(true)
        .for_calling_user(request.calling_user);

    let mut distance = CodeOwnerScore::Distance.create_scoring(ownership.max_distance as i64);
    let mut owners: Vec<CodeOwner> = Vec::new();
    let mut seen: HashSet<AccountId> = HashSet::new();
    let mut never_suggest: HashSet<AccountId> = HashSet::new();
    let mut last_resort: HashSet<AccountId> = HashSet::new();
    let mut owned_by_all_users = false;

    for entry in &ownership.entries {
        match resolver.resolve(&entry.reference)? {
            ResolvedReference::AllUsers => owned_by_all_users = true,
            ResolvedReference::Owner(owner) => {
                let email = entry.reference.email.as_str();
                if ownership.has_annotation(email, CodeOwnerAnnotation::NEVER_SUGGEST) {
                    never_suggest.insert(owner.account_id);
                }
                if ownership.has_annotation(email, CodeOwnerAnnotation::LAST_RESORT_SUGGESTION) {
                    last_resort.insert(owner.account_id);
                }
                distance.put_value(owner.account_id, entry.distance as i64);
                if seen.insert(owner.account_id) {
                    owners.push(owner);
                }
            }
            // Unresolvable and ambiguous references are not suggested.
            ResolvedReference::Unresolved(_) => {}
        }
    }
    if !ownership.has_declared_owners()
        && settings.fallback_code_owners == FallbackCodeOwners::AllUsers
    {
        owned_by_all_users = true;
    }

    let mut excluded = never_suggest;
    if let Some(change) = &change {
        excluded.insert(change.owner);
    }
    owners.retain(|o| !excluded.contains(&o.account_id));
    if owners.iter().any(|o| !last_resort.contains(&o.account_id)) {
        owners.retain(|o| !last_resort.contains(&o.account_id));
        excluded.extend(last_resort.iter().copied());
    }

    let mut scorings = vec![distance.build()];
    if let Some(change) = &change {
        scorings.push(reviewer_scoring(service, change, &owners)?);
    }
    let scorings = CodeOwnerScorings::new(scorings);

    let seed = request.seed.or_else(|| {
        change
            .as_ref()
            .map(|c| seed_from_identity(&format!("{}~{}", c.project, c.id.0)))
    });
    let mut rng = seeded_rng(seed);
    let mut ranked = rank_code_owners(owners, &scorings, &mut rng);

    let needed = start.saturating_add(limit).saturating_add(1);
    if owned_by_all_users && request.resolve_all_users && ranked.len() < needed {
        excluded.extend(ranked.iter().map(|o| o.account_id));
        let filled = sample_all_users(
            service.accounts(),
            &resolver,
            needed - ranked.len(),
            &excluded,
            &mut rng,
        )?;
        ranked.extend(filled);
    }

    let more_available = ranked.len() > start.saturating_add(limit);
    let code_owners = ranked
        .into_iter()
        .skip(start)
        .take(limit)
        .map(|owner| SuggestedCodeOwner {
            scores: request
                .with_scores
                .then(|| scorings.scores_for(owner.account_id)),
            account_id: owner.account_id,
            email: owner.email,
        })
        .collect::<Vec<_>>();
    debug!(
        "Suggesting {} code owners for {} in {} (more available: {}, all users: {})",
        code_owners.len(),
        path,
        branch,
        more_available,
        owned_by_all_users
    );
    Ok(CodeOwnerSuggestions {
        code_owners,
        more_available,
        owned_by_all_users,
    })
}

fn reviewer_scoring(
    service: &CodeOwnersService,
    change: &Change,
    owners: &[CodeOwner],
) -> OwnersResult<CodeOwnerScoring> {
    let reviewers = service.reviews().current_reviewers(change.id)?;
    let mut scoring = CodeOwnerScore::IsReviewer.create_scoring(1);
    for owner in owners {
        if reviewers.contains(&owner.account_id) {
            scoring.put_value(owner.account_id, 1);
        }
    }
    Ok(scoring.build())
}

/// Best-effort sample of up to `wanted` visible accounts for paths owned by
/// all users.  Returning fewer accounts is not an error.
fn sample_all_users(
    accounts: &dyn AccountDirectory,
    resolver: &CodeOwnerResolver<'_>,
    wanted: usize,
    excluded: &HashSet<AccountId>,
    rng: &mut ChaCha20Rng,
) -> OwnersResult<Vec<CodeOwner>> {
    let mut sampled = Vec::new();
    'pages: for page in 0..MAX_ACCOUNT_SAMPLE_PAGES {
        let mut batch =
            accounts.active_accounts(page * ACCOUNT_SAMPLE_PAGE_SIZE, ACCOUNT_SAMPLE_PAGE_SIZE)?;
        let exhausted = batch.len() < ACCOUNT_SAMPLE_PAGE_SIZE;
        batch.shuffle(rng);
        for account in batch {
            if sampled.len() >= wanted {
                break 'pages;
            }
            if excluded.contains(&account) || resolver.check_account(account)?.is_some() {
                continue;
            }
            if let Some(email) = accounts.preferred_email(account)? {
                sampled.push(CodeOwner::new(account, email));
            }
        }
        if exhausted {
            break;
        }
    }
    info!(
        "Filled {} of {} wanted suggestions from the all users sample",
        sampled.len(),
        wanted
    );
    Ok(sampled)
}
