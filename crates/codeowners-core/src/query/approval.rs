//! Code owner approval status of every file a change touches.
//!
//! Per path side the status is derived from the entitled owners:
//!
//! * an implicit approval by the uploader, or a qualifying vote of an owner,
//!   gives `APPROVED`,
//! * otherwise an owner among the reviewers gives `PENDING`,
//! * otherwise the path has `INSUFFICIENT_REVIEWERS`.
//!
//! Override approvals and exempted uploaders approve every path.  Files are
//! evaluated in parallel; the result keeps the diff order.

use std::collections::{BTreeSet, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{BranchSettings, FallbackCodeOwners, MergeCommitStrategy, RequiredApproval};
use crate::errors::{OwnersError, OwnersResult};
use crate::models::{
    AccountId, Change, ChangeId, ChangedFile, CodeOwnerStatus, FileCodeOwnerStatus,
    PathCodeOwnerStatus,
};
use crate::query::ownership::collect_path_ownership;
use crate::resolver::loader::CodeOwnerConfigLoader;
use crate::resolver::owners::CodeOwnerResolver;
use crate::resolver::Cancellation;
use crate::service::CodeOwnersService;
use crate::store::PermissionBackend;

// ---------------------------------------------------------------------------
// Change context
// ---------------------------------------------------------------------------

/// Everything about a change the per-path evaluation needs.
pub(crate) struct ChangeContext {
    pub change: Change,
    pub settings: BranchSettings,
    /// Revision whose declaration files decide ownership: the destination
    /// branch head, so a change cannot grant itself ownership.
    pub owners_revision: String,
    pub files: Vec<ChangedFile>,
}

/// Load the change, its settings, and the files it touches at `revision`.
pub(crate) fn load_change_context(
    service: &CodeOwnersService,
    change_id: ChangeId,
    revision: Option<&str>,
) -> OwnersResult<ChangeContext> {
    let change = service.change(change_id)?;
    let branch = change.branch_key();
    let settings = service.branch_settings(&branch)?;
    let revision = revision.unwrap_or(&change.current_revision).to_string();
    let base = diff_base(&change, settings.merge_commit_strategy);
    let files = service
        .diffs()
        .changed_files(&change.project, base.as_deref(), &revision)?;
    let owners_revision = owners_revision(service, &change, base.as_deref(), &revision)?;
    debug!(
        "{} touches {} files (base {:?}, owners read at {})",
        change_id,
        files.len(),
        base,
        owners_revision
    );
    Ok(ChangeContext {
        change,
        settings,
        owners_revision,
        files,
    })
}

/// Revision whose declaration files decide ownership for `change`: the
/// destination branch head, else the diff base, else `revision` itself.
pub(crate) fn owners_revision(
    service: &CodeOwnersService,
    change: &Change,
    base: Option<&str>,
    revision: &str,
) -> OwnersResult<String> {
    let branch = change.branch_key();
    Ok(match service.storage().resolve_ref(&branch.project, &branch.branch)? {
        Some(head) => head,
        None => base.unwrap_or(revision).to_string(),
    })
}

pub(crate) fn diff_base(change: &Change, strategy: MergeCommitStrategy) -> Option<String> {
    let first_parent = change.parent_revisions.first().cloned();
    if !change.is_merge() {
        return first_parent;
    }
    match strategy {
        MergeCommitStrategy::AllChangedFiles => first_parent,
        MergeCommitStrategy::FilesWithConflictResolution => {
            change.auto_merge_revision.clone().or(first_parent)
        }
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

struct Votes {
    reviewers: BTreeSet<AccountId>,
    approvers: BTreeSet<AccountId>,
    overridden_by: Option<(AccountId, RequiredApproval)>,
}

fn collect_votes(service: &CodeOwnersService, context: &ChangeContext) -> OwnersResult<Votes> {
    let change = &context.change;
    let settings = &context.settings;
    let mut reviewers = service.reviews().current_reviewers(change.id)?;
    if settings.ignore_self_approval {
        reviewers.remove(&change.uploader);
    }
    let mut approvers = BTreeSet::new();
    let mut overridden_by = None;
    for reviewer in &reviewers {
        let label = &settings.required_approval.label;
        if let Some(vote) = service.reviews().label_vote(*reviewer, change.id, label)? {
            if settings.required_approval.is_satisfied_by(vote) {
                approvers.insert(*reviewer);
            }
        }
        if overridden_by.is_some() {
            continue;
        }
        for approval in &settings.override_approvals {
            if let Some(vote) = service.reviews().label_vote(*reviewer, change.id, &approval.label)? {
                if approval.is_satisfied_by(vote) {
                    overridden_by = Some((*reviewer, approval.clone()));
                    break;
                }
            }
        }
    }
    Ok(Votes {
        reviewers,
        approvers,
        overridden_by,
    })
}

fn is_exempted(
    service: &CodeOwnersService,
    settings: &BranchSettings,
    uploader: AccountId,
) -> OwnersResult<bool> {
    for email in &settings.exempted_users {
        if service.accounts().accounts_by_email(email)?.contains(&uploader) {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Per-path evaluation
// ---------------------------------------------------------------------------

struct PathEvaluator<'s> {
    loader: CodeOwnerConfigLoader<'s>,
    resolver: CodeOwnerResolver<'s>,
    permissions: &'s dyn PermissionBackend,
    settings: &'s BranchSettings,
    change: &'s Change,
    owners_revision: &'s str,
    votes: &'s Votes,
    implicit_approvals: bool,
    cancellation: &'s Cancellation,
}

impl PathEvaluator<'_> {
    fn file_status(&self, file: &ChangedFile) -> OwnersResult<FileCodeOwnerStatus> {
        self.cancellation.check()?;
        let new_path_status = file
            .new_path
            .as_deref()
            .map(|path| self.path_status(path))
            .transpose()?;
        let old_path_status = file
            .old_path
            .as_deref()
            .map(|path| self.path_status(path))
            .transpose()?;
        Ok(FileCodeOwnerStatus {
            change_kind: file.change_kind,
            old_path_status,
            new_path_status,
        })
    }

    fn path_status(&self, path: &str) -> OwnersResult<PathCodeOwnerStatus> {
        let ownership = collect_path_ownership(
            &self.loader,
            self.settings,
            self.owners_revision,
            path,
            self.cancellation,
        )?;
        let resolved = self.resolver.resolve_all(ownership.references().iter())?;
        let mut owned_by_all_users = resolved.owned_by_all_users;
        let mut owners: HashSet<AccountId> =
            resolved.code_owners.iter().map(|o| o.account_id).collect();
        let mut reasons = Vec::new();

        if !ownership.has_declared_owners() {
            match self.settings.fallback_code_owners {
                FallbackCodeOwners::None => reasons.push("no code owners defined".to_string()),
                FallbackCodeOwners::AllUsers => {
                    owned_by_all_users = true;
                    reasons.push("no code owners defined, all users are code owners".to_string());
                }
                FallbackCodeOwners::ProjectOwners => {
                    let candidates = self
                        .votes
                        .reviewers
                        .iter()
                        .copied()
                        .chain(std::iter::once(self.change.uploader));
                    for account in candidates {
                        if self.permissions.is_project_owner(account, &self.change.project)? {
                            owners.insert(account);
                        }
                    }
                    reasons.push("no code owners defined, project owners are code owners".to_string());
                }
            }
        }
        for (reference, reason) in &resolved.unresolved {
            reasons.push(format!("code owner {reference} is ignored: {reason}"));
        }

        let is_owner = |account: &AccountId| owned_by_all_users || owners.contains(account);
        let uploader = self.change.uploader;
        let status = if self.implicit_approvals && is_owner(&uploader) {
            reasons.push(format!("implicitly approved by the patch set uploader {uploader}"));
            CodeOwnerStatus::Approved
        } else if let Some(approver) = self.votes.approvers.iter().find(|a| is_owner(a)) {
            reasons.push(format!(
                "approved by code owner {} ({})",
                approver, self.settings.required_approval
            ));
            CodeOwnerStatus::Approved
        } else if let Some(reviewer) = self.votes.reviewers.iter().find(|r| is_owner(r)) {
            reasons.push(format!("code owner {reviewer} is a reviewer"));
            CodeOwnerStatus::Pending
        } else {
            reasons.push("no code owner is a reviewer".to_string());
            CodeOwnerStatus::InsufficientReviewers
        };
        debug!("{} of {} is {}", path, self.change.id, status);
        Ok(PathCodeOwnerStatus {
            path: path.to_string(),
            status,
            reasons,
        })
    }
}

fn approve_all(files: &[ChangedFile], reason: &str) -> Vec<FileCodeOwnerStatus> {
    let approved = |path: &str| PathCodeOwnerStatus {
        path: path.to_string(),
        status: CodeOwnerStatus::Approved,
        reasons: vec![reason.to_string()],
    };
    files
        .iter()
        .map(|file| FileCodeOwnerStatus {
            change_kind: file.change_kind,
            old_path_status: file.old_path.as_deref().map(approved),
            new_path_status: file.new_path.as_deref().map(approved),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One status entry per changed file of `revision` (the current revision
/// when absent), in diff order.
pub fn compute_approval_statuses(
    service: &CodeOwnersService,
    change_id: ChangeId,
    revision: Option<&str>,
    cancellation: &Cancellation,
) -> OwnersResult<Vec<FileCodeOwnerStatus>> {
    let context = load_change_context(service, change_id, revision)?;
    let settings = &context.settings;
    if settings.disabled {
        return Err(OwnersError::Disabled(settings.branch.to_string()));
    }
    let change = &context.change;
    if is_exempted(service, settings, change.uploader)? {
        info!("{} was uploaded by exempted {}", change_id, change.uploader);
        return Ok(approve_all(
            &context.files,
            &format!(
                "patch set uploader {} is exempted from requiring code owner approvals",
                change.uploader
            ),
        ));
    }
    let votes = collect_votes(service, &context)?;
    if let Some((account, approval)) = &votes.overridden_by {
        info!("{} is overridden by {} ({})", change_id, account, approval);
        return Ok(approve_all(
            &context.files,
            &format!("override approval {approval} by {account} is present"),
        ));
    }

    let evaluator = PathEvaluator {
        loader: service.loader(),
        resolver: CodeOwnerResolver::new(service.accounts(), service.permissions(), settings),
        permissions: service.permissions(),
        settings,
        change,
        owners_revision: &context.owners_revision,
        votes: &votes,
        implicit_approvals: settings.implicit_approvals_active(),
        cancellation,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(service.workers())
        .build();
    let statuses = match pool {
        Ok(pool) => pool.install(|| {
            context
                .files
                .par_iter()
                .map(|file| evaluator.file_status(file))
                .collect::<OwnersResult<Vec<_>>>()
        }),
        Err(e) => {
            debug!("Falling back to sequential approval check: {}", e);
            context
                .files
                .iter()
                .map(|file| evaluator.file_status(file))
                .collect::<OwnersResult<Vec<_>>>()
        }
    }?;
    let approved = statuses.iter().filter(|s| s.is_approved()).count();
    info!(
        "{}: {} of {} files approved by code owners",
        change_id,
        approved,
        statuses.len()
    );
    Ok(statuses)
}

/// Whether the change may be submitted as far as code owners are concerned.
pub fn is_submittable(
    service: &CodeOwnersService,
    change_id: ChangeId,
    cancellation: &Cancellation,
) -> OwnersResult<bool> {
    let change = service.change(change_id)?;
    if service.branch_settings(&change.branch_key())?.disabled {
        return Ok(true);
    }
    let statuses = compute_approval_statuses(service, change_id, None, cancellation)?;
    Ok(statuses.iter().all(FileCodeOwnerStatus::is_approved))
}

/// Statuses of a change folded per status value, for summaries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalSummary {
    pub approved: usize,
    pub pending: usize,
    pub insufficient_reviewers: usize,
}

impl ApprovalSummary {
    pub fn from_statuses(statuses: &[FileCodeOwnerStatus]) -> Self {
        let mut summary = Self::default();
        for status in statuses.iter().flat_map(FileCodeOwnerStatus::statuses) {
            match status.status {
                CodeOwnerStatus::Approved => summary.approved += 1,
                CodeOwnerStatus::Pending => summary.pending += 1,
                CodeOwnerStatus::InsufficientReviewers => summary.insufficient_reviewers += 1,
            }
        }
        summary
    }
}
