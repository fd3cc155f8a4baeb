//! Scoring dimensions and ranking for suggested code owners.
//!
//! Every dimension records one value per account.  Accounts are compared
//! dimension by dimension in priority order; remaining ties are broken by a
//! shuffle driven by a per-request seeded PRNG, so a fixed seed always
//! yields the same order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::{AccountId, CodeOwner};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeOwnerScore {
    /// Folder levels between the declaring file and the path.
    Distance,
    /// 1 if the owner already reviews the change.
    IsReviewer,
}

impl CodeOwnerScore {
    pub fn lower_is_better(self) -> bool {
        match self {
            CodeOwnerScore::Distance => true,
            CodeOwnerScore::IsReviewer => false,
        }
    }

    pub fn create_scoring(self, max_value: i64) -> CodeOwnerScoringBuilder {
        CodeOwnerScoringBuilder {
            score: self,
            max_value,
            values: HashMap::new(),
        }
    }
}

pub struct CodeOwnerScoringBuilder {
    score: CodeOwnerScore,
    max_value: i64,
    values: HashMap<AccountId, i64>,
}

impl CodeOwnerScoringBuilder {
    /// Record a value; an account seen several times keeps its best value.
    pub fn put_value(&mut self, account: AccountId, value: i64) -> &mut Self {
        let value = value.clamp(0, self.max_value);
        let lower_is_better = self.score.lower_is_better();
        self.values
            .entry(account)
            .and_modify(|current| {
                let better = if lower_is_better {
                    value < *current
                } else {
                    value > *current
                };
                if better {
                    *current = value;
                }
            })
            .or_insert(value);
        self
    }

    pub fn build(self) -> CodeOwnerScoring {
        CodeOwnerScoring {
            score: self.score,
            max_value: self.max_value,
            values: self.values,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CodeOwnerScoring {
    score: CodeOwnerScore,
    max_value: i64,
    values: HashMap<AccountId, i64>,
}

impl CodeOwnerScoring {
    pub fn score(&self) -> CodeOwnerScore {
        self.score
    }

    /// Recorded value, or the worst possible value for unknown accounts.
    pub fn value(&self, account: AccountId) -> i64 {
        match self.values.get(&account) {
            Some(value) => *value,
            None if self.score.lower_is_better() => self.max_value,
            None => 0,
        }
    }

    /// `Less` means `a` ranks before `b`.
    pub fn compare(&self, a: AccountId, b: AccountId) -> Ordering {
        let ordering = self.value(a).cmp(&self.value(b));
        if self.score.lower_is_better() {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Scorings combined in priority order.
#[derive(Clone, Debug, Default)]
pub struct CodeOwnerScorings {
    scorings: Vec<CodeOwnerScoring>,
}

impl CodeOwnerScorings {
    pub fn new(mut scorings: Vec<CodeOwnerScoring>) -> Self {
        scorings.sort_by_key(CodeOwnerScoring::score);
        Self { scorings }
    }

    pub fn compare(&self, a: AccountId, b: AccountId) -> Ordering {
        self.scorings
            .iter()
            .map(|scoring| scoring.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    pub fn scores_for(&self, account: AccountId) -> BTreeMap<CodeOwnerScore, i64> {
        self.scorings
            .iter()
            .map(|scoring| (scoring.score(), scoring.value(account)))
            .collect()
    }
}

/// Per-request PRNG; without a seed the order is fully random.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed.unwrap_or_else(rand::random))
}

/// Stable seed for a request identity such as a change.
pub fn seed_from_identity(identity: &str) -> u64 {
    let digest = Sha256::digest(identity.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Shuffle, then stable-sort by the scorings: equal owners keep the
/// shuffled order.
pub fn rank_code_owners(
    mut owners: Vec<CodeOwner>,
    scorings: &CodeOwnerScorings,
    rng: &mut ChaCha20Rng,
) -> Vec<CodeOwner> {
    owners.shuffle(rng);
    owners.sort_by(|a, b| scorings.compare(a.account_id, b.account_id));
    owners
}
