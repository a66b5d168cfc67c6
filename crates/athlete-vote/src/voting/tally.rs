//! Pure tally derivation over a set of votes.

use serde::{Deserialize, Serialize};

use super::domain::{Vote, VoteType};

/// Raw for/against counters, the shape of the cache kept on each submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyCounts {
    pub votes_for: u64,
    pub votes_against: u64,
}

impl TallyCounts {
    pub const fn total(&self) -> u64 {
        self.votes_for + self.votes_against
    }
}

/// Aggregate derived from the ledger. Always recomputable, never stored on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TallySnapshot {
    pub votes_for: u64,
    pub votes_against: u64,
    pub total_votes: u64,
    pub approval_percentage: f64,
    pub average_confidence: f64,
}

impl TallySnapshot {
    pub fn counts(&self) -> TallyCounts {
        TallyCounts {
            votes_for: self.votes_for,
            votes_against: self.votes_against,
        }
    }
}

pub fn compute<'a, I>(votes: I) -> TallySnapshot
where
    I: IntoIterator<Item = &'a Vote>,
{
    let mut votes_for = 0u64;
    let mut votes_against = 0u64;
    let mut confidence_sum = 0u64;

    for vote in votes {
        match vote.vote_type {
            VoteType::For => votes_for += 1,
            VoteType::Against => votes_against += 1,
        }
        confidence_sum += u64::from(vote.confidence_level);
    }

    let total_votes = votes_for + votes_against;
    if total_votes == 0 {
        return TallySnapshot::default();
    }

    let approval_percentage = votes_for as f64 / total_votes as f64 * 100.0;
    let average_confidence = round_one_decimal(confidence_sum as f64 / total_votes as f64);

    TallySnapshot {
        votes_for,
        votes_against,
        total_votes,
        approval_percentage,
        average_confidence,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
