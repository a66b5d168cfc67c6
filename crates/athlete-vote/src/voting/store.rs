use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{Ballot, Submission, SubmissionId, SubmissionStatus, Vote, VoterId};
use super::error::NotVotableReason;
use super::tally::{TallyCounts, TallySnapshot};

/// Decides the next status from the row and the tally recomputed under the store's lock.
pub type StatusDecision<'a> =
    &'a (dyn Fn(&Submission, &TallySnapshot) -> Option<SubmissionStatus> + Sync);

/// Result of an accepted cast: the stored vote, what it replaced, and the row afterwards.
#[derive(Debug, Clone)]
pub struct VoteWrite {
    pub vote: Vote,
    pub previous: Option<Vote>,
    pub submission: Submission,
}

#[derive(Debug, Clone)]
pub struct VoteRemoval {
    pub removed: Vote,
    pub submission: Submission,
}

/// A status flip performed by this caller, with the tally it was decided on.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub previous: SubmissionStatus,
    pub submission: Submission,
    pub tally: TallySnapshot,
}

/// Cached counters next to the ledger tally, both read while vote writes are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reconciliation {
    pub cached: TallyCounts,
    pub tally: TallySnapshot,
    pub corrected: bool,
}

impl Reconciliation {
    /// Whether the counters disagreed with the ledger when read.
    pub fn drifted(&self) -> bool {
        self.cached != self.tally.counts()
    }
}

/// Storage seam for submissions and the vote ledger.
///
/// Implementations guarantee:
/// - writes for the same (submission, voter) pair are serialized;
/// - a vote write and its cached-tally adjustment land together or not at all;
/// - no vote write is accepted once the submission is terminal or past its deadline;
/// - [`VotingStore::transition`] is a compare-and-swap, so exactly one caller observes a
///   given flip.
///
/// `StoreError::Conflict` signals an optimistic-concurrency miss that the caller may retry.
pub trait VotingStore: Send + Sync {
    fn insert_submission(&self, submission: Submission) -> Result<Submission, StoreError>;

    fn fetch_submission(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError>;

    /// Non-terminal submissions whose deadline is at or before `now`, oldest deadline first.
    fn due_for_resolution(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionId>, StoreError>;

    fn fetch_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, StoreError>;

    /// Live votes, newest `created_at` first.
    fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, StoreError>;

    fn upsert_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
        now: DateTime<Utc>,
    ) -> Result<VoteWrite, StoreError>;

    fn delete_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        now: DateTime<Utc>,
    ) -> Result<VoteRemoval, StoreError>;

    /// Runs `decide` with vote writes excluded and applies the status it returns.
    ///
    /// Returns `None` when `decide` declines or the status already matches. The cached
    /// counters are rewritten from the ledger as part of every applied change.
    fn transition(
        &self,
        submission_id: &SubmissionId,
        decide: StatusDecision<'_>,
    ) -> Result<Option<StatusChange>, StoreError>;

    /// Reads the cached counters and the ledger tally with vote writes excluded, repairing
    /// nothing. `corrected` is always false.
    fn audit(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError>;

    /// Recomputes the tally from the ledger and repairs the cached counters if they drifted.
    fn reconcile(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,
    #[error("submission not found")]
    NotFound,
    #[error("submission is not accepting votes: {0}")]
    NotVotable(NotVotableReason),
    #[error("vote not found")]
    VoteNotFound,
    #[error("concurrent modification detected")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
