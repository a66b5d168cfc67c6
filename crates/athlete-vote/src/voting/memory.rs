use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::domain::{Ballot, Submission, SubmissionId, Vote, VoteType, VoterId};
use super::lifecycle;
use super::store::{
    Reconciliation, StatusChange, StatusDecision, StoreError, VoteRemoval, VoteWrite, VotingStore,
};
use super::tally::{self, TallyCounts};

type VoteSlot = Arc<Mutex<Option<Vote>>>;

/// Process-local store.
///
/// Each submission row sits behind an `RwLock`: vote writes share it, status flips and
/// reconciliation take it exclusively. Every voter gets a slot mutex so writes for one
/// (submission, voter) pair serialize while different voters proceed in parallel, each
/// nudging the atomic counters and bumping the revision before releasing its slot.
#[derive(Default)]
pub struct InMemoryVotingStore {
    submissions: RwLock<HashMap<SubmissionId, Arc<SubmissionCell>>>,
}

struct SubmissionCell {
    row: RwLock<Submission>,
    votes_for: AtomicU64,
    votes_against: AtomicU64,
    revision: AtomicU64,
    slots: Mutex<HashMap<VoterId, VoteSlot>>,
}

impl SubmissionCell {
    fn new(submission: Submission) -> Self {
        Self {
            votes_for: AtomicU64::new(submission.votes_for),
            votes_against: AtomicU64::new(submission.votes_against),
            revision: AtomicU64::new(submission.revision),
            row: RwLock::new(submission),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn counts(&self) -> TallyCounts {
        TallyCounts {
            votes_for: self.votes_for.load(Ordering::Acquire),
            votes_against: self.votes_against.load(Ordering::Acquire),
        }
    }

    fn snapshot(&self, row: &Submission) -> Submission {
        let mut submission = row.clone();
        submission.apply_counts(self.counts());
        submission.revision = self.revision.load(Ordering::Acquire);
        submission
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    fn store_counts(&self, counts: TallyCounts) {
        self.votes_for.store(counts.votes_for, Ordering::Release);
        self.votes_against
            .store(counts.votes_against, Ordering::Release);
    }

    fn counter(&self, vote_type: VoteType) -> &AtomicU64 {
        match vote_type {
            VoteType::For => &self.votes_for,
            VoteType::Against => &self.votes_against,
        }
    }

    /// Moves one vote between counters; `None` on either side means add or remove.
    fn shift(&self, from: Option<VoteType>, to: Option<VoteType>) {
        if from == to {
            return;
        }
        if let Some(from) = from {
            let _ = self.counter(from).fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |count| Some(count.saturating_sub(1)),
            );
        }
        if let Some(to) = to {
            self.counter(to).fetch_add(1, Ordering::AcqRel);
        }
    }

    fn slot(&self, voter_id: &VoterId) -> Result<VoteSlot, StoreError> {
        let mut slots = lock(&self.slots)?;
        Ok(slots.entry(voter_id.clone()).or_default().clone())
    }

    fn existing_slot(&self, voter_id: &VoterId) -> Result<Option<VoteSlot>, StoreError> {
        Ok(lock(&self.slots)?.get(voter_id).cloned())
    }

    fn votes(&self) -> Result<Vec<Vote>, StoreError> {
        let slots: Vec<VoteSlot> = lock(&self.slots)?.values().cloned().collect();
        let mut votes = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(vote) = lock(&slot)?.clone() {
                votes.push(vote);
            }
        }
        votes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.voter_id.cmp(&b.voter_id))
        });
        Ok(votes)
    }
}

impl InMemoryVotingStore {
    fn cell(&self, id: &SubmissionId) -> Result<Arc<SubmissionCell>, StoreError> {
        read(&self.submissions)?
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Overwrites the cached counters without touching the ledger.
    #[cfg(test)]
    pub(crate) fn corrupt_cache(
        &self,
        id: &SubmissionId,
        counts: TallyCounts,
    ) -> Result<(), StoreError> {
        self.cell(id)?.store_counts(counts);
        Ok(())
    }
}

impl VotingStore for InMemoryVotingStore {
    fn insert_submission(&self, submission: Submission) -> Result<Submission, StoreError> {
        let mut submissions = write(&self.submissions)?;
        if submissions.contains_key(&submission.id) {
            return Err(StoreError::Duplicate);
        }
        submissions.insert(
            submission.id,
            Arc::new(SubmissionCell::new(submission.clone())),
        );
        Ok(submission)
    }

    fn fetch_submission(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        let cell = match read(&self.submissions)?.get(id) {
            Some(cell) => cell.clone(),
            None => return Ok(None),
        };
        let row = read(&cell.row)?;
        Ok(Some(cell.snapshot(&row)))
    }

    fn due_for_resolution(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionId>, StoreError> {
        let cells: Vec<Arc<SubmissionCell>> =
            read(&self.submissions)?.values().cloned().collect();

        let mut due = Vec::new();
        for cell in cells {
            let row = read(&cell.row)?;
            if !row.status.is_terminal() && row.voting_deadline <= now {
                due.push((row.voting_deadline, row.id));
            }
        }
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn fetch_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, StoreError> {
        let cell = self.cell(submission_id)?;
        match cell.existing_slot(voter_id)? {
            Some(slot) => Ok(lock(&slot)?.clone()),
            None => Ok(None),
        }
    }

    fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, StoreError> {
        self.cell(submission_id)?.votes()
    }

    fn upsert_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
        now: DateTime<Utc>,
    ) -> Result<VoteWrite, StoreError> {
        let cell = self.cell(submission_id)?;
        let row = read(&cell.row)?;
        lifecycle::votability(&row, now).map_err(StoreError::NotVotable)?;

        let slot = cell.slot(voter_id)?;
        let mut current = lock(&slot)?;
        let previous = current.clone();
        let vote = match &previous {
            Some(existing) => existing.replace_with(ballot, now),
            None => Vote::from_ballot(*submission_id, voter_id.clone(), ballot, now),
        };

        cell.shift(
            previous.as_ref().map(|vote| vote.vote_type),
            Some(vote.vote_type),
        );
        *current = Some(vote.clone());
        cell.bump_revision();
        drop(current);

        Ok(VoteWrite {
            vote,
            previous,
            submission: cell.snapshot(&row),
        })
    }

    fn delete_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        now: DateTime<Utc>,
    ) -> Result<VoteRemoval, StoreError> {
        let cell = self.cell(submission_id)?;
        let row = read(&cell.row)?;
        lifecycle::votability(&row, now).map_err(StoreError::NotVotable)?;

        let slot = cell.existing_slot(voter_id)?.ok_or(StoreError::VoteNotFound)?;
        let mut current = lock(&slot)?;
        let removed = current.take().ok_or(StoreError::VoteNotFound)?;
        cell.shift(Some(removed.vote_type), None);
        cell.bump_revision();
        drop(current);

        Ok(VoteRemoval {
            removed,
            submission: cell.snapshot(&row),
        })
    }

    fn transition(
        &self,
        submission_id: &SubmissionId,
        decide: StatusDecision<'_>,
    ) -> Result<Option<StatusChange>, StoreError> {
        let cell = self.cell(submission_id)?;
        let mut row = write(&cell.row)?;
        let votes = cell.votes()?;
        let tally = tally::compute(&votes);

        let next = match decide(&cell.snapshot(&row), &tally) {
            Some(next) if next != row.status => next,
            _ => return Ok(None),
        };

        let previous = row.status;
        row.status = next;
        cell.store_counts(tally.counts());
        cell.bump_revision();

        Ok(Some(StatusChange {
            previous,
            submission: cell.snapshot(&row),
            tally,
        }))
    }

    fn audit(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        let cell = self.cell(submission_id)?;
        let _row = write(&cell.row)?;
        Ok(Reconciliation {
            cached: cell.counts(),
            tally: tally::compute(&cell.votes()?),
            corrected: false,
        })
    }

    fn reconcile(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        let cell = self.cell(submission_id)?;
        let _row = write(&cell.row)?;
        let votes = cell.votes()?;
        let tally = tally::compute(&votes);
        let cached = cell.counts();

        let corrected = cached != tally.counts();
        if corrected {
            cell.store_counts(tally.counts());
        }

        Ok(Reconciliation {
            cached,
            tally,
            corrected,
        })
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory lock poisoned".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| poisoned())
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| poisoned())
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| poisoned())
}
