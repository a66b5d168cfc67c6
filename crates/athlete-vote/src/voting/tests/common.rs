use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::voting::clock::ManualClock;
use crate::voting::domain::{
    Ballot, NewSubmission, SubjectProfile, Submission, SubmissionId, Vote, VoterId,
};
use crate::voting::lifecycle::VotingPolicy;
use crate::voting::memory::InMemoryVotingStore;
use crate::voting::notifier::{ChangeNotifier, InProcessNotifier, NotifyError, SubmissionEvent};
use crate::voting::service::VotingService;
use crate::voting::store::{
    Reconciliation, StatusChange, StatusDecision, StoreError, VoteRemoval, VoteWrite, VotingStore,
};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 12, 15, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn policy() -> VotingPolicy {
    VotingPolicy::default()
}

pub(super) fn subject(name: &str) -> SubjectProfile {
    let mut attributes = BTreeMap::new();
    attributes.insert("position".to_string(), "point guard".to_string());
    attributes.insert("school".to_string(), "Lincoln High".to_string());
    SubjectProfile {
        name: name.to_string(),
        category: "basketball".to_string(),
        attributes,
    }
}

pub(super) fn new_submission(name: &str) -> NewSubmission {
    NewSubmission {
        subject: subject(name),
        voting_deadline: None,
    }
}

pub(super) fn voter(name: &str) -> VoterId {
    VoterId::from(name)
}

pub(super) type MemoryService = VotingService<InMemoryVotingStore, InProcessNotifier>;

pub(super) struct Harness {
    pub(super) service: Arc<MemoryService>,
    pub(super) store: Arc<InMemoryVotingStore>,
    pub(super) notifier: Arc<InProcessNotifier>,
    pub(super) clock: Arc<ManualClock>,
}

impl Harness {
    pub(super) fn open(&self, name: &str) -> Submission {
        self.service
            .create_submission(new_submission(name))
            .expect("submission opens")
            .submission
    }

    pub(super) fn cast(&self, id: &SubmissionId, who: &str, ballot: Ballot) -> Vote {
        self.service
            .cast_vote(id, &voter(who), ballot)
            .expect("vote accepted")
    }

    /// Jumps past the submission's deadline.
    pub(super) fn expire(&self, submission: &Submission) {
        self.clock
            .set(submission.voting_deadline + Duration::seconds(1));
    }

    pub(super) fn assert_cache_matches_ledger(&self, id: &SubmissionId) {
        let stored = self
            .store
            .fetch_submission(id)
            .expect("fetch succeeds")
            .expect("row present");
        let votes = self.store.list_votes(id).expect("list succeeds");
        let tally = crate::voting::tally::compute(&votes);
        assert_eq!(stored.cached_counts(), tally.counts());
        assert_eq!(stored.total_votes, stored.votes_for + stored.votes_against);
    }
}

pub(super) fn harness() -> Harness {
    harness_with(policy())
}

pub(super) fn harness_with(policy: VotingPolicy) -> Harness {
    let store = Arc::new(InMemoryVotingStore::default());
    let notifier = Arc::new(InProcessNotifier::new());
    let clock = Arc::new(ManualClock::new(start()));
    let service = Arc::new(VotingService::with_clock(
        store.clone(),
        notifier.clone(),
        policy,
        clock.clone(),
    ));

    Harness {
        service,
        store,
        notifier,
        clock,
    }
}

#[derive(Default, Clone)]
pub(super) struct RecordingNotifier {
    events: Arc<Mutex<Vec<SubmissionEvent>>>,
}

impl RecordingNotifier {
    pub(super) fn events(&self) -> Vec<SubmissionEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn publish(&self, event: SubmissionEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}

/// Wraps the in-memory store and answers the first `conflicts` writes with `Conflict`.
pub(super) struct FlakyStore {
    inner: InMemoryVotingStore,
    remaining_conflicts: AtomicU32,
}

impl FlakyStore {
    pub(super) fn new(conflicts: u32) -> Self {
        Self {
            inner: InMemoryVotingStore::default(),
            remaining_conflicts: AtomicU32::new(conflicts),
        }
    }

    fn conflict(&self) -> Result<(), StoreError> {
        let took = self
            .remaining_conflicts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if took {
            Err(StoreError::Conflict)
        } else {
            Ok(())
        }
    }
}

impl VotingStore for FlakyStore {
    fn insert_submission(&self, submission: Submission) -> Result<Submission, StoreError> {
        self.inner.insert_submission(submission)
    }

    fn fetch_submission(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        self.inner.fetch_submission(id)
    }

    fn due_for_resolution(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionId>, StoreError> {
        self.inner.due_for_resolution(now, limit)
    }

    fn fetch_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, StoreError> {
        self.inner.fetch_vote(submission_id, voter_id)
    }

    fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, StoreError> {
        self.inner.list_votes(submission_id)
    }

    fn upsert_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
        now: DateTime<Utc>,
    ) -> Result<VoteWrite, StoreError> {
        self.conflict()?;
        self.inner.upsert_vote(submission_id, voter_id, ballot, now)
    }

    fn delete_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        now: DateTime<Utc>,
    ) -> Result<VoteRemoval, StoreError> {
        self.conflict()?;
        self.inner.delete_vote(submission_id, voter_id, now)
    }

    fn transition(
        &self,
        submission_id: &SubmissionId,
        decide: StatusDecision<'_>,
    ) -> Result<Option<StatusChange>, StoreError> {
        self.conflict()?;
        self.inner.transition(submission_id, decide)
    }

    fn audit(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        self.inner.audit(submission_id)
    }

    fn reconcile(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        self.inner.reconcile(submission_id)
    }
}

/// Lands one queued vote immediately after the next row read, the way a cast from
/// another request would between two unlocked reads.
#[derive(Default)]
pub(super) struct InterleavedWriteStore {
    pub(super) inner: InMemoryVotingStore,
    queued: Mutex<Option<(VoterId, Ballot, DateTime<Utc>)>>,
}

impl InterleavedWriteStore {
    pub(super) fn queue(&self, voter_id: VoterId, ballot: Ballot, at: DateTime<Utc>) {
        *self.queued.lock().expect("queue mutex poisoned") = Some((voter_id, ballot, at));
    }
}

impl VotingStore for InterleavedWriteStore {
    fn insert_submission(&self, submission: Submission) -> Result<Submission, StoreError> {
        self.inner.insert_submission(submission)
    }

    fn fetch_submission(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        let row = self.inner.fetch_submission(id)?;
        let queued = self.queued.lock().expect("queue mutex poisoned").take();
        if let Some((voter_id, ballot, at)) = queued {
            self.inner.upsert_vote(id, &voter_id, ballot, at)?;
        }
        Ok(row)
    }

    fn due_for_resolution(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SubmissionId>, StoreError> {
        self.inner.due_for_resolution(now, limit)
    }

    fn fetch_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, StoreError> {
        self.inner.fetch_vote(submission_id, voter_id)
    }

    fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, StoreError> {
        self.inner.list_votes(submission_id)
    }

    fn upsert_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
        now: DateTime<Utc>,
    ) -> Result<VoteWrite, StoreError> {
        self.inner.upsert_vote(submission_id, voter_id, ballot, now)
    }

    fn delete_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        now: DateTime<Utc>,
    ) -> Result<VoteRemoval, StoreError> {
        self.inner.delete_vote(submission_id, voter_id, now)
    }

    fn transition(
        &self,
        submission_id: &SubmissionId,
        decide: StatusDecision<'_>,
    ) -> Result<Option<StatusChange>, StoreError> {
        self.inner.transition(submission_id, decide)
    }

    fn audit(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        self.inner.audit(submission_id)
    }

    fn reconcile(&self, submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        self.inner.reconcile(submission_id)
    }
}

pub(super) struct UnavailableStore;

impl VotingStore for UnavailableStore {
    fn insert_submission(&self, _submission: Submission) -> Result<Submission, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn fetch_submission(&self, _id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn due_for_resolution(
        &self,
        _now: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<SubmissionId>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn fetch_vote(
        &self,
        _submission_id: &SubmissionId,
        _voter_id: &VoterId,
    ) -> Result<Option<Vote>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn list_votes(&self, _submission_id: &SubmissionId) -> Result<Vec<Vote>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn upsert_vote(
        &self,
        _submission_id: &SubmissionId,
        _voter_id: &VoterId,
        _ballot: Ballot,
        _now: DateTime<Utc>,
    ) -> Result<VoteWrite, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn delete_vote(
        &self,
        _submission_id: &SubmissionId,
        _voter_id: &VoterId,
        _now: DateTime<Utc>,
    ) -> Result<VoteRemoval, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn transition(
        &self,
        _submission_id: &SubmissionId,
        _decide: StatusDecision<'_>,
    ) -> Result<Option<StatusChange>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn audit(&self, _submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn reconcile(&self, _submission_id: &SubmissionId) -> Result<Reconciliation, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
