use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::clock::{Clock, SystemClock};
use super::domain::{
    Ballot, NewSubmission, Submission, SubmissionId, SubmissionStatus, SubmissionWithTally, Vote,
    VoterId, VotingStats,
};
use super::error::{NotVotableReason, VotingError};
use super::ledger::VoteLedger;
use super::lifecycle::{self, VotingPolicy};
use super::notifier::{ChangeNotifier, SubmissionEvent};
use super::resolution::{Resolution, ResolutionScheduler};
use super::store::{Reconciliation, StoreError, VotingStore};
use super::tally::{self, TallySnapshot};

pub const DEFAULT_SWEEP_BATCH: usize = 256;

/// Collaborators shared by the ledger, the scheduler, and the query side.
pub(crate) struct VotingContext<S, N> {
    pub(crate) store: Arc<S>,
    pub(crate) notifier: Arc<N>,
    pub(crate) policy: VotingPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<S, N> Clone for VotingContext<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            policy: self.policy.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S, N> VotingContext<S, N>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs a store write, retrying optimistic-concurrency misses a bounded number of times.
    pub(crate) fn retrying<T>(
        &self,
        submission_id: &SubmissionId,
        voter_id: Option<&VoterId>,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, VotingError> {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(StoreError::Conflict) if retries < self.policy.max_write_retries => {
                    retries += 1;
                    warn!(%submission_id, operation, retries, "write conflict, retrying");
                }
                result => {
                    return result.map_err(|error| {
                        VotingError::from_store(*submission_id, voter_id, error)
                    })
                }
            }
        }
    }

    pub(crate) fn fetch(&self, submission_id: &SubmissionId) -> Result<Submission, VotingError> {
        self.store
            .fetch_submission(submission_id)
            .map_err(|error| VotingError::from_store(*submission_id, None, error))?
            .ok_or(VotingError::SubmissionNotFound(*submission_id))
    }

    pub(crate) fn authoritative_tally(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<TallySnapshot, VotingError> {
        let votes = self
            .store
            .list_votes(submission_id)
            .map_err(|error| VotingError::from_store(*submission_id, None, error))?;
        Ok(tally::compute(&votes))
    }

    pub(crate) fn publish(&self, event: SubmissionEvent) {
        if let Err(error) = self.notifier.publish(event) {
            warn!(%error, "failed to publish submission event");
        }
    }

    /// Broadcasts the recomputed tally after a committed write. Failures are logged only;
    /// the write itself already succeeded.
    ///
    /// The row is read before the ledger, so the snapshot covers at least every change
    /// up to the revision it is tagged with.
    pub(crate) fn publish_tally(&self, submission_id: &SubmissionId) {
        let current = self.fetch(submission_id).and_then(|row| {
            let snapshot = self.authoritative_tally(submission_id)?;
            Ok((row, snapshot))
        });
        match current {
            Ok((row, snapshot)) => self.publish(SubmissionEvent::TallyChanged {
                submission_id: *submission_id,
                status: row.status,
                revision: row.revision,
                snapshot,
                occurred_at: self.now(),
            }),
            Err(error) => warn!(%submission_id, %error, "unable to recompute tally for broadcast"),
        }
    }
}

/// Facade over the voting core: commands, queries, moderation, and resolution.
pub struct VotingService<S, N> {
    ctx: VotingContext<S, N>,
    ledger: VoteLedger<S, N>,
    scheduler: ResolutionScheduler<S, N>,
}

impl<S, N> VotingService<S, N>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, policy: VotingPolicy) -> Self {
        Self::with_clock(store, notifier, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        policy: VotingPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = VotingContext {
            store,
            notifier,
            policy,
            clock,
        };

        Self {
            ledger: VoteLedger::new(ctx.clone()),
            scheduler: ResolutionScheduler::new(ctx.clone(), DEFAULT_SWEEP_BATCH),
            ctx,
        }
    }

    pub fn with_sweep_batch(mut self, batch_size: usize) -> Self {
        self.scheduler = ResolutionScheduler::new(self.ctx.clone(), batch_size);
        self
    }

    pub fn policy(&self) -> &VotingPolicy {
        &self.ctx.policy
    }

    pub fn notifier(&self) -> &Arc<N> {
        &self.ctx.notifier
    }

    pub fn ledger(&self) -> &VoteLedger<S, N> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &ResolutionScheduler<S, N> {
        &self.scheduler
    }

    /// Registers a submission from the intake collaborator in `pending`.
    pub fn create_submission(
        &self,
        request: NewSubmission,
    ) -> Result<SubmissionWithTally, VotingError> {
        let created_at = self.ctx.now();
        let voting_deadline = match request.voting_deadline {
            Some(deadline) => deadline,
            None => self.ctx.policy.deadline_from(created_at)?,
        };

        let submission = Submission {
            id: SubmissionId::generate(),
            subject: request.subject,
            status: SubmissionStatus::Pending,
            voting_deadline,
            votes_for: 0,
            votes_against: 0,
            total_votes: 0,
            revision: 0,
            created_at,
        };

        let stored = self
            .ctx
            .store
            .insert_submission(submission)
            .map_err(VotingError::Store)?;

        info!(
            submission_id = %stored.id,
            deadline = %stored.voting_deadline,
            "submission opened for voting"
        );

        Ok(SubmissionWithTally {
            submission: stored,
            tally: TallySnapshot::default(),
        })
    }

    /// Reads a submission with its authoritative tally.
    ///
    /// Past-deadline submissions are resolved first. A cache that seems to disagree with
    /// the ledger is rechecked under the row lock and repaired only if it really drifted.
    pub fn get_submission_with_tally(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<SubmissionWithTally, VotingError> {
        let mut submission = self.resolved_on_read(submission_id)?;
        let tally = self.ctx.authoritative_tally(submission_id)?;

        if tally.counts() != submission.cached_counts() {
            let report = self.reconcile(submission_id)?;
            submission.apply_counts(report.tally.counts());
            return Ok(SubmissionWithTally {
                submission,
                tally: report.tally,
            });
        }

        Ok(SubmissionWithTally { submission, tally })
    }

    pub fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, VotingError> {
        self.ledger.list_votes(submission_id)
    }

    pub fn get_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, VotingError> {
        self.ledger.get_vote(submission_id, voter_id)
    }

    /// Drift is judged on counters and ledger read together under the row lock, so writes
    /// landing between the two reads are never reported as drift. Nothing is repaired.
    pub fn get_voting_stats(&self, submission_id: &SubmissionId) -> Result<VotingStats, VotingError> {
        let submission = self.resolved_on_read(submission_id)?;
        let audit = self
            .ctx
            .store
            .audit(submission_id)
            .map_err(|error| VotingError::from_store(*submission_id, None, error))?;
        let tally = audit.tally;
        let now = self.ctx.now();
        let policy = &self.ctx.policy;
        let cached = audit.cached;

        let projected_status = if submission.status.is_terminal() {
            submission.status
        } else {
            policy.decide(&tally)
        };

        Ok(VotingStats {
            submission_id: *submission_id,
            status: submission.status,
            cache_drift: audit.drifted(),
            cached,
            voting_deadline: submission.voting_deadline,
            time_remaining_secs: lifecycle::time_remaining(&submission, now).num_seconds(),
            is_votable: lifecycle::is_votable(&submission, now),
            projected_status,
            approval_threshold: policy.approval_threshold,
            minimum_quorum: policy.minimum_quorum,
            tally,
        })
    }

    pub fn cast_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
    ) -> Result<Vote, VotingError> {
        self.ledger.cast_vote(submission_id, voter_id, ballot)
    }

    pub fn remove_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<(), VotingError> {
        self.ledger.remove_vote(submission_id, voter_id)
    }

    /// Moderation signal: pending -> under_review.
    pub fn begin_review(&self, submission_id: &SubmissionId) -> Result<Submission, VotingError> {
        self.move_review(submission_id, SubmissionStatus::UnderReview)
    }

    /// Moderation signal: under_review -> pending.
    pub fn return_to_pending(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Submission, VotingError> {
        self.move_review(submission_id, SubmissionStatus::Pending)
    }

    pub fn reconcile(&self, submission_id: &SubmissionId) -> Result<Reconciliation, VotingError> {
        let report = self
            .ctx
            .store
            .reconcile(submission_id)
            .map_err(|error| VotingError::from_store(*submission_id, None, error))?;

        if report.corrected {
            warn!(
                %submission_id,
                cached_total = report.cached.total(),
                ledger_total = report.tally.total_votes,
                "tally cache drifted from ledger, corrected"
            );
        }
        Ok(report)
    }

    pub fn sweep(&self) -> Result<usize, VotingError> {
        self.scheduler.sweep()
    }

    pub fn resolve(&self, submission_id: &SubmissionId) -> Result<Option<Resolution>, VotingError> {
        self.scheduler.resolve(submission_id)
    }

    fn resolved_on_read(&self, submission_id: &SubmissionId) -> Result<Submission, VotingError> {
        let submission = self.ctx.fetch(submission_id)?;
        if submission.status.is_terminal() || self.ctx.now() < submission.voting_deadline {
            return Ok(submission);
        }

        match self.scheduler.resolve(submission_id)? {
            Some(resolution) => Ok(resolution.submission),
            // Another worker won the flip; read what it wrote.
            None => self.ctx.fetch(submission_id),
        }
    }

    fn move_review(
        &self,
        submission_id: &SubmissionId,
        target: SubmissionStatus,
    ) -> Result<Submission, VotingError> {
        let current = self.ctx.fetch(submission_id)?;
        if !lifecycle::plan_transition(current.status, target)? {
            return Ok(current);
        }

        let now = self.ctx.now();
        if now >= current.voting_deadline {
            return Err(VotingError::SubmissionNotVotable {
                submission_id: *submission_id,
                reason: NotVotableReason::DeadlinePassed,
            });
        }

        let decide = |submission: &Submission, _: &TallySnapshot| {
            let allowed = submission.status.can_transition_to(target)
                && lifecycle::is_votable(submission, now);
            allowed.then_some(target)
        };
        let change = self
            .ctx
            .retrying(submission_id, None, "move_review", || {
                self.ctx.store.transition(submission_id, &decide)
            })?;

        match change {
            Some(change) => {
                info!(
                    %submission_id,
                    from = change.previous.label(),
                    to = target.label(),
                    "review status changed"
                );
                self.ctx.publish(SubmissionEvent::ReviewStatusChanged {
                    submission_id: *submission_id,
                    status: target,
                    snapshot: change.tally,
                    occurred_at: now,
                });
                Ok(change.submission)
            }
            None => {
                let latest = self.ctx.fetch(submission_id)?;
                if latest.status == target {
                    Ok(latest)
                } else {
                    Err(VotingError::InvalidTransition {
                        from: latest.status,
                        to: target,
                    })
                }
            }
        }
    }
}
