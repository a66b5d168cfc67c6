use tracing::{debug, info, warn};

use super::domain::{
    Ballot, Submission, SubmissionId, SubmissionStatus, Vote, VoterId, MAX_CONFIDENCE,
    MIN_CONFIDENCE,
};
use super::error::VotingError;
use super::lifecycle;
use super::notifier::{ChangeNotifier, SubmissionEvent};
use super::service::VotingContext;
use super::store::VotingStore;
use super::tally::TallySnapshot;

/// Command side of the vote ledger: one live vote per (submission, voter).
pub struct VoteLedger<S, N> {
    ctx: VotingContext<S, N>,
}

pub fn validate_confidence(confidence_level: u8) -> Result<(), VotingError> {
    if (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&confidence_level) {
        Ok(())
    } else {
        Err(VotingError::InvalidConfidence(confidence_level))
    }
}

impl<S, N> VoteLedger<S, N>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    pub(crate) fn new(ctx: VotingContext<S, N>) -> Self {
        Self { ctx }
    }

    /// Records or replaces the voter's vote.
    ///
    /// Re-casting keeps the vote id and `created_at` and swaps type, confidence,
    /// reasoning, and tags. A refused cast leaves both the ledger and the tally untouched.
    pub fn cast_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
        ballot: Ballot,
    ) -> Result<Vote, VotingError> {
        validate_confidence(ballot.confidence_level)?;
        let ballot = ballot.normalized();
        let now = self.ctx.now();

        let write = self
            .ctx
            .retrying(submission_id, Some(voter_id), "cast_vote", || {
                self.ctx
                    .store
                    .upsert_vote(submission_id, voter_id, ballot.clone(), now)
            })?;

        debug!(
            %submission_id,
            %voter_id,
            vote_type = write.vote.vote_type.label(),
            confidence = write.vote.confidence_level,
            replaced = write.previous.is_some(),
            "vote recorded"
        );

        self.ctx.publish_tally(submission_id);
        self.open_review_if_due(&write.submission);

        Ok(write.vote)
    }

    /// Withdraws the voter's vote. Frozen once the submission stops accepting votes.
    pub fn remove_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<(), VotingError> {
        let now = self.ctx.now();
        let removal = self
            .ctx
            .retrying(submission_id, Some(voter_id), "remove_vote", || {
                self.ctx.store.delete_vote(submission_id, voter_id, now)
            })?;

        debug!(
            %submission_id,
            %voter_id,
            vote_type = removal.removed.vote_type.label(),
            "vote withdrawn"
        );

        self.ctx.publish_tally(submission_id);
        Ok(())
    }

    pub fn get_vote(
        &self,
        submission_id: &SubmissionId,
        voter_id: &VoterId,
    ) -> Result<Option<Vote>, VotingError> {
        self.ctx
            .store
            .fetch_vote(submission_id, voter_id)
            .map_err(|error| VotingError::from_store(*submission_id, Some(voter_id), error))
    }

    /// Votes for a submission, newest first.
    pub fn list_votes(&self, submission_id: &SubmissionId) -> Result<Vec<Vote>, VotingError> {
        self.ctx
            .store
            .list_votes(submission_id)
            .map_err(|error| VotingError::from_store(*submission_id, None, error))
    }

    fn open_review_if_due(&self, written: &Submission) {
        let policy = &self.ctx.policy;
        if written.status != SubmissionStatus::Pending
            || !policy.meets_review_threshold(written.total_votes)
        {
            return;
        }

        let submission_id = &written.id;
        let now = self.ctx.now();
        let decide = |submission: &Submission, tally: &TallySnapshot| {
            lifecycle::review_trigger(policy, submission, tally, now)
        };
        match self.ctx.store.transition(submission_id, &decide) {
            Ok(Some(change)) => {
                info!(
                    %submission_id,
                    total_votes = change.tally.total_votes,
                    "participation threshold reached, submission under review"
                );
                self.ctx.publish(SubmissionEvent::ReviewStatusChanged {
                    submission_id: *submission_id,
                    status: SubmissionStatus::UnderReview,
                    snapshot: change.tally,
                    occurred_at: now,
                });
            }
            Ok(None) => {}
            Err(error) => warn!(%submission_id, %error, "review trigger check failed"),
        }
    }
}
