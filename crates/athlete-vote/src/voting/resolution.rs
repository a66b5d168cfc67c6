use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{Submission, SubmissionId, SubmissionStatus};
use super::error::VotingError;
use super::lifecycle;
use super::notifier::{ChangeNotifier, SubmissionEvent};
use super::service::VotingContext;
use super::store::VotingStore;
use super::tally::TallySnapshot;

/// Terminal flip performed by this caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub submission_id: SubmissionId,
    pub previous_status: SubmissionStatus,
    pub final_status: SubmissionStatus,
    pub tally: TallySnapshot,
    pub resolved_at: DateTime<Utc>,
    #[serde(skip)]
    pub submission: Submission,
}

/// Drives expired submissions to `approved` or `rejected`.
///
/// Safe to run from several workers at once: the store's compare-and-swap lets exactly one
/// caller flip a submission, and only that caller emits `SubmissionResolved`. Stopping
/// mid-batch leaves the rest for the next sweep.
pub struct ResolutionScheduler<S, N> {
    ctx: VotingContext<S, N>,
    batch_size: usize,
}

impl<S, N> ResolutionScheduler<S, N>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    pub(crate) fn new(ctx: VotingContext<S, N>, batch_size: usize) -> Self {
        Self {
            ctx,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolves every due submission (up to the batch size) and returns how many this
    /// call flipped.
    pub fn sweep(&self) -> Result<usize, VotingError> {
        let now = self.ctx.now();
        let due = self
            .ctx
            .store
            .due_for_resolution(now, self.batch_size)
            .map_err(VotingError::Store)?;

        let mut resolved = 0;
        for submission_id in &due {
            match self.resolve_at(submission_id, now) {
                Ok(Some(_)) => resolved += 1,
                Ok(None) => debug!(%submission_id, "already resolved by another worker"),
                Err(error) => warn!(%submission_id, %error, "resolution failed, retrying next sweep"),
            }
        }

        if !due.is_empty() {
            info!(due = due.len(), resolved, "resolution sweep finished");
        }
        Ok(resolved)
    }

    /// Resolves one submission if its deadline has passed. `None` when it is still open or
    /// was already terminal.
    pub fn resolve(&self, submission_id: &SubmissionId) -> Result<Option<Resolution>, VotingError> {
        self.resolve_at(submission_id, self.ctx.now())
    }

    fn resolve_at(
        &self,
        submission_id: &SubmissionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Resolution>, VotingError> {
        let policy = &self.ctx.policy;
        let decide = |submission: &Submission, tally: &TallySnapshot| {
            lifecycle::resolution(policy, submission, tally, now)
        };

        let change = self.ctx.retrying(submission_id, None, "resolve", || {
            self.ctx.store.transition(submission_id, &decide)
        })?;

        let Some(change) = change else {
            return Ok(None);
        };

        let final_status = change.submission.status;
        info!(
            %submission_id,
            status = final_status.label(),
            votes_for = change.tally.votes_for,
            votes_against = change.tally.votes_against,
            approval = change.tally.approval_percentage,
            "submission resolved"
        );

        self.ctx.publish(SubmissionEvent::SubmissionResolved {
            submission_id: *submission_id,
            final_status,
            snapshot: change.tally,
            occurred_at: now,
        });

        Ok(Some(Resolution {
            submission_id: *submission_id,
            previous_status: change.previous,
            final_status,
            tally: change.tally,
            resolved_at: now,
            submission: change.submission,
        }))
    }
}
