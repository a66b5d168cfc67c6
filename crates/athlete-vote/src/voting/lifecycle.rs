//! Submission state machine and the approval rules that drive it.
//!
//! ```text
//! pending <-> under_review
//!    \           /
//!     +--> approved | rejected   (only at or after the voting deadline)
//! ```

use chrono::{DateTime, Duration, Utc};

use super::domain::{Submission, SubmissionStatus};
use super::error::{NotVotableReason, VotingError};
use super::tally::TallySnapshot;

/// Single home for the approval bar, quorum, and review trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingPolicy {
    pub approval_threshold: f64,
    pub minimum_quorum: u64,
    pub review_threshold: Option<u64>,
    pub voting_window: Duration,
    pub max_write_retries: u32,
}

impl Default for VotingPolicy {
    fn default() -> Self {
        Self {
            approval_threshold: 70.0,
            minimum_quorum: 1,
            review_threshold: None,
            voting_window: Duration::days(7),
            max_write_retries: 3,
        }
    }
}

impl VotingPolicy {
    /// Terminal outcome for a tally, regardless of the deadline.
    pub fn decide(&self, tally: &TallySnapshot) -> SubmissionStatus {
        let quorum_met = tally.total_votes >= self.minimum_quorum;
        if quorum_met && tally.approval_percentage >= self.approval_threshold {
            SubmissionStatus::Approved
        } else {
            SubmissionStatus::Rejected
        }
    }

    pub fn meets_review_threshold(&self, total_votes: u64) -> bool {
        self.review_threshold
            .is_some_and(|threshold| total_votes >= threshold)
    }

    pub fn deadline_from(&self, created_at: DateTime<Utc>) -> Result<DateTime<Utc>, VotingError> {
        created_at
            .checked_add_signed(self.voting_window)
            .ok_or(VotingError::DeadlineOutOfRange {
                created_at,
                window_days: self.voting_window.num_days(),
            })
    }
}

impl SubmissionStatus {
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, UnderReview)
                | (UnderReview, Pending)
                | (Pending | UnderReview, Approved | Rejected)
        )
    }
}

/// Checks a requested move. `Ok(false)` means the submission is already there.
pub fn plan_transition(
    current: SubmissionStatus,
    target: SubmissionStatus,
) -> Result<bool, VotingError> {
    if current == target {
        return Ok(false);
    }
    if current.can_transition_to(target) {
        Ok(true)
    } else {
        Err(VotingError::InvalidTransition {
            from: current,
            to: target,
        })
    }
}

pub fn votability(submission: &Submission, now: DateTime<Utc>) -> Result<(), NotVotableReason> {
    if submission.status.is_terminal() {
        return Err(NotVotableReason::Closed(submission.status));
    }
    if now >= submission.voting_deadline {
        return Err(NotVotableReason::DeadlinePassed);
    }
    Ok(())
}

pub fn is_votable(submission: &Submission, now: DateTime<Utc>) -> bool {
    votability(submission, now).is_ok()
}

/// Terminal status the submission should take now, if any.
///
/// Pure in (status, tally, deadline, now) so the sweep and resolve-on-read always agree.
pub fn resolution(
    policy: &VotingPolicy,
    submission: &Submission,
    tally: &TallySnapshot,
    now: DateTime<Utc>,
) -> Option<SubmissionStatus> {
    if submission.status.is_terminal() || now < submission.voting_deadline {
        return None;
    }
    Some(policy.decide(tally))
}

/// Participation-driven pending -> under_review move, when the policy enables it.
pub fn review_trigger(
    policy: &VotingPolicy,
    submission: &Submission,
    tally: &TallySnapshot,
    now: DateTime<Utc>,
) -> Option<SubmissionStatus> {
    let eligible = submission.status == SubmissionStatus::Pending
        && is_votable(submission, now)
        && policy.meets_review_threshold(tally.total_votes);
    eligible.then_some(SubmissionStatus::UnderReview)
}

pub fn time_remaining(submission: &Submission, now: DateTime<Utc>) -> Duration {
    (submission.voting_deadline - now).max(Duration::zero())
}
