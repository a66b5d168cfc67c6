use std::fmt;

use chrono::{DateTime, Utc};

use super::domain::{SubmissionId, SubmissionStatus, VoterId};
use super::store::StoreError;

/// Why a submission refused a vote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotVotableReason {
    Closed(SubmissionStatus),
    DeadlinePassed,
}

impl fmt::Display for NotVotableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotVotableReason::Closed(status) => write!(f, "status is {status}"),
            NotVotableReason::DeadlinePassed => f.write_str("voting deadline has passed"),
        }
    }
}

/// Errors surfaced to voting callers. None of them are swallowed on the write path.
#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("submission {submission_id} is not accepting votes: {reason}")]
    SubmissionNotVotable {
        submission_id: SubmissionId,
        reason: NotVotableReason,
    },
    #[error("voter {voter_id} has no vote on submission {submission_id}")]
    VoteNotFound {
        submission_id: SubmissionId,
        voter_id: VoterId,
    },
    #[error("confidence level {0} is outside 1..=5")]
    InvalidConfidence(u8),
    #[error("submission {0} was modified concurrently, retry the request")]
    ConcurrentModification(SubmissionId),
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),
    #[error("submission cannot move from {from} to {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("voting window of {window_days} days from {created_at} overflows the calendar")]
    DeadlineOutOfRange {
        created_at: DateTime<Utc>,
        window_days: i64,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl VotingError {
    pub const fn code(&self) -> &'static str {
        match self {
            VotingError::SubmissionNotVotable { .. } => "submission_not_votable",
            VotingError::VoteNotFound { .. } => "vote_not_found",
            VotingError::InvalidConfidence(_) => "invalid_confidence",
            VotingError::ConcurrentModification(_) => "concurrent_modification",
            VotingError::SubmissionNotFound(_) => "submission_not_found",
            VotingError::InvalidTransition { .. } => "invalid_transition",
            VotingError::DeadlineOutOfRange { .. } => "deadline_out_of_range",
            VotingError::Store(_) => "store_error",
        }
    }

    /// Maps a storage failure onto the caller-facing taxonomy for one submission.
    pub(crate) fn from_store(
        submission_id: SubmissionId,
        voter_id: Option<&VoterId>,
        error: StoreError,
    ) -> Self {
        match error {
            StoreError::NotFound => VotingError::SubmissionNotFound(submission_id),
            StoreError::NotVotable(reason) => VotingError::SubmissionNotVotable {
                submission_id,
                reason,
            },
            StoreError::VoteNotFound => VotingError::VoteNotFound {
                submission_id,
                voter_id: voter_id.cloned().unwrap_or_else(|| VoterId(String::new())),
            },
            StoreError::Conflict => VotingError::ConcurrentModification(submission_id),
            other => VotingError::Store(other),
        }
    }
}
