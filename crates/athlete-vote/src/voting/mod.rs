//! Vote ledger, tally, submission lifecycle, deadline resolution, and change fan-out.
//!
//! Write path: `cast_vote`/`remove_vote` -> store (per-voter serialized, atomic counter
//! update) -> tally recompute -> optional review trigger -> `TallyChanged`. The resolution
//! scheduler independently flips expired submissions and emits `SubmissionResolved`.

pub mod clock;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod notifier;
pub mod resolution;
pub mod router;
pub mod service;
pub mod store;
pub mod tally;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Ballot, NewSubmission, SubjectProfile, Submission, SubmissionId, SubmissionStatus,
    SubmissionWithTally, Vote, VoteId, VoteType, VoterId, VotingStats, MAX_CONFIDENCE,
    MIN_CONFIDENCE,
};
pub use error::{NotVotableReason, VotingError};
pub use ledger::{validate_confidence, VoteLedger};
pub use lifecycle::VotingPolicy;
pub use memory::InMemoryVotingStore;
pub use notifier::{
    ChangeNotifier, InProcessNotifier, NotifyError, ResolutionFeed, SubmissionEvent, Subscription,
    Topics,
};
pub use resolution::{Resolution, ResolutionScheduler};
pub use router::{voting_router, VOTER_HEADER};
pub use service::VotingService;
pub use store::{
    Reconciliation, StatusChange, StatusDecision, StoreError, VoteRemoval, VoteWrite, VotingStore,
};
pub use tally::{compute, TallyCounts, TallySnapshot};
