use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tally::{TallyCounts, TallySnapshot};

pub const MIN_CONFIDENCE: u8 = 1;
pub const MAX_CONFIDENCE: u8 = 5;

/// Identifier wrapper for submissions awaiting community approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

/// Opaque voter identity handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub String);

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteId(pub Uuid);

impl VoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Lifecycle of a submission. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    For,
    Against,
}

impl VoteType {
    pub const fn label(self) -> &'static str {
        match self {
            VoteType::For => "for",
            VoteType::Against => "against",
        }
    }
}

/// Subject metadata supplied by the intake form. Opaque to the voting rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Intake payload. Omitting the deadline uses the configured voting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub subject: SubjectProfile,
    #[serde(default)]
    pub voting_deadline: Option<DateTime<Utc>>,
}

/// Submission row including the denormalized tally cache.
///
/// `votes_for`, `votes_against`, and `total_votes` trail the ledger; reads that need the
/// authoritative numbers recompute them from the votes.
///
/// `revision` counts committed vote writes and status flips. A ledger read taken after
/// observing revision `n` includes every change up to `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub subject: SubjectProfile,
    pub status: SubmissionStatus,
    pub voting_deadline: DateTime<Utc>,
    pub votes_for: u64,
    pub votes_against: u64,
    pub total_votes: u64,
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn cached_counts(&self) -> TallyCounts {
        TallyCounts {
            votes_for: self.votes_for,
            votes_against: self.votes_against,
        }
    }

    pub(crate) fn apply_counts(&mut self, counts: TallyCounts) {
        self.votes_for = counts.votes_for;
        self.votes_against = counts.votes_against;
        self.total_votes = counts.total();
    }
}

/// Vote arguments shared by the command interface and the HTTP body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub vote_type: VoteType,
    pub confidence_level: u8,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub expertise_tags: BTreeSet<String>,
}

impl Ballot {
    pub fn new(vote_type: VoteType, confidence_level: u8) -> Self {
        Self {
            vote_type,
            confidence_level,
            reasoning: None,
            expertise_tags: BTreeSet::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.expertise_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Blank reasoning and blank tags carry no information and are dropped.
    pub(crate) fn normalized(mut self) -> Self {
        self.reasoning = self
            .reasoning
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        self.expertise_tags = self
            .expertise_tags
            .into_iter()
            .map(|tag| tag.trim().to_ascii_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();
        self
    }
}

/// One live vote for a (submission, voter) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub submission_id: SubmissionId,
    pub voter_id: VoterId,
    pub vote_type: VoteType,
    pub confidence_level: u8,
    pub reasoning: Option<String>,
    pub expertise_tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vote {
    pub(crate) fn from_ballot(
        submission_id: SubmissionId,
        voter_id: VoterId,
        ballot: Ballot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VoteId::generate(),
            submission_id,
            voter_id,
            vote_type: ballot.vote_type,
            confidence_level: ballot.confidence_level,
            reasoning: ballot.reasoning,
            expertise_tags: ballot.expertise_tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-vote keeps the identity and creation time and replaces everything else.
    pub(crate) fn replace_with(&self, ballot: Ballot, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            submission_id: self.submission_id,
            voter_id: self.voter_id.clone(),
            vote_type: ballot.vote_type,
            confidence_level: ballot.confidence_level,
            reasoning: ballot.reasoning,
            expertise_tags: ballot.expertise_tags,
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

/// Query view pairing the stored row with the tally recomputed from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionWithTally {
    #[serde(flatten)]
    pub submission: Submission,
    pub tally: TallySnapshot,
}

/// Read model behind `get_voting_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingStats {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    pub tally: TallySnapshot,
    pub cached: TallyCounts,
    pub cache_drift: bool,
    pub voting_deadline: DateTime<Utc>,
    pub time_remaining_secs: i64,
    pub is_votable: bool,
    pub projected_status: SubmissionStatus,
    pub approval_threshold: f64,
    pub minimum_quorum: u64,
}
