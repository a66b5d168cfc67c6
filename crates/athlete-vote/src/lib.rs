//! Time-boxed community voting for prospective athlete submissions.
//!
//! The crate owns the vote ledger, tally calculation, submission lifecycle, deadline
//! resolution, and change fan-out. Intake forms, media, and authentication live elsewhere
//! and talk to this core through [`voting::VotingService`] and its event stream.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod voting;
