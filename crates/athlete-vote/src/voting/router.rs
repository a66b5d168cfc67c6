use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{Ballot, NewSubmission, SubmissionId, VoterId};
use super::error::VotingError;
use super::notifier::ChangeNotifier;
use super::service::VotingService;
use super::store::VotingStore;
use crate::error::AppError;

/// Header carrying the voter identity established by the auth layer.
pub const VOTER_HEADER: &str = "x-voter-id";

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewRequest {
    pub(crate) under_review: bool,
}

/// Router builder exposing the command and query interface over HTTP.
pub fn voting_router<S, N>(service: Arc<VotingService<S, N>>) -> Router
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    Router::new()
        .route("/api/v1/submissions", post(create_handler::<S, N>))
        .route(
            "/api/v1/submissions/:submission_id",
            get(submission_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/votes",
            get(votes_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/stats",
            get(stats_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/vote",
            put(cast_handler::<S, N>)
                .get(vote_handler::<S, N>)
                .delete(withdraw_handler::<S, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/review",
            post(review_handler::<S, N>),
        )
        .route("/api/v1/resolutions/sweep", post(sweep_handler::<S, N>))
        .with_state(service)
}

fn voter_from_headers(headers: &HeaderMap) -> Result<VoterId, AppError> {
    headers
        .get(VOTER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(VoterId::from)
        .ok_or(AppError::Unauthenticated)
}

pub(crate) async fn create_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Json(request): Json<NewSubmission>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let created = service.create_submission(request)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn submission_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    Ok(Json(service.get_submission_with_tally(&submission_id)?))
}

pub(crate) async fn votes_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    Ok(Json(service.list_votes(&submission_id)?))
}

pub(crate) async fn stats_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    Ok(Json(service.get_voting_stats(&submission_id)?))
}

pub(crate) async fn cast_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
    headers: HeaderMap,
    Json(ballot): Json<Ballot>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let voter_id = voter_from_headers(&headers)?;
    Ok(Json(service.cast_vote(&submission_id, &voter_id, ballot)?))
}

pub(crate) async fn vote_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let voter_id = voter_from_headers(&headers)?;
    match service.get_vote(&submission_id, &voter_id)? {
        Some(vote) => Ok(Json(vote)),
        None => Err(AppError::Voting(VotingError::VoteNotFound {
            submission_id,
            voter_id,
        })),
    }
}

pub(crate) async fn withdraw_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let voter_id = voter_from_headers(&headers)?;
    service.remove_vote(&submission_id, &voter_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn review_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
    Path(submission_id): Path<SubmissionId>,
    Json(request): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let submission = if request.under_review {
        service.begin_review(&submission_id)?
    } else {
        service.return_to_pending(&submission_id)?
    };
    Ok(Json(json!({
        "submission_id": submission.id,
        "status": submission.status.label(),
    })))
}

pub(crate) async fn sweep_handler<S, N>(
    State(service): State<Arc<VotingService<S, N>>>,
) -> Result<impl IntoResponse, AppError>
where
    S: VotingStore + 'static,
    N: ChangeNotifier + 'static,
{
    let resolved = service.sweep()?;
    Ok(Json(json!({ "resolved": resolved })))
}
