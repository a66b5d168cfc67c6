use crate::infra::{AppState, Service};
use athlete_vote::error::AppError;
use athlete_vote::voting::{voting_router, SubmissionEvent, SubmissionId, Subscription, Topics};
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventsQuery {
    /// Comma-separated submission ids. Absent or empty subscribes to every submission.
    #[serde(default)]
    pub(crate) ids: Option<String>,
}

pub(crate) fn with_voting_routes(service: Arc<Service>) -> axum::Router {
    voting_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route("/api/v1/events", axum::routing::get(events_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Live tally and status changes as server-sent events, one frame per event.
pub(crate) async fn events_endpoint(
    Extension(state): Extension<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let topics = parse_topics(query.ids.as_deref())?;
    debug!(?topics, "event stream opened");
    let subscription = state.notifier.subscribe(topics);
    Ok(Sse::new(event_stream(subscription, state.shutdown)).keep_alive(KeepAlive::default()))
}

fn parse_topics(raw: Option<&str>) -> Result<Topics, AppError> {
    let ids: Vec<&str> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Ok(Topics::All);
    }

    ids.into_iter()
        .map(|id| {
            id.parse::<SubmissionId>()
                .map_err(|_| AppError::InvalidRequest(format!("'{id}' is not a submission id")))
        })
        .collect()
}

fn event_stream(
    subscription: Subscription,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (subscription, shutdown),
        |(mut subscription, mut shutdown)| async move {
            if *shutdown.borrow() {
                return None;
            }
            let event = tokio::select! {
                event = subscription.recv() => event?,
                _ = shutdown.changed() => return None,
            };
            Some((Ok::<_, Infallible>(to_frame(&event)), (subscription, shutdown)))
        },
    )
}

fn to_frame(event: &SubmissionEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(event)
        .unwrap_or_else(|error| Event::default().event("error").data(error.to_string()))
}
