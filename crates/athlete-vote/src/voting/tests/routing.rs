use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::voting::domain::{Ballot, SubmissionId, VoteType};
use crate::voting::router::{self, voting_router, VOTER_HEADER};
use crate::voting::service::VotingService;

fn app(h: &Harness) -> Router {
    voting_router(h.service.clone())
}

fn json_request(method: &str, uri: &str, voter: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(voter) = voter {
        builder = builder.header(VOTER_HEADER, voter);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn empty_request(method: &str, uri: &str, voter: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(voter) = voter {
        builder = builder.header(VOTER_HEADER, voter);
    }
    builder.body(Body::empty()).expect("request builds")
}

fn vote_uri(id: &SubmissionId) -> String {
    format!("/api/v1/submissions/{id}/vote")
}

#[tokio::test]
async fn create_route_opens_a_pending_submission() {
    let h = harness();
    let response = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/v1/submissions",
            None,
            json!({
                "subject": {
                    "name": "Maya Chen",
                    "category": "basketball",
                    "attributes": { "position": "guard" }
                }
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "pending");
    assert_eq!(payload["subject"]["name"], "Maya Chen");
    assert_eq!(payload["tally"]["total_votes"], 0);
    assert!(payload["id"].as_str().is_some());
}

#[tokio::test]
async fn cast_route_records_the_header_identity() {
    let h = harness();
    let submission = h.open("Diego Alvarez");

    let response = app(&h)
        .oneshot(json_request(
            "PUT",
            &vote_uri(&submission.id),
            Some("scout-9"),
            json!({
                "vote_type": "for",
                "confidence_level": 4,
                "reasoning": "quick first step",
                "expertise_tags": ["scouting"]
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["voter_id"], "scout-9");
    assert_eq!(payload["vote_type"], "for");

    let stored = h
        .service
        .get_vote(&submission.id, &voter("scout-9"))
        .expect("lookup")
        .expect("vote stored");
    assert_eq!(stored.confidence_level, 4);
}

#[tokio::test]
async fn missing_voter_header_is_unauthorized() {
    let h = harness();
    let submission = h.open("Lena Fischer");

    let response = app(&h)
        .oneshot(json_request(
            "PUT",
            &vote_uri(&submission.id),
            None,
            json!({ "vote_type": "for", "confidence_level": 3 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "unauthenticated");
}

#[tokio::test]
async fn out_of_range_confidence_is_unprocessable() {
    let h = harness();
    let submission = h.open("Sam Okoro");

    let response = app(&h)
        .oneshot(json_request(
            "PUT",
            &vote_uri(&submission.id),
            Some("a"),
            json!({ "vote_type": "against", "confidence_level": 9 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "invalid_confidence");
}

#[tokio::test]
async fn voting_after_the_deadline_conflicts() {
    let h = harness();
    let submission = h.open("Priya Nair");
    h.clock.advance(Duration::days(8));

    let response = app(&h)
        .oneshot(json_request(
            "PUT",
            &vote_uri(&submission.id),
            Some("late"),
            json!({ "vote_type": "for", "confidence_level": 5 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "submission_not_votable");
}

#[tokio::test]
async fn withdraw_route_returns_no_content_then_not_found() {
    let h = harness();
    let submission = h.open("Ari Cohen");
    h.cast(&submission.id, "fan", Ballot::new(VoteType::For, 2));

    let response = app(&h)
        .oneshot(empty_request("DELETE", &vote_uri(&submission.id), Some("fan")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app(&h)
        .oneshot(empty_request("GET", &vote_uri(&submission.id), Some("fan")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], "vote_not_found");
}

#[tokio::test]
async fn submission_route_reports_the_live_tally() {
    let h = harness();
    let submission = h.open("Noor Haddad");
    h.cast(&submission.id, "a", Ballot::new(VoteType::For, 5));
    h.cast(&submission.id, "b", Ballot::new(VoteType::Against, 3));

    let response = router::submission_handler(State(h.service.clone()), Path(submission.id))
        .await
        .into_response();

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["votes_for"], 1);
    assert_eq!(payload["votes_against"], 1);
    assert_eq!(payload["tally"]["approval_percentage"], 50.0);
    assert_eq!(payload["tally"]["average_confidence"], 4.0);
}

#[tokio::test]
async fn unknown_submission_is_not_found() {
    let h = harness();
    let response = app(&h)
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/submissions/{}", SubmissionId::generate()),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_submission_id_is_rejected() {
    let h = harness();
    let response = app(&h)
        .oneshot(empty_request("GET", "/api/v1/submissions/not-a-uuid", None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn votes_and_stats_routes_serialize_read_models() {
    let h = harness();
    let submission = h.open("Kai Nakamura");
    h.cast(&submission.id, "a", Ballot::new(VoteType::For, 5));

    let response = app(&h)
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/submissions/{}/votes", submission.id),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let votes = read_json_body(response).await;
    assert_eq!(votes.as_array().map(Vec::len), Some(1));

    let response = app(&h)
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/submissions/{}/stats", submission.id),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let stats = read_json_body(response).await;
    assert_eq!(stats["is_votable"], true);
    assert_eq!(stats["projected_status"], "approved");
}

#[tokio::test]
async fn review_route_toggles_moderation_state() {
    let h = harness();
    let submission = h.open("Ines Duarte");
    let uri = format!("/api/v1/submissions/{}/review", submission.id);

    let response = app(&h)
        .oneshot(json_request("POST", &uri, None, json!({ "under_review": true })))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await["status"], "under_review");

    let response = app(&h)
        .oneshot(json_request("POST", &uri, None, json!({ "under_review": false })))
        .await
        .expect("route executes");
    assert_eq!(read_json_body(response).await["status"], "pending");
}

#[tokio::test]
async fn sweep_route_reports_resolved_count() {
    let h = harness();
    h.open("Tomas Varga");
    h.open("Zara Ali");
    h.clock.advance(Duration::days(7));

    let response = app(&h)
        .oneshot(empty_request("POST", "/api/v1/resolutions/sweep", None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await["resolved"], 2);
}

#[tokio::test]
async fn store_outage_is_an_internal_error() {
    let service = Arc::new(VotingService::new(
        Arc::new(UnavailableStore),
        Arc::new(RecordingNotifier::default()),
        policy(),
    ));

    let response = router::sweep_handler(State(service)).await.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_json_body(response).await["code"], "store_error");
}
