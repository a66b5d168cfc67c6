//! Background tasks started alongside the HTTP server.

use crate::infra::Service;
use athlete_vote::voting::{InProcessNotifier, NotifyError, ResolutionFeed, SubmissionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs the resolution sweep every `period` until shutdown flips.
///
/// The store API is synchronous, so each sweep runs on the blocking pool.
pub(crate) fn spawn_sweeper(
    service: Arc<Service>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "resolution sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let service = service.clone();
                    match tokio::task::spawn_blocking(move || service.sweep()).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(resolved)) => debug!(resolved, "sweep resolved submissions"),
                        Ok(Err(error)) => warn!(%error, "resolution sweep failed"),
                        Err(error) => error!(%error, "resolution sweep task panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("resolution sweeper stopped");
    })
}

/// Hands every final decision to the reputation scoring collaborator.
///
/// Scoring itself lives outside this service; the hand-off is a structured log line that
/// the downstream pipeline consumes. Reads from the lossless resolution feed, so a busy
/// tally stream cannot push a decision out. The task yields how many it handed off.
pub(crate) fn spawn_resolution_consumer(
    notifier: &InProcessNotifier,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<u64>, NotifyError> {
    let mut feed = notifier.subscribe_resolutions()?;
    Ok(tokio::spawn(async move {
        let mut forwarded = 0;
        loop {
            tokio::select! {
                event = feed.recv() => match event {
                    Some(event) => forwarded += forward_resolution(&event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        forwarded + drain(&mut feed)
    }))
}

fn forward_resolution(event: &SubmissionEvent) -> u64 {
    let SubmissionEvent::SubmissionResolved {
        submission_id,
        final_status,
        snapshot,
        occurred_at,
    } = event
    else {
        return 0;
    };
    info!(
        target: "reputation",
        %submission_id,
        status = final_status.label(),
        votes_for = snapshot.votes_for,
        votes_against = snapshot.votes_against,
        average_confidence = snapshot.average_confidence,
        resolved_at = %occurred_at,
        "resolution handed to reputation scoring"
    );
    1
}

/// Forwards whatever was already queued when shutdown arrived.
fn drain(feed: &mut ResolutionFeed) -> u64 {
    let mut forwarded = 0;
    while let Some(event) = feed.try_next() {
        forwarded += forward_resolution(&event);
    }
    if forwarded > 0 {
        debug!(forwarded, "resolution consumer drained on shutdown");
    }
    forwarded
}
