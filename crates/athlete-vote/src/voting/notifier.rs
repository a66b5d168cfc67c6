//! Fan-out of tally and status changes to live observers.
//!
//! Every event carries the full snapshot, so a subscriber that lags and loses events
//! converges again on the next one it sees. Resolutions are emitted once and never
//! repeated, so consumers that must see every one of them use a [`ResolutionFeed`],
//! which is unbounded and never drops.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::domain::{SubmissionId, SubmissionStatus};
use super::tally::TallySnapshot;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionEvent {
    /// Concurrent writers may publish out of order. Consumers keep the highest
    /// `revision` seen per submission; the highest one always reflects every write.
    TallyChanged {
        submission_id: SubmissionId,
        status: SubmissionStatus,
        revision: u64,
        snapshot: TallySnapshot,
        occurred_at: DateTime<Utc>,
    },
    ReviewStatusChanged {
        submission_id: SubmissionId,
        status: SubmissionStatus,
        snapshot: TallySnapshot,
        occurred_at: DateTime<Utc>,
    },
    SubmissionResolved {
        submission_id: SubmissionId,
        final_status: SubmissionStatus,
        snapshot: TallySnapshot,
        occurred_at: DateTime<Utc>,
    },
}

impl SubmissionEvent {
    pub fn submission_id(&self) -> SubmissionId {
        match self {
            SubmissionEvent::TallyChanged { submission_id, .. }
            | SubmissionEvent::ReviewStatusChanged { submission_id, .. }
            | SubmissionEvent::SubmissionResolved { submission_id, .. } => *submission_id,
        }
    }

    pub fn snapshot(&self) -> &TallySnapshot {
        match self {
            SubmissionEvent::TallyChanged { snapshot, .. }
            | SubmissionEvent::ReviewStatusChanged { snapshot, .. }
            | SubmissionEvent::SubmissionResolved { snapshot, .. } => snapshot,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            SubmissionEvent::TallyChanged { .. } => "tally_changed",
            SubmissionEvent::ReviewStatusChanged { .. } => "review_status_changed",
            SubmissionEvent::SubmissionResolved { .. } => "submission_resolved",
        }
    }
}

/// Outbound hook for state changes. Implementations must never block the writer.
pub trait ChangeNotifier: Send + Sync {
    fn publish(&self, event: SubmissionEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Which submissions a subscriber cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topics {
    All,
    Only(HashSet<SubmissionId>),
}

impl Topics {
    pub fn one(id: SubmissionId) -> Self {
        Topics::Only(HashSet::from([id]))
    }

    pub fn matches(&self, id: &SubmissionId) -> bool {
        match self {
            Topics::All => true,
            Topics::Only(ids) => ids.contains(id),
        }
    }
}

impl FromIterator<SubmissionId> for Topics {
    fn from_iter<I: IntoIterator<Item = SubmissionId>>(iter: I) -> Self {
        Topics::Only(iter.into_iter().collect())
    }
}

/// In-process pub/sub backed by a broadcast ring.
///
/// Each receiver has its own cursor into a ring of `capacity` events. A slow receiver
/// loses the oldest events instead of holding up publishers. `SubmissionResolved` is
/// additionally queued on every open [`ResolutionFeed`].
pub struct InProcessNotifier {
    sender: broadcast::Sender<SubmissionEvent>,
    resolution_feeds: Mutex<Vec<mpsc::UnboundedSender<SubmissionEvent>>>,
}

impl InProcessNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            resolution_feeds: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, topics: Topics) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            topics,
            missed: 0,
        }
    }

    /// Lossless queue of every resolution published from now on.
    pub fn subscribe_resolutions(&self) -> Result<ResolutionFeed, NotifyError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds()?.push(sender);
        Ok(ResolutionFeed { receiver })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn resolution_feed_count(&self) -> usize {
        self.feeds()
            .map(|feeds| feeds.iter().filter(|feed| !feed.is_closed()).count())
            .unwrap_or(0)
    }

    fn feeds(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SubmissionEvent>>>, NotifyError>
    {
        self.resolution_feeds
            .lock()
            .map_err(|_| NotifyError::Transport("resolution feed lock poisoned".to_string()))
    }
}

impl Default for InProcessNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier for InProcessNotifier {
    fn publish(&self, event: SubmissionEvent) -> Result<(), NotifyError> {
        trace!(kind = event.kind(), submission_id = %event.submission_id(), "publishing event");
        if matches!(event, SubmissionEvent::SubmissionResolved { .. }) {
            // A failed send means the feed was dropped.
            self.feeds()?.retain(|feed| feed.send(event.clone()).is_ok());
        }
        // No receivers is not a failure; nobody is watching yet.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Filtered view over the broadcast ring for one observer.
pub struct Subscription {
    receiver: broadcast::Receiver<SubmissionEvent>,
    topics: Topics,
    missed: u64,
}

impl Subscription {
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Events dropped because this subscriber fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Next matching event, or `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<SubmissionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.topics.matches(&event.submission_id()) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_next(&mut self) -> Option<SubmissionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.topics.matches(&event.submission_id()) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        self.missed += skipped;
        warn!(skipped, "subscriber lagged; oldest events dropped");
    }
}

/// Every resolution published after [`InProcessNotifier::subscribe_resolutions`].
pub struct ResolutionFeed {
    receiver: mpsc::UnboundedReceiver<SubmissionEvent>,
}

impl ResolutionFeed {
    /// Next resolution, or `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<SubmissionEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<SubmissionEvent> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally_changed(id: SubmissionId, votes_for: u64) -> SubmissionEvent {
        SubmissionEvent::TallyChanged {
            submission_id: id,
            status: SubmissionStatus::Pending,
            revision: votes_for,
            snapshot: TallySnapshot {
                votes_for,
                votes_against: 0,
                total_votes: votes_for,
                approval_percentage: 100.0,
                average_confidence: 3.0,
            },
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topics() {
        let notifier = InProcessNotifier::new();
        let watched = SubmissionId::generate();
        let other = SubmissionId::generate();
        let mut subscription = notifier.subscribe(Topics::one(watched));

        notifier
            .publish(tally_changed(other, 1))
            .expect("publish succeeds");
        notifier
            .publish(tally_changed(watched, 2))
            .expect("publish succeeds");

        let event = subscription.recv().await.expect("event delivered");
        assert_eq!(event.submission_id(), watched);
        assert_eq!(event.snapshot().votes_for, 2);
        assert!(subscription.try_next().is_none());
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let notifier = InProcessNotifier::new();
        assert_eq!(notifier.subscriber_count(), 0);
        notifier
            .publish(tally_changed(SubmissionId::generate(), 1))
            .expect("publish succeeds");
    }

    #[test]
    fn slow_subscriber_drops_oldest_and_converges_on_latest() {
        let notifier = InProcessNotifier::with_capacity(2);
        let id = SubmissionId::generate();
        let mut slow = notifier.subscribe(Topics::All);

        for votes in 1..=5 {
            notifier
                .publish(tally_changed(id, votes))
                .expect("publish never blocks");
        }

        let mut last = None;
        while let Some(event) = slow.try_next() {
            last = Some(event);
        }

        assert_eq!(slow.missed(), 3);
        assert_eq!(last.expect("latest survives").snapshot().votes_for, 5);
    }

    #[test]
    fn resolution_feed_keeps_resolutions_a_lagging_ring_drops() {
        let notifier = InProcessNotifier::with_capacity(2);
        let resolved = SubmissionId::generate();
        let busy = SubmissionId::generate();
        let mut ring = notifier.subscribe(Topics::All);
        let mut feed = notifier
            .subscribe_resolutions()
            .expect("feed registers");

        notifier
            .publish(SubmissionEvent::SubmissionResolved {
                submission_id: resolved,
                final_status: SubmissionStatus::Approved,
                snapshot: TallySnapshot::default(),
                occurred_at: Utc::now(),
            })
            .expect("publish succeeds");
        for votes in 1..=4 {
            notifier
                .publish(tally_changed(busy, votes))
                .expect("publish succeeds");
        }

        let mut ring_kinds = Vec::new();
        while let Some(event) = ring.try_next() {
            ring_kinds.push(event.kind());
        }
        assert_eq!(ring.missed(), 3);
        assert!(!ring_kinds.contains(&"submission_resolved"));

        let event = feed.try_next().expect("resolution kept");
        assert_eq!(event.submission_id(), resolved);
        assert!(feed.try_next().is_none(), "tally events stay off the feed");
    }

    #[test]
    fn dropped_feeds_are_pruned_on_publish() {
        let notifier = InProcessNotifier::new();
        let feed = notifier
            .subscribe_resolutions()
            .expect("feed registers");
        assert_eq!(notifier.resolution_feed_count(), 1);
        drop(feed);

        notifier
            .publish(SubmissionEvent::SubmissionResolved {
                submission_id: SubmissionId::generate(),
                final_status: SubmissionStatus::Rejected,
                snapshot: TallySnapshot::default(),
                occurred_at: Utc::now(),
            })
            .expect("publish succeeds");
        assert_eq!(notifier.resolution_feed_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let id = SubmissionId::generate();
        let value = serde_json::to_value(tally_changed(id, 1)).expect("serializes");
        assert_eq!(value["type"], "tally_changed");
        assert_eq!(value["submission_id"], id.to_string());
        assert_eq!(value["snapshot"]["total_votes"], 1);
    }
}
