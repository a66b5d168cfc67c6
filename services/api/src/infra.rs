use athlete_vote::config::VotingConfig;
use athlete_vote::voting::{Clock, InMemoryVotingStore, InProcessNotifier, VotingService};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;

pub(crate) type Service = VotingService<InMemoryVotingStore, InProcessNotifier>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) notifier: Arc<InProcessNotifier>,
    /// Flips to `true` when the server is draining; open event streams end on it.
    pub(crate) shutdown: watch::Receiver<bool>,
}

pub(crate) fn build_service(
    config: &VotingConfig,
    notifier: Arc<InProcessNotifier>,
    clock: Arc<dyn Clock>,
) -> Arc<Service> {
    Arc::new(
        VotingService::with_clock(
            Arc::new(InMemoryVotingStore::default()),
            notifier,
            config.policy(),
            clock,
        )
        .with_sweep_batch(config.sweep_batch),
    )
}
