// Observability surface for the balancer state.

use serde::Serialize;

use super::state::BalancerState;

/// Point-in-time counters over the balancer state.
#[derive(Debug, Clone, Serialize)]
pub struct BalancerSummary {
    pub cluster_count: usize,
    pub uri_count: usize,
    pub service_count: usize,
    pub listener_count: usize,
    pub version: u64,
    pub uri_listen_count: u64,
    pub cluster_listen_count: u64,
    pub service_listen_count: u64,
    pub supported_schemes: Vec<String>,
    pub supported_strategies: Vec<String>,
}

impl BalancerState {
    /// Number of clusters the engine has heard about.
    pub fn cluster_count(&self) -> usize {
        self.core().cluster_index.len()
    }

    /// Total endpoints across all known URI properties.
    pub fn uri_count(&self) -> usize {
        self.core()
            .uri_index
            .iter()
            .map(|item| item.value().value().map_or(0, |props| props.uri_count()))
            .sum()
    }

    /// Number of services the engine has heard about.
    pub fn service_count(&self) -> usize {
        self.core().service_index.len()
    }

    /// Tracker clients currently held for one cluster.
    pub fn tracker_client_count(&self, cluster_name: &str) -> usize {
        self.core()
            .tracker_clients
            .get(cluster_name)
            .map_or(0, |trackers| trackers.len())
    }

    /// Listen requests received per property kind, in (uri, cluster,
    /// service) order.
    pub fn listen_counts(&self) -> (u64, u64, u64) {
        (
            self.uri_subscriber().support().listen_count(),
            self.cluster_subscriber().support().listen_count(),
            self.service_subscriber().support().listen_count(),
        )
    }

    /// Current value of the global version counter.
    pub fn version(&self) -> u64 {
        self.core().current_version()
    }

    /// Seed the monotonic version counter. Applied on the event loop so it
    /// serializes with in-flight reconciliation.
    pub fn set_version(&self, version: u64) {
        let core = self.core().clone();
        self.event_loop().submit("set-version", move || {
            core.seed_version(version);
        });
    }

    pub fn listener_count(&self) -> usize {
        self.core().listener_count()
    }

    /// Schemes with a registered transport client factory, sorted.
    pub fn supported_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.core().client_factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Strategy names with a registered factory, sorted.
    pub fn supported_strategies(&self) -> Vec<String> {
        let mut strategies: Vec<String> =
            self.core().strategy_factories.keys().cloned().collect();
        strategies.sort();
        strategies
    }

    pub fn summary(&self) -> BalancerSummary {
        let (uri_listen_count, cluster_listen_count, service_listen_count) = self.listen_counts();
        BalancerSummary {
            cluster_count: self.cluster_count(),
            uri_count: self.uri_count(),
            service_count: self.service_count(),
            listener_count: self.listener_count(),
            version: self.version(),
            uri_listen_count,
            cluster_listen_count,
            service_listen_count,
            supported_schemes: self.supported_schemes(),
            supported_strategies: self.supported_strategies(),
        }
    }
}
