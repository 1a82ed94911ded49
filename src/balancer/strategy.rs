// Load-balancing strategy seam.
//
// Host selection is delegated entirely to strategy implementations; the
// balancer core only instantiates one strategy per (service, scheme) via the
// registered factories and keeps them in sync with cluster configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::clients::TrackerClient;

/// A per-(service, scheme) host selector.
pub trait LoadBalancerStrategy: Send + Sync {
    /// The strategy name this instance was registered under.
    fn name(&self) -> &str;

    /// Pick a tracker client for a request. `key` carries the routing key
    /// for partitioned traffic, when the caller has one.
    fn choose(
        &self,
        trackers: &[Arc<TrackerClient>],
        key: Option<&str>,
    ) -> Option<Arc<TrackerClient>>;
}

/// Produces strategies for one strategy name. Each strategy receives its own
/// copy of the service's strategy properties. Factories are immutable for
/// the engine's lifetime.
pub trait StrategyFactory: Send + Sync {
    fn new_strategy(
        &self,
        service_name: &str,
        properties: HashMap<String, String>,
    ) -> Arc<dyn LoadBalancerStrategy>;
}

/// A (scheme, strategy) pair in the cluster's priority order.
#[derive(Clone)]
pub struct SchemeStrategyPair {
    pub scheme: String,
    pub strategy: Arc<dyn LoadBalancerStrategy>,
}

impl fmt::Debug for SchemeStrategyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeStrategyPair")
            .field("scheme", &self.scheme)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
