// State change observers.

use std::sync::Arc;

use super::clients::TrackerClient;
use super::strategy::LoadBalancerStrategy;

/// Observer notified as tracker clients and strategies come and go.
///
/// All notifications are invoked on the event loop. During a strategy
/// refresh, every removal for the displaced map is delivered before any
/// addition for the replacement map.
pub trait LoadBalancerStateListener: Send + Sync {
    fn on_client_added(&self, cluster_name: &str, client: &Arc<TrackerClient>);

    fn on_client_removed(&self, cluster_name: &str, client: &Arc<TrackerClient>);

    fn on_strategy_added(
        &self,
        service_name: &str,
        scheme: &str,
        strategy: &Arc<dyn LoadBalancerStrategy>,
    );

    fn on_strategy_removed(
        &self,
        service_name: &str,
        scheme: &str,
        strategy: &Arc<dyn LoadBalancerStrategy>,
    );
}
