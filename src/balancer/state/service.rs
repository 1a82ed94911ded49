// Service reconciliation and strategy refresh.
//
// Service configuration picks the strategy factory (first resolvable name in
// the prioritized list, legacy single name as fallback) and maintains the
// reverse cluster-to-services index that cluster reconciliation fans out
// through.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::balancer::bus::PropertyEventSubscriber;
use crate::balancer::properties::ServiceProperties;
use crate::balancer::strategy::{LoadBalancerStrategy, StrategyFactory};
use crate::balancer::waiters::{PropertyKind, SubscriberSupport};

use super::CoreState;

pub(crate) struct ServiceSubscriber {
    core: Arc<CoreState>,
    support: SubscriberSupport,
}

impl ServiceSubscriber {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            support: SubscriberSupport::new(PropertyKind::Service),
        }
    }

    pub fn support(&self) -> &SubscriberSupport {
        &self.support
    }
}

impl PropertyEventSubscriber<ServiceProperties> for ServiceSubscriber {
    fn on_initialize(&self, name: &str, value: Option<Arc<ServiceProperties>>) {
        self.core.apply_service_properties(name, value);
        self.support.complete_initialization(name);
    }

    fn on_add(&self, name: &str, value: Option<Arc<ServiceProperties>>) {
        self.core.apply_service_properties(name, value);
    }

    fn on_remove(&self, name: &str) {
        self.core.drop_service_index(name);
    }
}

impl CoreState {
    /// Apply service configuration: store the versioned item, refresh
    /// strategies, and keep the reverse cluster index exact (a service
    /// moving clusters leaves its old cluster's set).
    pub(crate) fn apply_service_properties(
        &self,
        service_name: &str,
        value: Option<Arc<ServiceProperties>>,
    ) {
        let old = self
            .service_index
            .insert(service_name.to_string(), self.versioned(value.clone()));
        let old_cluster = old
            .and_then(|item| item.value().cloned())
            .map(|props| props.cluster_name().to_string());

        match value {
            Some(props) => {
                self.refresh_service_strategies(&props);
                if let Some(old_cluster) = old_cluster.as_deref() {
                    if old_cluster != props.cluster_name() {
                        debug!(
                            service = %service_name,
                            from = %old_cluster,
                            to = %props.cluster_name(),
                            "service moved clusters"
                        );
                        self.remove_service_from_cluster(old_cluster, service_name);
                    }
                }
                self.services_per_cluster
                    .entry(props.cluster_name().to_string())
                    .or_default()
                    .insert(service_name.to_string());
            }
            None => {
                if let Some(old_cluster) = old_cluster.as_deref() {
                    self.remove_service_from_cluster(old_cluster, service_name);
                }
            }
        }
    }

    /// Drop the service index entry and its reverse-index membership.
    pub(crate) fn drop_service_index(&self, service_name: &str) {
        if let Some((_, item)) = self.service_index.remove(service_name) {
            if let Some(props) = item.value() {
                self.remove_service_from_cluster(props.cluster_name(), service_name);
            }
        }
    }

    fn remove_service_from_cluster(&self, cluster_name: &str, service_name: &str) {
        if let Some(mut set) = self.services_per_cluster.get_mut(cluster_name) {
            set.remove(service_name);
        }
    }

    /// Rebuild the service's scheme-to-strategy map from its cluster's
    /// prioritized schemes, replace it atomically, invalidate the ordered
    /// cache, and notify listeners: every removal for the displaced map
    /// before any addition for the replacement.
    pub(crate) fn refresh_service_strategies(&self, props: &ServiceProperties) {
        let service_name = props.service_name();
        let factory = self.resolve_strategy_factory(props);
        if factory.is_none() {
            warn!(
                service = %service_name,
                strategies = ?props.prioritized_strategy_list(),
                "no resolvable strategy factory; service will have no strategies"
            );
        }

        let mut scheme_strategies: HashMap<String, Arc<dyn LoadBalancerStrategy>> = HashMap::new();
        if let Some(factory) = factory {
            let cluster_props = self
                .cluster_index
                .get(props.cluster_name())
                .and_then(|info| info.item().value().cloned());
            match cluster_props {
                Some(cluster_props) => {
                    for scheme in cluster_props.prioritized_schemes() {
                        let key = scheme.to_ascii_lowercase();
                        // Each strategy owns its own copy of the properties;
                        // later mutations must not alias across instances.
                        scheme_strategies.entry(key).or_insert_with(|| {
                            factory.new_strategy(service_name, props.strategy_properties().clone())
                        });
                    }
                }
                None => debug!(
                    service = %service_name,
                    cluster = %props.cluster_name(),
                    "cluster properties unknown; no strategies built"
                ),
            }
        }

        let new_strategies = Arc::new(scheme_strategies);
        let old_strategies = self
            .service_strategies
            .insert(service_name.to_string(), new_strategies.clone());
        self.ordered_strategies.remove(service_name);

        if let Some(old_strategies) = old_strategies {
            for (scheme, strategy) in old_strategies.iter() {
                self.notify_strategy_removed(service_name, scheme, strategy);
            }
        }
        if !new_strategies.is_empty() {
            for (scheme, strategy) in new_strategies.iter() {
                self.notify_strategy_added(service_name, scheme, strategy);
            }
        }
    }

    fn resolve_strategy_factory(
        &self,
        props: &ServiceProperties,
    ) -> Option<&Arc<dyn StrategyFactory>> {
        if !props.prioritized_strategy_list().is_empty() {
            props
                .prioritized_strategy_list()
                .iter()
                .find_map(|name| self.strategy_factories.get(name))
        } else {
            props
                .strategy_name()
                .and_then(|name| self.strategy_factories.get(name))
        }
    }
}
