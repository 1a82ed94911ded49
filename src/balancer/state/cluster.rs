// Cluster reconciliation.
//
// Cluster configuration owns the transport-client lifecycle: each put builds
// a fresh frozen scheme-to-client map, publishes it atomically, rebuilds the
// cluster's tracker map against it, retires the displaced clients
// asynchronously, and fans out a strategy refresh to every service hosted on
// the cluster.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::balancer::bus::PropertyEventSubscriber;
use crate::balancer::clients::{TrackerClient, TransportClient};
use crate::balancer::properties::{
    ClusterInfoItem, ClusterProperties, PartitionData, PartitionId, Uri,
};
use crate::balancer::waiters::{PropertyKind, SubscriberSupport};

use super::CoreState;

pub(crate) struct ClusterSubscriber {
    core: Arc<CoreState>,
    support: SubscriberSupport,
}

impl ClusterSubscriber {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            support: SubscriberSupport::new(PropertyKind::Cluster),
        }
    }

    pub fn support(&self) -> &SubscriberSupport {
        &self.support
    }
}

impl PropertyEventSubscriber<ClusterProperties> for ClusterSubscriber {
    fn on_initialize(&self, name: &str, value: Option<Arc<ClusterProperties>>) {
        self.core.apply_cluster_properties(name, value);
        self.support.complete_initialization(name);
    }

    fn on_add(&self, name: &str, value: Option<Arc<ClusterProperties>>) {
        self.core.apply_cluster_properties(name, value);
    }

    fn on_remove(&self, name: &str) {
        self.core.drop_cluster_index(name);
    }
}

impl CoreState {
    /// Apply cluster configuration. A `None` value stores the known-absent
    /// sentinel and rebuilds nothing.
    pub(crate) fn apply_cluster_properties(
        &self,
        cluster_name: &str,
        value: Option<Arc<ClusterProperties>>,
    ) {
        let Some(props) = value else {
            debug!(cluster = %cluster_name, "cluster properties are known absent");
            self.cluster_index.insert(
                cluster_name.to_string(),
                ClusterInfoItem::new(self.versioned(None), None),
            );
            return;
        };

        let accessor = self
            .partition_factory
            .new_accessor(props.partition_properties());
        self.cluster_index.insert(
            cluster_name.to_string(),
            ClusterInfoItem::new(self.versioned(Some(props.clone())), Some(accessor)),
        );

        // One transport client per prioritized scheme with a registered
        // factory; unknown schemes degrade with a warning.
        let mut scheme_clients: HashMap<String, Arc<dyn TransportClient>> = HashMap::new();
        for scheme in props.prioritized_schemes() {
            let key = scheme.to_ascii_lowercase();
            if scheme_clients.contains_key(&key) {
                continue;
            }
            match self.client_factories.get(&key) {
                Some(factory) => {
                    scheme_clients.insert(key, factory.new_client(props.properties()));
                }
                None => {
                    warn!(
                        cluster = %cluster_name,
                        scheme = %scheme,
                        "no transport client factory for scheme"
                    );
                }
            }
        }
        let new_clients = Arc::new(scheme_clients);
        let old_clients = self
            .cluster_clients
            .insert(cluster_name.to_string(), new_clients);

        // Rebuild the tracker map from the URI index against the new
        // clients. The displaced tracker map needs no teardown; trackers
        // hold no resources.
        let rebuilt: Arc<DashMap<Uri, Arc<TrackerClient>>> = Arc::new(DashMap::new());
        let uri_props = self
            .uri_index
            .get(cluster_name)
            .and_then(|item| item.value().value().cloned());
        if let Some(uri_props) = uri_props {
            for uri in uri_props.uris() {
                let partition_data = uri_props.partition_data(uri).cloned().unwrap_or_default();
                if let Some(tracker) = self.build_tracker(cluster_name, uri, partition_data) {
                    rebuilt.insert(uri.clone(), tracker);
                }
            }
        }
        self.tracker_clients
            .insert(cluster_name.to_string(), rebuilt);

        // Retire displaced transport clients off the event loop; in-flight
        // requests complete.
        if let Some(old_clients) = old_clients {
            for (scheme, client) in old_clients.iter() {
                let scheme = scheme.clone();
                let client = client.clone();
                let cluster = cluster_name.to_string();
                tokio::spawn(async move {
                    match client.shutdown().await {
                        Ok(()) => {
                            debug!(cluster = %cluster, scheme = %scheme, "retired transport client")
                        }
                        Err(err) => warn!(
                            cluster = %cluster,
                            scheme = %scheme,
                            error = %err,
                            "transport client shutdown failed"
                        ),
                    }
                });
            }
        }

        // The scheme set may have changed; every service on this cluster
        // gets its strategies rebuilt.
        let services: Vec<String> = self
            .services_per_cluster
            .get(cluster_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for service_name in services {
            let service_props = self
                .service_index
                .get(&service_name)
                .and_then(|item| item.value().value().cloned());
            match service_props {
                Some(service_props) => self.refresh_service_strategies(&service_props),
                None => debug!(
                    service = %service_name,
                    "service on cluster has no properties; skipping strategy refresh"
                ),
            }
        }
    }

    /// Drop only the cluster index entry. Transport clients stay up until
    /// the next cluster put or engine shutdown; trackers are retired by URI
    /// events.
    pub(crate) fn drop_cluster_index(&self, cluster_name: &str) {
        debug!(cluster = %cluster_name, "dropping cluster index entry");
        self.cluster_index.remove(cluster_name);
    }

    /// Build a tracker for one endpoint against the cluster's current
    /// transport clients. Returns `None`, with a warning, when the cluster
    /// or the endpoint's scheme has no client.
    pub(crate) fn build_tracker(
        &self,
        cluster_name: &str,
        uri: &Uri,
        partition_data: HashMap<PartitionId, PartitionData>,
    ) -> Option<Arc<TrackerClient>> {
        let Some(clients) = self
            .cluster_clients
            .get(cluster_name)
            .map(|map| map.clone())
        else {
            warn!(
                cluster = %cluster_name,
                uri = %uri,
                "no transport clients for cluster; cannot track endpoint"
            );
            return None;
        };
        let Some(transport) = clients.get(uri.scheme()).cloned() else {
            warn!(
                cluster = %cluster_name,
                uri = %uri,
                scheme = %uri.scheme(),
                "no transport client for endpoint scheme"
            );
            return None;
        };
        Some(Arc::new(TrackerClient::new(
            uri.clone(),
            partition_data,
            transport,
        )))
    }
}
