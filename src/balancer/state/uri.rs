// URI reconciliation.
//
// URI events drive tracker-client lifecycle: endpoints that appear get a
// tracker built against the cluster's current transport clients, endpoints
// that disappear lose theirs. Transport clients are never touched here; a
// tracker is a reference, not an owner.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::balancer::bus::PropertyEventSubscriber;
use crate::balancer::properties::UriProperties;
use crate::balancer::waiters::{PropertyKind, SubscriberSupport};

use super::CoreState;

pub(crate) struct UriSubscriber {
    core: Arc<CoreState>,
    support: SubscriberSupport,
}

impl UriSubscriber {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            support: SubscriberSupport::new(PropertyKind::Uri),
        }
    }

    pub fn support(&self) -> &SubscriberSupport {
        &self.support
    }
}

impl PropertyEventSubscriber<UriProperties> for UriSubscriber {
    fn on_initialize(&self, name: &str, value: Option<Arc<UriProperties>>) {
        self.core.apply_uri_properties(name, value);
        self.support.complete_initialization(name);
    }

    fn on_add(&self, name: &str, value: Option<Arc<UriProperties>>) {
        self.core.apply_uri_properties(name, value);
    }

    fn on_remove(&self, name: &str) {
        self.core.drop_uri_index(name);
    }
}

impl CoreState {
    /// Apply a cluster's URI properties: build trackers for new endpoints,
    /// replace the index entry, drop trackers for departed endpoints. A
    /// `None` value clears the cluster's tracker map entirely.
    pub(crate) fn apply_uri_properties(
        &self,
        cluster_name: &str,
        value: Option<Arc<UriProperties>>,
    ) {
        match value {
            Some(props) => {
                let trackers = self
                    .tracker_clients
                    .entry(cluster_name.to_string())
                    .or_default()
                    .clone();

                for uri in props.uris() {
                    if trackers.contains_key(uri) {
                        continue;
                    }
                    let partition_data =
                        props.partition_data(uri).cloned().unwrap_or_default();
                    if let Some(tracker) = self.build_tracker(cluster_name, uri, partition_data) {
                        debug!(cluster = %cluster_name, uri = %uri, "tracking new endpoint");
                        trackers.insert(uri.clone(), tracker.clone());
                        self.notify_client_added(cluster_name, &tracker);
                    }
                }

                self.uri_index
                    .insert(cluster_name.to_string(), self.versioned(Some(props.clone())));

                let departed: Vec<_> = trackers
                    .iter()
                    .filter(|entry| !props.contains_uri(entry.key()))
                    .map(|entry| entry.key().clone())
                    .collect();
                for uri in departed {
                    if let Some((_, tracker)) = trackers.remove(&uri) {
                        debug!(cluster = %cluster_name, uri = %uri, "endpoint departed");
                        self.notify_client_removed(cluster_name, &tracker);
                    }
                }
            }
            None => {
                warn!(cluster = %cluster_name, "uri properties are absent; clearing trackers");
                self.uri_index
                    .insert(cluster_name.to_string(), self.versioned(None));
                if let Some((_, trackers)) = self.tracker_clients.remove(cluster_name) {
                    for entry in trackers.iter() {
                        self.notify_client_removed(cluster_name, entry.value());
                    }
                }
            }
        }
    }

    /// Drop only the URI index entry. Tracker lifecycle is driven by URI
    /// add/remove payloads, not by the property vanishing.
    pub(crate) fn drop_uri_index(&self, cluster_name: &str) {
        debug!(cluster = %cluster_name, "dropping uri index entry");
        self.uri_index.remove(cluster_name);
    }
}
