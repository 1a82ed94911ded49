// Balancer state: the reconciliation engine.
//
// Three property indexes (URI, cluster, service) are kept in sync with the
// discovery stream by one subscriber per property kind, all running on the
// single-writer event loop. Three derived caches hang off the indexes: one
// transport client per (cluster, scheme), one tracker client per
// (cluster, URI), one strategy per (service, scheme). Readers hit the
// concurrent maps directly and never contend with the event loop.
//
// Inner scheme-to-client and scheme-to-strategy maps are frozen snapshots:
// built on the event loop, published with one atomic map insert, never
// mutated in place. Per-cluster tracker maps are concurrent because URI
// churn mutates them incrementally.

mod cluster;
mod service;
mod uri;

pub(crate) use cluster::ClusterSubscriber;
pub(crate) use service::ServiceSubscriber;
pub(crate) use uri::UriSubscriber;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bus::{PropertyEventBus, PropertyEventSubscriber};
use super::clients::{TrackerClient, TransportClient, TransportClientFactory};
use super::event_loop::PropertyEventLoop;
use super::listener::LoadBalancerStateListener;
use super::partition::{PartitionAccessor, PartitionAccessorFactory};
use super::properties::{
    ClusterInfoItem, ClusterProperties, PropertyItem, ServiceProperties, UriProperties, Uri,
};
use super::strategy::{LoadBalancerStrategy, SchemeStrategyPair, StrategyFactory};
use super::waiters::{CountdownCallback, ListenCallback};

/// Shared indexes and derived caches. Mutated only on the event loop; read
/// from any thread.
pub(crate) struct CoreState {
    version: AtomicU64,

    pub(crate) uri_index: DashMap<String, PropertyItem<UriProperties>>,
    pub(crate) cluster_index: DashMap<String, ClusterInfoItem>,
    pub(crate) service_index: DashMap<String, PropertyItem<ServiceProperties>>,
    /// Reverse index: cluster name to the services hosted on it.
    pub(crate) services_per_cluster: DashMap<String, HashSet<String>>,

    /// One frozen scheme-to-client map per cluster.
    pub(crate) cluster_clients: DashMap<String, Arc<HashMap<String, Arc<dyn TransportClient>>>>,
    /// One concurrent per-URI tracker map per cluster.
    pub(crate) tracker_clients: DashMap<String, Arc<DashMap<Uri, Arc<TrackerClient>>>>,
    /// One frozen scheme-to-strategy map per service.
    pub(crate) service_strategies:
        DashMap<String, Arc<HashMap<String, Arc<dyn LoadBalancerStrategy>>>>,
    /// Memoized ordered (scheme, strategy) lists, invalidated on refresh.
    pub(crate) ordered_strategies: DashMap<String, Arc<Vec<SchemeStrategyPair>>>,

    pub(crate) client_factories: HashMap<String, Arc<dyn TransportClientFactory>>,
    pub(crate) strategy_factories: HashMap<String, Arc<dyn StrategyFactory>>,
    pub(crate) partition_factory: Arc<dyn PartitionAccessorFactory>,

    listeners: RwLock<Vec<Arc<dyn LoadBalancerStateListener>>>,
}

impl CoreState {
    fn new(
        client_factories: HashMap<String, Arc<dyn TransportClientFactory>>,
        strategy_factories: HashMap<String, Arc<dyn StrategyFactory>>,
        partition_factory: Arc<dyn PartitionAccessorFactory>,
    ) -> Self {
        Self {
            version: AtomicU64::new(0),
            uri_index: DashMap::new(),
            cluster_index: DashMap::new(),
            service_index: DashMap::new(),
            services_per_cluster: DashMap::new(),
            cluster_clients: DashMap::new(),
            tracker_clients: DashMap::new(),
            service_strategies: DashMap::new(),
            ordered_strategies: DashMap::new(),
            client_factories,
            strategy_factories,
            partition_factory,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn seed_version(&self, version: u64) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub(crate) fn versioned<T>(&self, value: Option<Arc<T>>) -> PropertyItem<T> {
        PropertyItem::new(value, self.next_version())
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn LoadBalancerStateListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn LoadBalancerStateListener>) {
        self.listeners
            .write()
            .retain(|candidate| !Arc::ptr_eq(candidate, listener));
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn notify_client_added(&self, cluster_name: &str, client: &Arc<TrackerClient>) {
        for listener in self.listeners.read().iter() {
            listener.on_client_added(cluster_name, client);
        }
    }

    pub(crate) fn notify_client_removed(&self, cluster_name: &str, client: &Arc<TrackerClient>) {
        for listener in self.listeners.read().iter() {
            listener.on_client_removed(cluster_name, client);
        }
    }

    pub(crate) fn notify_strategy_added(
        &self,
        service_name: &str,
        scheme: &str,
        strategy: &Arc<dyn LoadBalancerStrategy>,
    ) {
        for listener in self.listeners.read().iter() {
            listener.on_strategy_added(service_name, scheme, strategy);
        }
    }

    pub(crate) fn notify_strategy_removed(
        &self,
        service_name: &str,
        scheme: &str,
        strategy: &Arc<dyn LoadBalancerStrategy>,
    ) {
        for listener in self.listeners.read().iter() {
            listener.on_strategy_removed(service_name, scheme, strategy);
        }
    }
}

/// The client-side load balancer state engine.
///
/// Writes arrive as discovery events over the three property buses and are
/// serialized on the event loop; reads are lock-free lookups against the
/// concurrent maps. See the module documentation for the cache layout.
pub struct BalancerState {
    core: Arc<CoreState>,
    event_loop: PropertyEventLoop,
    uri_bus: PropertyEventBus<UriProperties>,
    cluster_bus: PropertyEventBus<ClusterProperties>,
    service_bus: PropertyEventBus<ServiceProperties>,
    uri_subscriber: Arc<UriSubscriber>,
    cluster_subscriber: Arc<ClusterSubscriber>,
    service_subscriber: Arc<ServiceSubscriber>,
}

impl BalancerState {
    /// Build an engine over the given buses and factories. Factory keys are
    /// lower-cased so scheme matching is case-insensitive.
    pub fn new(
        event_loop: PropertyEventLoop,
        uri_bus: PropertyEventBus<UriProperties>,
        cluster_bus: PropertyEventBus<ClusterProperties>,
        service_bus: PropertyEventBus<ServiceProperties>,
        client_factories: HashMap<String, Arc<dyn TransportClientFactory>>,
        strategy_factories: HashMap<String, Arc<dyn StrategyFactory>>,
        partition_factory: Arc<dyn PartitionAccessorFactory>,
    ) -> Self {
        let client_factories = client_factories
            .into_iter()
            .map(|(scheme, factory)| (scheme.to_ascii_lowercase(), factory))
            .collect();
        let core = Arc::new(CoreState::new(
            client_factories,
            strategy_factories,
            partition_factory,
        ));
        Self {
            uri_subscriber: Arc::new(UriSubscriber::new(core.clone())),
            cluster_subscriber: Arc::new(ClusterSubscriber::new(core.clone())),
            service_subscriber: Arc::new(ServiceSubscriber::new(core.clone())),
            core,
            event_loop,
            uri_bus,
            cluster_bus,
            service_bus,
        }
    }

    // ------------------------------------------------------------------
    // Listen handshakes
    // ------------------------------------------------------------------

    /// Arrange for `callback` to fire exactly once when the service's
    /// properties have initialized. The first call per service registers
    /// with the service bus.
    pub fn listen_to_service(&self, service_name: &str, callback: ListenCallback) {
        let bus = self.service_bus.clone();
        let subscriber: Arc<dyn PropertyEventSubscriber<ServiceProperties>> =
            self.service_subscriber.clone();
        self.service_subscriber
            .support()
            .ensure_listening(service_name, callback, move |name| {
                bus.register(&[name.to_string()], subscriber);
            });
    }

    /// Arrange for `callback` to fire exactly once when **both** the
    /// cluster's configuration and its URI set have initialized.
    pub fn listen_to_cluster(&self, cluster_name: &str, callback: ListenCallback) {
        let barrier = CountdownCallback::new(2, callback);

        let cluster_bus = self.cluster_bus.clone();
        let cluster_subscriber: Arc<dyn PropertyEventSubscriber<ClusterProperties>> =
            self.cluster_subscriber.clone();
        self.cluster_subscriber.support().ensure_listening(
            cluster_name,
            barrier.part(),
            move |name| {
                cluster_bus.register(&[name.to_string()], cluster_subscriber);
            },
        );

        let uri_bus = self.uri_bus.clone();
        let uri_subscriber: Arc<dyn PropertyEventSubscriber<UriProperties>> =
            self.uri_subscriber.clone();
        self.uri_subscriber.support().ensure_listening(
            cluster_name,
            barrier.part(),
            move |name| {
                uri_bus.register(&[name.to_string()], uri_subscriber);
            },
        );
    }

    // ------------------------------------------------------------------
    // Listener registry
    // ------------------------------------------------------------------

    pub fn register_listener(&self, listener: Arc<dyn LoadBalancerStateListener>) {
        let core = self.core.clone();
        self.event_loop.submit("register-listener", move || {
            core.add_listener(listener);
        });
    }

    pub fn unregister_listener(&self, listener: Arc<dyn LoadBalancerStateListener>) {
        let core = self.core.clone();
        self.event_loop.submit("unregister-listener", move || {
            core.remove_listener(&listener);
        });
    }

    // ------------------------------------------------------------------
    // Read API (lock-free against the event loop)
    // ------------------------------------------------------------------

    /// Tracker client for one endpoint of a cluster.
    pub fn get_tracker_client(&self, cluster_name: &str, uri: &Uri) -> Option<Arc<TrackerClient>> {
        let Some(trackers) = self
            .core
            .tracker_clients
            .get(cluster_name)
            .map(|map| map.clone())
        else {
            warn!(cluster = %cluster_name, "get_tracker_client: unknown cluster");
            return None;
        };
        trackers.get(uri).map(|tracker| tracker.clone())
    }

    /// Transport client for a cluster and scheme.
    pub fn get_transport_client(
        &self,
        cluster_name: &str,
        scheme: &str,
    ) -> Option<Arc<dyn TransportClient>> {
        let Some(clients) = self
            .core
            .cluster_clients
            .get(cluster_name)
            .map(|map| map.clone())
        else {
            warn!(cluster = %cluster_name, "get_transport_client: unknown cluster");
            return None;
        };
        clients.get(&scheme.to_ascii_lowercase()).cloned()
    }

    /// Strategy for a service and scheme.
    pub fn get_strategy(
        &self,
        service_name: &str,
        scheme: &str,
    ) -> Option<Arc<dyn LoadBalancerStrategy>> {
        let Some(strategies) = self
            .core
            .service_strategies
            .get(service_name)
            .map(|map| map.clone())
        else {
            warn!(service = %service_name, "get_strategy: unknown service");
            return None;
        };
        strategies.get(&scheme.to_ascii_lowercase()).cloned()
    }

    /// Ordered (scheme, strategy) pairs for a service, walking the supplied
    /// prioritized schemes and dropping those without a strategy. Memoized
    /// per service until the next strategy refresh.
    pub fn strategies_for_service(
        &self,
        service_name: &str,
        prioritized_schemes: &[String],
    ) -> Arc<Vec<SchemeStrategyPair>> {
        if let Some(cached) = self.core.ordered_strategies.get(service_name) {
            return cached.clone();
        }

        let snapshot = self
            .core
            .service_strategies
            .get(service_name)
            .map(|map| map.clone());
        let mut ordered = Vec::new();
        if let Some(strategies) = snapshot.as_ref() {
            for scheme in prioritized_schemes {
                let key = scheme.to_ascii_lowercase();
                if let Some(strategy) = strategies.get(&key) {
                    ordered.push(SchemeStrategyPair {
                        scheme: key,
                        strategy: strategy.clone(),
                    });
                }
            }
        }
        let ordered = Arc::new(ordered);

        // Publish the memo only if the strategy map was not replaced while
        // we computed; a racing refresh must not be shadowed by stale data.
        let current = self
            .core
            .service_strategies
            .get(service_name)
            .map(|map| map.clone());
        match (snapshot, current) {
            (Some(snapshot), Some(current)) if Arc::ptr_eq(&snapshot, &current) => {
                self.core
                    .ordered_strategies
                    .insert(service_name.to_string(), ordered.clone());
            }
            (None, None) => {
                self.core
                    .ordered_strategies
                    .insert(service_name.to_string(), ordered.clone());
            }
            _ => {}
        }
        ordered
    }

    /// Versioned URI properties of a cluster.
    pub fn get_uri_properties(&self, cluster_name: &str) -> Option<PropertyItem<UriProperties>> {
        self.core.uri_index.get(cluster_name).map(|item| item.clone())
    }

    /// Versioned cluster properties.
    pub fn get_cluster_properties(
        &self,
        cluster_name: &str,
    ) -> Option<PropertyItem<ClusterProperties>> {
        self.core
            .cluster_index
            .get(cluster_name)
            .map(|info| info.item().clone())
    }

    /// Partition accessor derived from the cluster's partition properties.
    pub fn get_partition_accessor(
        &self,
        cluster_name: &str,
    ) -> Option<Arc<dyn PartitionAccessor>> {
        self.core
            .cluster_index
            .get(cluster_name)
            .and_then(|info| info.partition_accessor().cloned())
    }

    /// Versioned service properties.
    pub fn get_service_properties(
        &self,
        service_name: &str,
    ) -> Option<PropertyItem<ServiceProperties>> {
        self.core
            .service_index
            .get(service_name)
            .map(|item| item.clone())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Shut down every distinct transport client across all clusters, then
    /// invoke `callback`. Writes submitted after this are not guarded
    /// against; they race the teardown.
    pub fn shutdown(&self, callback: impl FnOnce() + Send + 'static) {
        let core = self.core.clone();
        self.event_loop.submit("balancer-shutdown", move || {
            let mut seen = HashSet::new();
            let mut clients: Vec<Arc<dyn TransportClient>> = Vec::new();
            for entry in core.cluster_clients.iter() {
                for client in entry.value().values() {
                    let identity = Arc::as_ptr(client) as *const () as usize;
                    if seen.insert(identity) {
                        clients.push(client.clone());
                    }
                }
            }
            info!(clients = clients.len(), "shutting down transport clients");
            if clients.is_empty() {
                callback();
                return;
            }

            let shutdowns = clients.into_iter().map(|client| async move {
                if let Err(err) = client.shutdown().await {
                    warn!(error = %err, "transport client shutdown failed");
                } else {
                    debug!("transport client shut down");
                }
            });
            tokio::spawn(async move {
                join_all(shutdowns).await;
                callback();
            });
        });
    }

    // ------------------------------------------------------------------
    // Internal access for the observability surface
    // ------------------------------------------------------------------

    pub(crate) fn core(&self) -> &Arc<CoreState> {
        &self.core
    }

    pub(crate) fn event_loop(&self) -> &PropertyEventLoop {
        &self.event_loop
    }

    pub(crate) fn uri_subscriber(&self) -> &Arc<UriSubscriber> {
        &self.uri_subscriber
    }

    pub(crate) fn cluster_subscriber(&self) -> &Arc<ClusterSubscriber> {
        &self.cluster_subscriber
    }

    pub(crate) fn service_subscriber(&self) -> &Arc<ServiceSubscriber> {
        &self.service_subscriber
    }
}
