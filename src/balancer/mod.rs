// Client-side service load balancer core.
//
// A client application asks "give me a client for service S" and gets back
// live, per-endpoint routing state: transport clients per (cluster, scheme),
// tracker clients per (cluster, URI), and a strategy per (service, scheme),
// all kept in sync with an out-of-band discovery stream.
//
// # Architecture
//
// The core is a reconciliation engine behind three property event buses:
//
// - **Event loop** (`event_loop`): a single-consumer task queue; every state
//   mutation runs here, serialized. Readers bypass it entirely.
// - **Property event bus** (`bus`): one per property kind (URI, cluster,
//   service), multiplexing a publisher's initialize/add/remove events to
//   per-name subscribers.
// - **State** (`state`): the three property indexes, the derived caches, and
//   the cross-index fan-out that keeps them consistent.
// - **Waiters** (`waiters`): the listen-and-wait handshake that lets callers
//   block until a property's first value has arrived.
//
// Pluggable seams: transport client factories per scheme (`clients`),
// strategy factories per strategy name (`strategy`), and the partition
// accessor factory (`partition`).

pub mod bus;
pub mod clients;
pub mod event_loop;
pub mod listener;
pub mod partition;
pub mod properties;
pub mod state;
pub mod stats;
pub mod strategy;
pub mod waiters;

pub use bus::{PropertyEventBus, PropertyEventSubscriber, PropertyPublisher};
pub use clients::{
    TrackerClient, TransportClient, TransportClientFactory, TransportRequest, TransportResponse,
};
pub use event_loop::PropertyEventLoop;
pub use listener::LoadBalancerStateListener;
pub use partition::{
    DefaultPartitionAccessorFactory, PartitionAccessor, PartitionAccessorFactory,
    DEFAULT_PARTITION_ID,
};
pub use properties::{
    ClusterInfoItem, ClusterProperties, HashAlgorithm, PartitionData, PartitionId,
    PartitionProperties, PropertyItem, ServiceProperties, Uri, UriProperties,
};
pub use state::BalancerState;
pub use stats::BalancerSummary;
pub use strategy::{LoadBalancerStrategy, SchemeStrategyPair, StrategyFactory};
pub use waiters::{ListenCallback, PropertyKind, WaiterQueue};
