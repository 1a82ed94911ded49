// Switchyard - client-side service load balancer
// Core library module

pub mod balancer;
pub mod error;

pub use error::{BalancerError, Result};

pub use balancer::{
    BalancerState, ClusterProperties, LoadBalancerStateListener, LoadBalancerStrategy,
    PropertyEventBus, PropertyEventLoop, ServiceProperties, TrackerClient, TransportClient,
    Uri, UriProperties,
};
