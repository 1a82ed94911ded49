// Discovery property model for the balancer core.
//
// These are the authoritative inputs streamed from the discovery backend:
// endpoint URIs per cluster, cluster transport configuration, and service
// routing configuration. Stored values are wrapped in versioned items so
// readers can distinguish "never heard of" from "known absent".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BalancerError, Result};

use super::partition::PartitionAccessor;

/// Identifier of a partition within a cluster.
pub type PartitionId = u64;

// ============================================================================
// Endpoint URIs
// ============================================================================

/// A parsed endpoint URI.
///
/// The scheme is lower-cased at parse time; scheme lookups against transport
/// client maps are therefore case-insensitive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri {
    raw: String,
    scheme: String,
    authority: String,
}

impl Uri {
    /// Parse a URI of the form `scheme://authority[/path]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| BalancerError::InvalidUri(raw.to_string()))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(BalancerError::InvalidUri(raw.to_string()));
        }
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        if authority.is_empty() {
            return Err(BalancerError::InvalidUri(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
        })
    }

    /// The URI scheme, already lower-cased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The `host:port` part.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The full string form as published by discovery.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for Uri {
    type Error = BalancerError;

    fn try_from(raw: String) -> Result<Self> {
        Uri::parse(&raw)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.raw
    }
}

/// Per-partition weight assigned to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionData {
    pub weight: f64,
}

impl PartitionData {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

/// The live endpoint set of a cluster, with per-endpoint partition weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriProperties {
    cluster_name: String,
    partition_desc: HashMap<Uri, HashMap<PartitionId, PartitionData>>,
}

impl UriProperties {
    pub fn new(
        cluster_name: impl Into<String>,
        partition_desc: HashMap<Uri, HashMap<PartitionId, PartitionData>>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            partition_desc,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Iterate the live endpoint URIs.
    pub fn uris(&self) -> impl Iterator<Item = &Uri> {
        self.partition_desc.keys()
    }

    pub fn contains_uri(&self, uri: &Uri) -> bool {
        self.partition_desc.contains_key(uri)
    }

    /// Partition weights for one endpoint.
    pub fn partition_data(&self, uri: &Uri) -> Option<&HashMap<PartitionId, PartitionData>> {
        self.partition_desc.get(uri)
    }

    pub fn uri_count(&self) -> usize {
        self.partition_desc.len()
    }
}

// ============================================================================
// Cluster configuration
// ============================================================================

/// Hash function used by hash-based partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// Interpret the key as a decimal integer and take it modulo the
    /// partition count.
    Modulo,
    /// FNV-1a over the key bytes, modulo the partition count.
    Fnv1a,
}

/// How a cluster maps keys onto partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionProperties {
    /// The cluster is not partitioned; every key maps to partition 0.
    Null,
    /// Contiguous numeric key ranges of `partition_size` keys each,
    /// starting at `key_range_start`.
    Range {
        key_range_start: u64,
        partition_size: u64,
        partition_count: u64,
    },
    /// Keys are hashed onto `partition_count` buckets.
    Hash {
        partition_count: u64,
        algorithm: HashAlgorithm,
    },
}

/// Transport configuration of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProperties {
    cluster_name: String,
    /// Preferred scheme order; a transport client and a strategy are
    /// instantiated per scheme.
    prioritized_schemes: Vec<String>,
    /// Opaque properties handed to transport client factories.
    properties: HashMap<String, String>,
    partition_properties: PartitionProperties,
}

impl ClusterProperties {
    pub fn new(
        cluster_name: impl Into<String>,
        prioritized_schemes: Vec<String>,
        properties: HashMap<String, String>,
        partition_properties: PartitionProperties,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            prioritized_schemes,
            properties,
            partition_properties,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn prioritized_schemes(&self) -> &[String] {
        &self.prioritized_schemes
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn partition_properties(&self) -> &PartitionProperties {
        &self.partition_properties
    }
}

// ============================================================================
// Service configuration
// ============================================================================

/// Routing configuration of a service hosted on exactly one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProperties {
    service_name: String,
    cluster_name: String,
    path: String,
    /// Strategy names in fallback order; the first with a registered
    /// factory wins.
    prioritized_strategy_list: Vec<String>,
    /// Legacy single strategy name, consulted only when the list is empty.
    strategy_name: Option<String>,
    strategy_properties: HashMap<String, String>,
}

impl ServiceProperties {
    pub fn new(
        service_name: impl Into<String>,
        cluster_name: impl Into<String>,
        path: impl Into<String>,
        prioritized_strategy_list: Vec<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            path: path.into(),
            prioritized_strategy_list,
            strategy_name: None,
            strategy_properties: HashMap::new(),
        }
    }

    pub fn with_strategy_name(mut self, strategy_name: impl Into<String>) -> Self {
        self.strategy_name = Some(strategy_name.into());
        self
    }

    pub fn with_strategy_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.strategy_properties = properties;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn prioritized_strategy_list(&self) -> &[String] {
        &self.prioritized_strategy_list
    }

    pub fn strategy_name(&self) -> Option<&str> {
        self.strategy_name.as_deref()
    }

    pub fn strategy_properties(&self) -> &HashMap<String, String> {
        &self.strategy_properties
    }
}

// ============================================================================
// Versioned storage
// ============================================================================

/// A stored property value with its version and wall-clock stamp.
///
/// `value == None` means the property is known to be absent, which is
/// different from the name never having been heard of at all.
#[derive(Debug, Clone)]
pub struct PropertyItem<T> {
    value: Option<Arc<T>>,
    version: u64,
    stamp_ms: u64,
}

impl<T> PropertyItem<T> {
    pub fn new(value: Option<Arc<T>>, version: u64) -> Self {
        Self {
            value,
            version,
            stamp_ms: wall_clock_ms(),
        }
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stamp_ms(&self) -> u64 {
        self.stamp_ms
    }
}

/// Stored cluster configuration together with its derived partition accessor.
#[derive(Clone)]
pub struct ClusterInfoItem {
    item: PropertyItem<ClusterProperties>,
    partition_accessor: Option<Arc<dyn PartitionAccessor>>,
}

impl ClusterInfoItem {
    pub fn new(
        item: PropertyItem<ClusterProperties>,
        partition_accessor: Option<Arc<dyn PartitionAccessor>>,
    ) -> Self {
        Self {
            item,
            partition_accessor,
        }
    }

    pub fn item(&self) -> &PropertyItem<ClusterProperties> {
        &self.item
    }

    pub fn partition_accessor(&self) -> Option<&Arc<dyn PartitionAccessor>> {
        self.partition_accessor.as_ref()
    }
}

impl fmt::Debug for ClusterInfoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInfoItem")
            .field("item", &self.item)
            .field("has_partition_accessor", &self.partition_accessor.is_some())
            .finish()
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
