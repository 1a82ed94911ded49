// Transport and tracker clients.
//
// A transport client is a real per-(cluster, scheme) network client and the
// only heavy resource the balancer owns: created on the event loop, replaced
// atomically, retired with an asynchronous shutdown. A tracker client is a
// cheap wrapper pairing one endpoint URI and its partition weights with the
// transport client serving its scheme; it holds no I/O resources.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

use super::properties::{PartitionData, PartitionId, Uri};

/// A request handed to a transport client by the RPC layer.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub uri: Uri,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl TransportRequest {
    pub fn new(uri: Uri, method: impl Into<String>, body: Bytes) -> Self {
        Self {
            uri,
            method: method.into(),
            headers: HashMap::new(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// A network-capable client for one (cluster, scheme) pair.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Dispatch a request to the endpoint named in it.
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Stop accepting new requests and release resources. In-flight requests
    /// complete.
    async fn shutdown(&self) -> Result<()>;
}

/// Produces transport clients for one scheme, parameterized by the cluster's
/// opaque properties. Factories are immutable for the engine's lifetime.
pub trait TransportClientFactory: Send + Sync {
    fn new_client(&self, cluster_properties: &HashMap<String, String>) -> Arc<dyn TransportClient>;
}

/// Pairs one endpoint URI and its partition weights with the transport
/// client serving its scheme.
///
/// Tracker clients are references, not owners, into the per-cluster
/// transport map: dropping a tracker never shuts its transport client down.
pub struct TrackerClient {
    uri: Uri,
    partition_data: HashMap<PartitionId, PartitionData>,
    transport: Arc<dyn TransportClient>,
}

impl TrackerClient {
    pub fn new(
        uri: Uri,
        partition_data: HashMap<PartitionId, PartitionData>,
        transport: Arc<dyn TransportClient>,
    ) -> Self {
        Self {
            uri,
            partition_data,
            transport,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn partition_data(&self) -> &HashMap<PartitionId, PartitionData> {
        &self.partition_data
    }

    /// Weight of this endpoint in the given partition, if it serves it.
    pub fn partition_weight(&self, partition: PartitionId) -> Option<f64> {
        self.partition_data.get(&partition).map(|data| data.weight)
    }

    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    /// Whether this tracker routes through the given transport client.
    pub fn shares_transport(&self, transport: &Arc<dyn TransportClient>) -> bool {
        Arc::ptr_eq(&self.transport, transport)
    }

    /// Dispatch through the wrapped transport client.
    pub async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.transport.request(request).await
    }
}

impl fmt::Debug for TrackerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerClient")
            .field("uri", &self.uri)
            .field("partitions", &self.partition_data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl TransportClient for EchoClient {
        async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
            Ok(TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: request.body,
            })
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tracker_routes_through_transport() {
        let uri = Uri::parse("http://h1:80").unwrap();
        let transport: Arc<dyn TransportClient> = Arc::new(EchoClient);
        let tracker = TrackerClient::new(
            uri.clone(),
            HashMap::from([(0u64, PartitionData::new(2.0))]),
            transport.clone(),
        );

        assert!(tracker.shares_transport(&transport));
        assert_eq!(tracker.partition_weight(0), Some(2.0));
        assert_eq!(tracker.partition_weight(1), None);

        let response = tracker
            .request(TransportRequest::new(uri, "GET", Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"hi"));
    }
}
