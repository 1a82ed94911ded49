// Partition accessors.
//
// A partition accessor maps a routing key to a partition id and is derived
// from a cluster's partition properties whenever cluster configuration is
// applied. The default factory covers the shipped partitioning schemes;
// callers may install their own factory to support more.

use std::sync::Arc;

use crate::error::{BalancerError, Result};

use super::properties::{HashAlgorithm, PartitionId, PartitionProperties};

/// Partition id used by unpartitioned clusters.
pub const DEFAULT_PARTITION_ID: PartitionId = 0;

/// Maps a routing key to a partition id.
pub trait PartitionAccessor: Send + Sync {
    fn partition_id(&self, key: &str) -> Result<PartitionId>;

    fn partition_count(&self) -> u64;
}

/// Turns partition properties into an accessor. Pure derivation; invoked on
/// the event loop whenever cluster properties are applied.
pub trait PartitionAccessorFactory: Send + Sync {
    fn new_accessor(&self, properties: &PartitionProperties) -> Arc<dyn PartitionAccessor>;
}

/// Factory for the shipped partitioning schemes: none, numeric ranges, and
/// hashing.
pub struct DefaultPartitionAccessorFactory;

impl PartitionAccessorFactory for DefaultPartitionAccessorFactory {
    fn new_accessor(&self, properties: &PartitionProperties) -> Arc<dyn PartitionAccessor> {
        match properties {
            PartitionProperties::Null => Arc::new(SinglePartitionAccessor),
            PartitionProperties::Range {
                key_range_start,
                partition_size,
                partition_count,
            } => Arc::new(RangePartitionAccessor {
                key_range_start: *key_range_start,
                partition_size: *partition_size,
                partition_count: *partition_count,
            }),
            PartitionProperties::Hash {
                partition_count,
                algorithm,
            } => Arc::new(HashPartitionAccessor {
                partition_count: *partition_count,
                algorithm: *algorithm,
            }),
        }
    }
}

/// Unpartitioned cluster: every key lands on partition 0.
struct SinglePartitionAccessor;

impl PartitionAccessor for SinglePartitionAccessor {
    fn partition_id(&self, _key: &str) -> Result<PartitionId> {
        Ok(DEFAULT_PARTITION_ID)
    }

    fn partition_count(&self) -> u64 {
        1
    }
}

/// Contiguous numeric key ranges of `partition_size` keys each.
struct RangePartitionAccessor {
    key_range_start: u64,
    partition_size: u64,
    partition_count: u64,
}

impl PartitionAccessor for RangePartitionAccessor {
    fn partition_id(&self, key: &str) -> Result<PartitionId> {
        let numeric: u64 = key
            .parse()
            .map_err(|_| BalancerError::Partition(format!("non-numeric range key: {key}")))?;
        if self.partition_size == 0 {
            return Err(BalancerError::Partition(
                "partition size must be non-zero".to_string(),
            ));
        }
        if numeric < self.key_range_start {
            return Err(BalancerError::Partition(format!(
                "key {numeric} below range start {}",
                self.key_range_start
            )));
        }
        let partition = (numeric - self.key_range_start) / self.partition_size;
        if partition >= self.partition_count {
            return Err(BalancerError::Partition(format!(
                "key {numeric} beyond the last partition"
            )));
        }
        Ok(partition)
    }

    fn partition_count(&self) -> u64 {
        self.partition_count
    }
}

/// Keys hashed onto a fixed number of buckets.
struct HashPartitionAccessor {
    partition_count: u64,
    algorithm: HashAlgorithm,
}

impl PartitionAccessor for HashPartitionAccessor {
    fn partition_id(&self, key: &str) -> Result<PartitionId> {
        if self.partition_count == 0 {
            return Err(BalancerError::Partition(
                "partition count must be non-zero".to_string(),
            ));
        }
        match self.algorithm {
            HashAlgorithm::Modulo => {
                let numeric: u64 = key.parse().map_err(|_| {
                    BalancerError::Partition(format!("non-numeric modulo key: {key}"))
                })?;
                Ok(numeric % self.partition_count)
            }
            HashAlgorithm::Fnv1a => Ok(fnv1a(key.as_bytes()) % self.partition_count),
        }
    }

    fn partition_count(&self) -> u64 {
        self.partition_count
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
