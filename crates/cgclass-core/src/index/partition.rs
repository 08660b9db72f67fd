//! Partition index keyed by partition name

use std::collections::HashMap;
use tracing::debug;

use super::reserve_map;
use crate::error::Result;
use crate::types::Partition;

/// Partition name -> partition, last insert wins
#[derive(Debug)]
pub struct PartitionIndex {
    partitions: HashMap<String, Partition>,
}

impl PartitionIndex {
    pub fn new() -> Result<Self> {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            partitions: reserve_map("partition", capacity)?,
        })
    }

    pub fn insert(&mut self, partition: Partition) -> Option<Partition> {
        let replaced = self.partitions.insert(partition.name.clone(), partition);
        if let Some(old) = &replaced {
            debug!("Partition {} redefined", old.name);
        }
        replaced
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.partitions.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }
}
