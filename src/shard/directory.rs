use std::collections::HashSet;
use std::sync::Arc;

use crate::shard::client::ShardClient;
use crate::{FederationError, Result};

/// One backend shard and its position in the directory
#[derive(Clone)]
pub struct Partition {
    index: usize,
    client: Arc<dyn ShardClient>,
}

impl Partition {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub fn client(&self) -> Arc<dyn ShardClient> {
        Arc::clone(&self.client)
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("index", &self.index)
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

/// Fixed, ordered set of partitions. Read-only after construction.
#[derive(Debug)]
pub struct PartitionDirectory {
    partitions: Vec<Partition>,
}

impl PartitionDirectory {
    pub fn new(clients: Vec<Arc<dyn ShardClient>>) -> Result<Self> {
        if clients.is_empty() {
            return Err(FederationError::NoPartitions);
        }

        let mut seen = HashSet::new();
        for client in &clients {
            if !seen.insert(client.endpoint().to_string()) {
                return Err(FederationError::Config(format!(
                    "duplicate partition endpoint {}",
                    client.endpoint()
                )));
            }
        }

        let partitions = clients
            .into_iter()
            .enumerate()
            .map(|(index, client)| Partition { index, client })
            .collect();
        Ok(Self { partitions })
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Partition> {
        self.partitions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.endpoint().to_string()).collect()
    }
}
