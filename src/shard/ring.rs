use std::collections::BTreeMap;

use xxhash_rust::xxh32::xxh32;

use crate::{FederationError, Result};

/// Seed for every key and ring-point hash. Stored `partition_hash` values
/// depend on it, so it must never change.
const HASH_SEED: u32 = 0;

/// Stable 32-bit key hash (XXH32, seed 0).
pub fn key_hash(key: &str) -> u32 {
    xxh32(key.as_bytes(), HASH_SEED)
}

/// Consistent-hashing ring.
/// Each partition owns `virtual_points` positions derived from its endpoint
/// name, so a topology change only remaps the ranges of the partition that
/// joined or left. Immutable once built.
#[derive(Clone, Debug)]
pub struct HashRing {
    points: BTreeMap<u32, usize>,
    partitions: usize,
    virtual_points: usize,
}

impl HashRing {
    pub fn new<S: AsRef<str>>(endpoints: &[S], virtual_points: usize) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(FederationError::NoPartitions);
        }
        if virtual_points == 0 {
            return Err(FederationError::Config("virtual_points must be positive".into()));
        }

        let mut points = BTreeMap::new();
        for (index, endpoint) in endpoints.iter().enumerate() {
            for vnode in 0..virtual_points {
                let label = format!("{}#{}", endpoint.as_ref(), vnode);
                // First claimant keeps a colliding point
                points.entry(key_hash(&label)).or_insert(index);
            }
        }

        Ok(Self {
            points,
            partitions: endpoints.len(),
            virtual_points,
        })
    }

    /// Rebuild the ring for a new partition set, keeping the point density
    pub fn with_partitions<S: AsRef<str>>(&self, endpoints: &[S]) -> Result<Self> {
        Self::new(endpoints, self.virtual_points)
    }

    /// Partition owning the first ring point at or clockwise after `hash`
    pub fn locate(&self, hash: u32) -> usize {
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, &index)| index)
            .unwrap_or(0)
    }

    /// Hash a key and locate its partition
    pub fn route_key(&self, key: &str) -> (u32, usize) {
        let hash = key_hash(key);
        (hash, self.locate(hash))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    pub fn virtual_points(&self) -> usize {
        self.virtual_points
    }

    /// Fraction of the hash space owned by each partition
    pub fn ownership(&self) -> Vec<f64> {
        let mut owned = vec![0u64; self.partitions];
        let space = 1u64 << 32;
        let mut previous: Option<u32> = None;
        for (&point, &index) in &self.points {
            // (previous, point] belongs to this point's owner
            let span = match previous {
                Some(prev) => (point - prev) as u64,
                None => 0,
            };
            owned[index] += span;
            previous = Some(point);
        }
        // The wrap-around arc from the last point to the first
        if let (Some((&first, &first_owner)), Some((&last, _))) =
            (self.points.iter().next(), self.points.iter().next_back())
        {
            owned[first_owner] += space - (last as u64) + (first as u64);
        }
        owned.iter().map(|&n| n as f64 / space as f64).collect()
    }
}
