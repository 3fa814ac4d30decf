//! The known set of data partitions, their replica members, current leader
//! and follower address list.
//! Refreshed asynchronously from the master; readers never block on a
//! refresh since lookups only take a `DashMap` shard lock.

use dashmap::DashMap;
use cubefs_error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A replicated shard of the data plane. `leader_index` is the one mutable
/// field; it is updated opportunistically from successful replies (a
/// non-leader reply tells us who the real leader is) or from an explicit
/// probe, never by the directory proactively polling each partition.
#[derive(Debug)]
pub struct DataPartition {
    pub id: u64,
    /// Ordered replica addresses, index 0 is not necessarily the leader --
    /// `leader_index` is the authority on that.
    pub members: Vec<String>,
    leader_index: AtomicUsize,
    pub replica_count: usize,
}

impl DataPartition {
    pub fn new(id: u64, members: Vec<String>) -> Self {
        let replica_count = members.len();
        Self {
            id,
            members,
            leader_index: AtomicUsize::new(0),
            replica_count,
        }
    }

    pub fn leader_index(&self) -> usize {
        self.leader_index.load(Ordering::Acquire)
    }

    pub fn leader_addr(&self) -> Option<&str> {
        self.members.get(self.leader_index()).map(String::as_str)
    }

    pub fn member(&self, index: usize) -> Option<&str> {
        self.members.get(index % self.replica_count.max(1)).map(String::as_str)
    }

    pub fn set_leader_index(&self, index: usize) {
        self.leader_index.store(index % self.replica_count.max(1), Ordering::Release);
    }

    /// Comma-separated follower list excluding the current leader, in the
    /// form the wire protocol's `arg` bytes carry for chained replication
    /// ( "argument bytes (follower address list, comma-separated
    /// endpoints)").
    pub fn follower_address_string(&self) -> String {
        let leader = self.leader_index();
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != leader)
            .map(|(_, addr)| addr.clone())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Policy used by [`DataPartitionDirectory::select_for_write`] when more
/// than one partition has spare capacity.
#[derive(Debug, Clone, Copy, Default)]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
}

/// Process-wide (per mounted volume), shared among all writers and
/// readers. Reads (`get`, `select_for_write`) only touch `DashMap` shard
/// locks; `refresh` replaces the whole map under no coarser lock than
/// that, so concurrent lookups during a refresh see either the old or new
/// partition for a given id, never a torn read.
pub struct DataPartitionDirectory {
    partitions: DashMap<u64, Arc<DataPartition>>,
    unavailable: DashMap<u64, ()>,
    round_robin: AtomicUsize,
    policy: SelectionPolicy,
}

impl DataPartitionDirectory {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            partitions: DashMap::new(),
            unavailable: DashMap::new(),
            round_robin: AtomicUsize::new(0),
            policy,
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<DataPartition>> {
        self.partitions.get(&id).map(|e| e.clone())
    }

    /// Replaces the directory contents with a freshly fetched topology
    /// from the master. Partitions missing from `partitions` are dropped;
    /// any writer/reader still holding an `Arc` to a dropped partition
    /// keeps it alive until it closes.
    pub fn refresh(&self, partitions: Vec<DataPartition>) {
        let ids: Vec<u64> = partitions.iter().map(|p| p.id).collect();
        for partition in partitions {
            self.partitions.insert(partition.id, Arc::new(partition));
        }
        self.partitions.retain(|id, _| ids.contains(id));
        self.unavailable.retain(|id, _| ids.contains(id));
        debug!(count = self.partitions.len(), "refreshed data partition directory");
    }

    pub fn mark_unavailable(&self, id: u64) {
        self.unavailable.insert(id, ());
    }

    pub fn mark_available(&self, id: u64) {
        self.unavailable.remove(&id);
    }

    pub fn set_leader(&self, partition: &DataPartition, index: usize) {
        partition.set_leader_index(index);
    }

    /// Chooses a partition with spare write capacity, skipping anything
    /// marked unavailable. `RoundRobin` is the only policy implemented
    /// today; `Weighted` is left unresolved (see DESIGN.md) and is not
    /// needed until the master starts reporting per-partition utilization.
    pub fn select_for_write(&self) -> Result<Arc<DataPartition>> {
        let candidates: Vec<Arc<DataPartition>> = self
            .partitions
            .iter()
            .filter(|e| !self.unavailable.contains_key(e.key()))
            .map(|e| e.value().clone())
            .collect();
        if candidates.is_empty() {
            return Err(Error::NotFound);
        }
        match self.policy {
            SelectionPolicy::RoundRobin => {
                let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Ok(candidates[idx].clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl Default for DataPartitionDirectory {
    fn default() -> Self {
        Self::new(SelectionPolicy::RoundRobin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(id: u64) -> DataPartition {
        DataPartition::new(id, vec!["10.0.0.1:6000".into(), "10.0.0.2:6000".into(), "10.0.0.3:6000".into()])
    }

    #[test]
    fn select_for_write_round_robins() {
        let dir = DataPartitionDirectory::default();
        dir.refresh(vec![mk(1), mk(2)]);
        let first = dir.select_for_write().unwrap().id;
        let second = dir.select_for_write().unwrap().id;
        assert_ne!(first, second);
    }

    #[test]
    fn unavailable_partitions_are_skipped() {
        let dir = DataPartitionDirectory::default();
        dir.refresh(vec![mk(1), mk(2)]);
        dir.mark_unavailable(1);
        for _ in 0..4 {
            assert_eq!(dir.select_for_write().unwrap().id, 2);
        }
    }

    #[test]
    fn set_leader_updates_leader_addr() {
        let dp = mk(1);
        assert_eq!(dp.leader_addr(), Some("10.0.0.1:6000"));
        dp.set_leader_index(2);
        assert_eq!(dp.leader_addr(), Some("10.0.0.3:6000"));
        assert_eq!(dp.follower_address_string(), "10.0.0.1:6000,10.0.0.2:6000");
    }

    #[test]
    fn empty_directory_errors() {
        let dir = DataPartitionDirectory::default();
        assert!(dir.select_for_write().is_err());
    }
}
