//! Routes an inode id to its owning metadata partition via a consistent
//! hash ring . Shares its partition
//! shape -- id, ordered members, mutable leader index -- with the data
//! plane, so we reuse [`cubefs_partition::DataPartition`] rather than
//! define a parallel struct.

use cubefs_partition::DataPartition;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type MetaPartition = DataPartition;

const VIRTUAL_NODES_PER_PARTITION: u32 = 64;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A ring keyed by hash position, mapping into partition ids. Rebuilt
/// wholesale on every `refresh` -- metadata partition membership changes
/// are rare (cluster scale-out events), so there is no need for
/// incremental ring maintenance.
pub struct MetaPartitionDirectory {
    partitions: BTreeMap<u64, Arc<MetaPartition>>,
    ring: BTreeMap<u64, u64>,
}

impl MetaPartitionDirectory {
    pub fn new() -> Self {
        Self {
            partitions: BTreeMap::new(),
            ring: BTreeMap::new(),
        }
    }

    pub fn refresh(&mut self, partitions: Vec<MetaPartition>) {
        self.partitions.clear();
        self.ring.clear();
        for partition in partitions {
            let id = partition.id;
            self.partitions.insert(id, Arc::new(partition));
            for v in 0..VIRTUAL_NODES_PER_PARTITION {
                let key = fnv1a(format!("{id}-{v}").as_bytes());
                self.ring.insert(key, id);
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<MetaPartition>> {
        self.partitions.get(&id).cloned()
    }

    /// Consistent-hash lookup of the partition owning `ino`.
    pub fn route(&self, ino: u64) -> Option<Arc<MetaPartition>> {
        if self.ring.is_empty() {
            return None;
        }
        let key = fnv1a(&ino.to_be_bytes());
        let partition_id = self
            .ring
            .range(key..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, id)| *id)?;
        self.get(partition_id)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl Default for MetaPartitionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_consistently_for_same_inode() {
        let mut dir = MetaPartitionDirectory::new();
        dir.refresh(vec![
            MetaPartition::new(1, vec!["a:1".into()]),
            MetaPartition::new(2, vec!["b:1".into()]),
            MetaPartition::new(3, vec!["c:1".into()]),
        ]);
        let first = dir.route(1000).unwrap().id;
        let second = dir.route(1000).unwrap().id;
        assert_eq!(first, second);
    }

    #[test]
    fn distributes_across_partitions() {
        let mut dir = MetaPartitionDirectory::new();
        dir.refresh(vec![
            MetaPartition::new(1, vec!["a:1".into()]),
            MetaPartition::new(2, vec!["b:1".into()]),
        ]);
        let mut seen = std::collections::HashSet::new();
        for ino in 0..200u64 {
            seen.insert(dir.route(ino).unwrap().id);
        }
        assert_eq!(seen.len(), 2, "expected both partitions to receive inodes");
    }

    #[test]
    fn empty_directory_routes_to_none() {
        let dir = MetaPartitionDirectory::new();
        assert!(dir.route(1).is_none());
    }
}
