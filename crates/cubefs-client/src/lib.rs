//! Composition root: builds the master client, meta client, and data
//! partition directory leaves-first from a device string and mount
//! options, then hands out one [`cubefs_stream::Stream`] per open regular
//! file.
//!
//! Everything above this crate (VFS adaptation, page cache, dentry/attr
//! caches with their own TTLs) is out of scope;
//! `Volume` is the seam a host integration calls into.

mod logging;
mod mount;
mod statfs;

pub use logging::init_logging;
pub use mount::MountOptions;
pub use statfs::{Statfs, BLOCK_SIZE, MAX_INODE_ID};

use cubefs_error::{Error, Result};
use cubefs_master::MasterClient;
use cubefs_meta::MetaClient;
use cubefs_partition::{DataPartition, DataPartitionDirectory};
use cubefs_stream::Stream;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// A mounted volume: the process-wide, per-volume collaborators (the data
/// partition directory and the meta client) plus the set of currently open
/// streams. Construct via [`Volume::connect`]; tear down via
/// [`Volume::close`], which is also run implicitly if `connect` itself
/// fails partway through (leaves-first construction, reverse-order
/// teardown).
pub struct Volume {
    pub options: MountOptions,
    master: Arc<MasterClient>,
    meta: Arc<MetaClient>,
    partitions: Arc<DataPartitionDirectory>,
    streams: DashMap<u64, Arc<Stream>>,
}

impl Volume {
    /// Parses `device`/`options`, builds the master client, validates the
    /// volume exists and is owned by the configured owner, then fetches
    /// the initial topology. Nothing is left half-constructed on error:
    /// the master client and any partial state are simply dropped.
    pub async fn connect(device: &str, options: &str) -> Result<Arc<Self>> {
        let options = MountOptions::parse(device, options)?;
        let master = Arc::new(MasterClient::new(options.master_hosts.clone(), options.owner.clone())?);

        let vol_info = master.get_volume(&options.volume).await?;
        if vol_info.owner != options.owner {
            return Err(Error::permission_denied(format!(
                "volume '{}' is owned by '{}', not '{}'",
                options.volume, vol_info.owner, options.owner
            )));
        }

        let meta = Arc::new(MetaClient::new());
        let partitions = Arc::new(DataPartitionDirectory::default());

        let volume = Arc::new(Self {
            options,
            master,
            meta,
            partitions,
            streams: DashMap::new(),
        });
        volume.refresh_topology().await?;
        info!(volume = %volume.options.volume, "mounted");
        Ok(volume)
    }

    /// Re-fetches the data partition list from the master and feeds it to
    /// both the data partition directory and the meta client's routing
    /// table. The master interface exposes a single
    /// `get_data_partitions`, not a separate metadata-plane topology call,
    /// so both planes are bootstrapped from the same response -- see
    /// DESIGN.md for this as a recorded open-question resolution.
    pub async fn refresh_topology(&self) -> Result<()> {
        let views = self.master.get_data_partitions(&self.options.volume).await?;
        let partitions: Vec<DataPartition> = views
            .iter()
            .map(|v| {
                let mut members = v.hosts.clone();
                if let Some(pos) = members.iter().position(|h| h == &v.leader_addr) {
                    members.swap(0, pos);
                }
                DataPartition::new(v.partition_id, members)
            })
            .collect();
        self.partitions.refresh(partitions.iter().map(clone_partition).collect());
        self.meta.refresh_partitions(partitions);
        Ok(())
    }

    pub async fn statfs(&self) -> Result<Statfs> {
        let stat = self.master.get_volume_stat(&self.options.volume).await?;
        Ok(Statfs::from_volume_stat(&stat))
    }

    /// Returns the stream for `inode`, opening a fresh one (empty writer
    /// set, empty cache) on first use. Streams are cached for the life of
    /// the volume handle; a host integration that wants `close`-on-last-fd
    /// semantics should call [`Volume::close_stream`] itself.
    pub fn open_stream(self: &Arc<Self>, inode: u64) -> Arc<Stream> {
        self.streams
            .entry(inode)
            .or_insert_with(|| Stream::new(inode, self.meta.clone(), self.partitions.clone()))
            .clone()
    }

    /// Closes and forgets the stream for `inode`, if one is open. Meta-side
    /// reconciliation of any unflushed bytes is left to the next opener.
    pub async fn close_stream(&self, inode: u64) {
        if let Some((_, stream)) = self.streams.remove(&inode) {
            stream.close().await;
        }
    }

    /// Closes every open stream. Torn down in no particular order since
    /// streams do not reference each other; the meta client and partition
    /// directory are dropped after, by `Arc` refcount, once the last
    /// stream and the last in-flight call release their references.
    pub async fn close(&self) {
        let inodes: Vec<u64> = self.streams.iter().map(|e| *e.key()).collect();
        for inode in inodes {
            self.close_stream(inode).await;
        }
    }
}

fn clone_partition(p: &DataPartition) -> DataPartition {
    let clone = DataPartition::new(p.id, p.members.clone());
    clone.set_leader_index(p.leader_index());
    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn statfs_constants_are_correct() {
        assert_eq!(BLOCK_SIZE, 4096);
        assert_eq!(MAX_INODE_ID, (1u64 << 63) - 1);
    }

    #[tokio::test]
    async fn connect_validates_owner_and_loads_topology() {
        let master = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/client/vol"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "name": "myvol", "capacity_gb": 100, "owner": "ltptest" }
            })))
            .mount(&master)
            .await;
        Mock::given(method("GET"))
            .and(path("/client/partitions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    { "partition_id": 1, "hosts": ["10.0.0.1:6000", "10.0.0.2:6000"], "leader_addr": "10.0.0.1:6000" }
                ]
            })))
            .mount(&master)
            .await;
        Mock::given(method("GET"))
            .and(path("/client/volStat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "total_size": 4096 * 1000, "used_size": 4096 * 250, "inode_count": 5 }
            })))
            .mount(&master)
            .await;

        let host = master.address().to_string();
        let device = format!("{host}/myvol");
        let volume = Volume::connect(&device, "owner=ltptest").await.unwrap();

        assert_eq!(volume.partitions.len(), 1);
        let statfs = volume.statfs().await.unwrap();
        assert_eq!(statfs.total_blocks, 1000);
        assert_eq!(statfs.free_blocks, 750);
    }

    #[tokio::test]
    async fn connect_rejects_wrong_owner() {
        let master = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/client/vol"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "name": "myvol", "capacity_gb": 100, "owner": "someone-else" }
            })))
            .mount(&master)
            .await;

        let device = format!("{}/myvol", master.address());
        let err = Volume::connect(&device, "owner=ltptest").await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
