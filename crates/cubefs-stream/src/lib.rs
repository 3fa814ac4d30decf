//! The per-open-regular-file object that owns the extent cache, the set
//! of live writers, and the routing of user byte-range I/O into packets
//! against writers (writes) or readers (reads).
//!
//! The stream is the sole mutator of its extent cache and its writer
//! list; readers are scoped to a single call and never outlive it.

mod host;

pub use host::StreamHandle;

use bytes::{Bytes, BytesMut};
use cubefs_cache::{ExtentCache, ExtentDescriptor, Lookup};
use cubefs_error::{Error, Result};
use cubefs_extent::{create_extent, Reader, Writer, WriterHost, DEFAULT_REQUEST_RETRY_MAX};
use cubefs_meta::MetaClient;
use cubefs_partition::{DataPartition, DataPartitionDirectory};
use cubefs_proto::OpCode;
use cubefs_transport::{Session, TcpSession, TcpSocketConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;

/// Upper bound on how many bytes a single writer will accumulate before
/// the stream rotates to a fresh one. Real deployments make this
/// configurable per mount; callers needing a different budget should
/// construct a [`Stream`] with [`Stream::with_extent_max_bytes`].
pub const DEFAULT_EXTENT_MAX_BYTES: u64 = 128 * 1024 * 1024;

/// Default cap on concurrently live writers per stream.
pub const DEFAULT_MAX_WRITERS: usize = 3;

/// Per-open-file owner of an inode's extent cache and writer set. Always
/// held behind an `Arc` -- recovery (via [`StreamHandle`]) and reader
/// dispatch both need to call back into the stream from a spawned task.
pub struct Stream {
    pub inode: u64,
    cache: AsyncMutex<ExtentCache>,
    writers: AsyncMutex<Vec<Arc<Writer>>>,
    /// Serializes `write`/`flush`/`truncate` against each other. Coarser
    /// than per-range granularity (see DESIGN.md), but sufficient to keep
    /// the writer list and cache from racing with themselves.
    serialize: AsyncMutex<()>,
    max_writers: usize,
    extent_max_bytes: u64,
    retry_max: u32,
    meta: Arc<MetaClient>,
    partitions: Arc<DataPartitionDirectory>,
}

impl Stream {
    pub fn new(inode: u64, meta: Arc<MetaClient>, partitions: Arc<DataPartitionDirectory>) -> Arc<Self> {
        Self::with_limits(inode, meta, partitions, DEFAULT_MAX_WRITERS, DEFAULT_EXTENT_MAX_BYTES, DEFAULT_REQUEST_RETRY_MAX)
    }

    pub fn with_limits(
        inode: u64,
        meta: Arc<MetaClient>,
        partitions: Arc<DataPartitionDirectory>,
        max_writers: usize,
        extent_max_bytes: u64,
        retry_max: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            inode,
            cache: AsyncMutex::new(ExtentCache::new()),
            writers: AsyncMutex::new(Vec::new()),
            serialize: AsyncMutex::new(()),
            max_writers,
            extent_max_bytes,
            retry_max,
            meta,
            partitions,
        })
    }

    pub async fn live_writer_count(&self) -> usize {
        self.writers.lock().await.len()
    }

    /// Writes `data` starting at `file_offset`, splitting across writer
    /// boundaries as needed.
    pub async fn write(self: &Arc<Self>, file_offset: u64, data: &[u8]) -> Result<()> {
        let _guard = self.serialize.lock().await;
        let mut offset = file_offset;
        let mut remaining = data;
        while !remaining.is_empty() {
            let writer = self.writer_for(offset, remaining.len() as u64).await?;
            let budget = self.extent_max_bytes.saturating_sub(writer.written_size());
            let chunk_len = (remaining.len() as u64).min(budget.max(1)) as usize;
            let (chunk, rest) = remaining.split_at(chunk_len);

            let (tx, rx) = oneshot::channel();
            let packet = cubefs_proto::Packet::new(OpCode::Write, offset, Bytes::copy_from_slice(chunk))
                .with_handler(Box::new(move |result| {
                    let _ = tx.send(result);
                }));
            writer.submit(packet).await;
            let reply = rx.await.map_err(|_| Error::io("writer dropped packet handler"))??;
            debug_assert_eq!(reply.kernel_offset, offset);

            let desc = ExtentDescriptor::new(writer.file_offset, writer.partition.id, writer.extent_id(), 0, writer.written_size() as u32);
            let mut discard = Vec::new();
            self.cache.lock().await.append(desc, false, &mut discard);

            offset += chunk_len as u64;
            remaining = rest;
        }
        Ok(())
    }

    /// Finds a live writer whose coverage abuts `file_offset` and still
    /// has budget, or allocates a fresh one. Enforces `max_writers`
    /// (scenario E6).
    async fn writer_for(self: &Arc<Self>, file_offset: u64, _len: u64) -> Result<Arc<Writer>> {
        let mut writers = self.writers.lock().await;
        for w in writers.iter() {
            if w.state() == cubefs_extent::PipelineState::Live
                && w.file_offset + w.written_size() == file_offset
                && w.written_size() < self.extent_max_bytes
            {
                return Ok(w.clone());
            }
        }
        if writers.len() >= self.max_writers {
            return Err(Error::permission_denied("max_writers reached; flush before further writes"));
        }
        let writer = self.spawn_writer(file_offset).await?;
        writers.push(writer.clone());
        Ok(writer)
    }

    async fn spawn_writer(self: &Arc<Self>, file_offset: u64) -> Result<Arc<Writer>> {
        let partition = self.partitions.select_for_write()?;
        let session = connect_leader(&partition).await?;
        let extent_id = create_extent(session.as_ref()).await?;
        let host: Arc<dyn WriterHost> = Arc::new(StreamHandle::new(Arc::downgrade(self)));
        Ok(Writer::spawn(partition, session, file_offset, extent_id, 0, host, self.retry_max))
    }

    /// Called by [`StreamHandle`] on a writer's behalf when it needs to
    /// fail over to a brand-new extent.
    pub(crate) async fn allocate_recovery_writer(self: &Arc<Self>, original_file_offset: u64) -> Result<Arc<Writer>> {
        let mut writers = self.writers.lock().await;
        if writers.len() >= self.max_writers {
            return Err(Error::permission_denied("max_writers reached during recovery"));
        }
        let writer = self.spawn_writer(original_file_offset).await?;
        writers.push(writer.clone());
        Ok(writer)
    }

    /// Reads `len` bytes starting at `file_offset`, consulting the cache
    /// and pulling from meta on a miss.
    pub async fn read(self: &Arc<Self>, file_offset: u64, len: u64) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(len as usize);
        let mut offset = file_offset;
        let mut remaining = len;

        while remaining > 0 {
            let lookup = self.cache.lock().await.lookup(offset);
            let covered = match lookup {
                Lookup::Covered { descriptor, remaining: cov } => Some((descriptor, cov)),
                Lookup::Hole { .. } => {
                    self.refresh_extents_from_meta().await?;
                    match self.cache.lock().await.lookup(offset) {
                        Lookup::Covered { descriptor, remaining: cov } => Some((descriptor, cov)),
                        Lookup::Hole { .. } => None,
                    }
                }
            };

            match covered {
                Some((descriptor, cov_remaining)) => {
                    let chunk_len = remaining.min(cov_remaining);
                    let data = self.read_extent(&descriptor, offset, chunk_len).await?;
                    out.extend_from_slice(&data);
                    offset += chunk_len;
                    remaining -= chunk_len;
                }
                None => {
                    // Past everything meta knows about: a hole in a
                    // sparse file reads as zeros.
                    let until = match self.cache.lock().await.lookup(offset) {
                        Lookup::Hole { until } => until,
                        Lookup::Covered { .. } => offset,
                    };
                    let zero_len = remaining.min(until.saturating_sub(offset)).max(1).min(remaining);
                    out.resize(out.len() + zero_len as usize, 0);
                    offset += zero_len;
                    remaining -= zero_len;
                }
            }
        }
        Ok(out.freeze())
    }

    async fn refresh_extents_from_meta(&self) -> Result<()> {
        let extents = self.meta.get_extents(self.inode).await?;
        let mut cache = self.cache.lock().await;
        for e in extents {
            let mut discard = Vec::new();
            cache.append(e, true, &mut discard);
        }
        Ok(())
    }

    async fn read_extent(&self, descriptor: &ExtentDescriptor, file_offset: u64, len: u64) -> Result<Bytes> {
        let partition = self
            .partitions
            .get(descriptor.partition_id)
            .ok_or(Error::NotFound)?;
        let reader = Reader::connect(partition.clone(), descriptor.extent_id, partition.leader_index()).await?;

        let intra_offset = file_offset - descriptor.file_offset + descriptor.extent_offset;
        let (tx, rx) = oneshot::channel();
        let payload = Bytes::copy_from_slice(&(len as u32).to_be_bytes());
        let mut packet = cubefs_proto::Packet::new(OpCode::Read, file_offset, payload).with_handler(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        packet.extent_offset = intra_offset;
        reader.submit(packet).await;
        let reply = rx.await.map_err(|_| Error::io("reader dropped packet handler"))??;
        reader.close().await;
        Ok(reply.payload)
    }

    /// Flushes every live writer in FIFO order, persists each one's
    /// contribution via meta `append_extent`, reconciles the cache, and
    /// retires the writer.
    pub async fn flush(self: &Arc<Self>) -> Result<()> {
        let _guard = self.serialize.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(self: &Arc<Self>) -> Result<()> {
        let snapshot: Vec<Arc<Writer>> = self.writers.lock().await.clone();
        for writer in &snapshot {
            writer.flush().await?;
            if writer.written_size() > 0 {
                let desc = ExtentDescriptor::new(writer.file_offset, writer.partition.id, writer.extent_id(), 0, writer.written_size() as u32);
                let mut server_discards = Vec::new();
                self.meta.append_extent(self.inode, desc, &mut server_discards).await?;

                let mut cache = self.cache.lock().await;
                let mut self_discard = Vec::new();
                cache.append(desc, true, &mut self_discard);
                cache.remove_discard(&server_discards);
            }
            writer.close().await;
        }
        let mut writers = self.writers.lock().await;
        writers.retain(|w| !snapshot.iter().any(|flushed| Arc::ptr_eq(w, flushed)));
        Ok(())
    }

    /// Flushes, truncates the meta server's extent list, then truncates
    /// the local cache to match.
    pub async fn truncate(self: &Arc<Self>, new_size: u64) -> Result<()> {
        let _guard = self.serialize.lock().await;
        self.flush_locked().await?;
        self.meta.truncate(self.inode, new_size).await?;
        self.cache.lock().await.truncate(new_size);
        Ok(())
    }

    /// Bypasses any page-cache integration the host maintains : reads dispatch exactly like `read`; writes dispatch
    /// like `write` followed by an immediate `flush`.
    pub async fn direct_io_read(self: &Arc<Self>, file_offset: u64, len: u64) -> Result<Bytes> {
        self.read(file_offset, len).await
    }

    pub async fn direct_io_write(self: &Arc<Self>, file_offset: u64, data: &[u8]) -> Result<()> {
        self.write(file_offset, data).await?;
        self.flush().await
    }

    /// Closes every live writer without persisting their contribution.
    /// Meta-side reconciliation of unflushed bytes is left to the next
    /// opener.
    pub async fn close(self: &Arc<Self>) {
        let writers: Vec<Arc<Writer>> = self.writers.lock().await.drain(..).collect();
        for writer in writers {
            writer.close().await;
        }
    }
}

async fn connect_leader(partition: &Arc<DataPartition>) -> Result<Arc<dyn Session>> {
    let addr = partition
        .leader_addr()
        .ok_or_else(|| Error::bad_message("data partition has no members"))?;
    let session = TcpSession::connect(addr, TcpSocketConfig { nodelay: true, ..Default::default() }).await?;
    Ok(Arc::new(session) as Arc<dyn Session>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubefs_proto::{decode_reply_header, encode_request, Packet, HEADER_LEN};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A stub data-partition leader that actually stores written bytes (at
    /// `header.extent_offset` in a shared per-extent buffer) and serves
    /// reads out of that same buffer, so tests can assert the read path
    /// returns exactly what the write path sent rather than a synthetic
    /// filler value.
    async fn spawn_stub_data_node() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let storage: Arc<std::sync::Mutex<Vec<u8>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let storage = storage.clone();
                tokio::spawn(async move {
                    loop {
                        let mut header_buf = [0u8; HEADER_LEN];
                        if stream.read_exact(&mut header_buf).await.is_err() {
                            return;
                        }
                        let header = decode_reply_header(&header_buf).unwrap();
                        let mut arg = vec![0u8; header.arg_len as usize];
                        stream.read_exact(&mut arg).await.unwrap();
                        let mut payload = vec![0u8; header.size as usize];
                        stream.read_exact(&mut payload).await.unwrap();

                        let reply_payload = match header.opcode() {
                            OpCode::CreateExtent => 5u64.to_be_bytes().to_vec(),
                            OpCode::Write => {
                                let off = header.extent_offset as usize;
                                let mut buf = storage.lock().unwrap();
                                if buf.len() < off + payload.len() {
                                    buf.resize(off + payload.len(), 0);
                                }
                                buf[off..off + payload.len()].copy_from_slice(&payload);
                                Vec::new()
                            }
                            OpCode::Read => {
                                let off = header.extent_offset as usize;
                                let len = u32::from_be_bytes(payload[..4].try_into().unwrap()) as usize;
                                let buf = storage.lock().unwrap();
                                buf.get(off..off + len).map(<[u8]>::to_vec).unwrap_or_else(|| vec![0u8; len])
                            }
                            _ => Vec::new(),
                        };
                        let reply = Packet::new(header.opcode(), header.kernel_offset, Bytes::from(reply_payload));
                        let mut buf = Vec::new();
                        encode_request(&reply, &mut buf);
                        if stream.write_all(&buf).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (addr, handle)
    }

    /// A stub meta partition that replies `{}` (no discards) to every
    /// `append_extent`/`truncate` it receives -- enough to let `flush`
    /// complete without asserting anything about meta-side behavior,
    /// except for a shared counter of how many `MetaExtentsAppend`
    /// requests it has seen, which E1 checks is exactly one.
    async fn spawn_stub_meta_node() -> (String, Arc<std::sync::atomic::AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let append_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = append_calls.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    loop {
                        let mut header_buf = [0u8; HEADER_LEN];
                        if stream.read_exact(&mut header_buf).await.is_err() {
                            return;
                        }
                        let header = decode_reply_header(&header_buf).unwrap();
                        let mut arg = vec![0u8; header.arg_len as usize];
                        stream.read_exact(&mut arg).await.unwrap();
                        let mut payload = vec![0u8; header.size as usize];
                        stream.read_exact(&mut payload).await.unwrap();

                        if header.opcode() == OpCode::MetaExtentsAppend {
                            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }

                        let body = serde_json::to_vec(&serde_json::json!({ "discards": Vec::<()>::new() })).unwrap();
                        let reply = Packet::new(header.opcode(), 0, Bytes::from(body));
                        let mut buf = Vec::new();
                        encode_request(&reply, &mut buf);
                        if stream.write_all(&buf).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (addr, append_calls, handle)
    }

    async fn stub_meta() -> (Arc<MetaClient>, Arc<std::sync::atomic::AtomicUsize>) {
        let (addr, append_calls, _srv) = spawn_stub_meta_node().await;
        let client = MetaClient::new();
        client.refresh_partitions(vec![DataPartition::new(1, vec![addr])]);
        (Arc::new(client), append_calls)
    }

    #[tokio::test]
    async fn e1_sequential_write_then_read_back() {
        let (addr, _srv) = spawn_stub_data_node().await;
        let partitions = Arc::new(DataPartitionDirectory::default());
        partitions.refresh(vec![DataPartition::new(1, vec![addr])]);
        let (meta, append_calls) = stub_meta().await;

        let stream = Stream::new(1000, meta, partitions);
        let written = vec![7u8; 8192];
        stream.write(0, &written).await.unwrap();
        assert_eq!(stream.live_writer_count().await, 1);

        stream.flush().await.unwrap();
        assert_eq!(stream.live_writer_count().await, 0);
        assert_eq!(append_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let data = stream.read(0, 8192).await.unwrap();
        assert_eq!(&data[..], &written[..]);

        let extents = stream.cache.lock().await.list(0, 8192);
        assert_eq!(extents.len(), 1);
        assert_eq!(extents[0].file_offset, 0);
        assert_eq!(extents[0].size, 8192);
    }

    #[tokio::test]
    async fn e6_max_writers_cap_then_flush_unblocks() {
        let (addr, _srv) = spawn_stub_data_node().await;
        let partitions = Arc::new(DataPartitionDirectory::default());
        partitions.refresh(vec![DataPartition::new(1, vec![addr.clone()]), DataPartition::new(2, vec![addr])]);
        let (meta, _append_calls) = stub_meta().await;

        let stream = Stream::with_limits(1000, meta, partitions, 2, DEFAULT_EXTENT_MAX_BYTES, DEFAULT_REQUEST_RETRY_MAX);
        stream.write(0, &[1u8; 16]).await.unwrap();
        stream.write(10_000, &[2u8; 16]).await.unwrap();
        assert_eq!(stream.live_writer_count().await, 2);

        let err = stream.write(50_000, &[3u8; 16]).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        stream.flush().await.unwrap();
        assert_eq!(stream.live_writer_count().await, 0);
        stream.write(50_000, &[3u8; 16]).await.unwrap();
    }
}
