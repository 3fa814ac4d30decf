use crate::state::{PipelineState, StateCell};
use async_trait::async_trait;
use cubefs_error::{Error, Result};
use cubefs_partition::DataPartition;
use cubefs_proto::{Packet, ReplyPayload};
use cubefs_transport::Session;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default bound on how many times a single packet is re-issued across
/// writer recoveries before the engine gives up and surfaces `Io`.
pub const DEFAULT_REQUEST_RETRY_MAX: u32 = 3;

/// What a writer's rx task needs from its owner to recover from a failed
/// replica. The stream enforces `max_writers`,
/// allocates the replacement extent and partition, constructs the
/// recovery writer, and appends it to its own writer list; the writer
/// itself only asks for one and caches the answer.
#[async_trait]
pub trait WriterHost: Send + Sync {
    async fn recover_writer(&self, original_file_offset: u64) -> Result<Arc<Writer>>;
}

/// An append-only pipeline targeting one extent on one data partition's
/// leader . Exclusively owns its
/// transport session; packets move by value from `tx_queue` to `rx_queue`
/// to the `handle_reply` continuation, released exactly once.
pub struct Writer {
    pub partition: Arc<DataPartition>,
    session: Arc<dyn Session>,
    /// Absolute file offset this writer is the origin for.
    pub file_offset: u64,
    extent_id: AtomicU64,
    base_extent_offset: u64,
    written_size: AtomicU64,
    tx_queue: AsyncMutex<VecDeque<Packet>>,
    rx_queue: AsyncMutex<VecDeque<Packet>>,
    tx_inflight: AtomicU64,
    rx_inflight: AtomicU64,
    state: StateCell,
    tx_notify: Notify,
    rx_notify: Notify,
    drained: Notify,
    superseded_by: AsyncMutex<Option<Arc<Writer>>>,
    host: Arc<dyn WriterHost>,
    retry_max: u32,
    handles: AsyncMutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    closed: std::sync::atomic::AtomicBool,
    dirty: std::sync::atomic::AtomicBool,
}

impl Writer {
    /// Spawns the tx/rx background tasks and returns the writer, ready to
    /// accept `submit`s. `extent_id`/`extent_offset` are the writer's
    /// anchor inside the server-side extent; `written_size` starts at
    /// zero for a brand-new writer or at the recovered byte count for one
    /// created mid-file.
    pub fn spawn(
        partition: Arc<DataPartition>,
        session: Arc<dyn Session>,
        file_offset: u64,
        extent_id: u64,
        base_extent_offset: u64,
        host: Arc<dyn WriterHost>,
        retry_max: u32,
    ) -> Arc<Self> {
        let writer = Arc::new(Self {
            partition,
            session,
            file_offset,
            extent_id: AtomicU64::new(extent_id),
            base_extent_offset,
            written_size: AtomicU64::new(0),
            tx_queue: AsyncMutex::new(VecDeque::new()),
            rx_queue: AsyncMutex::new(VecDeque::new()),
            tx_inflight: AtomicU64::new(0),
            rx_inflight: AtomicU64::new(0),
            state: StateCell::new(PipelineState::Live),
            tx_notify: Notify::new(),
            rx_notify: Notify::new(),
            drained: Notify::new(),
            superseded_by: AsyncMutex::new(None),
            host,
            retry_max,
            handles: AsyncMutex::new(None),
            closed: std::sync::atomic::AtomicBool::new(false),
            dirty: std::sync::atomic::AtomicBool::new(false),
        });

        let tx_handle = tokio::spawn(Self::tx_loop(writer.clone()));
        let rx_handle = tokio::spawn(Self::rx_loop(writer.clone()));
        // `handles` is only ever written here at construction, so a blocking
        // try_lock is always available.
        *writer.handles.try_lock().expect("fresh writer, uncontended") = Some((tx_handle, rx_handle));
        writer
    }

    pub fn extent_id(&self) -> u64 {
        self.extent_id.load(Ordering::Acquire)
    }

    pub fn written_size(&self) -> u64 {
        self.written_size.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// O(1): fills in this writer's routing fields, enqueues, bumps
    /// tx-inflight, and wakes the tx task.
    pub async fn submit(self: &Arc<Self>, mut packet: Packet) {
        packet.partition_id = self.partition.id;
        packet.extent_id = self.extent_id();
        packet.extent_offset = self.base_extent_offset + (packet.kernel_offset - self.file_offset);
        packet.remaining_followers = self
            .partition
            .follower_address_string()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let len = packet.payload.len() as u64;
        self.written_size.fetch_add(len, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
        self.tx_inflight.fetch_add(1, Ordering::AcqRel);
        self.tx_queue.lock().await.push_back(packet);
        self.tx_notify.notify_one();
    }

    /// Blocks until both queues have drained.
    pub async fn flush(&self) -> Result<()> {
        loop {
            if self.tx_inflight.load(Ordering::Acquire) == 0 && self.rx_inflight.load(Ordering::Acquire) == 0 {
                self.dirty.store(false, Ordering::Release);
                return Ok(());
            }
            self.drained.notified().await;
        }
    }

    /// Cancels both tasks and waits for them to exit . A second call observes `closed`
    /// already set and returns immediately without touching the tasks.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.set(PipelineState::Retired);
        self.tx_notify.notify_one();
        self.rx_notify.notify_one();
        let handles = self.handles.lock().await.take();
        if let Some((tx_handle, rx_handle)) = handles {
            tx_handle.abort();
            rx_handle.abort();
            let _ = tx_handle.await;
            let _ = rx_handle.await;
        }
    }

    fn notify_drained(&self) {
        self.drained.notify_one();
    }

    async fn tx_loop(self: Arc<Self>) {
        loop {
            let packet = self.tx_queue.lock().await.pop_front();
            let mut packet = match packet {
                Some(p) => p,
                None => {
                    if self.state.get() == PipelineState::Retired {
                        return;
                    }
                    self.tx_notify.notified().await;
                    continue;
                }
            };

            match self.state.get() {
                PipelineState::Retired => {
                    packet.error = Some(Error::io("writer closed before packet could be sent"));
                }
                PipelineState::Error | PipelineState::Recover => {
                    // Leave error/recover classification to the rx side;
                    // the packet still moves through rx in submission order.
                }
                PipelineState::Live => {
                    if let Err(err) = self.session.send_packet(&packet).await {
                        if matches!(err, Error::OutOfMemory) {
                            warn!(partition = self.partition.id, "writer send hit OutOfMemory, entering Error state");
                            self.state.set(PipelineState::Error);
                        } else {
                            debug!(partition = self.partition.id, ?err, "writer send failed, entering Recover state");
                            self.state.set(PipelineState::Recover);
                        }
                    }
                }
            }

            self.rx_inflight.fetch_add(1, Ordering::AcqRel);
            self.rx_queue.lock().await.push_back(packet);
            self.rx_notify.notify_one();

            self.tx_inflight.fetch_sub(1, Ordering::AcqRel);
            self.notify_drained();
        }
    }

    async fn rx_loop(self: Arc<Self>) {
        loop {
            let packet = self.rx_queue.lock().await.pop_front();
            let packet = match packet {
                Some(p) => p,
                None => {
                    if self.state.get() == PipelineState::Retired {
                        return;
                    }
                    self.rx_notify.notified().await;
                    continue;
                }
            };

            self.drain_one(packet).await;
            self.rx_inflight.fetch_sub(1, Ordering::AcqRel);
            self.notify_drained();
        }
    }

    async fn drain_one(self: &Arc<Self>, mut packet: Packet) {
        if packet.error.is_some() {
            packet.resolve(Err(Error::io("writer closed before packet could be sent")));
            return;
        }

        match self.state.get() {
            PipelineState::Error => {
                packet.resolve(Err(Error::io("writer pipeline entered a terminal error state")));
            }
            PipelineState::Recover => {
                self.recover_and_replay(packet).await;
            }
            PipelineState::Retired => {
                packet.resolve(Err(Error::io("writer retired before reply was received")));
            }
            PipelineState::Live => match self.session.recv_packet().await {
                Ok((header, payload)) if header.result_code().is_ok() => {
                    packet.resolve(Ok(ReplyPayload {
                        payload: payload.into(),
                        kernel_offset: header.kernel_offset,
                    }));
                }
                Ok(_non_ok) => {
                    self.state.set(PipelineState::Recover);
                    self.recover_and_replay(packet).await;
                }
                Err(_) => {
                    self.state.set(PipelineState::Recover);
                    self.recover_and_replay(packet).await;
                }
            },
        }
    }

    /// Rewrites the packet's routing for a recovery target and re-issues
    /// it synchronously, bypassing the pipeline ( "Recovery
    /// (writer)"). `kernel_offset` is never touched, so the bytes still
    /// land at the right place in the logical file (testable property 4).
    async fn recover_and_replay(self: &Arc<Self>, mut packet: Packet) {
        loop {
            let target = match self.recovery_target().await {
                Ok(w) => w,
                Err(err) => {
                    packet.resolve(Err(err));
                    return;
                }
            };

            packet.partition_id = target.partition.id;
            packet.extent_id = target.extent_id();
            packet.extent_offset = target.base_extent_offset + (packet.kernel_offset - target.file_offset);
            packet.remaining_followers = target
                .partition
                .follower_address_string()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            packet.retry_count += 1;

            let outcome = async {
                target.session.send_packet(&packet).await?;
                target.session.recv_packet().await
            }
            .await;

            match outcome {
                Ok((header, payload)) if header.result_code().is_ok() => {
                    packet.resolve(Ok(ReplyPayload {
                        payload: payload.into(),
                        kernel_offset: header.kernel_offset,
                    }));
                    return;
                }
                _ => {
                    if packet.retry_count > self.retry_max {
                        packet.resolve(Err(Error::io("exceeded retry budget during writer recovery")));
                        return;
                    }
                    // This recovery target is itself bad; drop the cached
                    // pointer so the next loop iteration asks the host for
                    // a fresh one.
                    *self.superseded_by.lock().await = None;
                }
            }
        }
    }

    async fn recovery_target(self: &Arc<Self>) -> Result<Arc<Writer>> {
        let mut guard = self.superseded_by.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let recovered = self.host.recover_writer(self.file_offset).await?;
        *guard = Some(recovered.clone());
        Ok(recovered)
    }
}
