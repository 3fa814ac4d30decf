use crate::state::{PipelineState, StateCell};
use cubefs_error::{Error, Result};
use cubefs_partition::DataPartition;
use cubefs_proto::{Packet, ReplyPayload};
use cubefs_transport::{Session, TcpSession, TcpSocketConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// A request/reply pipeline against one replica of one extent . Shares the writer's tx/rx pipeline
/// shape but carries no recovery-writer-style extent allocation: failure
/// simply rotates to the next replica of the same partition.
pub struct Reader {
    pub partition: Arc<DataPartition>,
    session: AsyncMutex<Arc<dyn Session>>,
    pub extent_id: u64,
    host_index: AtomicUsize,
    tx_queue: AsyncMutex<VecDeque<Packet>>,
    rx_queue: AsyncMutex<VecDeque<Packet>>,
    tx_inflight: std::sync::atomic::AtomicU64,
    rx_inflight: std::sync::atomic::AtomicU64,
    state: StateCell,
    tx_notify: Notify,
    rx_notify: Notify,
    drained: Notify,
    /// Set once this reader enters `Recover`: a distinct `Reader` bound to
    /// `(host_index + 1) mod replica_count`, mirroring the writer's
    /// `recovery_writer` field (spec §3). `self` stays `Recover` forever
    /// once set; it never mutates its own session/host back to `Live`.
    recovery_reader: AsyncMutex<Option<Arc<Reader>>>,
    handles: AsyncMutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    closed: std::sync::atomic::AtomicBool,
}

impl Reader {
    pub async fn connect(partition: Arc<DataPartition>, extent_id: u64, host_index: usize) -> Result<Arc<Self>> {
        let addr = partition
            .member(host_index)
            .ok_or_else(|| Error::bad_message("reader host_index out of range for partition"))?
            .to_string();
        let session: Arc<dyn Session> = Arc::new(TcpSession::connect(&addr, TcpSocketConfig { nodelay: true, ..Default::default() }).await?);
        Ok(Self::spawn(partition, session, extent_id, host_index))
    }

    fn spawn(partition: Arc<DataPartition>, session: Arc<dyn Session>, extent_id: u64, host_index: usize) -> Arc<Self> {
        let reader = Arc::new(Self {
            partition,
            session: AsyncMutex::new(session),
            extent_id,
            host_index: AtomicUsize::new(host_index),
            tx_queue: AsyncMutex::new(VecDeque::new()),
            rx_queue: AsyncMutex::new(VecDeque::new()),
            tx_inflight: std::sync::atomic::AtomicU64::new(0),
            rx_inflight: std::sync::atomic::AtomicU64::new(0),
            state: StateCell::new(PipelineState::Live),
            tx_notify: Notify::new(),
            rx_notify: Notify::new(),
            drained: Notify::new(),
            recovery_reader: AsyncMutex::new(None),
            handles: AsyncMutex::new(None),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        let tx_handle = tokio::spawn(Self::tx_loop(reader.clone()));
        let rx_handle = tokio::spawn(Self::rx_loop(reader.clone()));
        *reader.handles.try_lock().expect("fresh reader, uncontended") = Some((tx_handle, rx_handle));
        reader
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn host_index(&self) -> usize {
        self.host_index.load(Ordering::Acquire)
    }

    pub async fn submit(self: &Arc<Self>, mut packet: Packet) {
        packet.partition_id = self.partition.id;
        packet.extent_id = self.extent_id;
        self.tx_inflight.fetch_add(1, Ordering::AcqRel);
        self.tx_queue.lock().await.push_back(packet);
        self.tx_notify.notify_one();
    }

    pub async fn flush(&self) -> Result<()> {
        loop {
            if self.tx_inflight.load(Ordering::Acquire) == 0 && self.rx_inflight.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            self.drained.notified().await;
        }
    }

    /// Closes this reader and, transitively, any recovery reader it
    /// spawned -- the stream only ever holds the handle to the original
    /// reader, so the recovery chain would otherwise leak its session and
    /// background tasks.
    pub async fn close(&self) {
        if !self.close_self().await {
            return;
        }
        let mut next = self.recovery_reader.lock().await.take();
        while let Some(r) = next {
            next = if r.close_self().await {
                r.recovery_reader.lock().await.take()
            } else {
                None
            };
        }
    }

    /// Idempotent close of just this reader object (not its recovery
    /// chain). Returns `false` if it was already closed.
    async fn close_self(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
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
        true
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

            if self.state.get() == PipelineState::Retired {
                packet.error = Some(Error::io("reader closed before packet could be sent"));
            } else {
                let session = self.session.lock().await.clone();
                if let Err(err) = session.send_packet(&packet).await {
                    debug!(partition = self.partition.id, ?err, "reader send failed, entering Recover state");
                    self.state.set(PipelineState::Recover);
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
            packet.resolve(Err(Error::io("reader closed before packet could be sent")));
            return;
        }
        match self.state.get() {
            PipelineState::Retired => {
                packet.resolve(Err(Error::io("reader retired before reply was received")));
            }
            PipelineState::Error => {
                packet.resolve(Err(Error::io("reader pipeline entered a terminal error state")));
            }
            PipelineState::Recover => {
                self.recover_and_replay(packet).await;
            }
            PipelineState::Live => {
                let session = self.session.lock().await.clone();
                match session.recv_packet().await {
                    Ok((header, payload)) if header.result_code().is_ok() => {
                        packet.resolve(Ok(ReplyPayload {
                            payload: payload.into(),
                            kernel_offset: header.kernel_offset,
                        }));
                    }
                    _ => {
                        self.state.set(PipelineState::Recover);
                        self.recover_and_replay(packet).await;
                    }
                }
            }
        }
    }

    /// Returns the (memoized) recovery reader bound to `(host_index + 1)
    /// mod replica_count`, spawning it on first need. `self` is never
    /// mutated by this -- it stays `Recover` for the rest of its life, and
    /// all further packets route to the returned object instead, the same
    /// shape as `Writer::recovery_target`/`recovery_writer`.
    async fn recovery_target(self: &Arc<Self>) -> Result<Arc<Reader>> {
        let mut guard = self.recovery_reader.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let next_index = (self.host_index() + 1) % self.partition.replica_count.max(1);
        let recovered = Reader::connect(self.partition.clone(), self.extent_id, next_index).await?;
        *guard = Some(recovered.clone());
        Ok(recovered)
    }

    /// Single leader-probe retry against `(host_index + 1) mod
    /// replica_count`, carried out against a freshly spawned recovery
    /// reader rather than by mutating `self`. Updates the partition's
    /// recorded leader index on success, which is the only lasting effect
    /// of a reader recovery -- no new extents are allocated on the read
    /// path.
    async fn recover_and_replay(self: &Arc<Self>, mut packet: Packet) {
        let target = match self.recovery_target().await {
            Ok(t) => t,
            Err(err) => {
                packet.resolve(Err(err));
                return;
            }
        };

        packet.retry_count += 1;
        let session = target.session.lock().await.clone();
        let outcome = async {
            session.send_packet(&packet).await?;
            session.recv_packet().await
        }
        .await;

        match outcome {
            Ok((header, payload)) if header.result_code().is_ok() => {
                target.partition.set_leader_index(target.host_index());
                packet.resolve(Ok(ReplyPayload {
                    payload: payload.into(),
                    kernel_offset: header.kernel_offset,
                }));
            }
            _ => {
                packet.resolve(Err(Error::io("reader recovery probe failed against the rotated replica")));
            }
        }
    }
}
