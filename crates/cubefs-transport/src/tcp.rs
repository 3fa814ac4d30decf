use crate::session::{classify_timeout_elapsed, Session};
use async_trait::async_trait;
use cubefs_error::{Error, Result};
use cubefs_proto::{self as proto, Header, Packet, HEADER_LEN};
use socket2::SockRef;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Minimal per-socket configuration. `linger` controls whether `close`
/// waits for the peer's FIN (graceful) or sends RST after the timeout
/// (so a slow peer cannot pin down client resources indefinitely).
#[derive(Clone, Debug, Default)]
pub struct TcpSocketConfig {
    pub linger: Option<Duration>,
    pub nodelay: bool,
}

/// A TCP-backed [`Session`]. Read and write halves are split so that a
/// writer's tx task (sending) and rx task (receiving) never contend on the
/// same lock -- each half has its own `AsyncMutex` purely to satisfy `&self`
/// method signatures, not to serialize tx against rx.
pub struct TcpSession {
    write_half: AsyncMutex<OwnedWriteHalf>,
    read_half: AsyncMutex<OwnedReadHalf>,
    peer_addr: String,
    recv_timeout_millis: AtomicU64,
    send_buf: AsyncMutex<Vec<u8>>,
}

const DEFAULT_RECV_TIMEOUT_MS: u64 = 15_000;

impl TcpSession {
    pub async fn connect(addr: &str, config: TcpSocketConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::io(format!("connect {addr}: {e}")))?;
        Self::apply_config(&stream, &config)?;
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            write_half: AsyncMutex::new(write_half),
            read_half: AsyncMutex::new(read_half),
            peer_addr,
            recv_timeout_millis: AtomicU64::new(DEFAULT_RECV_TIMEOUT_MS),
            send_buf: AsyncMutex::new(Vec::with_capacity(4096)),
        })
    }

    pub fn from_stream(stream: TcpStream, config: TcpSocketConfig) -> Result<Self> {
        Self::apply_config(&stream, &config)?;
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            write_half: AsyncMutex::new(write_half),
            read_half: AsyncMutex::new(read_half),
            peer_addr,
            recv_timeout_millis: AtomicU64::new(DEFAULT_RECV_TIMEOUT_MS),
            send_buf: AsyncMutex::new(Vec::with_capacity(4096)),
        })
    }

    fn apply_config(stream: &TcpStream, config: &TcpSocketConfig) -> Result<()> {
        if config.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| Error::io(format!("set_nodelay: {e}")))?;
        }
        if config.linger.is_some() {
            let sock = SockRef::from(stream);
            sock.set_linger(config.linger)
                .map_err(|e| Error::io(format!("set_linger: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let mut buf = self.send_buf.lock().await;
        proto::encode_request(packet, &mut buf);
        let mut half = self.write_half.lock().await;
        half.write_all(&buf)
            .await
            .map_err(|e| Error::io(format!("send to {}: {e}", self.peer_addr)))?;
        half.flush()
            .await
            .map_err(|e| Error::io(format!("flush to {}: {e}", self.peer_addr)))
    }

    async fn recv_packet(&self) -> Result<(Header, Vec<u8>)> {
        let timeout = Duration::from_millis(self.recv_timeout_millis.load(Ordering::Relaxed));
        let fut = async {
            let mut half = self.read_half.lock().await;
            let mut header_buf = [0u8; HEADER_LEN];
            half.read_exact(&mut header_buf).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::io(format!("connection to {} closed", self.peer_addr))
                } else {
                    Error::io(format!("recv header from {}: {e}", self.peer_addr))
                }
            })?;
            let header = proto::decode_reply_header(&header_buf)?;
            let (_arg, payload) = proto::receive_payload(&mut *half, &header).await?;
            Ok::<_, Error>((header, payload))
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(peer = %self.peer_addr, ?timeout, "recv_packet timed out");
                Err(classify_timeout_elapsed())
            }
        }
    }

    fn set_recv_timeout(&self, timeout: Duration) {
        self.recv_timeout_millis
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
