use async_trait::async_trait;
use cubefs_error::{Error, Result};
use cubefs_proto::{Header, Packet};
use std::time::Duration;

/// A bidirectional connection to a single remote peer . TCP and RDMA are two implementations of this one
/// interface; the extent writer/reader pipelines never branch on which
/// implementation they hold -- they call `send_packet`/`recv_packet`
/// against a `dyn Session` and let recovery pick a fresh session of
/// whichever kind the data partition directory hands back.
///
/// Contract:
/// - `send_packet` and `recv_packet` are each blocking from the caller's
///   perspective (the returned future resolves once the operation is
///   complete) and each advances the peer-side state machine by one
///   request/reply turn.
/// - The session is single-owner: callers must not issue two concurrent
///   `send_packet` calls on the same session, nor two concurrent
///   `recv_packet` calls. A concurrent `send_packet` and `recv_packet` pair
///   is fine (and expected -- that's how pipelining overlaps tx and rx).
/// - `OutOfMemory` is fatal for the session; `Io` and `Timeout` are
///   retryable by the caller via recovery (reconnect to an alternate
///   replica, or route to a recovery writer/reader).
#[async_trait]
pub trait Session: Send + Sync {
    /// Serializes and sends `packet` on this session.
    async fn send_packet(&self, packet: &Packet) -> Result<()>;

    /// Blocks until the next reply header and payload have been read off
    /// this session, or the configured recv timeout elapses.
    async fn recv_packet(&self) -> Result<(Header, Vec<u8>)>;

    /// Sets the upper bound for a single `recv_packet` call. Takes effect
    /// on the next call; does not affect a recv already in flight.
    fn set_recv_timeout(&self, timeout: Duration);

    fn peer_addr(&self) -> &str;
}

pub(crate) fn classify_timeout_elapsed() -> Error {
    Error::Timeout(Duration::ZERO)
}
