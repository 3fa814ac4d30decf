use bytes::Bytes;
use cubefs_error::{Error, Result};
use cubefs_proto::{OpCode, Packet};
use cubefs_transport::Session;

/// Issues a `CreateExtent` request against a partition's leader session and
/// returns the newly allocated extent id, carried back in the reply payload
/// as a big-endian `u64`.
///
/// Allocating a new extent is a data-plane operation: the wire-level
/// `OpCode::CreateExtent` verb is handled by the leader of the *data*
/// partition that owns extent-id allocation for its own partition, not the
/// metadata service. See DESIGN.md for the reasoning.
pub async fn create_extent(session: &dyn Session) -> Result<u64> {
    let packet = Packet::new(OpCode::CreateExtent, 0, Bytes::new());
    session.send_packet(&packet).await?;
    let (header, payload) = session.recv_packet().await?;
    if !header.result_code().is_ok() {
        return Err(Error::io("data partition leader refused CreateExtent"));
    }
    if payload.len() < 8 {
        return Err(Error::bad_message("CreateExtent reply payload too short for an extent id"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&payload[..8]);
    Ok(u64::from_be_bytes(buf))
}
