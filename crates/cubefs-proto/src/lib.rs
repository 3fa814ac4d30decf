//! Binary request/reply envelope shared by data and metadata partitions
//! . Owns wire layout and
//! framing only; a transport session owns the socket and the extent
//! writer/reader pipelines own ordering and retry.

pub mod header;
pub mod opcode;
pub mod packet;

pub use header::{Header, HEADER_LEN, MAGIC};
pub use opcode::{OpCode, ResultCode};
pub use packet::{
    decode_reply_header, encode_request, next_request_id, verify_payload, HandleReply, Packet,
    ReplyPayload,
};

use cubefs_error::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads the variable-length argument bytes and payload that follow a
/// fixed header off `reader`, validating the payload's length and CRC
/// against what the header declared. `reader` is any half of a transport
/// session's socket; this function does not know about sessions, retries
/// or recovery -- those live one layer up, in `cubefs-transport` and
/// `cubefs-extent`.
pub async fn receive_payload<R>(reader: &mut R, header: &Header) -> Result<(Vec<u8>, Vec<u8>), Error>
where
    R: AsyncRead + Unpin,
{
    let mut arg = vec![0u8; header.arg_len as usize];
    if !arg.is_empty() {
        reader.read_exact(&mut arg).await?;
    }
    let mut payload = vec![0u8; header.size as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await?;
    }
    verify_payload(header, &payload)?;
    Ok((arg, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcode::OpCode;
    use std::io::Cursor;

    #[tokio::test]
    async fn receive_payload_validates_crc() {
        let pkt = Packet::new(OpCode::Write, 0, bytes::Bytes::from_static(b"payload"));
        let header = pkt.header();
        let mut wire = Vec::new();
        wire.extend_from_slice(b"payload");
        let mut cursor = Cursor::new(wire);
        let (arg, payload) = receive_payload(&mut cursor, &header).await.unwrap();
        assert!(arg.is_empty());
        assert_eq!(payload, b"payload");
    }
}
