use crate::header::{Header, HEADER_LEN, MAGIC};
use crate::opcode::{OpCode, ResultCode};
use bytes::Bytes;
use cubefs_error::Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process monotonic counter backing [`next_request_id`]. Request IDs
/// only need to be unique per-process-per-connection in practice, but a
/// single global counter is simplest and cheap enough.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A callback invoked exactly once, after the packet's reply (or terminal
/// error) is known. Kept as a boxed closure rather than a channel so
/// writer/reader pipelines can stay allocation-cheap on the common path (the
/// closure usually just copies bytes into a page buffer or fulfils a
/// oneshot).
pub type HandleReply = Box<dyn FnOnce(Result<ReplyPayload, Error>) + Send + 'static>;

/// The decoded reply: result code already validated as `Ok`, payload bytes
/// in hand, partition leader hint surfaced for opportunistic leader-index
/// updates.
#[derive(Debug, Clone)]
pub struct ReplyPayload {
    pub payload: Bytes,
    pub kernel_offset: u64,
}

/// The request/reply envelope. Ownership transfers
/// from the caller into a writer/reader's tx queue, then its rx queue, then
/// into `handle_reply`; the packet is dropped (released) exactly once after
/// the handler runs -- callers must not keep a second handle alive past
/// `submit`.
pub struct Packet {
    pub opcode: OpCode,
    pub partition_id: u64,
    pub extent_id: u64,
    pub extent_offset: u64,
    /// Absolute file offset this packet's payload belongs at. Preserved
    /// across recovery so a replay against a new extent still lands the
    /// bytes at the right place in the logical file.
    pub kernel_offset: u64,
    pub request_id: u64,
    pub remaining_followers: Vec<String>,
    pub payload: Bytes,
    pub retry_count: u32,
    pub handle_reply: Option<HandleReply>,
    pub error: Option<Error>,
}

impl Packet {
    pub fn new(opcode: OpCode, kernel_offset: u64, payload: Bytes) -> Self {
        Self {
            opcode,
            partition_id: 0,
            extent_id: 0,
            extent_offset: 0,
            kernel_offset,
            request_id: next_request_id(),
            remaining_followers: Vec::new(),
            payload,
            retry_count: 0,
            handle_reply: None,
            error: None,
        }
    }

    pub fn with_handler(mut self, handler: HandleReply) -> Self {
        self.handle_reply = Some(handler);
        self
    }

    fn arg_bytes(&self) -> Vec<u8> {
        self.remaining_followers.join(",").into_bytes()
    }

    pub fn header(&self) -> Header {
        let arg = self.arg_bytes();
        Header {
            opcode: self.opcode as u8,
            result_code: ResultCode::Ok as u8,
            partition_id: self.partition_id,
            extent_id: self.extent_id,
            extent_offset: self.extent_offset,
            kernel_offset: self.kernel_offset,
            size: self.payload.len() as u32,
            crc: crc32fast::hash(&self.payload),
            request_id: self.request_id,
            remaining_followers: self.remaining_followers.len() as u8,
            arg_len: arg.len() as u32,
        }
    }

    /// Runs the packet's `handle_reply` continuation exactly once and
    /// releases ownership of the packet. A packet whose continuation has
    /// already been taken (e.g. after a prior resolution) is a no-op, so a
    /// handler only ever runs once per packet.
    pub fn resolve(mut self, result: Result<ReplyPayload, Error>) {
        if let Some(handler) = self.handle_reply.take() {
            handler(result);
        }
    }
}

/// Serializes a request packet's header, argument bytes and payload into
/// `buffer`, ready to hand to a transport session's `send_packet`.
pub fn encode_request(packet: &Packet, buffer: &mut Vec<u8>) {
    buffer.clear();
    let header = packet.header();
    header.encode(buffer);
    buffer.extend_from_slice(&packet.arg_bytes());
    buffer.extend_from_slice(&packet.payload);
}

/// Parses the fixed reply header out of `buffer`. Callers then use
/// `header.arg_len` / `header.size` to know how many more bytes to read
/// off the transport before the reply is complete.
pub fn decode_reply_header(buffer: &[u8]) -> Result<Header, Error> {
    Header::decode(buffer)
}

/// Validates a fully-received payload against the header's declared size
/// and CRC. Called once the transport has delivered exactly `header.size`
/// bytes (see `receive_payload` on the transport session trait).
pub fn verify_payload(header: &Header, payload: &[u8]) -> Result<(), Error> {
    if payload.len() != header.size as usize {
        return Err(Error::bad_message(format!(
            "length mismatch: header declares {}, got {}",
            header.size,
            payload.len()
        )));
    }
    let computed = crc32fast::hash(payload);
    if computed != header.crc {
        return Err(Error::bad_message(format!(
            "crc mismatch: header {:#x}, computed {:#x}",
            header.crc, computed
        )));
    }
    Ok(())
}

pub const fn magic() -> u8 {
    MAGIC
}

pub const fn header_len() -> usize {
    HEADER_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_header_matches() {
        let pkt = Packet::new(OpCode::Write, 8192, Bytes::from_static(b"hello"));
        let mut buf = Vec::new();
        encode_request(&pkt, &mut buf);
        let header = decode_reply_header(&buf[..HEADER_LEN]).unwrap();
        assert_eq!(header.kernel_offset, 8192);
        assert_eq!(header.size, 5);
        let payload = &buf[HEADER_LEN..];
        verify_payload(&header, payload).unwrap();
    }

    #[test]
    fn crc_mismatch_is_bad_message() {
        let header = Header {
            crc: 0xdead_beef,
            size: 5,
            ..Header::new_request(OpCode::Write, 1)
        };
        let err = verify_payload(&header, b"hello").unwrap_err();
        assert!(matches!(err, Error::BadMessage(_)));
    }

    #[test]
    fn handle_reply_runs_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let pkt = Packet::new(OpCode::Write, 0, Bytes::new()).with_handler(Box::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        pkt.resolve(Ok(ReplyPayload {
            payload: Bytes::new(),
            kernel_offset: 0,
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
