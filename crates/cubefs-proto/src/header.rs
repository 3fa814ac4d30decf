use crate::opcode::{OpCode, ResultCode};
use cubefs_error::Error;

/// Fixed-width wire magic. A request and its reply always open with this
/// byte; anything else means we are desynchronized with the peer and the
/// connection must be dropped rather than resynchronized in place.
pub const MAGIC: u8 = 0xFB;

/// Size in bytes of the fixed portion of [`Header`], before the variable
/// `arg` and `payload` sections.
pub const HEADER_LEN: usize = 1 // magic
    + 1 // opcode
    + 1 // result code
    + 8 // partition id
    + 8 // extent id
    + 8 // extent offset
    + 8 // kernel offset
    + 4 // size
    + 4 // crc
    + 8 // request id
    + 1 // remaining followers
    + 4; // arg length

/// The fixed-layout big-endian header shared by every request and reply
/// against a data or metadata partition.
///
/// `kernel_offset` is carried even on requests where it duplicates
/// information implied by `extent_offset`, because recovery rewrites
/// `partition_id`/`extent_id`/`extent_offset` for a new target extent while
/// `kernel_offset` -- the absolute file offset the payload belongs at --
/// must survive unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode: u8,
    pub result_code: u8,
    pub partition_id: u64,
    pub extent_id: u64,
    pub extent_offset: u64,
    pub kernel_offset: u64,
    pub size: u32,
    pub crc: u32,
    pub request_id: u64,
    pub remaining_followers: u8,
    pub arg_len: u32,
}

impl Header {
    pub fn new_request(opcode: OpCode, request_id: u64) -> Self {
        Self {
            opcode: opcode as u8,
            result_code: ResultCode::Ok as u8,
            partition_id: 0,
            extent_id: 0,
            extent_offset: 0,
            kernel_offset: 0,
            size: 0,
            crc: 0,
            request_id,
            remaining_followers: 0,
            arg_len: 0,
        }
    }

    pub fn opcode(&self) -> OpCode {
        OpCode::from_u8(self.opcode)
    }

    pub fn result_code(&self) -> ResultCode {
        ResultCode::from_u8(self.result_code)
    }

    /// Serializes the fixed header into `out`, which must have at least
    /// [`HEADER_LEN`] bytes of spare capacity.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(MAGIC);
        out.push(self.opcode);
        out.push(self.result_code);
        out.extend_from_slice(&self.partition_id.to_be_bytes());
        out.extend_from_slice(&self.extent_id.to_be_bytes());
        out.extend_from_slice(&self.extent_offset.to_be_bytes());
        out.extend_from_slice(&self.kernel_offset.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.crc.to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.push(self.remaining_followers);
        out.extend_from_slice(&self.arg_len.to_be_bytes());
    }

    /// Parses a fixed header out of exactly [`HEADER_LEN`] bytes. Fails with
    /// `BadMessage` on magic mismatch; does not validate CRC or length
    /// consistency against the payload, since the payload has not been read
    /// yet -- that is [`crate::verify_payload_crc`]'s job once the payload
    /// bytes are in hand.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::bad_message(format!(
                "short header: {} < {HEADER_LEN}",
                buf.len()
            )));
        }
        if buf[0] != MAGIC {
            return Err(Error::bad_message(format!(
                "magic mismatch: got {:#x}, want {:#x}",
                buf[0], MAGIC
            )));
        }
        let mut off = 1;
        let opcode = buf[off];
        off += 1;
        let result_code = buf[off];
        off += 1;
        let partition_id = read_u64(buf, &mut off);
        let extent_id = read_u64(buf, &mut off);
        let extent_offset = read_u64(buf, &mut off);
        let kernel_offset = read_u64(buf, &mut off);
        let size = read_u32(buf, &mut off);
        let crc = read_u32(buf, &mut off);
        let request_id = read_u64(buf, &mut off);
        let remaining_followers = buf[off];
        off += 1;
        let arg_len = read_u32(buf, &mut off);
        Ok(Self {
            opcode,
            result_code,
            partition_id,
            extent_id,
            extent_offset,
            kernel_offset,
            size,
            crc,
            request_id,
            remaining_followers,
            arg_len,
        })
    }
}

fn read_u64(buf: &[u8], off: &mut usize) -> u64 {
    let v = u64::from_be_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

fn read_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_be_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut h = Header::new_request(OpCode::Write, 42);
        h.partition_id = 7;
        h.extent_id = 11;
        h.kernel_offset = 4096;
        h.size = 1024;
        h.arg_len = 3;
        let mut buf = Vec::new();
        h.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = 0x00;
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Header::decode(&[0u8; 4]).is_err());
    }
}
