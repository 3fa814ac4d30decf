//! RDMA is, from the pipeline's point of view, just another [`Session`]
//! (design note "RDMA vs TCP": the engine must not branch on transport
//! inside the pipeline beyond selecting which session to call). This crate
//! does not link an RDMA verbs library, so `RdmaSession` is a placeholder
//! that satisfies the trait and reports `NotSupported` for actual I/O; a
//! real backend would swap the body of `send_packet`/`recv_packet` for
//! verb-based sends against `rdma_port` without touching any caller.

use crate::session::Session;
use async_trait::async_trait;
use cubefs_error::{Error, Result};
use cubefs_proto::{Header, Packet};
use std::time::Duration;

pub struct RdmaSession {
    peer_addr: String,
}

impl RdmaSession {
    pub fn new(peer_addr: impl Into<String>) -> Self {
        Self {
            peer_addr: peer_addr.into(),
        }
    }
}

#[async_trait]
impl Session for RdmaSession {
    async fn send_packet(&self, _packet: &Packet) -> Result<()> {
        Err(Error::NotSupported(
            "RDMA transport not linked into this build".into(),
        ))
    }

    async fn recv_packet(&self) -> Result<(Header, Vec<u8>)> {
        Err(Error::NotSupported(
            "RDMA transport not linked into this build".into(),
        ))
    }

    fn set_recv_timeout(&self, _timeout: Duration) {}

    fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
