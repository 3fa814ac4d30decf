//! Bidirectional transport sessions to a single remote peer.
//! Everything above this crate talks to `dyn Session`; it never matters to
//! a writer or reader pipeline whether the session underneath is TCP or
//! RDMA.

mod session;
mod tcp;

#[cfg(feature = "rdma")]
mod rdma;

pub use session::Session;
pub use tcp::{TcpSession, TcpSocketConfig};

#[cfg(feature = "rdma")]
pub use rdma::RdmaSession;

#[cfg(test)]
mod tests {
    use super::*;
    use cubefs_proto::OpCode;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_then_recv_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let session = TcpSession::from_stream(stream, TcpSocketConfig::default()).unwrap();
            let (header, payload) = session.recv_packet().await.unwrap();
            assert_eq!(payload, b"ping");
            let reply = cubefs_proto::Packet::new(
                header.opcode(),
                header.kernel_offset,
                bytes::Bytes::from_static(b"pong"),
            );
            session.send_packet(&reply).await.unwrap();
        });

        let client = TcpSession::connect(&addr.to_string(), TcpSocketConfig::default())
            .await
            .unwrap();
        let req = cubefs_proto::Packet::new(OpCode::Write, 0, bytes::Bytes::from_static(b"ping"));
        client.send_packet(&req).await.unwrap();
        let (_, payload) = client.recv_packet().await.unwrap();
        assert_eq!(payload, b"pong");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn recv_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });
        let client = TcpSession::connect(&addr.to_string(), TcpSocketConfig::default())
            .await
            .unwrap();
        client.set_recv_timeout(std::time::Duration::from_millis(50));
        let err = client.recv_packet().await.unwrap_err();
        assert!(matches!(err, cubefs_error::Error::Timeout(_)));
    }
}
