use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_dns_application::ports::ResponseSink;
use conduit_dns_domain::ForwardError;
use conduit_dns_infrastructure::dns::transport::{encode_message, write_frame};
use hickory_proto::op::Message;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Answers a UDP client with a single datagram.
pub(crate) struct UdpResponseSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpResponseSink {
    pub(crate) fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl ResponseSink for UdpResponseSink {
    async fn write(&self, response: Message) -> Result<(), ForwardError> {
        let wire = encode_message(&response)?;
        self.socket
            .send_to(&wire, self.peer)
            .await
            .map_err(|e| ForwardError::SinkWrite(e.to_string()))?;
        Ok(())
    }
}

/// Answers a TCP client. The shared write half is guarded so that
/// concurrent per-query tasks interleave whole frames only.
pub(crate) struct TcpResponseSink {
    write_half: Mutex<OwnedWriteHalf>,
}

impl TcpResponseSink {
    pub(crate) fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            write_half: Mutex::new(write_half),
        }
    }
}

#[async_trait]
impl ResponseSink for TcpResponseSink {
    async fn write(&self, response: Message) -> Result<(), ForwardError> {
        let wire = encode_message(&response)?;
        let mut writer = self.write_half.lock().await;
        write_frame(&mut *writer, &wire)
            .await
            .map_err(|e| ForwardError::SinkWrite(e.to_string()))
    }
}
