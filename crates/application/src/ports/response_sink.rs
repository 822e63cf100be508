use async_trait::async_trait;
use conduit_dns_domain::ForwardError;
use hickory_proto::op::Message;

/// Write half of a client exchange. Implementations deliver exactly one
/// response message back to whoever asked.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn write(&self, response: Message) -> Result<(), ForwardError>;
}
