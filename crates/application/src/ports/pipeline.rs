use async_trait::async_trait;
use conduit_dns_domain::ForwardError;
use hickory_proto::op::Message;

use super::ResponseSink;

/// The forwarding engine. Admits one query, and on success delivers the
/// upstream response through the sink with the caller's message ID
/// restored. The query's own ID is left untouched on every outcome.
#[async_trait]
pub trait MessagePipeline: Send + Sync {
    async fn process(
        &self,
        query: &mut Message,
        sink: &dyn ResponseSink,
    ) -> Result<(), ForwardError>;
}
