use std::sync::Arc;

use hickory_proto::op::{Message, ResponseCode};
use tracing::{info, warn};

use crate::ports::{MessagePipeline, ResponseSink};

/// Boundary glue between the hosting server and the pipeline engine:
/// logs the question, hands the query to the pipeline, and reports the
/// response code the host should account for.
pub struct ForwardQueryUseCase {
    pipeline: Arc<dyn MessagePipeline>,
}

impl ForwardQueryUseCase {
    pub fn new(pipeline: Arc<dyn MessagePipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn execute(&self, query: &mut Message, sink: &dyn ResponseSink) -> ResponseCode {
        let question = query
            .queries()
            .first()
            .map(|q| q.name().to_string())
            .unwrap_or_else(|| ".".to_string());

        info!(question = %question, id = query.id(), "forwarding query");

        match self.pipeline.process(query, sink).await {
            Ok(()) => ResponseCode::NoError,
            Err(e) => {
                warn!(question = %question, error = %e, "forwarding failed");
                ResponseCode::ServFail
            }
        }
    }
}
