use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_dns_application::ports::{MessagePipeline, ResponseSink};
use conduit_dns_application::use_cases::ForwardQueryUseCase;
use conduit_dns_domain::ForwardError;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use tokio::sync::Mutex;

fn make_query(name: &str, id: u16) -> Message {
    let mut question = Query::new();
    question.set_name(Name::from_str(name).unwrap());
    question.set_query_type(RecordType::A);
    question.set_query_class(DNSClass::IN);

    let mut query = Message::new();
    query.set_id(id);
    query.set_message_type(MessageType::Query);
    query.set_op_code(OpCode::Query);
    query.set_recursion_desired(true);
    query.add_query(question);
    query
}

#[derive(Default)]
struct CollectSink {
    responses: Mutex<Vec<Message>>,
}

#[async_trait]
impl ResponseSink for CollectSink {
    async fn write(&self, response: Message) -> Result<(), ForwardError> {
        self.responses.lock().await.push(response);
        Ok(())
    }
}

/// Answers every query with an empty NoError response, like a pipeline
/// whose upstream always replies.
struct EchoPipeline;

#[async_trait]
impl MessagePipeline for EchoPipeline {
    async fn process(
        &self,
        query: &mut Message,
        sink: &dyn ResponseSink,
    ) -> Result<(), ForwardError> {
        let mut response = Message::new();
        response.set_id(query.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(query.op_code());
        for q in query.queries() {
            response.add_query(q.clone());
        }
        sink.write(response).await
    }
}

struct FailingPipeline(ForwardError);

#[async_trait]
impl MessagePipeline for FailingPipeline {
    async fn process(
        &self,
        _query: &mut Message,
        _sink: &dyn ResponseSink,
    ) -> Result<(), ForwardError> {
        Err(self.0.clone())
    }
}

#[tokio::test]
async fn successful_forward_reports_no_error() {
    let use_case = ForwardQueryUseCase::new(Arc::new(EchoPipeline));
    let sink = CollectSink::default();
    let mut query = make_query("example.com.", 0x1234);

    let rcode = use_case.execute(&mut query, &sink).await;

    assert_eq!(rcode, ResponseCode::NoError);
    let responses = sink.responses.lock().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id(), 0x1234);
}

#[tokio::test]
async fn pipeline_failure_reports_servfail() {
    let use_case = ForwardQueryUseCase::new(Arc::new(FailingPipeline(
        ForwardError::NoPipeAvailable,
    )));
    let sink = CollectSink::default();
    let mut query = make_query("example.com.", 7);

    let rcode = use_case.execute(&mut query, &sink).await;

    assert_eq!(rcode, ResponseCode::ServFail);
    assert!(sink.responses.lock().await.is_empty());
}

#[tokio::test]
async fn question_free_query_does_not_panic() {
    let use_case = ForwardQueryUseCase::new(Arc::new(EchoPipeline));
    let sink = CollectSink::default();
    let mut query = Message::new();
    query.set_id(42);
    query.set_message_type(MessageType::Query);
    query.set_op_code(OpCode::Query);

    let rcode = use_case.execute(&mut query, &sink).await;

    assert_eq!(rcode, ResponseCode::NoError);
}
