#![allow(dead_code)]

pub mod mock_upstream;

pub use mock_upstream::{Behavior, MockBehavior, MockUpstream};

use std::str::FromStr;

use async_trait::async_trait;
use conduit_dns_application::ports::ResponseSink;
use conduit_dns_domain::{ConnConfig, ForwardConfig, ForwardError};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use tokio::sync::Mutex;

/// Pipeline tuning scaled down so failure scenarios resolve quickly.
pub fn test_config() -> ForwardConfig {
    ForwardConfig {
        upstreams: vec!["127.0.0.1".into()],
        primary_pipes: 2,
        secondary_pipes: 2,
        dial_timeout_ms: 250,
        read_timeout_ms: 50,
        write_timeout_ms: 50,
        finalize_timeout_ms: 200,
        request_timeout_ms: 300,
    }
}

pub fn upstream_of(addr: std::net::SocketAddr) -> ConnConfig {
    ConnConfig::new(addr.ip().to_string(), addr.port())
}

pub fn make_query(name: &str, id: u16) -> Message {
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

/// Collects every response delivered through the sink.
#[derive(Default)]
pub struct CollectSink {
    responses: Mutex<Vec<Message>>,
}

impl CollectSink {
    pub async fn take_all(&self) -> Vec<Message> {
        std::mem::take(&mut *self.responses.lock().await)
    }
}

#[async_trait]
impl ResponseSink for CollectSink {
    async fn write(&self, response: Message) -> Result<(), ForwardError> {
        self.responses.lock().await.push(response);
        Ok(())
    }
}
