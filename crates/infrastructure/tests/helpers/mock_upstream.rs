use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_dns_infrastructure::dns::transport::{encode_message, read_frame};
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{rdata::A, RData, Record, RecordType};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// What the upstream does with a query, keyed by question name.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer immediately with a fixed A record.
    Answer,
    /// Answer after the given delay.
    Delay(Duration),
    /// Swallow the query.
    Drop,
}

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Per-question-name overrides; everything else is answered.
    pub per_name: HashMap<String, Behavior>,
    /// Close the connection's write side after this many responses.
    pub close_after: Option<usize>,
    /// Drop the whole connection after reading this many queries, never
    /// answering the last one. The socket is closed with zero linger,
    /// so the drop arrives as a connection reset and the client's next
    /// write fails. Applies to the first accepted connection only;
    /// replacement connections get normal service.
    pub close_on_read: Option<usize>,
}

impl MockBehavior {
    pub fn answer_all() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, behavior: Behavior) -> Self {
        self.per_name.insert(name.to_string(), behavior);
        self
    }

    pub fn close_after(mut self, responses: usize) -> Self {
        self.close_after = Some(responses);
        self
    }

    pub fn close_on_read(mut self, queries: usize) -> Self {
        self.close_on_read = Some(queries);
        self
    }
}

/// A scriptable DNS-over-TCP upstream. Queries on one connection are
/// answered concurrently, so delayed answers arrive out of order, which
/// is exactly what a pipelining client has to cope with.
pub struct MockUpstream {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start(behavior: MockBehavior) -> io::Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let reset_armed = Arc::new(AtomicBool::new(behavior.close_on_read.is_some()));

        let accepted_count = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        if let Ok((stream, _peer)) = accepted {
                            accepted_count.fetch_add(1, Ordering::SeqCst);
                            let close_on_read = if reset_armed.swap(false, Ordering::SeqCst) {
                                // Zero linger turns the close into a
                                // reset, so the client's next write
                                // fails instead of landing in a dead
                                // send buffer.
                                let _ = stream.set_linger(Some(Duration::from_secs(0)));
                                behavior.close_on_read
                            } else {
                                None
                            };
                            tokio::spawn(handle_conn(stream, behavior.clone(), close_on_read));
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                addr,
                connections,
                shutdown_tx: Some(shutdown_tx),
            },
            addr,
        ))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted so far; a count above one means the client
    /// dialed a replacement.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_conn(stream: TcpStream, behavior: MockBehavior, close_on_read: Option<usize>) {
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(tokio::sync::Mutex::new(Some(write_half)));
    let answered = Arc::new(AtomicUsize::new(0));
    let mut queries_read = 0usize;

    loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let query = match Message::from_vec(&frame) {
            Ok(query) => query,
            Err(_) => return,
        };

        queries_read += 1;
        if close_on_read.is_some_and(|limit| queries_read >= limit) {
            // Drop both halves; with zero linger the connection resets
            // under the client's feet.
            *write_half.lock().await = None;
            return;
        }

        let name = query
            .queries()
            .first()
            .map(|q| q.name().to_string())
            .unwrap_or_default();
        let action = behavior
            .per_name
            .get(&name)
            .cloned()
            .unwrap_or(Behavior::Answer);

        let write_half = Arc::clone(&write_half);
        let answered = Arc::clone(&answered);
        let close_after = behavior.close_after;

        tokio::spawn(async move {
            match action {
                Behavior::Drop => return,
                Behavior::Delay(delay) => tokio::time::sleep(delay).await,
                Behavior::Answer => {}
            }

            let response = build_answer(&query);
            let wire = match encode_message(&response) {
                Ok(wire) => wire,
                Err(_) => return,
            };

            let mut guard = write_half.lock().await;
            let Some(writer) = guard.as_mut() else {
                return;
            };

            let mut framed = Vec::with_capacity(2 + wire.len());
            framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
            framed.extend_from_slice(&wire);
            if writer.write_all(&framed).await.is_err() {
                *guard = None;
                return;
            }

            let total = answered.fetch_add(1, Ordering::SeqCst) + 1;
            if close_after.is_some_and(|limit| total >= limit) {
                // Dropping the write half sends FIN; the client's reader
                // sees EOF and drains its pipe.
                *guard = None;
            }
        });
    }
}

fn build_answer(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(query.op_code());
    response.set_recursion_desired(query.recursion_desired());
    response.set_recursion_available(true);
    response.set_response_code(ResponseCode::NoError);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    if let Some(q) = query.queries().first() {
        if q.query_type() == RecordType::A {
            response.add_answer(Record::from_rdata(
                q.name().clone(),
                60,
                RData::A(A(std::net::Ipv4Addr::new(192, 0, 2, 1))),
            ));
        }
    }
    response
}
