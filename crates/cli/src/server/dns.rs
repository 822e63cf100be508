use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_dns_application::ports::ResponseSink;
use conduit_dns_application::use_cases::ForwardQueryUseCase;
use conduit_dns_domain::Config;
use conduit_dns_infrastructure::dns::transport::read_frame;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::sinks::{TcpResponseSink, UdpResponseSink};

/// Starts the inbound servers: one UDP worker per core, each on its own
/// `SO_REUSEPORT` socket, plus a TCP listener sharing the same address.
pub async fn start_dns_server(
    config: &Config,
    use_case: Arc<ForwardQueryUseCase>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.dns_port)
        .parse()?;

    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut join_set: JoinSet<()> = JoinSet::new();

    for worker in 0..num_workers {
        let socket = Arc::new(create_udp_socket(addr)?);
        let use_case = Arc::clone(&use_case);
        join_set.spawn(run_udp_worker(socket, use_case, worker));
    }

    let listener = TcpListener::bind(addr).await?;
    join_set.spawn(run_tcp_listener(listener, Arc::clone(&use_case)));

    info!(bind_address = %addr, num_workers, "DNS server ready");

    while join_set.join_next().await.is_some() {}
    Ok(())
}

fn create_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

async fn run_udp_worker(socket: Arc<UdpSocket>, use_case: Arc<ForwardQueryUseCase>, worker: usize) {
    let mut recv_buf = [0u8; 4096];

    loop {
        let (len, peer) = match socket.recv_from(&mut recv_buf).await {
            Ok(received) => received,
            Err(e) => {
                error!(worker, error = %e, "UDP recv error");
                continue;
            }
        };

        let mut query = match Message::from_vec(&recv_buf[..len]) {
            Ok(query) => query,
            Err(e) => {
                debug!(worker, peer = %peer, error = %e, "undecodable query dropped");
                continue;
            }
        };

        // Spawning keeps the recv loop free while the query is in flight.
        let use_case = Arc::clone(&use_case);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let sink = UdpResponseSink::new(socket, peer);
            answer_query(&use_case, &mut query, &sink).await;
        });
    }
}

async fn run_tcp_listener(listener: TcpListener, use_case: Arc<ForwardQueryUseCase>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "TCP accept error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let use_case = Arc::clone(&use_case);
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_client(stream, &use_case).await {
                debug!(peer = %peer, error = %e, "TCP client error");
            }
        });
    }
}

/// Reads length-prefixed queries off one client connection, answering
/// each from its own task so inbound pipelining works too.
async fn handle_tcp_client(
    stream: TcpStream,
    use_case: &Arc<ForwardQueryUseCase>,
) -> io::Result<()> {
    let (mut read_half, write_half) = stream.into_split();
    let sink = Arc::new(TcpResponseSink::new(write_half));

    loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut query = match Message::from_vec(&frame) {
            Ok(query) => query,
            Err(e) => {
                debug!(error = %e, "undecodable TCP query, closing connection");
                return Ok(());
            }
        };

        let use_case = Arc::clone(use_case);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            answer_query(&use_case, &mut query, sink.as_ref()).await;
        });
    }
}

/// Runs one query through the forwarder. On failure the client still
/// gets an answer: a response synthesized from the query carrying the
/// resulting code.
async fn answer_query(use_case: &ForwardQueryUseCase, query: &mut Message, sink: &dyn ResponseSink) {
    if query.queries().is_empty() {
        let _ = sink.write(error_response(query, ResponseCode::FormErr)).await;
        return;
    }

    let rcode = use_case.execute(query, sink).await;
    if rcode != ResponseCode::NoError {
        if let Err(e) = sink.write(error_response(query, rcode)).await {
            debug!(error = %e, "failed to deliver error response");
        }
    }
}

fn error_response(query: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(query.op_code());
    response.set_recursion_desired(query.recursion_desired());
    response.set_recursion_available(true);
    response.set_response_code(code);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    response
}
