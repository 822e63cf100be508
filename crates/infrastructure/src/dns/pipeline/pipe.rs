use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use conduit_dns_domain::{ConnConfig, ForwardConfig, ForwardError};
use hickory_proto::op::Message;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::driver::PipeDriver;
use super::sender_cache::SenderCache;
use crate::dns::transport::{encode_message, read_frame, write_frame};

/// Process-unique pipe ids for log correlation.
static PIPE_ID_GEN: AtomicUsize = AtomicUsize::new(0);

/// The outbound queue is a hand-off point, not a buffer: admitted
/// requests wait in `process` until the writer picks them up.
const WRITE_QUEUE_CAPACITY: usize = 1;

/// Per-operation deadlines for one pipe. Dial, read and write bound a
/// single I/O operation; `request` bounds the whole rendezvous;
/// `finalize` is the reader's drain window after a writer failure.
#[derive(Debug, Clone)]
pub(super) struct PipeTimeouts {
    pub dial: Duration,
    pub read: Duration,
    pub write: Duration,
    pub finalize: Duration,
    pub request: Duration,
}

impl From<&ForwardConfig> for PipeTimeouts {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            dial: Duration::from_millis(config.dial_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
            write: Duration::from_millis(config.write_timeout_ms),
            finalize: Duration::from_millis(config.finalize_timeout_ms),
            request: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

/// One request queued for the writer: the remapped pipe-local ID plus
/// the encoded wire form.
struct Outbound {
    id: u16,
    wire: Vec<u8>,
}

/// A single TCP connection to one upstream, multiplexing many in-flight
/// queries (RFC 7766). A reader task demultiplexes responses by message
/// ID into the sender cache; a writer task serializes outgoing queries.
/// Any transport failure drains the pipe: admissions stop, the driver
/// drops it from the pool, and queued requests are handed back as
/// retryable so the driver can reissue them on another pipe.
pub(super) struct Pipe {
    id: usize,
    primary: bool,
    driver: Weak<PipeDriver>,
    timeouts: PipeTimeouts,
    cache: SenderCache,
    write_tx: mpsc::Sender<Outbound>,
    write_ready: Mutex<bool>,
    done_r: CancellationToken,
    done_w: CancellationToken,
}

impl Pipe {
    /// Creates the pipe and kicks off the dial in the background; no
    /// I/O happens on the caller. The driver hears the outcome through
    /// `pipe_ready` or `pipe_init_failed`.
    pub(super) fn spawn(
        driver: &Arc<PipeDriver>,
        primary: bool,
        upstream: ConnConfig,
        timeouts: PipeTimeouts,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let pipe = Arc::new(Self {
            id: PIPE_ID_GEN.fetch_add(1, Ordering::Relaxed),
            primary,
            driver: Arc::downgrade(driver),
            timeouts,
            cache: SenderCache::default(),
            write_tx,
            write_ready: Mutex::new(false),
            done_r: CancellationToken::new(),
            done_w: CancellationToken::new(),
        });

        debug!(pipe = pipe.id, primary, upstream = %upstream, "pipe initializing");
        tokio::spawn(Arc::clone(&pipe).init_conn(upstream, write_rx));

        pipe
    }

    pub(super) fn id(&self) -> usize {
        self.id
    }

    pub(super) fn is_primary(&self) -> bool {
        self.primary
    }

    async fn init_conn(self: Arc<Self>, upstream: ConnConfig, write_rx: mpsc::Receiver<Outbound>) {
        let stream = match timeout(
            self.timeouts.dial,
            TcpStream::connect((upstream.hostname.as_str(), upstream.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(pipe = self.id, upstream = %upstream, error = %e, "dial failed");
                if let Some(driver) = self.driver.upgrade() {
                    driver.pipe_init_failed(&self);
                }
                return;
            }
            Err(_) => {
                warn!(pipe = self.id, upstream = %upstream, "dial timed out");
                if let Some(driver) = self.driver.upgrade() {
                    driver.pipe_init_failed(&self);
                }
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(pipe = self.id, error = %e, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(Arc::clone(&self).read_loop(read_half));
        let writer = tokio::spawn(Arc::clone(&self).write_loop(write_half, write_rx));
        tokio::spawn(Arc::clone(&self).finalize(reader, writer));

        if let Some(driver) = self.driver.upgrade() {
            driver.pipe_ready(Arc::clone(&self));
        }
    }

    fn is_write_ready(&self) -> bool {
        *self.write_ready.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_write_ready(&self, ready: bool) {
        *self.write_ready.lock().unwrap_or_else(|e| e.into_inner()) = ready;
        debug!(pipe = self.id, ready, "writer ready state");
    }

    /// Admits one query: remaps its ID into the cache, queues it for the
    /// writer, then waits for the response, a pipe error, or the request
    /// timeout. The caller's message ID is restored on every exit path.
    pub(super) async fn process(&self, msg: &mut Message) -> Result<Message, ForwardError> {
        if !self.is_write_ready() {
            trace!(pipe = self.id, "writer not ready");
            return Err(ForwardError::WriteNotReady);
        }

        let (original_id, response_rx, error_rx) = self.cache.add(msg);
        let pipe_local_id = msg.id();

        let wire = match encode_message(msg) {
            Ok(wire) => wire,
            Err(e) => {
                self.cache.take(pipe_local_id);
                msg.set_id(original_id);
                return Err(e);
            }
        };

        if self
            .write_tx
            .send(Outbound {
                id: pipe_local_id,
                wire,
            })
            .await
            .is_err()
        {
            // The writer exited between the readiness check and the send.
            self.cache.take(pipe_local_id);
            msg.set_id(original_id);
            return Err(ForwardError::WriteNotReady);
        }

        // A dropped handle carries no verdict: the other channel, or the
        // timeout, decides. This mirrors blocking forever on a channel
        // nobody holds.
        let response_wins = async {
            match response_rx.await {
                Ok(response) => response,
                Err(_) => std::future::pending().await,
            }
        };
        let error_wins = async {
            match error_rx.await {
                Ok(err) => err,
                Err(_) => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            mut response = response_wins => {
                trace!(pipe = self.id, id = pipe_local_id, "response delivered");
                response.set_id(original_id);
                Ok(response)
            }
            err = error_wins => {
                debug!(pipe = self.id, id = pipe_local_id, error = %err, "request errored");
                Err(err)
            }
            _ = sleep(self.timeouts.request) => {
                debug!(pipe = self.id, id = pipe_local_id, "request timed out");
                self.cache.take(pipe_local_id);
                Err(ForwardError::RequestTimeout)
            }
        };

        msg.set_id(original_id);
        result
    }

    /// Demultiplexes responses into waiting senders until the pipe dies.
    /// Read deadlines double as a liveness heartbeat: an idle tick just
    /// re-arms the read and lets the terminate signal be observed.
    async fn read_loop(self: Arc<Self>, mut read_half: OwnedReadHalf) {
        loop {
            tokio::select! {
                _ = self.done_r.cancelled() => {
                    debug!(pipe = self.id, "reader stopped");
                    return;
                }
                read = timeout(self.timeouts.read, read_frame(&mut read_half)) => {
                    let frame = match read {
                        // Deadline with no data; a deadline mid-frame
                        // desyncs the stream and the next read fails.
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            debug!(pipe = self.id, error = %e, "read failed, draining pipe");
                            self.fail_from_reader();
                            return;
                        }
                        Ok(Ok(frame)) => frame,
                    };

                    match Message::from_vec(&frame) {
                        Ok(response) => {
                            trace!(pipe = self.id, id = response.id(), "response received");
                            if let Some(sender) = self.cache.take(response.id()) {
                                // A failed send means the waiter already
                                // timed out; the response is dropped.
                                let _ = sender.response.send(response);
                            }
                        }
                        Err(e) => {
                            debug!(pipe = self.id, error = %e, "undecodable response, draining pipe");
                            self.fail_from_reader();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Reader-originated teardown: stop admissions, leave the pool, and
    /// signal the writer, which hands its queue back before exiting.
    fn fail_from_reader(&self) {
        self.set_write_ready(false);
        self.done_r.cancel();
        if let Some(driver) = self.driver.upgrade() {
            driver.remove_pipe(self);
        }
        self.done_w.cancel();
    }

    /// Serializes queued requests onto the connection. Any write failure
    /// or deadline drains the pipe.
    async fn write_loop(
        self: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut write_rx: mpsc::Receiver<Outbound>,
    ) {
        self.set_write_ready(true);
        loop {
            tokio::select! {
                _ = self.done_w.cancelled() => {
                    self.resurrect(&mut write_rx);
                    debug!(pipe = self.id, "writer stopped");
                    return;
                }
                queued = write_rx.recv() => {
                    let Some(outbound) = queued else {
                        // All senders dropped; the pipe is being released.
                        return;
                    };
                    match timeout(self.timeouts.write, write_frame(&mut write_half, &outbound.wire)).await {
                        Ok(Ok(())) => {
                            trace!(pipe = self.id, id = outbound.id, "request written");
                        }
                        Ok(Err(e)) => {
                            debug!(pipe = self.id, id = outbound.id, error = %e, "write failed, draining pipe");
                            self.fail_from_writer(outbound, &mut write_rx);
                            return;
                        }
                        Err(_) => {
                            debug!(pipe = self.id, id = outbound.id, "write deadline elapsed, draining pipe");
                            self.fail_from_writer(outbound, &mut write_rx);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Writer-originated teardown. The failing request is errored first,
    /// then the remaining queue is resurrected; the reader keeps
    /// draining in-flight responses for the finalize window.
    fn fail_from_writer(&self, failing: Outbound, write_rx: &mut mpsc::Receiver<Outbound>) {
        self.set_write_ready(false);
        if let Some(driver) = self.driver.upgrade() {
            driver.remove_pipe(self);
        }
        self.done_w.cancel();

        let done_r = self.done_r.clone();
        let grace = self.timeouts.finalize;
        tokio::spawn(async move {
            sleep(grace).await;
            done_r.cancel();
        });

        if let Some(sender) = self.cache.take(failing.id) {
            let _ = sender.error.send(ForwardError::WriteNotReady);
        }
        self.resurrect(write_rx);
    }

    /// Hands every admitted-but-unwritten request back to its waiter as
    /// retryable, so the driver reissues it on another pipe.
    fn resurrect(&self, write_rx: &mut mpsc::Receiver<Outbound>) {
        while let Ok(outbound) = write_rx.try_recv() {
            if let Some(sender) = self.cache.take(outbound.id) {
                debug!(pipe = self.id, id = outbound.id, "resurrecting request");
                let _ = sender.error.send(ForwardError::WriteNotReady);
            }
        }
    }

    /// Waits for both loops; the connection halves close as the loops
    /// drop them.
    async fn finalize(self: Arc<Self>, reader: JoinHandle<()>, writer: JoinHandle<()>) {
        let _ = writer.await;
        let _ = reader.await;
        debug!(pipe = self.id, "pipe finalized");
    }
}
