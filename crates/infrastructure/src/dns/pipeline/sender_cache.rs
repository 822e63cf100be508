use std::sync::Mutex;

use conduit_dns_domain::ForwardError;
use hickory_proto::op::Message;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

/// Delivery handles for one in-flight request. Exactly one of the two
/// channels is fulfilled; dropping the struct abandons both.
pub(super) struct Sender {
    pub response: oneshot::Sender<Message>,
    pub error: oneshot::Sender<ForwardError>,
}

/// Correlation cache: maps each in-flight request's pipe-local message
/// ID to its delivery handles.
///
/// IDs come from a wrapping 16-bit counter. A wrap onto a still
/// in-flight ID displaces that entry and the displaced request times
/// out, which caps a single pipe at roughly 65k concurrent requests.
#[derive(Default)]
pub(super) struct SenderCache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: FxHashMap<u16, Sender>,
    id_gen: u16,
}

impl SenderCache {
    /// Remaps the message onto a fresh pipe-local ID and registers the
    /// rendezvous. Returns the caller's original ID together with the
    /// receiver halves. The lock is never held across a channel send.
    pub(super) fn add(
        &self,
        msg: &mut Message,
    ) -> (
        u16,
        oneshot::Receiver<Message>,
        oneshot::Receiver<ForwardError>,
    ) {
        let (response_tx, response_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let original_id = msg.id();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.id_gen = inner.id_gen.wrapping_add(1);
        let id = inner.id_gen;
        msg.set_id(id);
        inner.pending.insert(
            id,
            Sender {
                response: response_tx,
                error: error_tx,
            },
        );
        drop(inner);

        (original_id, response_rx, error_rx)
    }

    /// Removes and returns the delivery handles for `id`, if any. The
    /// caller fulfils them outside the lock.
    pub(super) fn take(&self, id: u16) -> Option<Sender> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.remove(&id)
    }
}
