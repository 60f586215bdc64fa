use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Identity of one participant. Allocated by [`crate::room::Room::next_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Membership record held by the room.
///
/// The room keeps the only sending handle of the outbound queue, so dropping
/// a `Client` is what closes its queue. It is deliberately not `Clone`.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    outbound: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Queued,
    Full,
    Gone,
}

impl Client {
    /// Creates a client with a bounded outbound queue and returns the
    /// receiving end for its writer task.
    pub fn new(id: ClientId, capacity: usize) -> (Self, Outbox) {
        let (outbound, inbox) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let client = Self {
            id,
            outbound,
            shutdown: shutdown.clone(),
        };
        (client, Outbox { inbox, shutdown })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Fires when the client leaves the room, for whatever reason.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn try_enqueue(&self, message: Bytes) -> Enqueue {
        match self.outbound.try_send(message) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Gone,
        }
    }
}

impl Drop for Client {
    // Leaving the room closes the queue (the sender goes away with `self`)
    // and stops the reader.
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Receiving end of a client's outbound queue, owned by its writer task.
#[derive(Debug)]
pub struct Outbox {
    inbox: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
}

impl Outbox {
    /// Next queued message in FIFO order. Returns `None` once the client has
    /// been removed from its room and every buffered message was taken.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbox.recv().await
    }

    /// Non-suspending variant of [`Outbox::recv`], handy in tests.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbox.try_recv().ok()
    }

    /// Number of messages waiting to be written.
    pub fn len(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty()
    }

    /// True once the owning client has left the room.
    pub fn is_evicted(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
