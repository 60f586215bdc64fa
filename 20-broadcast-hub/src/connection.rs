//! Message-framed duplex channels the hub reads from and writes to.
//!
//! The hub never sees sockets. Anything that can be split into a
//! [`MessageSource`] and a [`MessageSink`] can join a room: the WebSocket
//! adapter in [`crate::server`] and the in-process [`memory`] pair used by the
//! tests both implement [`Connection`].

use std::{error::Error as StdError, future::Future};

use bytes::Bytes;
use thiserror::Error;

/// Terminal failure of one direction of a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("write deadline elapsed")]
    TimedOut,
    #[error("transport error")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
}

impl ConnectionError {
    pub fn transport<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Read half. `Ok(None)` means the peer hung up cleanly.
pub trait MessageSource: Send + 'static {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, ConnectionError>> + Send;
}

/// Write half.
pub trait MessageSink: Send + 'static {
    fn send(&mut self, message: Bytes) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Best-effort close; errors are not interesting once we are leaving.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// A duplex channel that can be driven by one reader and one writer at once.
pub trait Connection: Send + 'static {
    type Source: MessageSource;
    type Sink: MessageSink;

    fn split(self) -> (Self::Source, Self::Sink);
}

pub mod memory {
    //! Channel-backed connections for tests and in-process embedding.

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::{Connection, ConnectionError, MessageSink, MessageSource};

    type Inbound = Result<Bytes, ConnectionError>;

    /// Creates a connected pair. `capacity` bounds each direction, so a peer
    /// that never calls [`MemoryPeer::recv`] eventually stalls the writer.
    pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let connection = MemoryConnection {
            source: MemorySource { inbound: inbound_rx },
            sink: MemorySink {
                outbound: Some(outbound_tx),
            },
        };
        let peer = MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        };
        (connection, peer)
    }

    /// The hub's side of the pair.
    pub struct MemoryConnection {
        source: MemorySource,
        sink: MemorySink,
    }

    impl Connection for MemoryConnection {
        type Source = MemorySource;
        type Sink = MemorySink;

        fn split(self) -> (MemorySource, MemorySink) {
            (self.source, self.sink)
        }
    }

    pub struct MemorySource {
        inbound: mpsc::Receiver<Inbound>,
    }

    impl MessageSource for MemorySource {
        async fn recv(&mut self) -> Result<Option<Bytes>, ConnectionError> {
            match self.inbound.recv().await {
                Some(Ok(message)) => Ok(Some(message)),
                Some(Err(err)) => Err(err),
                None => Ok(None),
            }
        }
    }

    pub struct MemorySink {
        outbound: Option<mpsc::Sender<Bytes>>,
    }

    impl MessageSink for MemorySink {
        async fn send(&mut self, message: Bytes) -> Result<(), ConnectionError> {
            let outbound = self.outbound.as_ref().ok_or(ConnectionError::Closed)?;
            outbound
                .send(message)
                .await
                .map_err(|_| ConnectionError::Closed)
        }

        async fn close(&mut self) {
            self.outbound = None;
        }
    }

    /// The remote participant's side of the pair.
    pub struct MemoryPeer {
        inbound: Option<mpsc::Sender<Inbound>>,
        outbound: mpsc::Receiver<Bytes>,
    }

    impl MemoryPeer {
        /// Sends a message towards the hub.
        pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), ConnectionError> {
            self.deliver(Ok(message.into())).await
        }

        /// Makes the hub's next read fail with `error`.
        pub async fn fail(&self, error: ConnectionError) -> Result<(), ConnectionError> {
            self.deliver(Err(error)).await
        }

        /// Ends the inbound stream; the hub observes a clean close.
        pub fn hang_up(&mut self) {
            self.inbound = None;
        }

        /// Next message written by the hub, or `None` once the hub closed.
        pub async fn recv(&mut self) -> Option<Bytes> {
            self.outbound.recv().await
        }

        async fn deliver(&self, item: Inbound) -> Result<(), ConnectionError> {
            let inbound = self.inbound.as_ref().ok_or(ConnectionError::Closed)?;
            inbound.send(item).await.map_err(|_| ConnectionError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_messages_both_ways() {
        let (connection, mut peer) = memory::pair(4);
        let (mut source, mut sink) = connection.split();

        peer.send(&b"ping"[..]).await.expect("peer send");
        let inbound = source.recv().await.expect("recv").expect("message");
        assert_eq!(inbound, Bytes::from_static(b"ping"));

        sink.send(Bytes::from_static(b"pong")).await.expect("sink send");
        assert_eq!(peer.recv().await, Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn injected_failure_surfaces_on_read() {
        let (connection, peer) = memory::pair(4);
        let (mut source, _sink) = connection.split();

        peer.fail(ConnectionError::Protocol("bad frame".into()))
            .await
            .expect("inject");
        let err = source.recv().await.expect_err("read should fail");
        assert!(matches!(err, ConnectionError::Protocol(reason) if reason == "bad frame"));
    }

    #[tokio::test]
    async fn hang_up_is_a_clean_close_and_close_ends_peer_stream() {
        let (connection, mut peer) = memory::pair(4);
        let (mut source, mut sink) = connection.split();

        peer.hang_up();
        assert!(source.recv().await.expect("clean close").is_none());

        sink.close().await;
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            sink.send(Bytes::from_static(b"late")).await,
            Err(ConnectionError::Closed)
        ));
    }
}
