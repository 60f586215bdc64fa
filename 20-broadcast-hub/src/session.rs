//! Per-client tasks: one reader feeding the room, one writer draining the
//! client's outbound queue.
//!
//! Both tasks end through ordinary suspension points. The writer stops when
//! its queue is closed by the room or a write fails; the reader stops when
//! its connection fails or the client's shutdown token fires. Each does its
//! own `Room::leave`, which is idempotent, so it does not matter which one
//! notices first.

use std::{sync::Arc, time::Duration};

use tokio::{select, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{ClientId, Outbox},
    connection::{Connection, ConnectionError, MessageSink, MessageSource},
    room::Room,
};

/// Handles to the two tasks serving one client.
#[derive(Debug)]
pub struct Session {
    id: ClientId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Waits until both tasks have finished.
    pub async fn wait(self) {
        let Session { id, reader, writer } = self;
        let (reader, writer) = tokio::join!(reader, writer);
        for (task, result) in [("reader", reader), ("writer", writer)] {
            if let Err(err) = result {
                warn!(client = %id, task, error = ?err, "client task ended abnormally");
            }
        }
    }
}

/// Registers `connection` with `room` and starts its reader and writer.
pub fn spawn<C>(room: Arc<Room>, connection: C) -> Session
where
    C: Connection,
{
    let (source, sink) = connection.split();
    let (client, outbox) = room.new_client();
    let shutdown = client.shutdown_token();
    let write_timeout = room.config().write_timeout;
    let id = room.join(client);

    let writer = tokio::spawn(run_writer(
        Arc::clone(&room),
        id,
        outbox,
        sink,
        write_timeout,
    ));
    let reader = tokio::spawn(run_reader(room, id, source, shutdown));

    Session { id, reader, writer }
}

async fn run_reader<S>(room: Arc<Room>, id: ClientId, mut source: S, shutdown: CancellationToken)
where
    S: MessageSource,
{
    loop {
        select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(client = %id, "reader stopping; client left the room");
                break;
            }
            inbound = source.recv() => {
                match inbound {
                    Ok(Some(message)) => {
                        room.relay(id, message);
                    }
                    Ok(None) => {
                        debug!(client = %id, "peer closed the connection");
                        break;
                    }
                    Err(err) => {
                        debug!(client = %id, error = %err, "read failed");
                        break;
                    }
                }
            }
        }
    }

    room.leave(id);
}

async fn run_writer<K>(
    room: Arc<Room>,
    id: ClientId,
    mut outbox: Outbox,
    mut sink: K,
    write_timeout: Duration,
) where
    K: MessageSink,
{
    while let Some(message) = outbox.recv().await {
        let result = match timeout(write_timeout, sink.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::TimedOut),
        };
        if let Err(err) = result {
            debug!(client = %id, error = %err, "write failed");
            room.leave(id);
            break;
        }
    }

    // A peer that stopped reading can stall the close frame as well.
    if timeout(write_timeout, sink.close()).await.is_err() {
        debug!(client = %id, "close timed out");
    }
}
