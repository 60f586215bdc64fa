use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpListener;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::HubConfig,
    connection::{Connection, ConnectionError, MessageSink, MessageSource},
    room::Room,
    session,
};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Page served at `/`.
    pub index: PathBuf,
    pub hub: HubConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            index: PathBuf::from("index.html"),
            hub: HubConfig::default(),
        }
    }
}

/// HTTP front door: serves the index page and upgrades `/ws` into room
/// members.
pub struct Server {
    listener: TcpListener,
    room: Arc<Room>,
    index: PathBuf,
}

impl Server {
    pub fn new(listener: TcpListener, options: ServerOptions) -> Self {
        Self {
            listener,
            room: Arc::new(Room::new(options.hub)),
            index: options.index,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn room(&self) -> Arc<Room> {
        Arc::clone(&self.room)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            room,
            index,
        } = self;
        let app = router(Arc::clone(&room), index);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                handle_shutdown(&room);
            })
            .await
            .context("hub server failed")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_shutdown(room: &Room) {
    let clients = room.close();
    info!(clients, "hub shutting down");
}

fn router(room: Arc<Room>, index: PathBuf) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(index))
        .route("/ws", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(room)
}

async fn upgrade(ws: WebSocketUpgrade, State(room): State<Arc<Room>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let session = session::spawn(room, WsConnection::new(socket));
        let id = session.id();
        info!(client = %id, "client connected");
        session.wait().await;
        info!(client = %id, "client disconnected");
    })
}

/// An upgraded WebSocket seen as a [`Connection`].
///
/// Text and binary frames are both relayed as opaque bytes; outbound messages
/// are always written as binary frames.
pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Connection for WsConnection {
    type Source = WsSource;
    type Sink = WsSink;

    fn split(self) -> (WsSource, WsSink) {
        let (sink, stream) = self.socket.split();
        (WsSource { stream }, WsSink { sink })
    }
}

pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

impl MessageSource for WsSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(ConnectionError::transport)? {
                Message::Binary(data) => return Ok(Some(Bytes::from(data))),
                Message::Text(text) => return Ok(Some(Bytes::from(text))),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return Ok(None),
            }
        }
        Ok(None)
    }
}

pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

impl MessageSink for WsSink {
    async fn send(&mut self, message: Bytes) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Binary(message.to_vec()))
            .await
            .map_err(ConnectionError::transport)
    }

    async fn close(&mut self) {
        // The peer may already be gone; nothing useful to do with the error.
        let _ = self.sink.close().await;
    }
}
