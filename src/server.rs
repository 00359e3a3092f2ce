//! Tokio WebSocket server
//!
//! [`WebSocketServer`] performs the HTTP/1.1 upgrade on a byte stream and
//! spawns one task per connection that drives a sans-IO [`Connection`]
//! over the socket. The application talks to that task through a
//! [`WebSocket`] handle: events come out of a bounded channel, and while
//! that channel is full the task stops reading the socket.
//!
//! # Example
//!
//! ```ignore
//! use wscore::{Config, Event, WebSocketServer};
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! let server = WebSocketServer::new(Config::default());
//!
//! server.serve(listener, |mut ws, info| async move {
//!     println!("Connection to {}", info.path);
//!     while let Some(event) = ws.recv().await {
//!         if let Event::Message(msg) = event {
//!             ws.send(msg).await.ok();
//!         }
//!     }
//! }).await?;
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionState, Event};
use crate::error::{CloseReason, Error, Result};
use crate::handshake::{self, HandshakeNegotiator, HandshakeRejection};
use crate::message::Message;
use crate::{Config, RECV_BUFFER_SIZE};

/// Details of the accepted upgrade request
#[derive(Debug, Clone)]
pub struct UpgradeInfo {
    /// Request target
    pub path: String,
    /// Request headers (lower-case names)
    pub headers: HeaderMap,
    /// Negotiated `Sec-WebSocket-Version`
    pub version: u8,
}

const SERVER_OPEN: u8 = 0;
const SERVER_CLOSING: u8 = 1;

/// State shared by the listener and its connection tasks
struct Shared {
    state: AtomicU8,
    next_id: AtomicU64,
    connections: Mutex<HashSet<u64>>,
}

/// Removes a connection from the tracking set when its task ends
struct Registration {
    shared: Arc<Shared>,
    id: u64,
}

impl Registration {
    fn new(shared: &Arc<Shared>) -> Self {
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        shared.connections.lock().insert(id);
        Self {
            shared: Arc::clone(shared),
            id,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.connections.lock().remove(&self.id);
    }
}

/// WebSocket server over any `AsyncRead + AsyncWrite` stream
///
/// Cloning is cheap; clones share the shutdown flag and the set of live
/// connections.
#[derive(Clone)]
pub struct WebSocketServer {
    config: Config,
    negotiator: HandshakeNegotiator,
    shared: Arc<Shared>,
}

impl WebSocketServer {
    /// Create a new server with the given configuration
    pub fn new(config: Config) -> Self {
        Self {
            negotiator: config.negotiator(),
            config,
            shared: Arc::new(Shared {
                state: AtomicU8::new(SERVER_OPEN),
                next_id: AtomicU64::new(0),
                connections: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Get the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop accepting upgrades; later requests are answered with 503
    ///
    /// Connections that are already open are left alone.
    pub fn shutdown(&self) {
        if self.shared.state.swap(SERVER_CLOSING, Ordering::AcqRel) == SERVER_OPEN {
            debug!("server shutting down");
        }
    }

    /// Check if [`WebSocketServer::shutdown`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == SERVER_CLOSING
    }

    /// Number of connections whose task is still running
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Accept a WebSocket connection on an existing stream
    ///
    /// Reads the request head, answers it, and on success spawns the task
    /// driving the connection. Rejected requests get their HTTP error
    /// response before this returns [`Error::HandshakeRejected`].
    pub async fn accept<S>(&self, mut stream: S) -> Result<(WebSocket, UpgradeInfo)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut buf = BytesMut::with_capacity(1024);
        let (request, head_len) = loop {
            match handshake::parse_request(&buf, self.config.max_handshake_size) {
                Ok(Some(parsed)) => break parsed,
                Ok(None) => {}
                Err(e) => {
                    let rejection = HandshakeRejection::bad_request("Malformed request");
                    let _ = reject(&mut stream, rejection).await;
                    return Err(e);
                }
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(Error::ConnectionReset);
            }
        };
        trace!(
            method = %request.method,
            path = %request.path,
            headers = ?request.headers,
            "upgrade request"
        );

        if !handshake::is_upgrade_request(&request.headers) {
            return Err(reject(&mut stream, HandshakeRejection::upgrade_required()).await);
        }

        let accept = match self.negotiator.negotiate(&request.method, &request.headers) {
            Ok(accept) => accept,
            Err(rejection) => return Err(reject(&mut stream, rejection).await),
        };

        // Only valid upgrades learn that the server is going away
        if self.is_shutting_down() {
            return Err(reject(&mut stream, HandshakeRejection::service_unavailable()).await);
        }

        stream.write_all(&accept.response()).await?;
        stream.flush().await?;
        debug!(path = %request.path, version = accept.version, "websocket upgraded");

        let leftover = buf.split_off(head_len).freeze();
        let info = UpgradeInfo {
            path: request.path,
            headers: request.headers,
            version: accept.version,
        };

        let mut conn = Connection::new(&self.config);
        conn.open()?;

        let capacity = self.config.event_queue_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let state = Arc::new(AtomicU8::new(state_to_u8(conn.state())));

        let driver = Driver {
            conn,
            commands: command_rx,
            events: event_tx,
            state: Arc::clone(&state),
            close_timeout: self.config.close_timeout,
            registration: Registration::new(&self.shared),
        };
        tokio::spawn(driver.run(stream, leftover));

        let ws = WebSocket {
            events: event_rx,
            commands: command_tx,
            state,
        };
        Ok((ws, info))
    }

    /// Serve WebSocket connections from a TCP listener
    ///
    /// Every accepted socket gets its own task; failed handshakes are
    /// logged and dropped. Only returns if accepting a socket fails.
    pub async fn serve<F, Fut>(&self, listener: TcpListener, handler: F) -> Result<()>
    where
        F: Fn(WebSocket, UpgradeInfo) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let (stream, addr) = listener.accept().await.map_err(Error::Io)?;
            if let Err(e) = stream.set_nodelay(true) {
                trace!(peer = %addr, error = %e, "set_nodelay failed");
            }

            let handler = handler.clone();
            let server = self.clone();

            tokio::spawn(async move {
                match server.accept(stream).await {
                    Ok((ws, info)) => handler(ws, info).await,
                    Err(e) => debug!(peer = %addr, error = %e, "websocket handshake failed"),
                }
            });
        }
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Write an HTTP error response and turn it into an error
async fn reject<S>(stream: &mut S, rejection: HandshakeRejection) -> Error
where
    S: AsyncWrite + Unpin,
{
    warn!(status = %rejection.status, reason = rejection.message, "rejecting upgrade");
    let written = async {
        stream.write_all(&rejection.response()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };
    if let Err(e) = written.await {
        debug!(error = %e, "failed to write handshake rejection");
    }
    Error::HandshakeRejected(rejection.status)
}

fn state_to_u8(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Connecting => 0,
        ConnectionState::Open => 1,
        ConnectionState::Closing => 2,
        ConnectionState::Closed => 3,
    }
}

fn state_from_u8(value: u8) -> ConnectionState {
    match value {
        0 => ConnectionState::Connecting,
        1 => ConnectionState::Open,
        2 => ConnectionState::Closing,
        _ => ConnectionState::Closed,
    }
}

enum Command {
    Send {
        msg: Message,
        chunk_size: Option<usize>,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping {
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Per-connection task state
struct Driver {
    conn: Connection,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
    state: Arc<AtomicU8>,
    close_timeout: Duration,
    registration: Registration,
}

impl Driver {
    async fn run<S>(mut self, mut stream: S, leftover: Bytes)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = self.registration.id;
        debug!(id, "connection task started");

        if !leftover.is_empty() {
            // Cannot fail, the connection is open
            let _ = self.conn.receive(leftover);
        }

        let mut read_buf = BytesMut::with_capacity(RECV_BUFFER_SIZE);
        let close_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(close_timer);
        let mut timer_armed = false;
        // Event the application has no room for yet
        let mut pending: Option<Event> = None;
        let mut commands_open = true;
        let mut transport_ok = true;

        loop {
            if transport_ok && !self.flush(&mut stream).await {
                transport_ok = false;
            }
            self.publish_state();
            self.deliver(&mut pending);

            if self.conn.wants_end() || !transport_ok {
                break;
            }

            if self.conn.close_timer_armed() != timer_armed {
                timer_armed = self.conn.close_timer_armed();
                if timer_armed {
                    close_timer.as_mut().reset(Instant::now() + self.close_timeout);
                }
            }

            if pending.is_none() {
                read_buf.reserve(RECV_BUFFER_SIZE);
            }

            tokio::select! {
                res = stream.read_buf(&mut read_buf), if pending.is_none() => match res {
                    Ok(0) => {
                        debug!(id, "peer ended the socket");
                        self.conn.on_transport_end();
                    }
                    Ok(_) => {
                        let chunk = read_buf.split().freeze();
                        let _ = self.conn.receive(chunk);
                    }
                    Err(e) => {
                        self.conn.on_transport_error(&e);
                        transport_ok = false;
                    }
                },
                permit = self.events.reserve(), if pending.is_some() => {
                    if let (Ok(permit), Some(event)) = (permit, pending.take()) {
                        permit.send(event);
                    }
                    // Dropped otherwise: the receiver is gone
                    if self.conn.is_paused() {
                        self.conn.resume();
                    }
                },
                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(cmd) => Self::execute(&mut self.conn, cmd),
                    None => {
                        commands_open = false;
                        trace!(id, "handle dropped, closing");
                        let _ = self.conn.close(CloseReason::NORMAL, "");
                    }
                },
                _ = &mut close_timer, if timer_armed => {
                    timer_armed = false;
                    self.conn.on_close_timeout();
                },
            }
        }

        if transport_ok {
            if let Err(e) = stream.shutdown().await {
                trace!(id, error = %e, "socket shutdown failed");
            }
        }
        self.publish_state();

        // Whatever the application has not seen yet
        let remaining = pending
            .into_iter()
            .chain(std::iter::from_fn(|| self.conn.poll_event()));
        for event in remaining {
            if self.events.send(event).await.is_err() {
                break;
            }
        }
        debug!(id, "connection task finished");
    }

    /// Write all queued frames; false if the socket failed
    async fn flush<S>(&mut self, stream: &mut S) -> bool
    where
        S: AsyncWrite + Unpin,
    {
        let mut wrote = false;
        while let Some(out) = self.conn.poll_transmit() {
            if let Err(e) = stream.write_all(&out).await {
                self.conn.on_transport_error(&e);
                return false;
            }
            wrote = true;
        }
        if wrote {
            if let Err(e) = stream.flush().await {
                self.conn.on_transport_error(&e);
                return false;
            }
        }
        true
    }

    /// Move connection events into the channel until it is full
    fn deliver(&mut self, pending: &mut Option<Event>) {
        if pending.is_some() {
            return;
        }
        while let Some(event) = self.conn.poll_event() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    trace!("event queue full, pausing");
                    *pending = Some(event);
                    self.conn.pause();
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Apply an application command; borrows only the connection so a
    /// pending event permit can stay alive
    fn execute(conn: &mut Connection, cmd: Command) {
        match cmd {
            Command::Send {
                msg,
                chunk_size,
                reply,
            } => {
                let res = match chunk_size {
                    Some(size) => conn.send_fragmented(&msg, size),
                    None => conn.send(&msg),
                };
                let _ = reply.send(res);
            }
            Command::Ping { payload, reply } => {
                let _ = reply.send(conn.ping(&payload));
            }
            Command::Close {
                code,
                reason,
                reply,
            } => {
                let _ = reply.send(conn.close(code, &reason));
            }
        }
    }

    fn publish_state(&self) {
        self.state.store(state_to_u8(self.conn.state()), Ordering::Release);
    }
}

/// Application handle to one WebSocket connection
///
/// Dropping the handle starts a normal close.
pub struct WebSocket {
    events: mpsc::Receiver<Event>,
    commands: mpsc::Sender<Command>,
    state: Arc<AtomicU8>,
}

impl WebSocket {
    /// Receive the next event, `None` once the connection task is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Last state published by the connection task
    pub fn state(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    async fn call<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        response.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Send a message as a single frame
    pub async fn send(&self, msg: impl Into<Message>) -> Result<()> {
        let msg = msg.into();
        self.call(|reply| Command::Send {
            msg,
            chunk_size: None,
            reply,
        })
        .await
    }

    /// Send a message split into frames of at most `chunk_size` bytes
    pub async fn send_fragmented(&self, msg: impl Into<Message>, chunk_size: usize) -> Result<()> {
        let msg = msg.into();
        self.call(|reply| Command::Send {
            msg,
            chunk_size: Some(chunk_size),
            reply,
        })
        .await
    }

    /// Send a ping (payload cut to 125 bytes)
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.call(|reply| Command::Ping { payload, reply }).await
    }

    /// Start the closing handshake
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        if !CloseReason::is_valid_code(code) {
            return Err(Error::InvalidCloseCode(code));
        }
        let reason = reason.to_string();
        self.call(|reply| Command::Close {
            code,
            reason,
            reply,
        })
        .await
    }
}

impl futures_core::Stream for WebSocket {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.poll_recv(cx)
    }
}
