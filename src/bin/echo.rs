//! Standalone WebSocket echo server
//!
//! Listens on `0.0.0.0:$PORT` (default 4000) and sends every text or binary
//! message back to its sender. Set `RUST_LOG=debug` to see request headers.

use std::net::SocketAddr;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wscore::error::Result;
use wscore::{Config, Event, WebSocketServer};

const DEFAULT_PORT: u16 = 4000;

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    // SO_REUSEPORT for kernel load balancing
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(TcpListener::from_std(socket.into())?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = bind(addr)?;
    info!("WebSocket echo server listening on ws://{}", addr);

    let server = WebSocketServer::new(Config::default());
    server
        .serve(listener, |mut ws, upgrade| async move {
            debug!(path = %upgrade.path, headers = ?upgrade.headers, "client connected");

            while let Some(event) = ws.recv().await {
                match event {
                    Event::Message(msg) => {
                        if let Err(e) = ws.send(msg).await {
                            debug!(error = %e, "echo failed");
                            break;
                        }
                    }
                    Event::Close(reason) => debug!(?reason, "client closed"),
                    Event::Error(kind) => warn!(?kind, "connection error"),
                    _ => {}
                }
            }
        })
        .await
}
