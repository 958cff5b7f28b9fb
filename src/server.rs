//! TCP acceptor for the chat relay.
//!
//! Binds the listener, accepts connections, and runs one session task per
//! connection against the shared registry. A failing connection never
//! takes the acceptor down with it.

use crate::config::Config;
use crate::registry::Registry;
use crate::session::Session;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Last line every connected client sees when the server stops.
pub const SHUTDOWN_NOTICE: &str = "SERVER: The server is shutting down.";

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<Registry>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let registry = Registry::new(config.write_timeout);
        Server { config, registry }
    }

    /// Get a reference to the registry for testing
    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let addr = tokio::net::lookup_host(&self.config.listen)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("'{}' did not resolve to an address", self.config.listen),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr, self.config.backlog)?)?;
        info!(address = %listener.local_addr()?, "Server listening");
        Ok(listener)
    }

    /// Bind and serve until Ctrl-C.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await;
        Ok(())
    }

    /// Accept connections until `shutdown` resolves or accept fails for
    /// good, then close every remaining session.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr),
                    Err(e) if is_transient(&e) => {
                        debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection, no longer accepting");
                        break;
                    }
                },
            }
        }

        if !self.registry.is_empty() {
            info!(sessions = self.registry.len(), "Closing remaining sessions");
        }
        let closed = self.registry.close_all(SHUTDOWN_NOTICE).await;
        info!(sessions = closed, "Server stopped");
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        debug!(peer = %addr, "New connection");
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let reason = Session::new(reader, registry, addr.to_string())
                .run(writer)
                .await;
            debug!(peer = %addr, %reason, "Connection closed");
        });
    }
}

/// Errors that concern a single incoming connection, not the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
