//! Per-connection session lifecycle.
//!
//! A session moves through `Connecting → Active → Closing → Closed`:
//! - `Connecting`: waiting for the first line, which is the display name
//! - `Active`: registered; every line is dispatched as a command or chat
//! - `Closing`: `/leave`, end-of-stream, an I/O error, or removal from the
//!   registry was seen; the session unregisters and announces its exit
//! - `Closed`: the connection has been released
//!
//! Teardown runs no matter why the read loop stopped. The departure is
//! announced only if the arrival was.

use crate::command::{dispatch, Action};
use crate::message::{decode_line, Envelope};
use crate::registry::{Peer, Registry};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, trace};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The client sent `/leave`.
    Leave,
    /// The client closed its side of the connection.
    EndOfStream,
    ReadError(io::Error),
    WriteError(io::Error),
    /// Someone else removed the session from the registry.
    Removed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Leave => f.write_str("left"),
            CloseReason::EndOfStream => f.write_str("end of stream"),
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::WriteError(e) => write!(f, "write error: {e}"),
            CloseReason::Removed => f.write_str("removed from registry"),
        }
    }
}

pub fn welcome_notice(name: &str) -> String {
    format!("[SERVER] Welcome to the chat, {name}! Type /help to see the available commands.")
}

pub fn joined_notice(name: &str) -> String {
    format!("{name} has entered the chat.")
}

pub fn left_notice(name: &str) -> String {
    format!("{name} has left the chat.")
}

/// One connected client.
pub struct Session<R> {
    reader: BufReader<R>,
    registry: Arc<Registry>,
    /// Remote address or other label used in logs.
    label: String,
    state: SessionState,
    /// Set once the join notice has gone out to the other sessions.
    announced: bool,
    line: Vec<u8>,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, registry: Arc<Registry>, label: impl Into<String>) -> Self {
        Session {
            reader: BufReader::new(reader),
            registry,
            label: label.into(),
            state: SessionState::Connecting,
            announced: false,
            line: Vec::with_capacity(256),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(peer = %self.label, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    /// Read one line. `Ok(None)` means end-of-stream.
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(decode_line(&self.line)))
    }

    /// Drive the session until it closes, writing to `writer`.
    pub async fn run<W>(mut self, writer: W) -> CloseReason
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = match self.read_line().await {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(peer = %self.label, "Closed before sending a name");
                self.transition(SessionState::Closed);
                return CloseReason::EndOfStream;
            }
            Err(e) => {
                debug!(peer = %self.label, error = %e, "Failed to read name");
                self.transition(SessionState::Closed);
                return CloseReason::ReadError(e);
            }
        };

        let peer = self.registry.register(name, writer);
        self.transition(SessionState::Active);
        info!(peer = %self.label, session = peer.id(), name = %peer.name(), "Joined");

        let reason = self.serve(&peer).await;

        self.transition(SessionState::Closing);
        self.teardown(&peer, &reason).await;
        self.transition(SessionState::Closed);
        reason
    }

    async fn serve(&mut self, peer: &Peer) -> CloseReason {
        if let Err(e) = peer.send_line(&welcome_notice(peer.name())).await {
            return CloseReason::WriteError(e);
        }
        self.registry
            .broadcast(peer.id(), &joined_notice(peer.name()))
            .await;
        self.announced = true;

        loop {
            let line = tokio::select! {
                read = self.read_line() => match read {
                    Ok(Some(line)) => line,
                    Ok(None) => return CloseReason::EndOfStream,
                    Err(e) => return CloseReason::ReadError(e),
                },
                _ = peer.closed() => return CloseReason::Removed,
            };

            let envelope = Envelope::parse_from(&line, peer.name());
            let action = dispatch(&envelope, &self.registry);
            trace!(session = peer.id(), ?action, "Dispatched");

            match action {
                Action::Leave => return CloseReason::Leave,
                Action::Reply(lines) => {
                    if let Err(e) = peer.send_lines(&lines).await {
                        return CloseReason::WriteError(e);
                    }
                }
                Action::Broadcast(line) => {
                    self.registry.broadcast(peer.id(), &line).await;
                }
                Action::Ignore => {}
            }
        }
    }

    async fn teardown(&self, peer: &Peer, reason: &CloseReason) {
        self.registry.unregister(peer.id());
        if self.announced {
            self.registry
                .broadcast(peer.id(), &left_notice(peer.name()))
                .await;
        }
        if let Err(e) = peer.shutdown().await {
            debug!(session = peer.id(), error = %e, "Shutdown failed");
        }
        info!(peer = %self.label, session = peer.id(), name = %peer.name(), %reason, "Left");
    }
}
