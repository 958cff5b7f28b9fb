//! Shared membership of connected sessions.
//!
//! The registry is the only state shared between sessions:
//! - Membership is a `BTreeMap` keyed by a monotonically increasing id,
//!   so iteration order is registration order
//! - All membership changes happen under one `RwLock` that is never held
//!   across an `.await`
//! - Broadcast iterates over a snapshot taken under the lock, then writes
//!   to each recipient through that recipient's own serialized writer

use crate::message::encode_lines;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

/// Process-unique session identifier, allocated at registration.
pub type SessionId = u64;

/// Outbound half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The outbound side of one registered session.
///
/// Every write to the connection goes through `writer`, so a broadcast
/// and a command reply aimed at the same client never interleave.
pub struct Peer {
    id: SessionId,
    name: String,
    writer: Mutex<BoxedWriter>,
    write_timeout: Duration,
    /// True while the peer is a member of the registry.
    live: AtomicBool,
    hangup: Notify,
}

impl Peer {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Write one line and flush it.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        self.send_lines(&[line]).await
    }

    /// Write a block of lines as a single unit and flush it.
    pub async fn send_lines<S: AsRef<str>>(&self, lines: &[S]) -> io::Result<()> {
        let buf = encode_lines(lines);
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        }
    }

    /// Shut down the outbound half of the connection.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    /// Resolves once the registry has removed the peer and hung up on it.
    pub async fn closed(&self) {
        self.hangup.notified().await;
    }

    fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }

    fn hang_up(&self) {
        // notify_one keeps a permit if the session is not waiting yet
        self.hangup.notify_one();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Thread-safe registry of live sessions
pub struct Registry {
    members: RwLock<BTreeMap<SessionId, Arc<Peer>>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl Registry {
    /// Create a new registry. `write_timeout` bounds every write to a peer.
    pub fn new(write_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            members: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        })
    }

    fn read_members(&self) -> RwLockReadGuard<'_, BTreeMap<SessionId, Arc<Peer>>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_members(&self) -> RwLockWriteGuard<'_, BTreeMap<SessionId, Arc<Peer>>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session. Duplicate names are allowed.
    pub fn register<W>(&self, name: impl Into<String>, writer: W) -> Arc<Peer>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut members = self.write_members();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer {
            id,
            name: name.into(),
            writer: Mutex::new(Box::new(writer)),
            write_timeout: self.write_timeout,
            live: AtomicBool::new(true),
            hangup: Notify::new(),
        });
        members.insert(id, Arc::clone(&peer));
        debug!(session = id, name = %peer.name, members = members.len(), "Registered");
        peer
    }

    /// Remove a session and wake its read loop.
    ///
    /// Returns `None` when the session was already removed.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Peer>> {
        let mut members = self.write_members();
        let peer = members.remove(&id)?;
        peer.retire();
        peer.hang_up();
        debug!(session = id, name = %peer.name, members = members.len(), "Unregistered");
        Some(peer)
    }

    /// Names of all registered sessions, in registration order.
    pub fn snapshot_names(&self) -> Vec<String> {
        self.read_members()
            .values()
            .map(|peer| peer.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_members().is_empty()
    }

    fn peers(&self) -> Vec<Arc<Peer>> {
        self.read_members().values().cloned().collect()
    }

    fn recipients(&self, from: SessionId) -> Vec<Arc<Peer>> {
        self.read_members()
            .values()
            .filter(|peer| peer.id != from)
            .cloned()
            .collect()
    }

    /// Deliver `line` to every session except `from`.
    ///
    /// A recipient whose write fails is unregistered; delivery to the rest
    /// continues. Returns the number of recipients that received the line.
    pub async fn broadcast(&self, from: SessionId, line: &str) -> usize {
        let mut delivered = 0;

        for peer in self.recipients(from) {
            if !peer.is_live() {
                continue;
            }
            match peer.send_line(line).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session = peer.id, name = %peer.name, error = %e, "Dropping unreachable recipient");
                    self.unregister(peer.id);
                }
            }
        }

        trace!(from, delivered, "Broadcast");
        delivered
    }

    /// Remove every session, send each the `notice`, then wake them all.
    ///
    /// Sessions are woken only after their notice is written, so their own
    /// teardown cannot close the connection ahead of it.
    pub async fn close_all(&self, notice: &str) -> usize {
        let removed: Vec<Arc<Peer>> = {
            let mut members = self.write_members();
            std::mem::take(&mut *members).into_values().collect()
        };
        for peer in &removed {
            peer.retire();
        }

        for peer in &removed {
            if let Err(e) = peer.send_line(notice).await {
                debug!(session = peer.id, error = %e, "Failed to deliver shutdown notice");
            }
            peer.hang_up();
        }
        removed.len()
    }
}
