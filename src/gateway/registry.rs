//! Connection registry: every live transport session and the identity bound
//! to it.
//!
//! Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
//! entry for non-poisoning, fast locking. Operations on different connections
//! never contend on a shared lock.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::auth::verifier::{Identity, IdentityVerifier};
use crate::error::AuthError;
use crate::id;

use super::events::{ReadyMessage, WireEvent};

/// A message queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<WireEvent>),
    Ready(ReadyMessage),
    Close { code: u16, reason: String },
}

/// The write half of a connection's transport. Sends are non-blocking; the
/// per-connection writer task drains the queue to the socket.
pub type EventSink = mpsc::UnboundedSender<Outbound>;

struct ConnectionEntry {
    /// Bound exactly once during the authenticate handshake; `None` until
    /// then. Channel operations are refused while unset.
    identity: Option<Identity>,
    /// Channels this connection currently belongs to.
    channels: HashSet<String>,
    sink: EventSink,
}

/// Shared registry of all live gateway connections.
pub struct ConnectionRegistry {
    connections: DashMap<String, Mutex<ConnectionEntry>>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ConnectionRegistry {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            connections: DashMap::new(),
            verifier,
        }
    }

    /// Register a new, not-yet-authenticated connection. Returns its id.
    pub fn connect(&self, sink: EventSink) -> String {
        let connection_id = id::prefixed_ulid(id::prefix::CONNECTION);
        let entry = ConnectionEntry {
            identity: None,
            channels: HashSet::new(),
            sink,
        };
        self.connections
            .insert(connection_id.clone(), Mutex::new(entry));
        connection_id
    }

    /// Verify a credential and bind the resulting identity to the connection.
    ///
    /// The verifier is awaited before any map lock is taken. Binding happens
    /// exactly once; a second attempt fails with `AlreadyAuthenticated` even
    /// if the credential is valid.
    pub async fn authenticate(
        &self,
        connection_id: &str,
        credential: &str,
    ) -> Result<Identity, AuthError> {
        let identity = self.verifier.verify(credential).await?;

        // The connection may have disconnected while the verifier was in
        // flight.
        let entry = self
            .connections
            .get(connection_id)
            .ok_or(AuthError::UnknownConnection)?;
        let mut e = entry.lock();
        if e.identity.is_some() {
            return Err(AuthError::AlreadyAuthenticated);
        }
        e.identity = Some(identity.clone());
        Ok(identity)
    }

    /// The identity bound to a connection, if it has authenticated.
    pub fn identity(&self, connection_id: &str) -> Option<Identity> {
        let entry = self.connections.get(connection_id)?;
        let e = entry.lock();
        e.identity.clone()
    }

    pub fn is_authenticated(&self, connection_id: &str) -> bool {
        self.identity(connection_id).is_some()
    }

    /// The transport sink for a connection, if it is still live.
    pub fn sink(&self, connection_id: &str) -> Option<EventSink> {
        let entry = self.connections.get(connection_id)?;
        let e = entry.lock();
        Some(e.sink.clone())
    }

    /// Record that a connection joined a channel.
    pub fn track_join(&self, connection_id: &str, channel_id: &str) {
        if let Some(entry) = self.connections.get(connection_id) {
            entry.lock().channels.insert(channel_id.to_string());
        }
    }

    /// Record that a connection left a channel.
    pub fn track_leave(&self, connection_id: &str, channel_id: &str) {
        if let Some(entry) = self.connections.get(connection_id) {
            entry.lock().channels.remove(channel_id);
        }
    }

    /// Remove a connection from the registry. Returns the channels it held so
    /// the caller can purge its memberships. Idempotent.
    pub fn disconnect(&self, connection_id: &str) -> HashSet<String> {
        match self.connections.remove(connection_id) {
            Some((_, entry)) => entry.into_inner().channels,
            None => HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
