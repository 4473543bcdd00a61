//! Gateway error taxonomy.
//!
//! Failures scoped to a single connection or channel stay contained there:
//! only [`AuthError`] is fatal to the connection that raised it.

use std::fmt;

/// Authentication failure at the transport handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The credential was rejected by the identity service.
    InvalidCredential,
    /// The identity service could not be reached.
    Unavailable,
    /// The connection already holds a bound identity. A credential change
    /// requires a new connection.
    AlreadyAuthenticated,
    /// The connection disappeared before the identity could be bound.
    UnknownConnection,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredential => write!(f, "invalid or expired credential"),
            Self::Unavailable => write!(f, "identity service unavailable"),
            Self::AlreadyAuthenticated => write!(f, "connection is already authenticated"),
            Self::UnknownConnection => write!(f, "unknown connection"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Failure looking up a channel in the external conversation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No channel with the requested id.
    NotFound,
    /// The store could not be reached or returned garbage.
    Unavailable,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "channel not found"),
            Self::Unavailable => write!(f, "conversation store unavailable"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A join attempt refused by the authorization guard.
///
/// On the wire both variants surface as the same generic denial so a caller
/// cannot distinguish "doesn't exist" from "not yours".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDenied {
    /// The channel doesn't exist or isn't owned by the requesting identity.
    NotAuthorized,
    /// The store lookup failed outright.
    StoreUnavailable,
}

impl fmt::Display for JoinDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthorized => write!(f, "not authorized for this channel"),
            Self::StoreUnavailable => write!(f, "channel lookup failed"),
        }
    }
}

impl std::error::Error for JoinDenied {}

/// A generation was requested for a channel that already has a live run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGeneration {
    pub channel_id: String,
}

impl fmt::Display for DuplicateGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} already has a generation in flight",
            self.channel_id
        )
    }
}

impl std::error::Error for DuplicateGeneration {}
