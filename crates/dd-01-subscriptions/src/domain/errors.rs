//! Error types for the subscription core.

use shared_types::ConnectionId;
use thiserror::Error;

use super::value_objects::{Direction, RoleId};

/// Errors returned by topic operations.
///
/// Policy rejections, conflicting exclusive registrations and ambiguous
/// authority are not errors: they park the role object in a state and heal
/// automatically. Only caller mistakes surface here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The connection already holds a registration of this direction.
    #[error("{direction} already registered on {connection}")]
    DuplicateSubscription {
        connection: ConnectionId,
        direction: Direction,
    },

    /// No registration of this direction exists on the connection.
    #[error("no {direction} registered on {connection}")]
    UnknownSubscription {
        connection: ConnectionId,
        direction: Direction,
    },

    /// Role object is not a member of the registration set.
    #[error("{0} is not registered")]
    UnknownRole(RoleId),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot bytes ended before the announced content.
    #[error("snapshot truncated: needed {needed} bytes at offset {offset}")]
    TruncatedSnapshot { offset: usize, needed: usize },

    /// Snapshot contains an ordinal outside the known range.
    #[error("snapshot contains invalid {field} ordinal {value}")]
    InvalidOrdinal { field: &'static str, value: i32 },
}

/// Errors reported by connection adapters.
///
/// Sends are fire-and-forget: the orchestrator logs these and carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("transport failure on {connection}: {reason}")]
    Transport {
        connection: ConnectionId,
        reason: String,
    },
}
