//! Outbound ports (SPI) for the subscription core.
//!
//! Implemented by the connection layer, the policy engine and the topic
//! directory. All calls are synchronous and must not block on network I/O:
//! they are made while a topic lock is held.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use shared_types::{ConnectionId, DistributorId, Telegram, TopicKey, UserId};

use crate::domain::{Acknowledgement, Action, ConnectionError, OutwardRequest, SendControl};

/// A transport connection, local or remote.
pub trait Connection: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// User that authenticated the connection.
    fn remote_user_id(&self) -> UserId;

    /// Queue a telegram for sending.
    ///
    /// `toward_authority` marks records that have not been index-assigned yet
    /// and travel toward the authoritative distributor.
    fn send_data(&self, telegram: &Telegram, toward_authority: bool)
        -> Result<(), ConnectionError>;
}

/// Connection to a local application.
pub trait ApplicationConnection: Connection {
    /// Tell a sender to start or stop producing data.
    fn send_control(&self, topic: &TopicKey, control: SendControl) -> Result<(), ConnectionError>;
}

/// Connection to a peer distributor.
pub trait PeerConnection: Connection {
    /// Distributor on the other end.
    fn remote_distributor_id(&self) -> DistributorId;

    /// Route cost, lower is preferred.
    fn route_weight(&self) -> i32;

    /// Register this node at the peer on behalf of an outward role object.
    fn subscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError>;

    /// Withdraw an outward registration.
    fn unsubscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError>;

    /// Answer a registration the peer forwarded to us.
    fn send_acknowledgement(&self, ack: &Acknowledgement) -> Result<(), ConnectionError>;
}

/// User rights engine.
pub trait AccessPolicy: Send + Sync {
    fn is_action_allowed(&self, user: UserId, topic: &TopicKey, action: Action) -> bool;
}

/// Topology knowledge owned by the topic registry.
pub trait TopicDirectory: Send + Sync {
    /// Distributors that may be authoritative for the topic.
    fn candidate_distributors(&self, topic: &TopicKey) -> BTreeSet<DistributorId>;

    /// Currently best connection toward a distributor.
    fn best_connection(&self, distributor: DistributorId) -> Option<Arc<dyn PeerConnection>>;

    /// This node now hosts the source or drain of the topic.
    fn became_authoritative(&self, topic: &TopicKey);

    /// This node no longer hosts the source or drain of the topic.
    fn lost_authority(&self, topic: &TopicKey);
}

/// Time source abstraction for testability.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    fn now_secs(&self) -> u64 {
        u64::try_from(self.now_millis() / 1000).unwrap_or(0)
    }
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
