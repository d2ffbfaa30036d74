//! Inbound ports (API) for the subscription core.
//!
//! Every call enters the topic orchestrator under the topic lock and returns
//! once all resulting control signals and telegrams have been handed to the
//! connection layer.

use std::collections::BTreeSet;
use std::sync::Arc;

use shared_types::{ConnectionId, DistributorId, Telegram, UserId};

use super::outbound::{ApplicationConnection, PeerConnection};
use crate::domain::{
    DistributionOutcome, IncomingAcknowledgement, ReceiveOptions, RoleId, SubscriptionError,
    SubscriptionSnapshot,
};

/// Request to register a sender.
#[derive(Clone)]
pub enum SenderRegistration {
    /// Local application.
    Local {
        connection: Arc<dyn ApplicationConnection>,
        /// Wants to be the topic's exclusive source.
        source: bool,
        /// Wants explicit start/stop signals.
        request_supported: bool,
    },
    /// Registration forwarded by a peer distributor.
    Remote {
        connection: Arc<dyn PeerConnection>,
        candidates: BTreeSet<DistributorId>,
    },
}

impl SenderRegistration {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            SenderRegistration::Local { connection, .. } => connection.connection_id(),
            SenderRegistration::Remote { connection, .. } => connection.connection_id(),
        }
    }
}

/// Request to register a receiver.
#[derive(Clone)]
pub enum ReceiverRegistration {
    /// Local application.
    Local {
        connection: Arc<dyn ApplicationConnection>,
        /// Wants to be the topic's exclusive drain.
        drain: bool,
        options: ReceiveOptions,
    },
    /// Registration forwarded by a peer distributor.
    Remote {
        connection: Arc<dyn PeerConnection>,
        candidates: BTreeSet<DistributorId>,
        options: ReceiveOptions,
    },
}

impl ReceiverRegistration {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            ReceiverRegistration::Local { connection, .. } => connection.connection_id(),
            ReceiverRegistration::Remote { connection, .. } => connection.connection_id(),
        }
    }
}

/// Per-topic subscription API.
pub trait TopicSubscriptions: Send + Sync {
    /// Admit a sender. Fails if the connection already holds a sender.
    fn add_sender(&self, registration: SenderRegistration) -> Result<RoleId, SubscriptionError>;

    /// Admit a receiver. Fails if the connection already holds a receiver.
    fn add_receiver(&self, registration: ReceiverRegistration)
        -> Result<RoleId, SubscriptionError>;

    fn remove_sender(&self, connection: ConnectionId) -> Result<(), SubscriptionError>;

    fn remove_receiver(&self, connection: ConnectionId) -> Result<(), SubscriptionError>;

    /// Drop every role object bound to a lost connection.
    fn remove_connection(&self, connection: ConnectionId);

    /// Re-evaluate the rights of one user's role objects.
    fn on_user_rights_changed(&self, user: UserId);

    /// Handle a peer's answer to one of our outward subscriptions.
    fn handle_acknowledgement(&self, ack: IncomingAcknowledgement);

    /// A better connection toward `distributor` is available.
    fn update_best_route(&self, distributor: DistributorId, connection: Arc<dyn PeerConnection>);

    /// Candidate distributors or their routes changed.
    fn refresh_remote_connections(&self);

    /// Distribute a batch sharing one data index, received on `origin`.
    fn distribute(
        &self,
        origin: ConnectionId,
        telegrams: Vec<Telegram>,
        index_assigned: bool,
    ) -> DistributionOutcome;

    fn snapshot(&self) -> SubscriptionSnapshot;
}
