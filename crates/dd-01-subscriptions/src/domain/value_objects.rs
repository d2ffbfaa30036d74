//! Value objects for the subscription domain.
//!
//! Role states, peer-link states, control signals and the small records
//! exchanged with peer distributors.

use serde::{Deserialize, Serialize};
use shared_types::{ConnectionId, DistributorId, TopicKey};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of one role object within a topic.
///
/// Allocated by the topic orchestrator, never reused while the topic lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role#{}", self.0)
    }
}

/// Admission state of a sending role object.
///
/// Discriminants are the ordinals written into state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SenderState {
    #[default]
    Unknown = 0,
    Waiting = 1,
    ReceiversAvailable = 2,
    NoReceivers = 3,
    NotAllowed = 4,
    InvalidSubscription = 5,
    MultipleRemoteLock = 6,
    /// Inbound remote sender whose data cannot reach any remote drain.
    NoRemoteDrain = 7,
}

impl SenderState {
    /// Passed the admission checks; takes part in derived-status recomputation.
    pub fn is_admitted(self) -> bool {
        matches!(
            self,
            SenderState::Waiting
                | SenderState::ReceiversAvailable
                | SenderState::NoReceivers
                | SenderState::NoRemoteDrain
        )
    }

    /// May inject data into the topic.
    pub fn is_valid_sender(self) -> bool {
        matches!(
            self,
            SenderState::ReceiversAvailable | SenderState::NoReceivers
        )
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        Some(match ordinal {
            0 => SenderState::Unknown,
            1 => SenderState::Waiting,
            2 => SenderState::ReceiversAvailable,
            3 => SenderState::NoReceivers,
            4 => SenderState::NotAllowed,
            5 => SenderState::InvalidSubscription,
            6 => SenderState::MultipleRemoteLock,
            7 => SenderState::NoRemoteDrain,
            _ => return None,
        })
    }
}

/// Admission state of a receiving role object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReceiverState {
    #[default]
    Unknown = 0,
    Waiting = 1,
    SendersAvailable = 2,
    NoSenders = 3,
    NotAllowed = 4,
    InvalidSubscription = 5,
    MultipleRemoteLock = 6,
    /// Inbound remote receiver that cannot be fed from any remote source.
    NoRemoteSource = 7,
}

impl ReceiverState {
    /// Passed the admission checks; takes part in derived-status recomputation.
    pub fn is_admitted(self) -> bool {
        matches!(
            self,
            ReceiverState::Waiting
                | ReceiverState::SendersAvailable
                | ReceiverState::NoSenders
                | ReceiverState::NoRemoteSource
        )
    }

    /// Gets data delivered.
    pub fn is_valid_receiver(self) -> bool {
        matches!(self, ReceiverState::SendersAvailable)
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        Some(match ordinal {
            0 => ReceiverState::Unknown,
            1 => ReceiverState::Waiting,
            2 => ReceiverState::SendersAvailable,
            3 => ReceiverState::NoSenders,
            4 => ReceiverState::NotAllowed,
            5 => ReceiverState::InvalidSubscription,
            6 => ReceiverState::MultipleRemoteLock,
            7 => ReceiverState::NoRemoteSource,
            _ => return None,
        })
    }
}

/// State of the link between a remote role object and its peer.
///
/// Local role objects always report [`LinkState::Valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkState {
    /// Peer confirmed the subscription.
    Valid = 0,
    /// No answer yet.
    #[default]
    Waiting = 1,
    /// Peer refused the subscription.
    Rejected = 2,
    /// Peer sees more than one authority for the topic.
    Ambiguous = 3,
}

impl LinkState {
    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        Some(match ordinal {
            0 => LinkState::Valid,
            1 => LinkState::Waiting,
            2 => LinkState::Rejected,
            3 => LinkState::Ambiguous,
            _ => return None,
        })
    }
}

/// Exclusive authoritative role sought by an outward subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CentralKind {
    /// Remote node hosts the source; we receive from it.
    Source,
    /// Remote node hosts the drain; we send toward it.
    Drain,
}

impl fmt::Display for CentralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentralKind::Source => f.write_str("source"),
            CentralKind::Drain => f.write_str("drain"),
        }
    }
}

/// Data direction of a registration, seen from the registering party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sending,
    Receiving,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sending => f.write_str("sender"),
            Direction::Receiving => f.write_str("receiver"),
        }
    }
}

/// Action checked against the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Source,
    Drain,
    Sender,
    Receiver,
}

/// Send control signal for local senders that requested explicit start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendControl {
    Start,
    Stop,
    StopNoRights,
    StopInvalidSubscription,
}

impl SendControl {
    /// Signal implied by a sender state, if any.
    pub fn for_state(state: SenderState) -> Option<Self> {
        match state {
            SenderState::ReceiversAvailable => Some(SendControl::Start),
            SenderState::NoReceivers | SenderState::NoRemoteDrain => Some(SendControl::Stop),
            SenderState::NotAllowed => Some(SendControl::StopNoRights),
            SenderState::InvalidSubscription | SenderState::MultipleRemoteLock => {
                Some(SendControl::StopInvalidSubscription)
            }
            SenderState::Unknown | SenderState::Waiting => None,
        }
    }
}

/// Delivery options of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiveOptions {
    /// Only deliver batches whose content differs from the previous one.
    pub delta: bool,
    /// Also deliver records flagged as delayed.
    pub delayed: bool,
}

impl ReceiveOptions {
    /// Every record, including delayed ones.
    pub const fn normal() -> Self {
        Self {
            delta: false,
            delayed: true,
        }
    }

    /// Changed current records only.
    pub const fn delta() -> Self {
        Self {
            delta: true,
            delayed: false,
        }
    }

    /// Current records only.
    pub const fn online() -> Self {
        Self {
            delta: false,
            delayed: false,
        }
    }
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self::normal()
    }
}

/// Acknowledgement sent to a peer for its inbound registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub topic: TopicKey,
    /// Direction of the acknowledged registration as seen by the peer.
    pub direction: Direction,
    pub state: LinkState,
    /// Authoritative distributor, present for positive acknowledgements.
    pub authority: Option<DistributorId>,
}

/// Acknowledgement received for one of our outward subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingAcknowledgement {
    pub connection: ConnectionId,
    pub kind: CentralKind,
    pub state: LinkState,
    pub authority: Option<DistributorId>,
}

impl IncomingAcknowledgement {
    pub fn valid(
        connection: ConnectionId,
        kind: CentralKind,
        authority: DistributorId,
    ) -> Self {
        Self {
            connection,
            kind,
            state: LinkState::Valid,
            authority: Some(authority),
        }
    }

    pub fn negative(connection: ConnectionId, kind: CentralKind, state: LinkState) -> Self {
        Self {
            connection,
            kind,
            state,
            authority: None,
        }
    }
}

/// Outward registration this node places at a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutwardRequest {
    pub topic: TopicKey,
    pub role: RoleId,
    pub kind: CentralKind,
    /// Distributors routed over the peer connection that may be authoritative.
    pub candidates: BTreeSet<DistributorId>,
}

/// Per-direction need for an outward subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteNeed {
    /// Local or inbound receivers wait for data from a remote source.
    pub source: bool,
    /// Local or inbound senders wait for a remote drain.
    pub drain: bool,
}

impl RemoteNeed {
    pub fn any(self) -> bool {
        self.source || self.drain
    }

    pub fn get(self, kind: CentralKind) -> bool {
        match kind {
            CentralKind::Source => self.source,
            CentralKind::Drain => self.drain,
        }
    }

    pub fn set(&mut self, kind: CentralKind, value: bool) {
        match kind {
            CentralKind::Source => self.source = value,
            CentralKind::Drain => self.drain = value,
        }
    }
}

/// Result of a distribution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionOutcome {
    /// Batch was accepted and forwarded to this many receivers.
    Delivered(usize),
    /// Batch was dropped.
    Dropped(DropReason),
}

/// Why a batch was not distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EmptyBatch,
    /// Index not greater than the last distributed one.
    StaleIndex,
    /// No sender registered on the originating connection.
    UnknownSender,
    /// Sender is registered but not currently allowed to send.
    InvalidSender,
    /// Topic is locked by ambiguous authority.
    Locked,
    /// Data arrived over a pending redirection and was used for the continuity check.
    PendingRedirection,
}
