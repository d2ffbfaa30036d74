//! # Role Objects
//!
//! Typed participants of one topic. Every role object wraps exactly one
//! connection handle and tracks its own admission state.
//!
//! | Variant | Set | Connection | Extra |
//! |---------|-----|------------|-------|
//! | local sender | senders | application | source flag, request support |
//! | local receiver | receivers | application | drain flag, receive options |
//! | remote sender / receiver | both | peer | candidate distributors |
//! | remote source | senders | peer | outward subscription, authority |
//! | remote drain | receivers | peer | outward subscription, authority |
//!
//! Role objects never change state on their own. The orchestrator drives
//! every transition through `set_state`, which emits a control signal or an
//! acknowledgement only when it differs from the last one sent.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use shared_types::{ConnectionId, DataState, DistributorId, Telegram, TopicKey, UserId};
use tracing::{debug, warn};

use super::value_objects::{
    Acknowledgement, Action, CentralKind, Direction, LinkState, OutwardRequest, ReceiveOptions,
    ReceiverState, RoleId, SendControl, SenderState,
};
use crate::ports::outbound::{ApplicationConnection, PeerConnection};

// =============================================================================
// VARIANT PAYLOADS
// =============================================================================

/// Sender backed by a local application.
pub struct LocalSender {
    connection: Arc<dyn ApplicationConnection>,
    source: bool,
    request_supported: bool,
    /// Last control signal sent. Applications start out stopped.
    last_control: SendControl,
}

/// Receiver backed by a local application.
pub struct LocalReceiver {
    connection: Arc<dyn ApplicationConnection>,
    drain: bool,
}

/// Registration a peer distributor forwarded to us.
pub struct InboundRemote {
    connection: Arc<dyn PeerConnection>,
    candidates: BTreeSet<DistributorId>,
    last_ack: Option<(LinkState, Option<DistributorId>)>,
}

impl InboundRemote {
    fn acknowledge(
        &mut self,
        topic: &TopicKey,
        direction: Direction,
        link: Option<LinkState>,
        authority: Option<DistributorId>,
    ) {
        let Some(link) = link else {
            return;
        };
        let authority = if link == LinkState::Valid {
            authority
        } else {
            None
        };
        if self.last_ack == Some((link, authority)) {
            return;
        }
        self.last_ack = Some((link, authority));
        let ack = Acknowledgement {
            topic: *topic,
            direction,
            state: link,
            authority,
        };
        if let Err(e) = self.connection.send_acknowledgement(&ack) {
            warn!(topic = %topic, error = %e, "Failed to send acknowledgement");
        }
    }
}

/// Outward subscription this node placed at a peer.
pub struct OutwardRole {
    connection: Arc<dyn PeerConnection>,
    kind: CentralKind,
    candidates: BTreeSet<DistributorId>,
    link: LinkState,
    authority: Option<DistributorId>,
    /// Last data index received over this connection.
    observed_index: u64,
    subscribed: bool,
}

impl OutwardRole {
    pub fn new(
        connection: Arc<dyn PeerConnection>,
        kind: CentralKind,
        candidates: BTreeSet<DistributorId>,
    ) -> Self {
        Self {
            connection,
            kind,
            candidates,
            link: LinkState::Waiting,
            authority: None,
            observed_index: 0,
            subscribed: false,
        }
    }

    pub fn kind(&self) -> CentralKind {
        self.kind
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }

    pub fn candidates(&self) -> &BTreeSet<DistributorId> {
        &self.candidates
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn authority(&self) -> Option<DistributorId> {
        self.authority
    }

    pub fn is_positive(&self) -> bool {
        self.link == LinkState::Valid
    }

    /// Record the peer's answer. Authority is only kept for positive answers.
    pub fn apply_acknowledgement(&mut self, link: LinkState, authority: Option<DistributorId>) {
        self.link = link;
        self.authority = if link == LinkState::Valid {
            authority
        } else {
            None
        };
    }

    pub fn observed_index(&self) -> u64 {
        self.observed_index
    }

    pub fn observe_index(&mut self, index: u64) {
        self.observed_index = index;
    }

    fn request(&self, topic: &TopicKey, id: RoleId) -> OutwardRequest {
        OutwardRequest {
            topic: *topic,
            role: id,
            kind: self.kind,
            candidates: self.candidates.clone(),
        }
    }

    pub fn subscribe(&mut self, topic: &TopicKey, id: RoleId) {
        if self.subscribed {
            return;
        }
        self.subscribed = true;
        if let Err(e) = self.connection.subscribe_outward(&self.request(topic, id)) {
            warn!(topic = %topic, role = %id, error = %e, "Outward subscribe failed");
        }
    }

    pub fn unsubscribe(&mut self, topic: &TopicKey, id: RoleId) {
        if !self.subscribed {
            return;
        }
        self.subscribed = false;
        if let Err(e) = self.connection.unsubscribe_outward(&self.request(topic, id)) {
            warn!(topic = %topic, role = %id, error = %e, "Outward unsubscribe failed");
        }
    }

    /// Move the subscription to another connection and start over.
    pub fn migrate(&mut self, topic: &TopicKey, id: RoleId, connection: Arc<dyn PeerConnection>) {
        self.unsubscribe(topic, id);
        self.connection = connection;
        self.link = LinkState::Waiting;
        self.authority = None;
        self.observed_index = 0;
        self.subscribe(topic, id);
    }
}

// =============================================================================
// SENDING ROLES
// =============================================================================

/// Variants of a sending role object.
pub enum SendingRole {
    Local(LocalSender),
    Remote(InboundRemote),
    RemoteSource(OutwardRole),
}

/// Member of a topic's sender set.
pub struct SendingSubscription {
    id: RoleId,
    state: SenderState,
    role: SendingRole,
}

impl SendingSubscription {
    pub fn local(
        id: RoleId,
        connection: Arc<dyn ApplicationConnection>,
        source: bool,
        request_supported: bool,
    ) -> Self {
        Self {
            id,
            state: SenderState::Unknown,
            role: SendingRole::Local(LocalSender {
                connection,
                source,
                request_supported,
                last_control: SendControl::Stop,
            }),
        }
    }

    pub fn remote(
        id: RoleId,
        connection: Arc<dyn PeerConnection>,
        candidates: BTreeSet<DistributorId>,
    ) -> Self {
        Self {
            id,
            state: SenderState::Unknown,
            role: SendingRole::Remote(InboundRemote {
                connection,
                candidates,
                last_ack: None,
            }),
        }
    }

    /// Outward subscription seeking a remote source. Starts out waiting.
    pub fn remote_source(id: RoleId, outward: OutwardRole) -> Self {
        Self {
            id,
            state: SenderState::Waiting,
            role: SendingRole::RemoteSource(outward),
        }
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn role(&self) -> &SendingRole {
        &self.role
    }

    pub fn connection_id(&self) -> ConnectionId {
        match &self.role {
            SendingRole::Local(l) => l.connection.connection_id(),
            SendingRole::Remote(r) => r.connection.connection_id(),
            SendingRole::RemoteSource(o) => o.connection_id(),
        }
    }

    pub fn user(&self) -> UserId {
        match &self.role {
            SendingRole::Local(l) => l.connection.remote_user_id(),
            SendingRole::Remote(r) => r.connection.remote_user_id(),
            SendingRole::RemoteSource(o) => o.connection.remote_user_id(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.role, SendingRole::Local(_))
    }

    pub fn is_inbound_remote(&self) -> bool {
        matches!(self.role, SendingRole::Remote(_))
    }

    /// Local sender that asked to be the topic's source.
    pub fn wants_source(&self) -> bool {
        matches!(&self.role, SendingRole::Local(l) if l.source)
    }

    pub fn request_supported(&self) -> bool {
        matches!(&self.role, SendingRole::Local(l) if l.request_supported)
    }

    /// Action checked against the access policy on admission.
    pub fn required_action(&self) -> Action {
        if self.wants_source() {
            Action::Source
        } else {
            Action::Sender
        }
    }

    pub fn outward(&self) -> Option<&OutwardRole> {
        match &self.role {
            SendingRole::RemoteSource(o) => Some(o),
            _ => None,
        }
    }

    pub fn outward_mut(&mut self) -> Option<&mut OutwardRole> {
        match &mut self.role {
            SendingRole::RemoteSource(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_outward(&self) -> bool {
        self.outward().is_some()
    }

    /// Candidate distributors reported by an inbound remote sender.
    pub fn inbound_candidates(&self) -> Option<&BTreeSet<DistributorId>> {
        match &self.role {
            SendingRole::Remote(r) => Some(&r.candidates),
            _ => None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        match &self.role {
            SendingRole::RemoteSource(o) => o.link,
            SendingRole::Remote(r) => r.last_ack.map_or(LinkState::Waiting, |(link, _)| link),
            SendingRole::Local(_) => LinkState::Valid,
        }
    }

    /// Change the state. Re-setting the current state is a no-op.
    ///
    /// `authority` is reported to peers in positive acknowledgements.
    /// Returns true if the state changed.
    pub fn set_state(
        &mut self,
        topic: &TopicKey,
        state: SenderState,
        authority: Option<DistributorId>,
    ) -> bool {
        if self.state == state {
            return false;
        }
        debug!(topic = %topic, role = %self.id, from = ?self.state, to = ?state, "Sender state changed");
        self.state = state;
        match &mut self.role {
            SendingRole::Local(local) if local.request_supported => {
                if let Some(control) = SendControl::for_state(state) {
                    if control != local.last_control {
                        local.last_control = control;
                        if let Err(e) = local.connection.send_control(topic, control) {
                            warn!(topic = %topic, error = %e, "Failed to send control signal");
                        }
                    }
                }
            }
            SendingRole::Remote(remote) => {
                remote.acknowledge(topic, Direction::Sending, sender_link(state), authority);
            }
            _ => {}
        }
        true
    }

    /// Release the outward registration, if any. Idempotent.
    pub fn unsubscribe(&mut self, topic: &TopicKey) {
        let id = self.id;
        if let Some(outward) = self.outward_mut() {
            outward.unsubscribe(topic, id);
        }
    }

    /// Place the outward registration, if any.
    pub fn subscribe(&mut self, topic: &TopicKey) {
        let id = self.id;
        if let Some(outward) = self.outward_mut() {
            outward.subscribe(topic, id);
        }
    }
}

impl fmt::Debug for SendingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendingSubscription")
            .field("id", &self.id)
            .field("connection", &self.connection_id())
            .field("state", &self.state)
            .field("link", &self.link_state())
            .finish()
    }
}

fn sender_link(state: SenderState) -> Option<LinkState> {
    match state {
        SenderState::ReceiversAvailable | SenderState::NoReceivers => Some(LinkState::Valid),
        SenderState::NotAllowed
        | SenderState::InvalidSubscription
        | SenderState::NoRemoteDrain => Some(LinkState::Rejected),
        SenderState::MultipleRemoteLock => Some(LinkState::Ambiguous),
        SenderState::Unknown | SenderState::Waiting => None,
    }
}

// =============================================================================
// RECEIVING ROLES
// =============================================================================

/// Variants of a receiving role object.
pub enum ReceivingRole {
    Local(LocalReceiver),
    Remote(InboundRemote),
    RemoteDrain(OutwardRole),
}

/// What a receiver was sent last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Nothing,
    /// A payload-less record with this state.
    Status(DataState),
    Data,
}

/// Member of a topic's receiver set.
pub struct ReceivingSubscription {
    id: RoleId,
    state: ReceiverState,
    options: ReceiveOptions,
    role: ReceivingRole,
    last_delivery: Delivery,
}

impl ReceivingSubscription {
    pub fn local(
        id: RoleId,
        connection: Arc<dyn ApplicationConnection>,
        drain: bool,
        options: ReceiveOptions,
    ) -> Self {
        Self {
            id,
            state: ReceiverState::Unknown,
            options,
            role: ReceivingRole::Local(LocalReceiver { connection, drain }),
            last_delivery: Delivery::Nothing,
        }
    }

    pub fn remote(
        id: RoleId,
        connection: Arc<dyn PeerConnection>,
        candidates: BTreeSet<DistributorId>,
        options: ReceiveOptions,
    ) -> Self {
        Self {
            id,
            state: ReceiverState::Unknown,
            options,
            role: ReceivingRole::Remote(InboundRemote {
                connection,
                candidates,
                last_ack: None,
            }),
            last_delivery: Delivery::Nothing,
        }
    }

    /// Outward subscription seeking a remote drain. Starts out waiting.
    pub fn remote_drain(id: RoleId, outward: OutwardRole) -> Self {
        Self {
            id,
            state: ReceiverState::Waiting,
            options: ReceiveOptions::normal(),
            role: ReceivingRole::RemoteDrain(outward),
            last_delivery: Delivery::Nothing,
        }
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn options(&self) -> ReceiveOptions {
        self.options
    }

    pub fn role(&self) -> &ReceivingRole {
        &self.role
    }

    pub fn last_delivery(&self) -> Delivery {
        self.last_delivery
    }

    pub fn connection_id(&self) -> ConnectionId {
        match &self.role {
            ReceivingRole::Local(l) => l.connection.connection_id(),
            ReceivingRole::Remote(r) => r.connection.connection_id(),
            ReceivingRole::RemoteDrain(o) => o.connection_id(),
        }
    }

    pub fn user(&self) -> UserId {
        match &self.role {
            ReceivingRole::Local(l) => l.connection.remote_user_id(),
            ReceivingRole::Remote(r) => r.connection.remote_user_id(),
            ReceivingRole::RemoteDrain(o) => o.connection.remote_user_id(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.role, ReceivingRole::Local(_))
    }

    pub fn is_inbound_remote(&self) -> bool {
        matches!(self.role, ReceivingRole::Remote(_))
    }

    /// Local receiver that asked to be the topic's drain.
    pub fn wants_drain(&self) -> bool {
        matches!(&self.role, ReceivingRole::Local(l) if l.drain)
    }

    pub fn required_action(&self) -> Action {
        if self.wants_drain() {
            Action::Drain
        } else {
            Action::Receiver
        }
    }

    pub fn outward(&self) -> Option<&OutwardRole> {
        match &self.role {
            ReceivingRole::RemoteDrain(o) => Some(o),
            _ => None,
        }
    }

    pub fn outward_mut(&mut self) -> Option<&mut OutwardRole> {
        match &mut self.role {
            ReceivingRole::RemoteDrain(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_outward(&self) -> bool {
        self.outward().is_some()
    }

    pub fn inbound_candidates(&self) -> Option<&BTreeSet<DistributorId>> {
        match &self.role {
            ReceivingRole::Remote(r) => Some(&r.candidates),
            _ => None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        match &self.role {
            ReceivingRole::RemoteDrain(o) => o.link,
            ReceivingRole::Remote(r) => r.last_ack.map_or(LinkState::Waiting, |(link, _)| link),
            ReceivingRole::Local(_) => LinkState::Valid,
        }
    }

    /// Change the state. Re-setting the current state is a no-op.
    ///
    /// Returns true if the state changed.
    pub fn set_state(
        &mut self,
        topic: &TopicKey,
        state: ReceiverState,
        authority: Option<DistributorId>,
    ) -> bool {
        if self.state == state {
            return false;
        }
        debug!(topic = %topic, role = %self.id, from = ?self.state, to = ?state, "Receiver state changed");
        self.state = state;
        if let ReceivingRole::Remote(remote) = &mut self.role {
            remote.acknowledge(topic, Direction::Receiving, receiver_link(state), authority);
        }
        true
    }

    /// Send a payload-less record unless it repeats the previous delivery.
    ///
    /// Outward drains never get status records. Returns true if sent.
    pub fn send_status(
        &mut self,
        topic: &TopicKey,
        state: DataState,
        data_index: u64,
        data_time: i64,
    ) -> bool {
        if self.is_outward() || self.last_delivery == Delivery::Status(state) {
            return false;
        }
        self.last_delivery = Delivery::Status(state);
        let record = Telegram::status(*topic, state, data_index, data_time);
        self.send(&record, false);
        true
    }

    /// Forward a batch. Outward drains carry it toward the authority.
    pub fn deliver(&mut self, batch: &[Telegram]) {
        let toward_authority = self.is_outward();
        for telegram in batch {
            self.send(telegram, toward_authority);
        }
        self.last_delivery = Delivery::Data;
    }

    fn send(&self, telegram: &Telegram, toward_authority: bool) {
        let result = match &self.role {
            ReceivingRole::Local(l) => l.connection.send_data(telegram, toward_authority),
            ReceivingRole::Remote(r) => r.connection.send_data(telegram, toward_authority),
            ReceivingRole::RemoteDrain(o) => o.connection.send_data(telegram, toward_authority),
        };
        if let Err(e) = result {
            warn!(topic = %telegram.topic, role = %self.id, error = %e, "Failed to send telegram");
        }
    }

    pub fn unsubscribe(&mut self, topic: &TopicKey) {
        let id = self.id;
        if let Some(outward) = self.outward_mut() {
            outward.unsubscribe(topic, id);
        }
    }

    pub fn subscribe(&mut self, topic: &TopicKey) {
        let id = self.id;
        if let Some(outward) = self.outward_mut() {
            outward.subscribe(topic, id);
        }
    }
}

impl fmt::Debug for ReceivingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivingSubscription")
            .field("id", &self.id)
            .field("connection", &self.connection_id())
            .field("state", &self.state)
            .field("link", &self.link_state())
            .field("last_delivery", &self.last_delivery)
            .finish()
    }
}

fn receiver_link(state: ReceiverState) -> Option<LinkState> {
    match state {
        ReceiverState::SendersAvailable | ReceiverState::NoSenders => Some(LinkState::Valid),
        ReceiverState::NotAllowed
        | ReceiverState::InvalidSubscription
        | ReceiverState::NoRemoteSource => Some(LinkState::Rejected),
        ReceiverState::MultipleRemoteLock => Some(LinkState::Ambiguous),
        ReceiverState::Unknown | ReceiverState::Waiting => None,
    }
}
