//! # Topic Orchestrator
//!
//! `SubscriptionInfo` is the per-topic state machine. It admits and removes
//! role objects, computes derived states, discovers the remote authority,
//! runs the route redirection handshake and distributes telegrams.
//!
//! ## Concurrency
//!
//! Every operation runs under one exclusive per-topic lock. Collaborator
//! calls made under the lock are fire-and-forget; no operation waits for a
//! remote answer. Answers arrive later as separate calls.
//!
//! ## Layout
//!
//! - `admission`: admission, derived-status recomputation, rights changes
//! - `remote`: outward subscriptions, acknowledgements, ambiguity lock
//! - `redirection`: better-route handshake
//! - `distribution`: telegram fan-out and data index assignment

mod admission;
mod distribution;
mod redirection;
mod remote;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{ConnectionId, DataState, DistributorId, Telegram, TopicKey, UserId};
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::domain::invariants::check_all_invariants;
use crate::domain::{
    index_epoch, CandidateSnapshot, CentralKind, Direction, DistributionOutcome,
    IncomingAcknowledgement, LinkState, OutwardRole, ReceiverSnapshot, ReceiverState,
    ReceivingSubscription, RemoteNeed, RoleId, RouteSnapshot, SenderSnapshot, SenderState,
    SendingSubscription, SubscriptionError, SubscriptionList, SubscriptionSnapshot,
};
use crate::ports::inbound::{ReceiverRegistration, SenderRegistration, TopicSubscriptions};
use crate::ports::outbound::{AccessPolicy, PeerConnection, TimeSource, TopicDirectory};

/// External collaborators shared by all topics of a distributor.
#[derive(Clone)]
pub struct Collaborators {
    pub policy: Arc<dyn AccessPolicy>,
    pub directory: Arc<dyn TopicDirectory>,
    pub time: Arc<dyn TimeSource>,
}

/// Diagnostic view of one outward subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutwardStatus {
    pub role: RoleId,
    pub kind: CentralKind,
    pub connection: ConnectionId,
    pub link: LinkState,
    pub authority: Option<DistributorId>,
    pub candidates: BTreeSet<DistributorId>,
    /// Installed as the topic's current source or drain.
    pub installed: bool,
}

/// Replacement route awaiting confirmation.
pub(crate) struct PendingRedirection {
    /// Outward role object the replacement takes over from.
    replaces: RoleId,
    role: PendingRole,
}

pub(crate) enum PendingRole {
    Source(SendingSubscription),
    Drain(ReceivingSubscription),
}

impl PendingRedirection {
    fn outward(&self) -> Option<&OutwardRole> {
        match &self.role {
            PendingRole::Source(s) => s.outward(),
            PendingRole::Drain(r) => r.outward(),
        }
    }

    fn outward_mut(&mut self) -> Option<&mut OutwardRole> {
        match &mut self.role {
            PendingRole::Source(s) => s.outward_mut(),
            PendingRole::Drain(r) => r.outward_mut(),
        }
    }

    fn kind(&self) -> CentralKind {
        match &self.role {
            PendingRole::Source(_) => CentralKind::Source,
            PendingRole::Drain(_) => CentralKind::Drain,
        }
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        self.outward().map(OutwardRole::connection_id)
    }

    fn cancel(&mut self, topic: &TopicKey) {
        match &mut self.role {
            PendingRole::Source(s) => s.unsubscribe(topic),
            PendingRole::Drain(r) => r.unsubscribe(topic),
        }
    }
}

/// Mutable state of one topic, guarded by the topic lock.
#[derive(Default)]
pub(crate) struct TopicState {
    list: SubscriptionList,
    next_role: u64,
    need: RemoteNeed,
    pending: BTreeMap<DistributorId, PendingRedirection>,
    /// Ambiguous remote authority detected.
    locked: bool,
    /// Last value reported to the directory.
    authoritative: bool,
    /// Last non-delayed, index-assigned batch.
    retained: Option<Vec<Telegram>>,
    /// Index of the last distributed batch. Reset when the source goes away.
    last_index: u64,
    /// Highest index ever distributed. Never reset.
    highest_index: u64,
    /// Counter feeding the data index generator.
    index_counter: u64,
}

/// Orchestrator of one topic.
pub struct SubscriptionInfo {
    topic: TopicKey,
    config: SubscriptionConfig,
    deps: Collaborators,
    state: Mutex<TopicState>,
}

impl SubscriptionInfo {
    pub fn new(topic: TopicKey, config: SubscriptionConfig, deps: Collaborators) -> Self {
        Self {
            topic,
            config,
            deps,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut TopicEngine<'_>) -> R) -> R {
        let mut guard = self.state.lock();
        let mut engine = TopicEngine {
            topic: &self.topic,
            config: &self.config,
            deps: &self.deps,
            st: &mut *guard,
        };
        let result = f(&mut engine);
        debug_assert!(
            check_all_invariants(&engine.st.list, engine.st.locked),
            "registration set invariants violated for topic {}",
            self.topic
        );
        result
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// No role objects and no pending redirections.
    pub fn is_empty(&self) -> bool {
        let st = self.state.lock();
        st.list.is_empty() && st.pending.is_empty()
    }

    pub fn is_central_distributor(&self) -> bool {
        self.state.lock().list.is_central_distributor()
    }

    pub fn is_multiple_remote_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// State of the application or inbound sender registered on `connection`.
    pub fn sender_state(&self, connection: ConnectionId) -> Option<SenderState> {
        let st = self.state.lock();
        let state = st
            .list
            .senders()
            .find(|s| !s.is_outward() && s.connection_id() == connection)
            .map(SendingSubscription::state);
        state
    }

    /// State of the application or inbound receiver registered on `connection`.
    pub fn receiver_state(&self, connection: ConnectionId) -> Option<ReceiverState> {
        let st = self.state.lock();
        let state = st
            .list
            .receivers()
            .find(|r| !r.is_outward() && r.connection_id() == connection)
            .map(ReceivingSubscription::state);
        state
    }

    pub fn remote_need(&self) -> RemoteNeed {
        self.state.lock().need
    }

    pub fn last_data_index(&self) -> u64 {
        self.state.lock().last_index
    }

    /// Distributors with a replacement route awaiting confirmation.
    pub fn pending_redirections(&self) -> Vec<DistributorId> {
        self.state.lock().pending.keys().copied().collect()
    }

    pub fn outward_subscriptions(&self) -> Vec<OutwardStatus> {
        let st = self.state.lock();
        let sources = st.list.senders().filter_map(|s| {
            s.outward()
                .map(|o| outward_status(s.id(), o, st.list.source() == Some(s.id())))
        });
        let drains = st.list.receivers().filter_map(|r| {
            r.outward()
                .map(|o| outward_status(r.id(), o, st.list.drain() == Some(r.id())))
        });
        sources.chain(drains).collect()
    }

    /// Re-evaluate the rights of every role object.
    pub fn revalidate_rights(&self) {
        self.with_engine(|engine| {
            let users = engine.users();
            for user in users {
                engine.revalidate_user(user);
            }
            engine.reconcile();
        });
    }
}

fn outward_status(role: RoleId, outward: &OutwardRole, installed: bool) -> OutwardStatus {
    OutwardStatus {
        role,
        kind: outward.kind(),
        connection: outward.connection_id(),
        link: outward.link(),
        authority: outward.authority(),
        candidates: outward.candidates().clone(),
        installed,
    }
}

impl TopicSubscriptions for SubscriptionInfo {
    fn add_sender(&self, registration: SenderRegistration) -> Result<RoleId, SubscriptionError> {
        self.with_engine(|engine| {
            let connection = registration.connection_id();
            if engine.inbound_sender_on(connection).is_some() {
                return Err(SubscriptionError::DuplicateSubscription {
                    connection,
                    direction: Direction::Sending,
                });
            }
            let id = engine.alloc_role();
            let sender = match registration {
                SenderRegistration::Local {
                    connection,
                    source,
                    request_supported,
                } => SendingSubscription::local(id, connection, source, request_supported),
                SenderRegistration::Remote {
                    connection,
                    candidates,
                } => SendingSubscription::remote(id, connection, candidates),
            };
            engine.st.list.add_sender(sender)?;
            debug!(topic = %engine.topic, role = %id, connection = %connection, "Sender registered");
            engine.admit_sender(id);
            engine.reconcile();
            Ok(id)
        })
    }

    fn add_receiver(
        &self,
        registration: ReceiverRegistration,
    ) -> Result<RoleId, SubscriptionError> {
        self.with_engine(|engine| {
            let connection = registration.connection_id();
            if engine.inbound_receiver_on(connection).is_some() {
                return Err(SubscriptionError::DuplicateSubscription {
                    connection,
                    direction: Direction::Receiving,
                });
            }
            let id = engine.alloc_role();
            let receiver = match registration {
                ReceiverRegistration::Local {
                    connection,
                    drain,
                    options,
                } => ReceivingSubscription::local(id, connection, drain, options),
                ReceiverRegistration::Remote {
                    connection,
                    candidates,
                    options,
                } => ReceivingSubscription::remote(id, connection, candidates, options),
            };
            engine.st.list.add_receiver(receiver)?;
            debug!(topic = %engine.topic, role = %id, connection = %connection, "Receiver registered");
            engine.admit_receiver(id);
            engine.reconcile();
            Ok(id)
        })
    }

    fn remove_sender(&self, connection: ConnectionId) -> Result<(), SubscriptionError> {
        self.with_engine(|engine| {
            let id = engine.inbound_sender_on(connection).ok_or(
                SubscriptionError::UnknownSubscription {
                    connection,
                    direction: Direction::Sending,
                },
            )?;
            engine.drop_sender(id);
            debug!(topic = %engine.topic, role = %id, connection = %connection, "Sender removed");
            engine.reconcile();
            Ok(())
        })
    }

    fn remove_receiver(&self, connection: ConnectionId) -> Result<(), SubscriptionError> {
        self.with_engine(|engine| {
            let id = engine.inbound_receiver_on(connection).ok_or(
                SubscriptionError::UnknownSubscription {
                    connection,
                    direction: Direction::Receiving,
                },
            )?;
            engine.drop_receiver(id);
            debug!(topic = %engine.topic, role = %id, connection = %connection, "Receiver removed");
            engine.reconcile();
            Ok(())
        })
    }

    fn remove_connection(&self, connection: ConnectionId) {
        self.with_engine(|engine| engine.remove_connection(connection));
    }

    fn on_user_rights_changed(&self, user: UserId) {
        self.with_engine(|engine| {
            engine.revalidate_user(user);
            engine.reconcile();
        });
    }

    fn handle_acknowledgement(&self, ack: IncomingAcknowledgement) {
        self.with_engine(|engine| engine.handle_acknowledgement(ack));
    }

    fn update_best_route(&self, distributor: DistributorId, connection: Arc<dyn PeerConnection>) {
        self.with_engine(|engine| engine.update_best_route(distributor, connection));
    }

    fn refresh_remote_connections(&self) {
        self.with_engine(|engine| engine.refresh_remote_connections());
    }

    fn distribute(
        &self,
        origin: ConnectionId,
        telegrams: Vec<Telegram>,
        index_assigned: bool,
    ) -> DistributionOutcome {
        self.with_engine(|engine| engine.distribute(origin, telegrams, index_assigned))
    }

    fn snapshot(&self) -> SubscriptionSnapshot {
        self.with_engine(|engine| engine.snapshot())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Borrowed view of one topic while its lock is held.
pub(crate) struct TopicEngine<'a> {
    topic: &'a TopicKey,
    config: &'a SubscriptionConfig,
    deps: &'a Collaborators,
    st: &'a mut TopicState,
}

impl TopicEngine<'_> {
    fn now_millis(&self) -> i64 {
        self.deps.time.now_millis()
    }

    fn alloc_role(&mut self) -> RoleId {
        self.st.next_role += 1;
        RoleId(self.st.next_role)
    }

    fn inbound_sender_on(&self, connection: ConnectionId) -> Option<RoleId> {
        self.st
            .list
            .senders()
            .find(|s| !s.is_outward() && s.connection_id() == connection)
            .map(SendingSubscription::id)
    }

    fn inbound_receiver_on(&self, connection: ConnectionId) -> Option<RoleId> {
        self.st
            .list
            .receivers()
            .find(|r| !r.is_outward() && r.connection_id() == connection)
            .map(ReceivingSubscription::id)
    }

    fn users(&self) -> BTreeSet<UserId> {
        let senders = self
            .st
            .list
            .senders()
            .filter(|s| !s.is_outward())
            .map(SendingSubscription::user);
        let receivers = self
            .st
            .list
            .receivers()
            .filter(|r| !r.is_outward())
            .map(ReceivingSubscription::user);
        senders.chain(receivers).collect()
    }

    /// Authority reported in positive acknowledgements to peers.
    fn acknowledged_authority(&self) -> Option<DistributorId> {
        if self.st.list.is_central_distributor() {
            return Some(self.config.local_distributor_id);
        }
        let source = self
            .st
            .list
            .source()
            .and_then(|id| self.st.list.sender(id))
            .and_then(|s| s.outward())
            .and_then(OutwardRole::authority);
        let drain = self
            .st
            .list
            .drain()
            .and_then(|id| self.st.list.receiver(id))
            .and_then(|r| r.outward())
            .and_then(OutwardRole::authority);
        source.or(drain)
    }

    fn set_sender_state(&mut self, id: RoleId, state: SenderState) {
        let authority = self.acknowledged_authority();
        if let Some(sender) = self.st.list.sender_mut(id) {
            sender.set_state(self.topic, state, authority);
        }
    }

    fn set_receiver_state(&mut self, id: RoleId, state: ReceiverState) {
        let authority = self.acknowledged_authority();
        if let Some(receiver) = self.st.list.receiver_mut(id) {
            receiver.set_state(self.topic, state, authority);
        }
    }

    /// Send a status record carrying the last distributed index.
    fn send_status(&mut self, id: RoleId, state: DataState) {
        let index = self.st.last_index;
        let now = self.now_millis();
        if let Some(receiver) = self.st.list.receiver_mut(id) {
            receiver.send_status(self.topic, state, index, now);
        }
    }

    /// Epoch for a (re)installed source or drain.
    ///
    /// Never below the epoch of data already distributed, so indices keep
    /// growing when authority is re-acquired within the same second.
    fn next_epoch(&self) -> u64 {
        let now = self.deps.time.now_secs();
        if self.st.highest_index == 0 {
            now
        } else {
            now.max(index_epoch(self.st.highest_index) + 1)
        }
    }

    fn install_source(&mut self, id: RoleId) {
        let epoch = self.next_epoch();
        self.st.list.set_source(id, epoch);
        debug!(topic = %self.topic, role = %id, epoch, "Source installed");
        self.sync_authority();
    }

    fn install_drain(&mut self, id: RoleId) {
        let epoch = self.next_epoch();
        self.st.list.set_drain(id, epoch);
        debug!(topic = %self.topic, role = %id, epoch, "Drain installed");
        self.sync_authority();
    }

    /// Report authority changes to the directory.
    fn sync_authority(&mut self) {
        let now = self.st.list.is_central_distributor();
        if now == self.st.authoritative {
            return;
        }
        self.st.authoritative = now;
        if now {
            info!(topic = %self.topic, "Became central distributor");
            self.deps.directory.became_authoritative(self.topic);
        } else {
            info!(topic = %self.topic, "Lost central distributor role");
            self.deps.directory.lost_authority(self.topic);
        }
    }

    /// Bookkeeping after the source or drain slot was emptied.
    fn on_central_cleared(&mut self) {
        self.st.retained = None;
        self.st.last_index = 0;
        self.sync_authority();
        self.retry_invalid();
    }

    /// Remove a sender and release it.
    fn drop_sender(&mut self, id: RoleId) {
        let was_source = self.st.list.source() == Some(id);
        match self.st.list.remove_sender(id) {
            Ok(mut sender) => sender.unsubscribe(self.topic),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Sender vanished before removal");
                return;
            }
        }
        if was_source {
            self.on_central_cleared();
        }
    }

    /// Remove a receiver and release it.
    fn drop_receiver(&mut self, id: RoleId) {
        let was_drain = self.st.list.drain() == Some(id);
        match self.st.list.remove_receiver(id) {
            Ok(mut receiver) => receiver.unsubscribe(self.topic),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Receiver vanished before removal");
                return;
            }
        }
        if was_drain {
            self.on_central_cleared();
        }
    }

    fn remove_connection(&mut self, connection: ConnectionId) {
        let senders: Vec<RoleId> = self
            .st
            .list
            .senders()
            .filter(|s| s.connection_id() == connection)
            .map(SendingSubscription::id)
            .collect();
        let receivers: Vec<RoleId> = self
            .st
            .list
            .receivers()
            .filter(|r| r.connection_id() == connection)
            .map(ReceivingSubscription::id)
            .collect();
        let pending: Vec<DistributorId> = self
            .st
            .pending
            .iter()
            .filter(|(_, p)| p.connection_id() == Some(connection))
            .map(|(peer, _)| *peer)
            .collect();

        if senders.is_empty() && receivers.is_empty() && pending.is_empty() {
            return;
        }
        info!(
            topic = %self.topic,
            connection = %connection,
            senders = senders.len(),
            receivers = receivers.len(),
            pending = pending.len(),
            "Connection lost, removing role objects"
        );
        for peer in pending {
            self.cancel_pending(peer);
        }
        for id in senders {
            self.drop_sender(id);
        }
        for id in receivers {
            self.drop_receiver(id);
        }
        self.reconcile();
    }

    fn snapshot(&self) -> SubscriptionSnapshot {
        let list = &self.st.list;
        let senders = list
            .senders()
            .map(|s| SenderSnapshot {
                local: s.is_local(),
                connection: s.connection_id(),
                user: s.user(),
                source: s.wants_source(),
                request_supported: s.request_supported(),
                state: s.state(),
                link: s.link_state(),
            })
            .collect();
        let receivers = list
            .receivers()
            .map(|r| ReceiverSnapshot {
                local: r.is_local(),
                connection: r.connection_id(),
                user: r.user(),
                drain: r.wants_drain(),
                delta: r.options().delta,
                delayed: r.options().delayed,
                state: r.state(),
                link: r.link_state(),
            })
            .collect();
        let candidates = self
            .candidate_distributors()
            .into_iter()
            .map(|distributor| CandidateSnapshot {
                distributor,
                route: self
                    .deps
                    .directory
                    .best_connection(distributor)
                    .map(|connection| RouteSnapshot {
                        connection: connection.connection_id(),
                        weight: connection.route_weight(),
                        remote_user: connection.remote_user_id(),
                    }),
            })
            .collect();
        SubscriptionSnapshot {
            senders,
            receivers,
            candidates,
        }
    }
}
