//! Remote authority discovery, acknowledgements and the ambiguity lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use shared_types::{ConnectionId, DataState, DistributorId};
use tracing::{debug, info, warn};

use super::TopicEngine;
use crate::domain::{
    CentralKind, IncomingAcknowledgement, LinkState, OutwardRole, ReceiverState,
    ReceivingSubscription, RoleId, SenderState, SendingSubscription,
};
use crate::ports::outbound::PeerConnection;

impl TopicEngine<'_> {
    /// Outward role object of `kind` placed on `connection`.
    pub(super) fn outward_on(&self, kind: CentralKind, connection: ConnectionId) -> Option<RoleId> {
        match kind {
            CentralKind::Source => self
                .st
                .list
                .senders()
                .find(|s| s.outward().is_some_and(|o| o.connection_id() == connection))
                .map(SendingSubscription::id),
            CentralKind::Drain => self
                .st
                .list
                .receivers()
                .find(|r| r.outward().is_some_and(|o| o.connection_id() == connection))
                .map(ReceivingSubscription::id),
        }
    }

    pub(super) fn outward_ids(&self, kind: CentralKind) -> Vec<RoleId> {
        match kind {
            CentralKind::Source => self
                .st
                .list
                .senders()
                .filter(|s| s.is_outward())
                .map(SendingSubscription::id)
                .collect(),
            CentralKind::Drain => self
                .st
                .list
                .receivers()
                .filter(|r| r.is_outward())
                .map(ReceivingSubscription::id)
                .collect(),
        }
    }

    pub(super) fn outward(&self, kind: CentralKind, id: RoleId) -> Option<&OutwardRole> {
        match kind {
            CentralKind::Source => self.st.list.sender(id).and_then(|s| s.outward()),
            CentralKind::Drain => self.st.list.receiver(id).and_then(|r| r.outward()),
        }
    }

    fn outward_mut(&mut self, kind: CentralKind, id: RoleId) -> Option<&mut OutwardRole> {
        match kind {
            CentralKind::Source => self.st.list.sender_mut(id).and_then(|s| s.outward_mut()),
            CentralKind::Drain => self.st.list.receiver_mut(id).and_then(|r| r.outward_mut()),
        }
    }

    fn is_installed(&self, kind: CentralKind, id: RoleId) -> bool {
        match kind {
            CentralKind::Source => self.st.list.source() == Some(id),
            CentralKind::Drain => self.st.list.drain() == Some(id),
        }
    }

    pub(super) fn drop_outward(&mut self, kind: CentralKind, id: RoleId) {
        match kind {
            CentralKind::Source => self.drop_sender(id),
            CentralKind::Drain => self.drop_receiver(id),
        }
    }

    /// Candidate authorities: directory candidates plus those reported by
    /// inbound remote role objects, without this node.
    pub(super) fn candidate_distributors(&self) -> BTreeSet<DistributorId> {
        let mut candidates = self.deps.directory.candidate_distributors(self.topic);
        for sender in self.st.list.senders() {
            if let Some(set) = sender.inbound_candidates() {
                candidates.extend(set.iter().copied());
            }
        }
        for receiver in self.st.list.receivers() {
            if let Some(set) = receiver.inbound_candidates() {
                candidates.extend(set.iter().copied());
            }
        }
        candidates.remove(&self.config.local_distributor_id);
        candidates
    }

    /// Recompute the per-direction need and create or tear down outward
    /// subscriptions accordingly.
    pub(super) fn update_remote_need(&mut self) {
        let central = self.st.list.is_central_distributor();
        let want_source = !central
            && self
                .st
                .list
                .receivers()
                .any(|r| !r.is_outward() && !r.wants_drain() && r.state().is_admitted());
        let want_drain = !central
            && self
                .st
                .list
                .senders()
                .any(|s| !s.is_outward() && !s.wants_source() && s.state().is_admitted());

        for (kind, want) in [
            (CentralKind::Source, want_source),
            (CentralKind::Drain, want_drain),
        ] {
            let had = self.st.need.get(kind);
            self.st.need.set(kind, want);
            if want != had {
                debug!(topic = %self.topic, %kind, need = want, "Remote need changed");
            }
            let existing = self.outward_ids(kind);
            if want && existing.is_empty() {
                self.create_outward(kind);
            } else if !want && !existing.is_empty() {
                self.remove_outward(kind);
            }
        }
    }

    /// Issue one outward subscription of `kind` per best connection toward
    /// the candidate authorities.
    pub(super) fn create_outward(&mut self, kind: CentralKind) {
        let mut routes: BTreeMap<ConnectionId, (Arc<dyn PeerConnection>, BTreeSet<DistributorId>)> =
            BTreeMap::new();
        for candidate in self.candidate_distributors() {
            if let Some(connection) = self.deps.directory.best_connection(candidate) {
                routes
                    .entry(connection.connection_id())
                    .or_insert_with(|| (connection, BTreeSet::new()))
                    .1
                    .insert(candidate);
            }
        }

        for (connection_id, (connection, candidates)) in routes {
            if self.is_loop(kind, connection_id) {
                debug!(topic = %self.topic, connection = %connection_id, %kind, "Skipping looping route");
                continue;
            }
            if self.outward_on(kind, connection_id).is_some()
                || self.pending_on(kind, connection_id).is_some()
            {
                continue;
            }
            let id = self.alloc_role();
            let count = candidates.len();
            let outward = OutwardRole::new(connection, kind, candidates);
            let result = match kind {
                CentralKind::Source => {
                    let mut role = SendingSubscription::remote_source(id, outward);
                    role.subscribe(self.topic);
                    self.st.list.add_sender(role)
                }
                CentralKind::Drain => {
                    let mut role = ReceivingSubscription::remote_drain(id, outward);
                    role.subscribe(self.topic);
                    self.st.list.add_receiver(role)
                }
            };
            match result {
                Ok(()) => info!(
                    topic = %self.topic,
                    role = %id,
                    connection = %connection_id,
                    %kind,
                    candidates = count,
                    "Outward subscription issued"
                ),
                Err(e) => warn!(topic = %self.topic, error = %e, "Outward subscription not stored"),
            }
        }
    }

    /// The peer on `connection` already asks us for the same thing.
    pub(super) fn is_loop(&self, kind: CentralKind, connection: ConnectionId) -> bool {
        match kind {
            CentralKind::Source => self
                .st
                .list
                .receivers()
                .any(|r| r.is_inbound_remote() && r.connection_id() == connection),
            CentralKind::Drain => self
                .st
                .list
                .senders()
                .any(|s| s.is_inbound_remote() && s.connection_id() == connection),
        }
    }

    /// Tear down every outward subscription of `kind`.
    fn remove_outward(&mut self, kind: CentralKind) {
        let ids = self.outward_ids(kind);
        debug!(topic = %self.topic, %kind, count = ids.len(), "Tearing down outward subscriptions");
        for id in ids {
            self.drop_outward(kind, id);
        }
        let pending: Vec<DistributorId> = self
            .st
            .pending
            .iter()
            .filter(|(_, p)| p.kind() == kind)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in pending {
            self.cancel_pending(peer);
        }
    }

    /// Candidates or routes changed: issue subscriptions for new routes.
    pub(super) fn refresh_remote_connections(&mut self) {
        if self.st.locked {
            return;
        }
        for kind in [CentralKind::Source, CentralKind::Drain] {
            if self.st.need.get(kind) {
                self.create_outward(kind);
            }
        }
        self.reconcile();
    }

    pub(super) fn handle_acknowledgement(&mut self, ack: IncomingAcknowledgement) {
        if let Some(peer) = self.pending_on(ack.kind, ack.connection) {
            self.on_pending_acknowledgement(peer, ack);
            return;
        }
        let Some(id) = self.outward_on(ack.kind, ack.connection) else {
            debug!(
                topic = %self.topic,
                connection = %ack.connection,
                kind = %ack.kind,
                "Acknowledgement for unknown outward subscription"
            );
            return;
        };
        if let Some(outward) = self.outward_mut(ack.kind, id) {
            outward.apply_acknowledgement(ack.state, ack.authority);
        }
        debug!(
            topic = %self.topic,
            role = %id,
            state = ?ack.state,
            authority = ?ack.authority,
            "Outward subscription acknowledged"
        );

        if ack.state != LinkState::Valid && self.is_installed(ack.kind, id) {
            match ack.kind {
                CentralKind::Source => self.st.list.clear_source(),
                CentralKind::Drain => self.st.list.clear_drain(),
            }
            info!(topic = %self.topic, role = %id, kind = %ack.kind, "Remote authority withdrawn");
            self.on_central_cleared();
        }
        self.reconcile();
    }

    /// Distinct positive authorities and whether any peer reports ambiguity.
    fn remote_authorities(&self) -> (BTreeSet<Option<DistributorId>>, bool) {
        let outward = self
            .st
            .list
            .senders()
            .filter_map(SendingSubscription::outward)
            .chain(self.st.list.receivers().filter_map(ReceivingSubscription::outward));
        let mut positives = BTreeSet::new();
        let mut ambiguous = false;
        for o in outward {
            match o.link() {
                LinkState::Valid => {
                    positives.insert(o.authority());
                }
                LinkState::Ambiguous => ambiguous = true,
                LinkState::Waiting | LinkState::Rejected => {}
            }
        }
        (positives, ambiguous)
    }

    /// Settle the topic after any change: lock handling, stale-route cleanup,
    /// installation of a confirmed remote authority, derived status and
    /// pending redirections.
    pub(super) fn reconcile(&mut self) {
        let (positives, ambiguous) = self.remote_authorities();
        if positives.len() > 1 || ambiguous {
            if !self.st.locked {
                self.enter_lock(positives.len());
            }
            return;
        }
        if self.st.locked {
            self.leave_lock();
        }
        if self.config.stale_route_cleanup && positives.len() == 1 {
            self.drop_stale_routes();
        }
        self.install_positive_outward();
        self.update_status();
        self.check_pending();
    }

    fn enter_lock(&mut self, authorities: usize) {
        warn!(topic = %self.topic, authorities, "Ambiguous remote authority, locking topic");
        self.st.locked = true;
        let had_central = self.st.list.source().is_some() || self.st.list.drain().is_some();
        self.st.list.clear_source();
        self.st.list.clear_drain();
        if had_central {
            self.st.retained = None;
            self.st.last_index = 0;
        }
        self.sync_authority();

        let pending: Vec<DistributorId> = self.st.pending.keys().copied().collect();
        for peer in pending {
            self.cancel_pending(peer);
        }
        for id in self.st.list.sender_ids() {
            self.set_sender_state(id, SenderState::MultipleRemoteLock);
        }
        for id in self.st.list.receiver_ids() {
            self.set_receiver_state(id, ReceiverState::MultipleRemoteLock);
            self.send_status(id, DataState::InvalidSubscription);
        }
    }

    /// Reset every role object and admit it again from scratch.
    fn leave_lock(&mut self) {
        info!(topic = %self.topic, "Remote authority resolved, unlocking topic");
        self.st.locked = false;
        let senders = self.st.list.sender_ids();
        let receivers = self.st.list.receiver_ids();
        for &id in &senders {
            let outward = self.st.list.sender(id).is_some_and(|s| s.is_outward());
            let state = if outward {
                SenderState::Waiting
            } else {
                SenderState::Unknown
            };
            self.set_sender_state(id, state);
        }
        for &id in &receivers {
            let outward = self.st.list.receiver(id).is_some_and(|r| r.is_outward());
            let state = if outward {
                ReceiverState::Waiting
            } else {
                ReceiverState::Unknown
            };
            self.set_receiver_state(id, state);
        }
        for id in senders {
            self.admit_sender(id);
        }
        for id in receivers {
            self.admit_receiver(id);
        }
    }

    /// With exactly one positive answer, rejected routes of the same kind
    /// only cause churn.
    fn drop_stale_routes(&mut self) {
        for kind in [CentralKind::Source, CentralKind::Drain] {
            let ids = self.outward_ids(kind);
            let has_positive = ids
                .iter()
                .any(|&id| self.outward(kind, id).is_some_and(OutwardRole::is_positive));
            if !has_positive {
                continue;
            }
            for id in ids {
                let rejected = self
                    .outward(kind, id)
                    .is_some_and(|o| o.link() == LinkState::Rejected);
                if rejected {
                    debug!(topic = %self.topic, role = %id, %kind, "Dropping stale route");
                    self.drop_outward(kind, id);
                }
            }
        }
    }

    /// Install a confirmed outward subscription if its slot is free.
    pub(super) fn install_positive_outward(&mut self) {
        for id in self.outward_ids(CentralKind::Source) {
            let positive = self
                .outward(CentralKind::Source, id)
                .is_some_and(OutwardRole::is_positive);
            if positive && self.st.list.source() != Some(id) && self.st.list.can_set_source(id) {
                info!(topic = %self.topic, role = %id, "Remote source installed");
                self.install_source(id);
            }
        }
        for id in self.outward_ids(CentralKind::Drain) {
            let positive = self
                .outward(CentralKind::Drain, id)
                .is_some_and(OutwardRole::is_positive);
            if positive && self.st.list.drain() != Some(id) && self.st.list.can_set_drain(id) {
                info!(topic = %self.topic, role = %id, "Remote drain installed");
                self.install_drain(id);
            }
        }
    }
}
