//! Route redirection.
//!
//! When the topology reports a better connection toward an authority, the
//! topic opens a replacement subscription on it while the current one keeps
//! carrying data. The replacement takes over once the peer confirms it and,
//! for sources, once its data stream lines up with what was already
//! delivered.

use std::sync::Arc;

use shared_types::{ConnectionId, DistributorId};
use tracing::{debug, info, warn};

use super::{PendingRedirection, PendingRole, TopicEngine};
use crate::domain::{
    index_continuity, CentralKind, IncomingAcknowledgement, LinkState, OutwardRole,
    ReceivingSubscription, SendingSubscription,
};
use crate::ports::outbound::PeerConnection;

impl TopicEngine<'_> {
    /// Peer whose pending redirection of `kind` runs over `connection`.
    pub(super) fn pending_on(
        &self,
        kind: CentralKind,
        connection: ConnectionId,
    ) -> Option<DistributorId> {
        self.st
            .pending
            .iter()
            .find(|(_, p)| p.kind() == kind && p.connection_id() == Some(connection))
            .map(|(peer, _)| *peer)
    }

    /// Abandon the redirection toward `peer`.
    pub(super) fn cancel_pending(&mut self, peer: DistributorId) {
        if let Some(mut pending) = self.st.pending.remove(&peer) {
            debug!(topic = %self.topic, peer = %peer, kind = %pending.kind(), "Redirection cancelled");
            pending.cancel(self.topic);
        }
    }

    pub(super) fn update_best_route(
        &mut self,
        peer: DistributorId,
        connection: Arc<dyn PeerConnection>,
    ) {
        if !self.config.route_redirection || self.st.locked {
            return;
        }
        let connection_id = connection.connection_id();
        let kinds = [CentralKind::Source, CentralKind::Drain];
        let has_positive = kinds.iter().any(|&kind| {
            self.outward_ids(kind)
                .into_iter()
                .any(|id| self.outward(kind, id).is_some_and(OutwardRole::is_positive))
        });

        if !has_positive && !self.st.list.is_central_distributor() {
            // Nothing confirmed yet: move unresolved subscriptions directly.
            let mut moved = false;
            for kind in kinds {
                for id in self.outward_ids(kind) {
                    let eligible = self.outward(kind, id).is_some_and(|o| {
                        !o.is_positive()
                            && o.connection_id() != connection_id
                            && o.candidates().contains(&peer)
                    });
                    if !eligible
                        || self.outward_on(kind, connection_id).is_some()
                        || self.is_loop(kind, connection_id)
                    {
                        continue;
                    }
                    info!(
                        topic = %self.topic,
                        role = %id,
                        peer = %peer,
                        connection = %connection_id,
                        "Moving unresolved subscription to better route"
                    );
                    let topic = self.topic;
                    match kind {
                        CentralKind::Source => {
                            if let Some(o) = self.st.list.sender_mut(id).and_then(|s| s.outward_mut()) {
                                o.migrate(topic, id, connection.clone());
                            }
                        }
                        CentralKind::Drain => {
                            if let Some(o) = self.st.list.receiver_mut(id).and_then(|r| r.outward_mut()) {
                                o.migrate(topic, id, connection.clone());
                            }
                        }
                    }
                    moved = true;
                }
            }
            if moved {
                self.reconcile();
            }
            return;
        }

        for kind in kinds {
            for id in self.outward_ids(kind) {
                let Some(current) = self.outward(kind, id) else {
                    continue;
                };
                if !current.is_positive()
                    || current.authority() != Some(peer)
                    || current.connection_id() == connection_id
                {
                    continue;
                }
                let candidates = current.candidates().clone();
                if self.pending_on(kind, connection_id) == Some(peer) {
                    continue;
                }
                self.cancel_pending(peer);

                let replacement_id = self.alloc_role();
                let outward = OutwardRole::new(connection.clone(), kind, candidates);
                let role = match kind {
                    CentralKind::Source => {
                        let mut role = SendingSubscription::remote_source(replacement_id, outward);
                        role.subscribe(self.topic);
                        PendingRole::Source(role)
                    }
                    CentralKind::Drain => {
                        let mut role = ReceivingSubscription::remote_drain(replacement_id, outward);
                        role.subscribe(self.topic);
                        PendingRole::Drain(role)
                    }
                };
                info!(
                    topic = %self.topic,
                    peer = %peer,
                    replaces = %id,
                    role = %replacement_id,
                    connection = %connection_id,
                    "Redirection started"
                );
                self.st.pending.insert(
                    peer,
                    PendingRedirection {
                        replaces: id,
                        role,
                    },
                );
            }
        }
    }

    /// Answer to a replacement subscription.
    pub(super) fn on_pending_acknowledgement(
        &mut self,
        peer: DistributorId,
        ack: IncomingAcknowledgement,
    ) {
        let Some(pending) = self.st.pending.get_mut(&peer) else {
            return;
        };
        if let Some(outward) = pending.outward_mut() {
            outward.apply_acknowledgement(ack.state, ack.authority);
        }
        if ack.state != LinkState::Valid || ack.authority != Some(peer) {
            debug!(
                topic = %self.topic,
                peer = %peer,
                state = ?ack.state,
                authority = ?ack.authority,
                "Replacement route refused"
            );
            self.cancel_pending(peer);
            return;
        }
        self.check_pending();
    }

    /// Take over every confirmed redirection whose stream is continuous.
    pub(super) fn check_pending(&mut self) {
        let last_index = self.st.last_index;
        let ready: Vec<DistributorId> = self
            .st
            .pending
            .iter()
            .filter(|(_, p)| {
                p.outward().is_some_and(|o| {
                    o.is_positive()
                        && (p.kind() == CentralKind::Drain
                            || index_continuity(last_index, o.observed_index()))
                })
            })
            .map(|(peer, _)| *peer)
            .collect();
        if ready.is_empty() {
            return;
        }
        for peer in ready {
            self.take_over(peer);
        }
        self.install_positive_outward();
        self.update_status();
    }

    /// Swap the confirmed replacement in for the role object it replaces.
    fn take_over(&mut self, peer: DistributorId) {
        let Some(pending) = self.st.pending.remove(&peer) else {
            return;
        };
        let old = pending.replaces;
        let epoch = self.st.list.epoch_secs();
        let topic = self.topic;

        // A replacement whose old route vanished joins as a regular outward role.
        let new_id = match pending.role {
            PendingRole::Source(mut role) => {
                let new_id = role.id();
                let previous = self
                    .st
                    .list
                    .sender(old)
                    .map(|s| (s.state(), self.st.list.source() == Some(old)));
                if let Some((state, _)) = previous {
                    role.set_state(topic, state, None);
                }
                if let Err(e) = self.st.list.add_sender(role) {
                    warn!(topic = %topic, error = %e, "Replacement source not stored");
                    return;
                }
                if previous.is_some_and(|(_, installed)| installed) {
                    self.st.list.set_source(new_id, epoch);
                }
                if let Ok(mut replaced) = self.st.list.remove_sender(old) {
                    replaced.unsubscribe(topic);
                }
                new_id
            }
            PendingRole::Drain(mut role) => {
                let new_id = role.id();
                let previous = self
                    .st
                    .list
                    .receiver(old)
                    .map(|r| (r.state(), self.st.list.drain() == Some(old)));
                if let Some((state, _)) = previous {
                    role.set_state(topic, state, None);
                }
                if let Err(e) = self.st.list.add_receiver(role) {
                    warn!(topic = %topic, error = %e, "Replacement drain not stored");
                    return;
                }
                if previous.is_some_and(|(_, installed)| installed) {
                    self.st.list.set_drain(new_id, epoch);
                }
                if let Ok(mut replaced) = self.st.list.remove_receiver(old) {
                    replaced.unsubscribe(topic);
                }
                new_id
            }
        };
        info!(
            topic = %topic,
            peer = %peer,
            replaced = %old,
            role = %new_id,
            "Redirection completed"
        );
    }
}
