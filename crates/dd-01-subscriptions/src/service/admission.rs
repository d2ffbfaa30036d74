//! Admission of role objects and derived-status recomputation.

use std::collections::BTreeSet;

use shared_types::{DataState, UserId};
use tracing::{debug, trace};

use super::TopicEngine;
use crate::domain::{
    Delivery, LinkState, ReceiverState, ReceivingSubscription, RoleId, SenderState,
    SendingSubscription,
};

impl TopicEngine<'_> {
    /// Admission steps for a sender. Does not recompute derived status.
    pub(super) fn admit_sender(&mut self, id: RoleId) {
        let Some(sender) = self.st.list.sender(id) else {
            return;
        };
        if sender.is_outward() {
            return;
        }
        if self.st.locked {
            self.set_sender_state(id, SenderState::MultipleRemoteLock);
            return;
        }
        let (user, action, wants_source) =
            (sender.user(), sender.required_action(), sender.wants_source());

        if !self.deps.policy.is_action_allowed(user, self.topic, action) {
            debug!(topic = %self.topic, role = %id, user = %user, ?action, "Sender not allowed");
            self.park_sender(id);
            return;
        }
        if wants_source {
            if !self.st.list.can_set_source(id) {
                debug!(topic = %self.topic, role = %id, "Topic already has a source or drain");
                self.set_sender_state(id, SenderState::InvalidSubscription);
                return;
            }
            if self.st.list.source() != Some(id) {
                self.install_source(id);
            }
        }
        self.set_sender_state(id, SenderState::Waiting);
    }

    /// Admission steps for a receiver. Does not recompute derived status.
    pub(super) fn admit_receiver(&mut self, id: RoleId) {
        let Some(receiver) = self.st.list.receiver(id) else {
            return;
        };
        if receiver.is_outward() {
            return;
        }
        if self.st.locked {
            self.set_receiver_state(id, ReceiverState::MultipleRemoteLock);
            self.send_status(id, DataState::InvalidSubscription);
            return;
        }
        let (user, action, wants_drain) = (
            receiver.user(),
            receiver.required_action(),
            receiver.wants_drain(),
        );

        if !self.deps.policy.is_action_allowed(user, self.topic, action) {
            debug!(topic = %self.topic, role = %id, user = %user, ?action, "Receiver not allowed");
            self.park_receiver(id);
            return;
        }
        if wants_drain {
            if !self.st.list.can_set_drain(id) {
                debug!(topic = %self.topic, role = %id, "Topic already has a source or drain");
                self.set_receiver_state(id, ReceiverState::InvalidSubscription);
                self.send_status(id, DataState::InvalidSubscription);
                return;
            }
            if self.st.list.drain() != Some(id) {
                self.install_drain(id);
            }
        }
        self.set_receiver_state(id, ReceiverState::Waiting);
    }

    /// Park a sender in `NotAllowed`, giving up its source slot.
    fn park_sender(&mut self, id: RoleId) {
        let was_source = self.st.list.source() == Some(id);
        if was_source {
            self.st.list.clear_source();
        }
        self.set_sender_state(id, SenderState::NotAllowed);
        if was_source {
            self.on_central_cleared();
        }
    }

    /// Park a receiver in `NotAllowed`, giving up its drain slot.
    fn park_receiver(&mut self, id: RoleId) {
        let was_drain = self.st.list.drain() == Some(id);
        if was_drain {
            self.st.list.clear_drain();
        }
        self.set_receiver_state(id, ReceiverState::NotAllowed);
        self.send_status(id, DataState::NoRights);
        if was_drain {
            self.on_central_cleared();
        }
    }

    /// Re-admit role objects parked because of a conflicting source or drain.
    pub(super) fn retry_invalid(&mut self) {
        let senders: Vec<RoleId> = self
            .st
            .list
            .senders()
            .filter(|s| s.state() == SenderState::InvalidSubscription)
            .map(SendingSubscription::id)
            .collect();
        let receivers: Vec<RoleId> = self
            .st
            .list
            .receivers()
            .filter(|r| r.state() == ReceiverState::InvalidSubscription)
            .map(ReceivingSubscription::id)
            .collect();
        for id in senders {
            self.admit_sender(id);
        }
        for id in receivers {
            self.admit_receiver(id);
        }
    }

    /// Re-check the rights of every role object owned by `user`.
    pub(super) fn revalidate_user(&mut self, user: UserId) {
        let senders: Vec<RoleId> = self
            .st
            .list
            .senders()
            .filter(|s| !s.is_outward() && s.user() == user)
            .map(SendingSubscription::id)
            .collect();
        let receivers: Vec<RoleId> = self
            .st
            .list
            .receivers()
            .filter(|r| !r.is_outward() && r.user() == user)
            .map(ReceivingSubscription::id)
            .collect();

        for id in senders {
            let Some(sender) = self.st.list.sender(id) else {
                continue;
            };
            let allowed = self
                .deps
                .policy
                .is_action_allowed(user, self.topic, sender.required_action());
            match (allowed, sender.state()) {
                (false, SenderState::NotAllowed) => {}
                (false, _) => {
                    debug!(topic = %self.topic, role = %id, "Sender lost its rights");
                    self.park_sender(id);
                }
                (true, SenderState::NotAllowed) => self.admit_sender(id),
                (true, _) => {}
            }
        }

        for id in receivers {
            let Some(receiver) = self.st.list.receiver(id) else {
                continue;
            };
            let allowed = self
                .deps
                .policy
                .is_action_allowed(user, self.topic, receiver.required_action());
            match (allowed, receiver.state()) {
                (false, ReceiverState::NotAllowed) => {}
                (false, _) => {
                    debug!(topic = %self.topic, role = %id, "Receiver lost its rights");
                    self.park_receiver(id);
                }
                (true, ReceiverState::NotAllowed) => self.admit_receiver(id),
                (true, _) => {}
            }
        }
    }

    /// Recompute derived states of the whole topic.
    pub(super) fn update_status(&mut self) {
        if self.st.locked {
            return;
        }
        self.update_remote_need();

        let links: Vec<LinkState> = self
            .st
            .list
            .senders()
            .filter_map(|s| s.outward().map(|o| o.link()))
            .chain(
                self.st
                    .list
                    .receivers()
                    .filter_map(|r| r.outward().map(|o| o.link())),
            )
            .collect();
        let positive = links.contains(&LinkState::Valid);
        if !links.is_empty() && !positive && links.contains(&LinkState::Waiting) {
            trace!(topic = %self.topic, "Outward subscriptions unresolved, deferring status");
            return;
        }

        // Inbound remote roles that cannot be served from here.
        let mut excluded: BTreeSet<RoleId> = BTreeSet::new();
        if !self.st.list.is_central_distributor() && !positive {
            if self.st.need.drain {
                let ids: Vec<RoleId> = self
                    .st
                    .list
                    .senders()
                    .filter(|s| s.is_inbound_remote() && s.state().is_admitted())
                    .map(SendingSubscription::id)
                    .collect();
                for id in ids {
                    self.set_sender_state(id, SenderState::NoRemoteDrain);
                    excluded.insert(id);
                }
            }
            if self.st.need.source {
                let ids: Vec<RoleId> = self
                    .st
                    .list
                    .receivers()
                    .filter(|r| r.is_inbound_remote() && r.state().is_admitted())
                    .map(ReceivingSubscription::id)
                    .collect();
                for id in ids {
                    self.set_receiver_state(id, ReceiverState::NoRemoteSource);
                    excluded.insert(id);
                }
            }
        }

        let senders: Vec<RoleId> = self
            .st
            .list
            .senders()
            .filter(|s| !excluded.contains(&s.id()) && sender_participates(s))
            .map(SendingSubscription::id)
            .collect();
        let receivers: Vec<RoleId> = self
            .st
            .list
            .receivers()
            .filter(|r| !excluded.contains(&r.id()) && receiver_participates(r))
            .map(ReceivingSubscription::id)
            .collect();

        let source = self.st.list.source();
        let drain = self.st.list.drain();

        if senders.is_empty() || (source.is_none() && drain.is_none()) {
            for id in receivers {
                let Some(receiver) = self.st.list.receiver(id) else {
                    continue;
                };
                let old = receiver.state();
                let is_drain = drain == Some(id) || receiver.wants_drain();
                self.set_receiver_state(id, ReceiverState::NoSenders);
                // Drains only hear about it when they lose their senders.
                if !is_drain || old == ReceiverState::SendersAvailable {
                    self.send_status(id, DataState::NoSource);
                }
            }
            for id in senders {
                self.set_sender_state(id, SenderState::NoReceivers);
            }
        } else if receivers.is_empty() {
            for id in senders {
                self.set_sender_state(id, SenderState::NoReceivers);
            }
        } else {
            if source.is_some() {
                let retained = self.st.retained.clone();
                let central = self.st.list.is_central_distributor();
                for id in receivers {
                    let Some(receiver) = self.st.list.receiver(id) else {
                        continue;
                    };
                    let old = receiver.state();
                    self.set_receiver_state(id, ReceiverState::SendersAvailable);
                    if old == ReceiverState::SendersAvailable {
                        continue;
                    }
                    match &retained {
                        Some(batch) => {
                            if let Some(receiver) = self.st.list.receiver_mut(id) {
                                receiver.deliver(batch);
                            }
                        }
                        None if central => self.send_status(id, DataState::NoSource),
                        None => {}
                    }
                }
            } else {
                for id in receivers {
                    self.set_receiver_state(id, ReceiverState::SendersAvailable);
                    let cleared = self
                        .st
                        .list
                        .receiver(id)
                        .is_some_and(|r| r.last_delivery() == Delivery::Status(DataState::NoSource));
                    if cleared {
                        self.send_status(id, DataState::Data);
                    }
                }
            }
            for id in senders {
                self.set_sender_state(id, SenderState::ReceiversAvailable);
            }
        }
    }
}

/// Sender takes part in recomputation: admitted, or a confirmed outward source.
fn sender_participates(sender: &SendingSubscription) -> bool {
    match sender.outward() {
        Some(outward) => {
            outward.is_positive() && sender.state() != SenderState::MultipleRemoteLock
        }
        None => sender.state().is_admitted(),
    }
}

/// Receiver takes part in recomputation: admitted, or a confirmed outward drain.
fn receiver_participates(receiver: &ReceivingSubscription) -> bool {
    match receiver.outward() {
        Some(outward) => {
            outward.is_positive() && receiver.state() != ReceiverState::MultipleRemoteLock
        }
        None => receiver.state().is_admitted(),
    }
}
