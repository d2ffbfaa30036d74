//! Telegram distribution.

use shared_types::{same_content, ConnectionId, Telegram};
use tracing::{trace, warn};

use super::TopicEngine;
use crate::domain::{
    CentralKind, DistributionOutcome, DropReason, ReceiverState, ReceivingSubscription, RoleId,
    SendingSubscription,
};

impl TopicEngine<'_> {
    pub(super) fn distribute(
        &mut self,
        origin: ConnectionId,
        mut batch: Vec<Telegram>,
        index_assigned: bool,
    ) -> DistributionOutcome {
        let Some(first) = batch.first() else {
            return DistributionOutcome::Dropped(DropReason::EmptyBatch);
        };
        let incoming_index = first.data_index;

        if index_assigned {
            if let Some(peer) = self.pending_on(CentralKind::Source, origin) {
                if let Some(outward) = self
                    .st
                    .pending
                    .get_mut(&peer)
                    .and_then(|p| p.outward_mut())
                {
                    outward.observe_index(incoming_index);
                }
                trace!(topic = %self.topic, peer = %peer, index = incoming_index, "Telegram on replacement route");
                self.check_pending();
                return DistributionOutcome::Dropped(DropReason::PendingRedirection);
            }
        }
        if self.st.locked {
            return DistributionOutcome::Dropped(DropReason::Locked);
        }

        let Some(sender_id) = self.origin_sender(origin, index_assigned) else {
            warn!(topic = %self.topic, connection = %origin, "Telegram from unknown sender dropped");
            return DistributionOutcome::Dropped(DropReason::UnknownSender);
        };
        let valid = self
            .st
            .list
            .sender(sender_id)
            .is_some_and(|s| s.state().is_valid_sender());
        if !valid {
            trace!(topic = %self.topic, role = %sender_id, "Telegram from invalid sender dropped");
            return DistributionOutcome::Dropped(DropReason::InvalidSender);
        }

        let mut assigned = index_assigned;
        let mut index = incoming_index;
        if !assigned && self.st.list.is_central_distributor() {
            index = self.st.list.next_data_index(self.st.index_counter);
            self.st.index_counter += 1;
            for telegram in &mut batch {
                telegram.data_index = index;
            }
            assigned = true;
        }
        if assigned && index <= self.st.last_index {
            trace!(
                topic = %self.topic,
                index,
                last = self.st.last_index,
                "Stale data index dropped"
            );
            return DistributionOutcome::Dropped(DropReason::StaleIndex);
        }
        if index_assigned {
            if let Some(outward) = self
                .st
                .list
                .sender_mut(sender_id)
                .and_then(|s| s.outward_mut())
            {
                outward.observe_index(index);
            }
        }

        let delayed = batch.iter().any(|t| t.delayed);
        let unchanged = self
            .st
            .retained
            .as_deref()
            .is_some_and(|previous| same_content(previous, &batch));

        let toward_authority = if assigned {
            None
        } else {
            self.designated_drain()
        };

        let mut delivered = 0;
        for receiver in self.st.list.receivers_mut() {
            if receiver.state() != ReceiverState::SendersAvailable {
                continue;
            }
            let options = receiver.options();
            if delayed && !options.delayed {
                continue;
            }
            if !assigned && toward_authority != Some(receiver.id()) {
                continue;
            }
            if options.delta && unchanged {
                continue;
            }
            receiver.deliver(&batch);
            delivered += 1;
        }

        if assigned {
            self.st.last_index = index;
            self.st.highest_index = self.st.highest_index.max(index);
            if !delayed {
                self.st.retained = Some(batch);
            }
        }
        trace!(topic = %self.topic, index, delivered, "Telegram batch distributed");
        DistributionOutcome::Delivered(delivered)
    }

    /// The one outward drain that carries data without an index: the
    /// installed drain, else the first confirmed outward drain.
    fn designated_drain(&self) -> Option<RoleId> {
        let carries = |r: &ReceivingSubscription| {
            r.is_outward() && r.state() == ReceiverState::SendersAvailable
        };
        let list = &self.st.list;
        list.drain()
            .filter(|&id| list.receiver(id).is_some_and(carries))
            .or_else(|| list.receivers().find(|r| carries(*r)).map(ReceivingSubscription::id))
    }

    /// Sender role object a batch from `origin` belongs to. Assigned data
    /// comes from an outward source, unassigned data from a local or inbound
    /// remote sender.
    fn origin_sender(&self, origin: ConnectionId, index_assigned: bool) -> Option<RoleId> {
        let mut on_origin = self
            .st
            .list
            .senders()
            .filter(|s| s.connection_id() == origin);
        if index_assigned {
            let candidates: Vec<&SendingSubscription> = on_origin.collect();
            candidates
                .iter()
                .find(|s| s.is_outward())
                .or_else(|| candidates.first())
                .map(|s| s.id())
        } else {
            on_origin.find(|s| !s.is_outward()).map(SendingSubscription::id)
        }
    }
}
