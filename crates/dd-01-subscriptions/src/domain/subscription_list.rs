//! # Topic Registration Set
//!
//! Holds the sender and receiver role objects of one topic, the current
//! source and drain, and the epoch timestamp used to generate data indices.
//!
//! ## Invariants
//!
//! - Source and drain are mutually exclusive.
//! - Only members can be promoted to source or drain.
//!
//! Violations are programming errors and panic.

use std::collections::BTreeMap;

use super::errors::SubscriptionError;
use super::roles::{ReceivingSubscription, SendingSubscription};
use super::value_objects::{Direction, RoleId};

/// Length of the running part of a data index.
pub const RUNNING_INDEX_MODULUS: u64 = (1 << 26) - 2;

/// Builds the data index for `counter` within the epoch `epoch_secs`.
///
/// The low running value is `counter mod (2^26 - 2) + 1`, the overflow
/// `counter div (2^26 - 2)` is added to the epoch. The two lowest bits stay
/// free.
pub fn data_index(epoch_secs: u64, counter: u64) -> u64 {
    let running = counter % RUNNING_INDEX_MODULUS + 1;
    let overflow = counter / RUNNING_INDEX_MODULUS;
    (epoch_secs.wrapping_add(overflow) << 32) ^ (running << 2)
}

/// Index that directly follows `index` in a generated sequence.
pub fn successor_index(index: u64) -> u64 {
    let epoch = index >> 32;
    let running = (index & 0xFFFF_FFFF) >> 2;
    if running >= RUNNING_INDEX_MODULUS {
        ((epoch + 1) << 32) ^ (1 << 2)
    } else {
        (epoch << 32) ^ ((running + 1) << 2)
    }
}

/// Epoch part of a data index.
pub fn index_epoch(index: u64) -> u64 {
    index >> 32
}

/// True if a stream that last delivered `last` can continue with a stream
/// currently at `observed` without gap or duplicate.
///
/// Nothing delivered yet (`last == 0`) is always continuous.
pub fn index_continuity(last: u64, observed: u64) -> bool {
    last == 0 || observed == last || successor_index(observed) == last
}

/// Registration set of one topic.
#[derive(Debug, Default)]
pub struct SubscriptionList {
    senders: BTreeMap<RoleId, SendingSubscription>,
    receivers: BTreeMap<RoleId, ReceivingSubscription>,
    source: Option<RoleId>,
    drain: Option<RoleId>,
    epoch_secs: u64,
}

impl SubscriptionList {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    pub fn add_sender(&mut self, sender: SendingSubscription) -> Result<(), SubscriptionError> {
        if self.senders.contains_key(&sender.id()) {
            return Err(SubscriptionError::DuplicateSubscription {
                connection: sender.connection_id(),
                direction: Direction::Sending,
            });
        }
        self.senders.insert(sender.id(), sender);
        Ok(())
    }

    pub fn add_receiver(&mut self, receiver: ReceivingSubscription) -> Result<(), SubscriptionError> {
        if self.receivers.contains_key(&receiver.id()) {
            return Err(SubscriptionError::DuplicateSubscription {
                connection: receiver.connection_id(),
                direction: Direction::Receiving,
            });
        }
        self.receivers.insert(receiver.id(), receiver);
        Ok(())
    }

    /// Removes a sender. Clears the source slot if it held this sender.
    pub fn remove_sender(&mut self, id: RoleId) -> Result<SendingSubscription, SubscriptionError> {
        let sender = self
            .senders
            .remove(&id)
            .ok_or(SubscriptionError::UnknownRole(id))?;
        if self.source == Some(id) {
            self.source = None;
        }
        Ok(sender)
    }

    /// Removes a receiver. Clears the drain slot if it held this receiver.
    pub fn remove_receiver(
        &mut self,
        id: RoleId,
    ) -> Result<ReceivingSubscription, SubscriptionError> {
        let receiver = self
            .receivers
            .remove(&id)
            .ok_or(SubscriptionError::UnknownRole(id))?;
        if self.drain == Some(id) {
            self.drain = None;
        }
        Ok(receiver)
    }

    pub fn sender(&self, id: RoleId) -> Option<&SendingSubscription> {
        self.senders.get(&id)
    }

    pub fn sender_mut(&mut self, id: RoleId) -> Option<&mut SendingSubscription> {
        self.senders.get_mut(&id)
    }

    pub fn receiver(&self, id: RoleId) -> Option<&ReceivingSubscription> {
        self.receivers.get(&id)
    }

    pub fn receiver_mut(&mut self, id: RoleId) -> Option<&mut ReceivingSubscription> {
        self.receivers.get_mut(&id)
    }

    pub fn senders(&self) -> impl Iterator<Item = &SendingSubscription> {
        self.senders.values()
    }

    pub fn senders_mut(&mut self) -> impl Iterator<Item = &mut SendingSubscription> {
        self.senders.values_mut()
    }

    pub fn receivers(&self) -> impl Iterator<Item = &ReceivingSubscription> {
        self.receivers.values()
    }

    pub fn receivers_mut(&mut self) -> impl Iterator<Item = &mut ReceivingSubscription> {
        self.receivers.values_mut()
    }

    pub fn sender_ids(&self) -> Vec<RoleId> {
        self.senders.keys().copied().collect()
    }

    pub fn receiver_ids(&self) -> Vec<RoleId> {
        self.receivers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty() && self.receivers.is_empty()
    }

    // -------------------------------------------------------------------------
    // Source / drain
    // -------------------------------------------------------------------------

    pub fn source(&self) -> Option<RoleId> {
        self.source
    }

    pub fn drain(&self) -> Option<RoleId> {
        self.drain
    }

    /// True if `id` may be installed as source right now.
    pub fn can_set_source(&self, id: RoleId) -> bool {
        self.drain.is_none() && self.source.map_or(true, |current| current == id)
    }

    /// True if `id` may be installed as drain right now.
    pub fn can_set_drain(&self, id: RoleId) -> bool {
        self.source.is_none() && self.drain.map_or(true, |current| current == id)
    }

    /// Installs a member as source and stamps the epoch.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a sender or a drain is installed.
    pub fn set_source(&mut self, id: RoleId, epoch_secs: u64) {
        assert!(
            self.senders.contains_key(&id),
            "source {id} is not a member of the sender set"
        );
        assert!(
            self.drain.is_none(),
            "cannot install source {id} while a drain is installed"
        );
        self.source = Some(id);
        self.epoch_secs = epoch_secs;
    }

    /// Installs a member as drain and stamps the epoch.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a receiver or a source is installed.
    pub fn set_drain(&mut self, id: RoleId, epoch_secs: u64) {
        assert!(
            self.receivers.contains_key(&id),
            "drain {id} is not a member of the receiver set"
        );
        assert!(
            self.source.is_none(),
            "cannot install drain {id} while a source is installed"
        );
        self.drain = Some(id);
        self.epoch_secs = epoch_secs;
    }

    pub fn clear_source(&mut self) {
        self.source = None;
    }

    pub fn clear_drain(&mut self) {
        self.drain = None;
    }

    pub fn epoch_secs(&self) -> u64 {
        self.epoch_secs
    }

    /// True iff the installed source or drain is a local role object.
    pub fn is_central_distributor(&self) -> bool {
        let local_source = self
            .source
            .and_then(|id| self.senders.get(&id))
            .is_some_and(SendingSubscription::is_local);
        let local_drain = self
            .drain
            .and_then(|id| self.receivers.get(&id))
            .is_some_and(ReceivingSubscription::is_local);
        local_source || local_drain
    }

    /// Data index for `counter`, or 0 if this node is not authoritative.
    pub fn next_data_index(&self, counter: u64) -> u64 {
        if !self.is_central_distributor() {
            return 0;
        }
        data_index(self.epoch_secs, counter)
    }
}
