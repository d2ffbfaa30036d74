//! Domain invariants for topic subscriptions.
//!
//! Checked by tests after every operation and by debug assertions in the
//! orchestrator.

use super::subscription_list::SubscriptionList;
use super::value_objects::{ReceiverState, SenderState};

/// INVARIANT-1: Exclusive Authority
/// A topic never has a source and a drain at the same time.
pub fn invariant_exclusive_central(list: &SubscriptionList) -> bool {
    !(list.source().is_some() && list.drain().is_some())
}

/// INVARIANT-2: Central Membership
/// An installed source or drain is a member of the matching set.
pub fn invariant_central_membership(list: &SubscriptionList) -> bool {
    let source_ok = list.source().map_or(true, |id| list.sender(id).is_some());
    let drain_ok = list.drain().map_or(true, |id| list.receiver(id).is_some());
    source_ok && drain_ok
}

/// INVARIANT-3: Monotonic Data Index
/// An accepted index is strictly greater than the last distributed one.
pub fn invariant_index_advances(last_index: u64, next_index: u64) -> bool {
    next_index > last_index
}

/// INVARIANT-4: Lock Isolation
/// While the topic is locked by ambiguous authority nothing is installed and
/// no role object may exchange data.
pub fn invariant_lock_isolation(locked: bool, list: &SubscriptionList) -> bool {
    if !locked {
        return true;
    }
    list.source().is_none()
        && list.drain().is_none()
        && list.senders().all(|s| !s.state().is_valid_sender())
        && list.receivers().all(|r| !r.state().is_valid_receiver())
}

/// INVARIANT-5: Installed Roles Are Admitted
/// A local source or drain has passed admission (it is not parked).
pub fn invariant_central_admitted(list: &SubscriptionList) -> bool {
    let source_ok = list
        .source()
        .and_then(|id| list.sender(id))
        .map_or(true, |s| {
            !matches!(
                s.state(),
                SenderState::NotAllowed
                    | SenderState::InvalidSubscription
                    | SenderState::MultipleRemoteLock
            )
        });
    let drain_ok = list
        .drain()
        .and_then(|id| list.receiver(id))
        .map_or(true, |r| {
            !matches!(
                r.state(),
                ReceiverState::NotAllowed
                    | ReceiverState::InvalidSubscription
                    | ReceiverState::MultipleRemoteLock
            )
        });
    source_ok && drain_ok
}

/// Check all registration-set invariants.
pub fn check_all_invariants(list: &SubscriptionList, locked: bool) -> bool {
    invariant_exclusive_central(list)
        && invariant_central_membership(list)
        && invariant_lock_isolation(locked, list)
        && invariant_central_admitted(list)
}
