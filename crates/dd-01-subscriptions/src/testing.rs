//! Centralized Testing Utilities
//!
//! Recording connections, a scriptable access policy, an in-memory topic
//! directory and a controllable clock. Available with the `test-utils`
//! feature flag.
//!
//! # Example
//!
//! ```rust
//! use dd_01_subscriptions::testing::TestBed;
//! use shared_types::{DistributorId, TopicKey};
//!
//! let bed = TestBed::new();
//! let info = bed.topic(TopicKey::new(1, 2, 3, 0), DistributorId(1));
//! assert!(info.is_empty());
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shared_types::{ConnectionId, DataState, DistributorId, Telegram, TopicKey, UserId};

use crate::config::SubscriptionConfig;
use crate::domain::{Acknowledgement, Action, ConnectionError, OutwardRequest, SendControl};
use crate::ports::outbound::{
    AccessPolicy, ApplicationConnection, Connection, PeerConnection, TimeSource, TopicDirectory,
};
use crate::service::{Collaborators, SubscriptionInfo};

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Local application connection that records everything sent to it.
#[derive(Debug)]
pub struct RecordingApplication {
    id: ConnectionId,
    user: UserId,
    sent: Mutex<Vec<(Telegram, bool)>>,
    controls: Mutex<Vec<SendControl>>,
}

impl RecordingApplication {
    pub fn new(connection: u64, user: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId(connection),
            user: UserId(user),
            sent: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
        })
    }

    pub fn telegrams(&self) -> Vec<Telegram> {
        self.sent.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Payload-carrying records only.
    pub fn data(&self) -> Vec<Telegram> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t.payload.is_some())
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// States of the payload-less records, in order.
    pub fn statuses(&self) -> Vec<DataState> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t.payload.is_none())
            .map(|(t, _)| t.state)
            .collect()
    }

    pub fn controls(&self) -> Vec<SendControl> {
        self.controls.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.controls.lock().clear();
    }
}

impl Connection for RecordingApplication {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn remote_user_id(&self) -> UserId {
        self.user
    }

    fn send_data(&self, telegram: &Telegram, toward_authority: bool) -> Result<(), ConnectionError> {
        self.sent.lock().push((telegram.clone(), toward_authority));
        Ok(())
    }
}

impl ApplicationConnection for RecordingApplication {
    fn send_control(&self, _topic: &TopicKey, control: SendControl) -> Result<(), ConnectionError> {
        self.controls.lock().push(control);
        Ok(())
    }
}

/// Peer distributor connection that records everything sent to it.
#[derive(Debug)]
pub struct RecordingPeer {
    id: ConnectionId,
    distributor: DistributorId,
    user: UserId,
    weight: i32,
    sent: Mutex<Vec<(Telegram, bool)>>,
    subscriptions: Mutex<Vec<OutwardRequest>>,
    unsubscriptions: Mutex<Vec<OutwardRequest>>,
    acknowledgements: Mutex<Vec<Acknowledgement>>,
}

impl RecordingPeer {
    pub fn new(connection: u64, distributor: u64, user: u64) -> Arc<Self> {
        Self::with_weight(connection, distributor, user, 1)
    }

    pub fn with_weight(connection: u64, distributor: u64, user: u64, weight: i32) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId(connection),
            distributor: DistributorId(distributor),
            user: UserId(user),
            weight,
            sent: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
            acknowledgements: Mutex::new(Vec::new()),
        })
    }

    /// Telegrams with their `toward_authority` flag.
    pub fn sent(&self) -> Vec<(Telegram, bool)> {
        self.sent.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<OutwardRequest> {
        self.subscriptions.lock().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<OutwardRequest> {
        self.unsubscriptions.lock().clone()
    }

    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.acknowledgements.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.subscriptions.lock().clear();
        self.unsubscriptions.lock().clear();
        self.acknowledgements.lock().clear();
    }
}

impl Connection for RecordingPeer {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn remote_user_id(&self) -> UserId {
        self.user
    }

    fn send_data(&self, telegram: &Telegram, toward_authority: bool) -> Result<(), ConnectionError> {
        self.sent.lock().push((telegram.clone(), toward_authority));
        Ok(())
    }
}

impl PeerConnection for RecordingPeer {
    fn remote_distributor_id(&self) -> DistributorId {
        self.distributor
    }

    fn route_weight(&self) -> i32 {
        self.weight
    }

    fn subscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError> {
        self.subscriptions.lock().push(request.clone());
        Ok(())
    }

    fn unsubscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError> {
        self.unsubscriptions.lock().push(request.clone());
        Ok(())
    }

    fn send_acknowledgement(&self, ack: &Acknowledgement) -> Result<(), ConnectionError> {
        self.acknowledgements.lock().push(ack.clone());
        Ok(())
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Access policy that allows everything except explicitly denied rights.
#[derive(Debug, Default)]
pub struct StaticPolicy {
    denied_users: RwLock<HashSet<UserId>>,
    denied_actions: RwLock<HashSet<(UserId, Action)>>,
}

impl StaticPolicy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deny every action for `user`.
    pub fn deny_user(&self, user: u64) {
        self.denied_users.write().insert(UserId(user));
    }

    pub fn deny(&self, user: u64, action: Action) {
        self.denied_actions.write().insert((UserId(user), action));
    }

    /// Lift every denial for `user`.
    pub fn allow_user(&self, user: u64) {
        let user = UserId(user);
        self.denied_users.write().remove(&user);
        self.denied_actions.write().retain(|(u, _)| *u != user);
    }
}

impl AccessPolicy for StaticPolicy {
    fn is_action_allowed(&self, user: UserId, _topic: &TopicKey, action: Action) -> bool {
        !self.denied_users.read().contains(&user)
            && !self.denied_actions.read().contains(&(user, action))
    }
}

/// Authority change reported to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityEvent {
    Became(TopicKey),
    Lost(TopicKey),
}

/// Topic directory backed by in-memory maps. Candidates apply to every topic.
#[derive(Default)]
pub struct InMemoryDirectory {
    candidates: RwLock<BTreeSet<DistributorId>>,
    routes: RwLock<HashMap<DistributorId, Arc<dyn PeerConnection>>>,
    events: Mutex<Vec<AuthorityEvent>>,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_candidate(&self, distributor: u64) {
        self.candidates.write().insert(DistributorId(distributor));
    }

    pub fn remove_candidate(&self, distributor: u64) {
        self.candidates.write().remove(&DistributorId(distributor));
    }

    pub fn set_route(&self, distributor: u64, connection: Arc<dyn PeerConnection>) {
        self.routes
            .write()
            .insert(DistributorId(distributor), connection);
    }

    pub fn remove_route(&self, distributor: u64) {
        self.routes.write().remove(&DistributorId(distributor));
    }

    pub fn events(&self) -> Vec<AuthorityEvent> {
        self.events.lock().clone()
    }
}

impl TopicDirectory for InMemoryDirectory {
    fn candidate_distributors(&self, _topic: &TopicKey) -> BTreeSet<DistributorId> {
        self.candidates.read().clone()
    }

    fn best_connection(&self, distributor: DistributorId) -> Option<Arc<dyn PeerConnection>> {
        self.routes.read().get(&distributor).cloned()
    }

    fn became_authoritative(&self, topic: &TopicKey) {
        self.events.lock().push(AuthorityEvent::Became(*topic));
    }

    fn lost_authority(&self, topic: &TopicKey) {
        self.events.lock().push(AuthorityEvent::Lost(*topic));
    }
}

/// A time source that returns a controllable timestamp.
#[derive(Debug)]
pub struct FixedTimeSource {
    millis: AtomicI64,
}

impl FixedTimeSource {
    pub fn new(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new(millis),
        })
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Default start time of a [`TestBed`] clock: 2023-11-14T22:13:20Z.
pub const TEST_EPOCH_MILLIS: i64 = 1_700_000_000_000;

/// Bundle of test collaborators.
pub struct TestBed {
    pub policy: Arc<StaticPolicy>,
    pub directory: Arc<InMemoryDirectory>,
    pub clock: Arc<FixedTimeSource>,
}

impl TestBed {
    pub fn new() -> Self {
        Self {
            policy: StaticPolicy::new(),
            directory: InMemoryDirectory::new(),
            clock: FixedTimeSource::new(TEST_EPOCH_MILLIS),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            policy: self.policy.clone(),
            directory: self.directory.clone(),
            time: self.clock.clone(),
        }
    }

    /// Orchestrator for `topic` on the distributor `local`.
    pub fn topic(&self, topic: TopicKey, local: DistributorId) -> SubscriptionInfo {
        SubscriptionInfo::new(topic, SubscriptionConfig::new(local), self.collaborators())
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}
