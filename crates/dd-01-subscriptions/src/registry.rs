//! # Topic Registry
//!
//! Owns the orchestrators of all topics of one distributor. A topic lives
//! while at least one [`SubscriptionHandle`] is open or its registration set
//! is non-empty.
//!
//! Lock order is registry lock, then topic lock. Fan-out operations clone
//! the orchestrators out of the map and run without the registry lock.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{ConnectionId, DistributorId, TopicKey, UserId};
use tracing::{debug, info};

use crate::config::SubscriptionConfig;
use crate::domain::SubscriptionError;
use crate::ports::inbound::TopicSubscriptions;
use crate::ports::outbound::PeerConnection;
use crate::service::{Collaborators, SubscriptionInfo};

struct TopicEntry {
    info: Arc<SubscriptionInfo>,
    /// Open handles.
    open: usize,
}

/// All topics of one distributor.
pub struct SubscriptionRegistry {
    config: SubscriptionConfig,
    deps: Collaborators,
    topics: Mutex<HashMap<TopicKey, TopicEntry>>,
}

impl SubscriptionRegistry {
    pub fn new(config: SubscriptionConfig, deps: Collaborators) -> Result<Self, SubscriptionError> {
        config.validate()?;
        info!(
            distributor = %config.local_distributor_id,
            stale_route_cleanup = config.stale_route_cleanup,
            route_redirection = config.route_redirection,
            "Subscription registry created"
        );
        Ok(Self {
            config,
            deps,
            topics: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Open `topic`, creating its orchestrator on first use.
    pub fn open(&self, topic: TopicKey) -> SubscriptionHandle<'_> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic).or_insert_with(|| {
            debug!(topic = %topic, "Topic created");
            TopicEntry {
                info: Arc::new(SubscriptionInfo::new(
                    topic,
                    self.config.clone(),
                    self.deps.clone(),
                )),
                open: 0,
            }
        });
        entry.open += 1;
        SubscriptionHandle {
            registry: self,
            info: entry.info.clone(),
        }
    }

    fn close(&self, topic: &TopicKey) {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        entry.open = entry.open.saturating_sub(1);
        if entry.open == 0 && entry.info.is_empty() {
            topics.remove(topic);
            debug!(topic = %topic, "Topic destroyed");
        }
    }

    /// Orchestrator of `topic` if it exists. Does not keep the topic open;
    /// a topic emptied through it is destroyed by the next fan-out.
    pub fn get(&self, topic: &TopicKey) -> Option<Arc<SubscriptionInfo>> {
        self.topics.lock().get(topic).map(|e| e.info.clone())
    }

    pub fn len(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.lock().is_empty()
    }

    pub fn topics(&self) -> Vec<TopicKey> {
        let mut keys: Vec<TopicKey> = self.topics.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    fn all(&self) -> Vec<Arc<SubscriptionInfo>> {
        self.topics.lock().values().map(|e| e.info.clone()).collect()
    }

    /// Remove closed topics whose registration set became empty.
    fn prune(&self) {
        let mut topics = self.topics.lock();
        let before = topics.len();
        topics.retain(|_, e| e.open > 0 || !e.info.is_empty());
        let removed = before - topics.len();
        if removed > 0 {
            debug!(removed, "Empty topics destroyed");
        }
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    pub fn on_user_rights_changed(&self, user: UserId) {
        debug!(user = %user, "Rights changed");
        for info in self.all() {
            info.on_user_rights_changed(user);
        }
        self.prune();
    }

    /// A connection went away: drop everything registered on it.
    pub fn connection_lost(&self, connection: ConnectionId) {
        info!(connection = %connection, "Connection lost");
        for info in self.all() {
            info.remove_connection(connection);
        }
        self.prune();
    }

    pub fn update_best_route(&self, distributor: DistributorId, connection: Arc<dyn PeerConnection>) {
        debug!(
            distributor = %distributor,
            connection = %connection.connection_id(),
            "Best route changed"
        );
        for info in self.all() {
            info.update_best_route(distributor, connection.clone());
        }
        self.prune();
    }

    /// Candidate authorities or routes changed.
    pub fn refresh_remote_connections(&self) {
        for info in self.all() {
            info.refresh_remote_connections();
        }
        self.prune();
    }
}

/// Open reference to one topic. Closes the topic when dropped.
pub struct SubscriptionHandle<'a> {
    registry: &'a SubscriptionRegistry,
    info: Arc<SubscriptionInfo>,
}

impl SubscriptionHandle<'_> {
    pub fn info(&self) -> &Arc<SubscriptionInfo> {
        &self.info
    }
}

impl Deref for SubscriptionHandle<'_> {
    type Target = SubscriptionInfo;

    fn deref(&self) -> &SubscriptionInfo {
        &self.info
    }
}

impl Drop for SubscriptionHandle<'_> {
    fn drop(&mut self) {
        self.registry.close(self.info.topic());
    }
}
