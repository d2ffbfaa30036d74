//! # In-Process Distributor Network
//!
//! Every node owns a [`SubscriptionRegistry`] with its own policy, directory
//! and clock. Peer links queue protocol messages instead of delivering them,
//! so no topic lock is held while the far node processes a message.
//! [`Network::pump`] drains the queue until the network is quiet.
//!
//! Message mapping at the far end:
//!
//! | Message | Far node |
//! |---------|----------|
//! | subscribe source | inbound remote receiver |
//! | subscribe drain | inbound remote sender |
//! | acknowledgement | outward subscription answer |
//! | telegram | `distribute`, index-assigned unless sent toward the authority |

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use dd_01_subscriptions::domain::Direction;
use dd_01_subscriptions::testing::TestBed;
use dd_01_subscriptions::{
    Acknowledgement, CentralKind, Connection, ConnectionError, DistributionOutcome,
    IncomingAcknowledgement, OutwardRequest, PeerConnection, ReceiveOptions,
    ReceiverRegistration, SenderRegistration, SubscriptionConfig, SubscriptionRegistry,
    TopicSubscriptions,
};
use parking_lot::Mutex;
use shared_types::{ConnectionId, DistributorId, Telegram, UserId};
use tracing::{debug, trace};

/// Peer connections are authenticated as `PEER_USER_BASE + distributor`.
pub const PEER_USER_BASE: u64 = 1000;

/// First connection id handed to peer links. Local applications use lower ids.
const FIRST_LINK_CONNECTION: u64 = 100;

/// Upper bound on messages per pump, guards against protocol ping-pong.
const MAX_MESSAGES_PER_PUMP: usize = 10_000;

/// Protocol message in flight.
#[derive(Debug, Clone)]
pub enum Message {
    Subscribe(OutwardRequest),
    Unsubscribe(OutwardRequest),
    Acknowledge(Acknowledgement),
    Data {
        telegram: Telegram,
        toward_authority: bool,
    },
}

#[derive(Debug, Clone)]
struct Envelope {
    to: DistributorId,
    /// Receiving end of the link.
    connection: ConnectionId,
    message: Message,
}

type Queue = Arc<Mutex<VecDeque<Envelope>>>;

/// One end of a peer link.
pub struct LinkEnd {
    connection: ConnectionId,
    remote: DistributorId,
    remote_connection: ConnectionId,
    weight: i32,
    queue: Queue,
}

impl LinkEnd {
    fn push(&self, message: Message) {
        self.queue.lock().push_back(Envelope {
            to: self.remote,
            connection: self.remote_connection,
            message,
        });
    }
}

impl Connection for LinkEnd {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn remote_user_id(&self) -> UserId {
        UserId(PEER_USER_BASE + self.remote.0)
    }

    fn send_data(&self, telegram: &Telegram, toward_authority: bool) -> Result<(), ConnectionError> {
        self.push(Message::Data {
            telegram: telegram.clone(),
            toward_authority,
        });
        Ok(())
    }
}

impl PeerConnection for LinkEnd {
    fn remote_distributor_id(&self) -> DistributorId {
        self.remote
    }

    fn route_weight(&self) -> i32 {
        self.weight
    }

    fn subscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError> {
        self.push(Message::Subscribe(request.clone()));
        Ok(())
    }

    fn unsubscribe_outward(&self, request: &OutwardRequest) -> Result<(), ConnectionError> {
        self.push(Message::Unsubscribe(request.clone()));
        Ok(())
    }

    fn send_acknowledgement(&self, ack: &Acknowledgement) -> Result<(), ConnectionError> {
        self.push(Message::Acknowledge(ack.clone()));
        Ok(())
    }
}

/// One distributor.
pub struct Node {
    pub id: DistributorId,
    pub bed: TestBed,
    pub registry: SubscriptionRegistry,
    links: BTreeMap<ConnectionId, Arc<LinkEnd>>,
}

impl Node {
    /// Link end on this node with the given connection id.
    pub fn link(&self, connection: ConnectionId) -> Option<&Arc<LinkEnd>> {
        self.links.get(&connection)
    }
}

/// Distributors joined by queued peer links.
pub struct Network {
    nodes: BTreeMap<DistributorId, Node>,
    queue: Queue,
    next_connection: u64,
    outcomes: Mutex<Vec<(DistributorId, DistributionOutcome)>>,
}

impl Network {
    pub fn new() -> Self {
        dd_telemetry::init_test_logging();
        Self {
            nodes: BTreeMap::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            next_connection: FIRST_LINK_CONNECTION,
            outcomes: Mutex::new(Vec::new()),
        }
    }

    /// Add a distributor with default configuration.
    pub fn add_node(&mut self, id: u64) {
        self.add_node_with(SubscriptionConfig::new(DistributorId(id)));
    }

    pub fn add_node_with(&mut self, config: SubscriptionConfig) {
        let id = config.local_distributor_id;
        let bed = TestBed::new();
        let registry = SubscriptionRegistry::new(config, bed.collaborators())
            .unwrap_or_else(|e| panic!("invalid node configuration: {e}"));
        self.nodes.insert(
            id,
            Node {
                id,
                bed,
                registry,
                links: BTreeMap::new(),
            },
        );
    }

    pub fn node(&self, id: u64) -> &Node {
        self.nodes
            .get(&DistributorId(id))
            .unwrap_or_else(|| panic!("no node dist#{id}"))
    }

    /// Join two nodes and make each the direct route to the other.
    ///
    /// Returns the link end at `a` and the one at `b`.
    pub fn connect(&mut self, a: u64, b: u64, weight: i32) -> (Arc<LinkEnd>, Arc<LinkEnd>) {
        let at_a = ConnectionId(self.next_connection);
        let at_b = ConnectionId(self.next_connection + 1);
        self.next_connection += 2;

        let end_a = Arc::new(LinkEnd {
            connection: at_a,
            remote: DistributorId(b),
            remote_connection: at_b,
            weight,
            queue: self.queue.clone(),
        });
        let end_b = Arc::new(LinkEnd {
            connection: at_b,
            remote: DistributorId(a),
            remote_connection: at_a,
            weight,
            queue: self.queue.clone(),
        });

        for (node, end) in [(a, &end_a), (b, &end_b)] {
            let node = self
                .nodes
                .get_mut(&DistributorId(node))
                .unwrap_or_else(|| panic!("no node dist#{node}"));
            node.links.insert(end.connection, end.clone());
        }
        self.route(a, b, &end_a);
        self.route(b, a, &end_b);
        (end_a, end_b)
    }

    /// Make `via` the best route from `from` toward `to`.
    pub fn route(&self, from: u64, to: u64, via: &Arc<LinkEnd>) {
        self.node(from).bed.directory.set_route(to, via.clone());
    }

    /// Declare `authority` a candidate for every topic at `at`.
    pub fn candidate(&self, at: u64, authority: u64) {
        self.node(at).bed.directory.add_candidate(authority);
    }

    /// Outcomes of telegrams delivered over peer links, oldest first.
    pub fn outcomes(&self) -> Vec<(DistributorId, DistributionOutcome)> {
        self.outcomes.lock().clone()
    }

    /// Messages waiting for delivery.
    pub fn in_flight(&self) -> usize {
        self.queue.lock().len()
    }

    /// Deliver queued messages until none are left. Returns the count.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.queue.lock().pop_front();
            let Some(envelope) = next else {
                break;
            };
            assert!(
                delivered < MAX_MESSAGES_PER_PUMP,
                "network did not settle after {delivered} messages"
            );
            self.deliver(envelope);
            delivered += 1;
        }
        debug!(delivered, "Network quiet");
        delivered
    }

    /// Deliver exactly one queued message. Returns false if none was queued.
    pub fn step(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some(envelope) => {
                self.deliver(envelope);
                true
            }
            None => false,
        }
    }

    fn deliver(&self, envelope: Envelope) {
        let node = self.node(envelope.to.0);
        let Some(link) = node.links.get(&envelope.connection).cloned() else {
            panic!("dist#{} has no link {}", envelope.to.0, envelope.connection);
        };
        let key = match &envelope.message {
            Message::Subscribe(request) | Message::Unsubscribe(request) => request.topic,
            Message::Acknowledge(ack) => ack.topic,
            Message::Data { telegram, .. } => telegram.topic,
        };
        trace!(to = %envelope.to, connection = %envelope.connection, message = ?envelope.message, "Delivering");
        let topic = node.registry.open(key);
        let connection = envelope.connection;

        match envelope.message {
            Message::Subscribe(request) => {
                let peer: Arc<dyn PeerConnection> = link;
                let result = match request.kind {
                    CentralKind::Source => topic.add_receiver(ReceiverRegistration::Remote {
                        connection: peer,
                        candidates: request.candidates,
                        options: ReceiveOptions::normal(),
                    }),
                    CentralKind::Drain => topic.add_sender(SenderRegistration::Remote {
                        connection: peer,
                        candidates: request.candidates,
                    }),
                };
                if let Err(e) = result {
                    debug!(node = %node.id, error = %e, "Remote registration refused");
                }
            }
            Message::Unsubscribe(request) => {
                let result = match request.kind {
                    CentralKind::Source => topic.remove_receiver(connection),
                    CentralKind::Drain => topic.remove_sender(connection),
                };
                if let Err(e) = result {
                    debug!(node = %node.id, error = %e, "Remote deregistration ignored");
                }
            }
            Message::Acknowledge(ack) => {
                let kind = match ack.direction {
                    Direction::Receiving => CentralKind::Source,
                    Direction::Sending => CentralKind::Drain,
                };
                topic.handle_acknowledgement(IncomingAcknowledgement {
                    connection,
                    kind,
                    state: ack.state,
                    authority: ack.authority,
                });
            }
            Message::Data {
                telegram,
                toward_authority,
            } => {
                let outcome = topic.distribute(connection, vec![telegram], !toward_authority);
                self.outcomes.lock().push((node.id, outcome));
            }
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
