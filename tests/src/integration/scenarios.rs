//! # Multi-Node Scenarios
//!
//! Topology used by most tests:
//!
//! ```text
//! dist#1 (edge) ---- dist#2 (relay) ---- dist#3 (authority)
//! ```
//!
//! The edge only knows dist#3 as a candidate and reaches it through the relay.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dd_01_subscriptions::domain::data_index;
    use dd_01_subscriptions::testing::{RecordingApplication, TEST_EPOCH_MILLIS};
    use dd_01_subscriptions::{
        Connection, DistributionOutcome, DropReason, LinkState, ReceiveOptions, ReceiverRegistration,
        ReceiverState, SendControl, SenderRegistration, SenderState, TopicSubscriptions,
    };
    use shared_types::{ConnectionId, DataState, DistributorId, Telegram, TopicKey};

    use crate::network::{LinkEnd, Network};

    const EPOCH: u64 = (TEST_EPOCH_MILLIS / 1000) as u64;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn key() -> TopicKey {
        TopicKey::new(4711, 12, 1, 0)
    }

    fn batch(payload: &[u8]) -> Vec<Telegram> {
        vec![Telegram::data(key(), TEST_EPOCH_MILLIS, payload.to_vec())]
    }

    fn source(app: &Arc<RecordingApplication>) -> SenderRegistration {
        SenderRegistration::Local {
            connection: app.clone(),
            source: true,
            request_supported: true,
        }
    }

    fn subscriber(app: &Arc<RecordingApplication>) -> ReceiverRegistration {
        ReceiverRegistration::Local {
            connection: app.clone(),
            drain: false,
            options: ReceiveOptions::normal(),
        }
    }

    struct Chain {
        net: Network,
        /// Edge end of the edge-relay link.
        edge_up: Arc<LinkEnd>,
        /// Relay end of the edge-relay link.
        relay_down: Arc<LinkEnd>,
        /// Relay end of the relay-authority link.
        relay_up: Arc<LinkEnd>,
        /// Authority end of the relay-authority link.
        authority_down: Arc<LinkEnd>,
    }

    /// dist#1 -- dist#2 -- dist#3, routes toward dist#3 through the relay.
    fn chain() -> Chain {
        let mut net = Network::new();
        for id in 1..=3 {
            net.add_node(id);
        }
        let (edge_up, relay_down) = net.connect(1, 2, 1);
        let (relay_up, authority_down) = net.connect(2, 3, 1);
        net.route(1, 3, &edge_up);
        net.candidate(1, 3);
        net.candidate(2, 3);
        Chain {
            net,
            edge_up,
            relay_down,
            relay_up,
            authority_down,
        }
    }

    /// Chain with a publishing source on dist#3 and a subscriber on dist#1.
    fn published_chain() -> (Chain, Arc<RecordingApplication>, Arc<RecordingApplication>) {
        let chain = chain();
        let publisher = RecordingApplication::new(1, 10);
        let reader = RecordingApplication::new(2, 20);
        chain
            .net
            .node(3)
            .registry
            .open(key())
            .add_sender(source(&publisher))
            .unwrap();
        chain
            .net
            .node(1)
            .registry
            .open(key())
            .add_receiver(subscriber(&reader))
            .unwrap();
        chain.net.pump();
        (chain, publisher, reader)
    }

    /// Publish one batch from a source on dist#3 and let it propagate.
    fn publish(net: &Network, publisher: &RecordingApplication, payload: &[u8]) {
        let outcome = net
            .node(3)
            .registry
            .open(key())
            .distribute(publisher.connection_id(), batch(payload), false);
        assert!(matches!(outcome, DistributionOutcome::Delivered(_)));
        net.pump();
    }

    // =============================================================================
    // RELAYED SOURCE
    // =============================================================================

    #[test]
    fn test_relay_discovers_remote_source() {
        let (chain, publisher, _reader) = published_chain();
        let net = &chain.net;

        let edge = net.node(1).registry.get(&key()).unwrap();
        assert_eq!(
            edge.receiver_state(ConnectionId(2)),
            Some(ReceiverState::SendersAvailable)
        );
        let outward = edge.outward_subscriptions();
        assert_eq!(outward.len(), 1);
        assert_eq!(outward[0].connection, chain.edge_up.connection_id());
        assert_eq!(outward[0].link, LinkState::Valid);
        assert_eq!(outward[0].authority, Some(DistributorId(3)));
        assert!(outward[0].installed);
        assert!(!edge.is_central_distributor());

        let relay = net.node(2).registry.get(&key()).unwrap();
        assert_eq!(
            relay.receiver_state(chain.relay_down.connection_id()),
            Some(ReceiverState::SendersAvailable)
        );
        assert_eq!(relay.outward_subscriptions()[0].authority, Some(DistributorId(3)));

        let authority = net.node(3).registry.get(&key()).unwrap();
        assert!(authority.is_central_distributor());
        assert_eq!(
            authority.receiver_state(chain.authority_down.connection_id()),
            Some(ReceiverState::SendersAvailable)
        );
        assert_eq!(publisher.controls(), vec![SendControl::Start]);
    }

    #[test]
    fn test_data_crosses_relay_with_authority_indices() {
        let (chain, publisher, reader) = published_chain();
        let net = &chain.net;

        publish(net, &publisher, b"t1");
        publish(net, &publisher, b"t2");
        publish(net, &publisher, b"t3");

        let indices: Vec<u64> = reader.data().iter().map(|t| t.data_index).collect();
        assert_eq!(
            indices,
            vec![
                data_index(EPOCH, 0),
                data_index(EPOCH, 1),
                data_index(EPOCH, 2)
            ]
        );
        let payloads: Vec<Vec<u8>> = reader.data().into_iter().filter_map(|t| t.payload).collect();
        assert_eq!(payloads, vec![b"t1".to_vec(), b"t2".to_vec(), b"t3".to_vec()]);

        // The relay and the edge track the authority's sequence.
        for node in [1, 2] {
            let info = net.node(node).registry.get(&key()).unwrap();
            assert_eq!(info.last_data_index(), data_index(EPOCH, 2));
        }
    }

    #[test]
    fn test_late_reader_behind_relay_is_served_locally() {
        let (chain, publisher, _reader) = published_chain();
        let net = &chain.net;
        publish(net, &publisher, b"retained");

        let late = RecordingApplication::new(3, 30);
        net.node(1)
            .registry
            .open(key())
            .add_receiver(subscriber(&late))
            .unwrap();

        // Served from the edge's retained batch without a round trip.
        assert_eq!(net.in_flight(), 0);
        let data = late.data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload.as_deref(), Some(&b"retained"[..]));
        assert_eq!(data[0].data_index, data_index(EPOCH, 0));
    }

    #[test]
    fn test_relay_drops_replayed_index() {
        let (chain, publisher, reader) = published_chain();
        let net = &chain.net;
        publish(net, &publisher, b"once");

        let replay = reader.data();
        let relay = net.node(2).registry.open(key());
        let outcome = relay.distribute(chain.relay_up.connection_id(), replay, true);
        assert_eq!(outcome, DistributionOutcome::Dropped(DropReason::StaleIndex));
    }

    // =============================================================================
    // RELAYED DRAIN
    // =============================================================================

    #[test]
    fn test_sender_reaches_remote_drain_through_relay() {
        let chain = chain();
        let net = &chain.net;
        let archive = RecordingApplication::new(1, 10);
        let producer = RecordingApplication::new(2, 20);
        net.node(3)
            .registry
            .open(key())
            .add_receiver(ReceiverRegistration::Local {
                connection: archive.clone(),
                drain: true,
                options: ReceiveOptions::normal(),
            })
            .unwrap();
        net.node(1)
            .registry
            .open(key())
            .add_sender(SenderRegistration::Local {
                connection: producer.clone(),
                source: false,
                request_supported: true,
            })
            .unwrap();
        net.pump();

        let edge = net.node(1).registry.get(&key()).unwrap();
        assert_eq!(
            edge.sender_state(ConnectionId(2)),
            Some(SenderState::ReceiversAvailable)
        );
        assert_eq!(producer.controls(), vec![SendControl::Start]);

        let outcome = edge.distribute(ConnectionId(2), batch(b"reading"), false);
        assert_eq!(outcome, DistributionOutcome::Delivered(1));
        net.pump();

        // The authority assigns the index on arrival.
        let stored = archive.data();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data_index, data_index(EPOCH, 0));
        assert_eq!(stored[0].payload.as_deref(), Some(&b"reading"[..]));
        assert!(net
            .outcomes()
            .iter()
            .all(|(_, outcome)| *outcome == DistributionOutcome::Delivered(1)));
    }

    #[test]
    fn test_drain_loss_stops_remote_sender() {
        let chain = chain();
        let net = &chain.net;
        let archive = RecordingApplication::new(1, 10);
        let producer = RecordingApplication::new(2, 20);
        net.node(3)
            .registry
            .open(key())
            .add_receiver(ReceiverRegistration::Local {
                connection: archive.clone(),
                drain: true,
                options: ReceiveOptions::normal(),
            })
            .unwrap();
        net.node(1)
            .registry
            .open(key())
            .add_sender(SenderRegistration::Local {
                connection: producer.clone(),
                source: false,
                request_supported: true,
            })
            .unwrap();
        net.pump();

        net.node(3).registry.connection_lost(ConnectionId(1));
        net.pump();

        let edge = net.node(1).registry.get(&key()).unwrap();
        assert_eq!(
            edge.sender_state(ConnectionId(2)),
            Some(SenderState::NoReceivers)
        );
        assert_eq!(producer.controls(), vec![SendControl::Start, SendControl::Stop]);
    }

    // =============================================================================
    // LOOPS AND TEARDOWN
    // =============================================================================

    #[test]
    fn test_mutual_routes_do_not_loop() {
        let mut net = Network::new();
        net.add_node(1);
        net.add_node(2);
        let (one_to_two, two_to_one) = net.connect(1, 2, 1);
        // Both believe dist#9 lies behind the other.
        net.route(1, 9, &one_to_two);
        net.route(2, 9, &two_to_one);
        net.candidate(1, 9);
        net.candidate(2, 9);

        let reader = RecordingApplication::new(2, 20);
        net.node(1)
            .registry
            .open(key())
            .add_receiver(subscriber(&reader))
            .unwrap();
        net.pump();

        let relay = net.node(2).registry.get(&key()).unwrap();
        assert!(relay.outward_subscriptions().is_empty());
        assert_eq!(
            relay.receiver_state(two_to_one.connection_id()),
            Some(ReceiverState::NoRemoteSource)
        );

        let edge = net.node(1).registry.get(&key()).unwrap();
        assert_eq!(edge.outward_subscriptions()[0].link, LinkState::Rejected);
        assert_eq!(
            edge.receiver_state(ConnectionId(2)),
            Some(ReceiverState::NoSenders)
        );
        assert_eq!(reader.statuses(), vec![DataState::NoSource]);
    }

    #[test]
    fn test_reader_loss_tears_down_relay_path() {
        let (chain, publisher, _reader) = published_chain();
        let net = &chain.net;

        net.node(1).registry.connection_lost(ConnectionId(2));
        net.pump();

        assert!(net.node(1).registry.is_empty());
        assert!(net.node(2).registry.is_empty());
        let authority = net.node(3).registry.get(&key()).unwrap();
        assert_eq!(
            authority.sender_state(ConnectionId(1)),
            Some(SenderState::NoReceivers)
        );
        assert_eq!(publisher.controls(), vec![SendControl::Start, SendControl::Stop]);
    }

    // =============================================================================
    // AMBIGUOUS AUTHORITY
    // =============================================================================

    #[test]
    fn test_two_authorities_lock_edge_until_one_withdraws() {
        let mut net = Network::new();
        for id in [1, 3, 4] {
            net.add_node(id);
        }
        let (to_three, _) = net.connect(1, 3, 1);
        net.connect(1, 4, 1);
        net.candidate(1, 3);
        net.candidate(1, 4);

        let first = RecordingApplication::new(1, 10);
        let second = RecordingApplication::new(1, 11);
        net.node(3).registry.open(key()).add_sender(source(&first)).unwrap();
        net.node(4).registry.open(key()).add_sender(source(&second)).unwrap();
        let reader = RecordingApplication::new(2, 20);
        net.node(1)
            .registry
            .open(key())
            .add_receiver(subscriber(&reader))
            .unwrap();
        net.pump();

        let edge = net.node(1).registry.get(&key()).unwrap();
        assert!(edge.is_multiple_remote_locked());
        assert_eq!(
            edge.receiver_state(ConnectionId(2)),
            Some(ReceiverState::MultipleRemoteLock)
        );
        assert!(reader.statuses().contains(&DataState::InvalidSubscription));

        // Data from either authority is held back while locked.
        publish(&net, &first, b"blocked");
        assert!(reader.data().is_empty());
        assert!(net
            .outcomes()
            .contains(&(DistributorId(1), DistributionOutcome::Dropped(DropReason::Locked))));

        // dist#4 loses its source and rejects the edge.
        net.node(4).registry.connection_lost(ConnectionId(1));
        net.pump();

        assert!(!edge.is_multiple_remote_locked());
        let outward = edge.outward_subscriptions();
        assert_eq!(outward.len(), 1, "stale route toward dist#4 is dropped");
        assert_eq!(outward[0].connection, to_three.connection_id());
        assert!(outward[0].installed);
        assert!(net.node(4).registry.is_empty());

        publish(&net, &first, b"released");
        let data = reader.data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload.as_deref(), Some(&b"released"[..]));
    }
}
