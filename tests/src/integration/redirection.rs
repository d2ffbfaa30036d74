//! # Route Redirection
//!
//! ```text
//!            weight 2            weight 1
//! dist#1 ------------- dist#2 ------------- dist#3
//!    \_________________________________________/
//!                     weight 1
//! ```
//!
//! The edge starts out reaching the authority through the relay and is then
//! told about the direct link.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dd_01_subscriptions::domain::data_index;
    use dd_01_subscriptions::testing::{RecordingApplication, TEST_EPOCH_MILLIS};
    use dd_01_subscriptions::{
        Connection, DistributionOutcome, DropReason, ReceiveOptions, ReceiverRegistration,
        SenderRegistration, TopicSubscriptions,
    };
    use shared_types::{DistributorId, Telegram, TopicKey};

    use crate::network::{LinkEnd, Network, PEER_USER_BASE};

    const EPOCH: u64 = (TEST_EPOCH_MILLIS / 1000) as u64;

    fn key() -> TopicKey {
        TopicKey::new(815, 3, 9, 0)
    }

    struct Triangle {
        net: Network,
        via_relay: Arc<LinkEnd>,
        direct: Arc<LinkEnd>,
        publisher: Arc<RecordingApplication>,
        reader: Arc<RecordingApplication>,
    }

    /// Source on dist#3, reader on dist#1 served through the relay, two
    /// batches already delivered.
    fn triangle() -> Triangle {
        let mut net = Network::new();
        for id in 1..=3 {
            net.add_node(id);
        }
        let (via_relay, _) = net.connect(1, 2, 2);
        net.connect(2, 3, 1);
        let (direct, _) = net.connect(1, 3, 1);
        net.route(1, 3, &via_relay);
        net.candidate(1, 3);

        let publisher = RecordingApplication::new(1, 10);
        let reader = RecordingApplication::new(2, 20);
        net.node(3)
            .registry
            .open(key())
            .add_sender(SenderRegistration::Local {
                connection: publisher.clone(),
                source: true,
                request_supported: false,
            })
            .unwrap();
        net.node(1)
            .registry
            .open(key())
            .add_receiver(ReceiverRegistration::Local {
                connection: reader.clone(),
                drain: false,
                options: ReceiveOptions::normal(),
            })
            .unwrap();
        net.pump();

        let triangle = Triangle {
            net,
            via_relay,
            direct,
            publisher,
            reader,
        };
        triangle.send(b"a");
        triangle.net.pump();
        triangle.send(b"b");
        triangle.net.pump();
        triangle
    }

    impl Triangle {
        /// Publish at the authority without propagating.
        fn send(&self, payload: &[u8]) {
            let outcome = self.net.node(3).registry.open(key()).distribute(
                self.publisher.connection_id(),
                vec![Telegram::data(key(), TEST_EPOCH_MILLIS, payload.to_vec())],
                false,
            );
            assert!(matches!(outcome, DistributionOutcome::Delivered(_)));
        }

        fn redirect(&self) {
            self.net.route(1, 3, &self.direct);
            self.net
                .node(1)
                .registry
                .update_best_route(DistributorId(3), self.direct.clone());
        }

        fn indices(&self) -> Vec<u64> {
            self.reader.data().iter().map(|t| t.data_index).collect()
        }
    }

    #[test]
    fn test_redirection_moves_stream_to_direct_link() {
        let t = triangle();
        t.redirect();
        let edge = t.net.node(1).registry.get(&key()).unwrap();
        assert_eq!(edge.pending_redirections(), vec![DistributorId(3)]);

        t.net.pump();

        // The authority's retained batch lines up with what the edge already
        // delivered, so the replacement takes over at once.
        assert!(edge.pending_redirections().is_empty());
        let outward = edge.outward_subscriptions();
        assert_eq!(outward.len(), 1);
        assert_eq!(outward[0].connection, t.direct.connection_id());
        assert!(outward[0].installed);
        assert!(t
            .net
            .outcomes()
            .contains(&(DistributorId(1), DistributionOutcome::Dropped(DropReason::PendingRedirection))));

        // The relay path was torn down behind the takeover.
        assert!(t.net.node(2).registry.is_empty());

        t.send(b"c");
        t.net.pump();
        assert_eq!(
            t.indices(),
            vec![
                data_index(EPOCH, 0),
                data_index(EPOCH, 1),
                data_index(EPOCH, 2)
            ]
        );
    }

    #[test]
    fn test_redirection_waits_while_stream_is_ahead() {
        let t = triangle();
        t.redirect();
        // Published while the replacement subscription is still in flight.
        t.send(b"c");
        t.net.pump();
        t.send(b"d");
        t.net.pump();

        // The direct link always runs one batch ahead of the relay, so the
        // swap never lines up and the relay keeps carrying the stream.
        let edge = t.net.node(1).registry.get(&key()).unwrap();
        assert_eq!(edge.pending_redirections(), vec![DistributorId(3)]);
        let outward = edge.outward_subscriptions();
        assert_eq!(outward.len(), 1);
        assert_eq!(outward[0].connection, t.via_relay.connection_id());

        assert_eq!(
            t.indices(),
            vec![
                data_index(EPOCH, 0),
                data_index(EPOCH, 1),
                data_index(EPOCH, 2),
                data_index(EPOCH, 3)
            ],
            "no index lost or repeated"
        );
    }

    #[test]
    fn test_refused_redirection_keeps_relay_route() {
        let t = triangle();
        // The authority does not serve the edge directly.
        t.net.node(3).bed.policy.deny_user(PEER_USER_BASE + 1);
        t.redirect();
        t.net.pump();

        let edge = t.net.node(1).registry.get(&key()).unwrap();
        assert!(edge.pending_redirections().is_empty());
        assert_eq!(
            edge.outward_subscriptions()[0].connection,
            t.via_relay.connection_id()
        );
        // The refused registration was withdrawn at the authority.
        let authority = t.net.node(3).registry.get(&key()).unwrap();
        assert_eq!(authority.snapshot().receivers.len(), 1);

        t.send(b"c");
        t.net.pump();
        assert_eq!(t.indices().len(), 3);
    }
}
