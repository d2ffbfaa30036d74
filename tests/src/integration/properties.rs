//! # Property Tests
//!
//! Randomized operation sequences against a single topic.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use dd_01_subscriptions::testing::{RecordingApplication, TestBed};
    use dd_01_subscriptions::{
        ReceiveOptions, ReceiverRegistration, ReceiverState, SenderRegistration, SenderState,
        SubscriptionInfo, TopicSubscriptions,
    };
    use proptest::prelude::*;
    use shared_types::{ConnectionId, DistributorId, Telegram, TopicKey, UserId};

    fn key() -> TopicKey {
        TopicKey::new(7, 7, 7, 0)
    }

    fn telegram(payload: u8, delayed: bool) -> Telegram {
        let telegram = Telegram::data(key(), 0, vec![payload]);
        if delayed {
            telegram.into_delayed()
        } else {
            telegram
        }
    }

    fn source(app: &Arc<RecordingApplication>) -> SenderRegistration {
        SenderRegistration::Local {
            connection: app.clone(),
            source: true,
            request_supported: true,
        }
    }

    fn receiver(app: &Arc<RecordingApplication>, options: ReceiveOptions) -> ReceiverRegistration {
        ReceiverRegistration::Local {
            connection: app.clone(),
            drain: false,
            options,
        }
    }

    // =============================================================================
    // DATA INDICES
    // =============================================================================

    #[derive(Debug, Clone)]
    enum Step {
        Publish { payload: u8, delayed: bool },
        /// Source leaves and comes back.
        Restart,
        /// Clock moves forward by this many milliseconds.
        Tick(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            6 => (0u8..3, any::<bool>())
                .prop_map(|(payload, delayed)| Step::Publish { payload, delayed }),
            1 => Just(Step::Restart),
            2 => (0i64..2_500).prop_map(Step::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_indices_strictly_increase_across_restarts(
            steps in prop::collection::vec(step(), 1..60)
        ) {
            let bed = TestBed::new();
            let info = bed.topic(key(), DistributorId(1));
            let publisher = RecordingApplication::new(1, 10);
            let reader = RecordingApplication::new(2, 20);
            info.add_sender(source(&publisher)).unwrap();
            info.add_receiver(receiver(&reader, ReceiveOptions::normal())).unwrap();

            for step in steps {
                match step {
                    Step::Publish { payload, delayed } => {
                        info.distribute(ConnectionId(1), vec![telegram(payload, delayed)], false);
                    }
                    Step::Restart => {
                        info.remove_sender(ConnectionId(1)).unwrap();
                        info.add_sender(source(&publisher)).unwrap();
                    }
                    Step::Tick(millis) => bed.clock.advance(millis),
                }
            }

            let indices: Vec<u64> = reader.data().iter().map(|t| t.data_index).collect();
            prop_assert!(
                indices.windows(2).all(|w| w[0] < w[1]),
                "indices not strictly increasing: {:?}",
                indices
            );
        }
    }

    // =============================================================================
    // DELIVERY OPTIONS
    // =============================================================================

    proptest! {
        #[test]
        fn prop_receive_options_are_honoured(
            batches in prop::collection::vec((0u8..3, any::<bool>()), 1..80)
        ) {
            let bed = TestBed::new();
            let info = bed.topic(key(), DistributorId(1));
            let publisher = RecordingApplication::new(1, 10);
            let everything = RecordingApplication::new(2, 20);
            let online = RecordingApplication::new(3, 30);
            let delta = RecordingApplication::new(4, 40);
            info.add_sender(source(&publisher)).unwrap();
            info.add_receiver(receiver(&everything, ReceiveOptions::normal())).unwrap();
            info.add_receiver(receiver(&online, ReceiveOptions::online())).unwrap();
            info.add_receiver(receiver(&delta, ReceiveOptions::delta())).unwrap();

            for &(payload, delayed) in &batches {
                info.distribute(ConnectionId(1), vec![telegram(payload, delayed)], false);
            }

            prop_assert_eq!(everything.data().len(), batches.len());
            let current = batches.iter().filter(|(_, delayed)| !delayed).count();
            prop_assert_eq!(online.data().len(), current);
            prop_assert!(online.data().iter().all(|t| !t.delayed));
            prop_assert!(delta.data().iter().all(|t| !t.delayed));

            let payloads: Vec<Option<Vec<u8>>> =
                delta.data().into_iter().map(|t| t.payload).collect();
            prop_assert!(
                payloads.windows(2).all(|w| w[0] != w[1]),
                "delta receiver saw a repeated batch: {:?}",
                payloads
            );
        }
    }

    // =============================================================================
    // REGISTRATION SET
    // =============================================================================

    #[derive(Debug, Clone)]
    enum Admin {
        AddSender { connection: u64, source: bool },
        AddReceiver { connection: u64, drain: bool },
        RemoveSender(u64),
        RemoveReceiver(u64),
        Deny(u64),
        Allow(u64),
    }

    fn admin() -> impl Strategy<Value = Admin> {
        let connection = 1u64..6;
        prop_oneof![
            3 => (connection.clone(), any::<bool>())
                .prop_map(|(connection, source)| Admin::AddSender { connection, source }),
            3 => (connection.clone(), any::<bool>())
                .prop_map(|(connection, drain)| Admin::AddReceiver { connection, drain }),
            2 => connection.clone().prop_map(Admin::RemoveSender),
            2 => connection.clone().prop_map(Admin::RemoveReceiver),
            1 => connection.clone().prop_map(Admin::Deny),
            1 => connection.prop_map(Admin::Allow),
        ]
    }

    /// Users are `connection + 10`.
    fn apply(
        bed: &TestBed,
        info: &SubscriptionInfo,
        apps: &mut HashMap<u64, Arc<RecordingApplication>>,
        action: Admin,
    ) {
        let mut app = |connection: u64| {
            apps.entry(connection)
                .or_insert_with(|| RecordingApplication::new(connection, connection + 10))
                .clone()
        };
        // Duplicate registrations and unknown removals are expected here.
        match action {
            Admin::AddSender { connection, source } => {
                let _ = info.add_sender(SenderRegistration::Local {
                    connection: app(connection),
                    source,
                    request_supported: true,
                });
            }
            Admin::AddReceiver { connection, drain } => {
                let _ = info.add_receiver(ReceiverRegistration::Local {
                    connection: app(connection),
                    drain,
                    options: ReceiveOptions::normal(),
                });
            }
            Admin::RemoveSender(connection) => {
                let _ = info.remove_sender(ConnectionId(connection));
            }
            Admin::RemoveReceiver(connection) => {
                let _ = info.remove_receiver(ConnectionId(connection));
            }
            Admin::Deny(connection) => {
                bed.policy.deny_user(connection + 10);
                info.on_user_rights_changed(UserId(connection + 10));
            }
            Admin::Allow(connection) => {
                bed.policy.allow_user(connection + 10);
                info.on_user_rights_changed(UserId(connection + 10));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_at_most_one_exclusive_role(actions in prop::collection::vec(admin(), 1..50)) {
            let bed = TestBed::new();
            let info = bed.topic(key(), DistributorId(1));
            let mut apps = HashMap::new();

            for action in actions {
                apply(&bed, &info, &mut apps, action);

                let snapshot = info.snapshot();
                let sources = snapshot
                    .senders
                    .iter()
                    .filter(|s| s.source && s.state.is_admitted())
                    .count();
                let drains = snapshot
                    .receivers
                    .iter()
                    .filter(|r| r.drain && r.state.is_admitted())
                    .count();
                prop_assert!(sources + drains <= 1, "{} sources, {} drains", sources, drains);
                prop_assert_eq!(info.is_central_distributor(), sources + drains == 1);

                // A free slot is always handed to a waiting exclusive role.
                if sources + drains == 0 {
                    prop_assert!(snapshot
                        .senders
                        .iter()
                        .all(|s| s.state != SenderState::InvalidSubscription));
                    prop_assert!(snapshot
                        .receivers
                        .iter()
                        .all(|r| r.state != ReceiverState::InvalidSubscription));
                }
            }
        }
    }
}
