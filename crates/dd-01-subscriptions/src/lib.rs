//! # DD-01 Topic Subscriptions
//!
//! Subscription core of a distributed publish/subscribe data distributor.
//! For every topic it keeps the registered senders and receivers, decides
//! which distributor is authoritative, routes telegrams and hands out data
//! indices when this node is the authority.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure business logic, no locking
//!   - `SubscriptionList`: Registration set with source/drain slots and the
//!     data index generator
//!   - `SendingSubscription` / `ReceivingSubscription`: Role objects
//!   - `SubscriptionSnapshot`: Binary diagnostic snapshot
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `TopicSubscriptions`: Driving port (inbound API)
//!   - `ApplicationConnection`, `PeerConnection`, `AccessPolicy`,
//!     `TopicDirectory`, `TimeSource`: Driven ports
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `SubscriptionInfo`: Per-topic orchestrator implementing
//!     `TopicSubscriptions`
//!
//! - **Registry** (`registry`): Topic lifecycle
//!   - `SubscriptionRegistry`: Opens and closes topics, fans out
//!     distributor-wide events
//!
//! ## Invariants
//!
//! - **INVARIANT-1**: A topic never has a source and a drain at the same time
//! - **INVARIANT-2**: An installed source or drain is a registered member
//! - **INVARIANT-3**: Distributed data indices strictly increase
//! - **INVARIANT-4**: A locked topic exchanges no data
//! - **INVARIANT-5**: An installed local source or drain has passed admission
//!
//! ## Usage Example
//!
//! ```ignore
//! use dd_01_subscriptions::{
//!     ReceiveOptions, ReceiverRegistration, SenderRegistration, SubscriptionConfig,
//!     SubscriptionRegistry, TopicSubscriptions,
//! };
//!
//! let registry = SubscriptionRegistry::new(SubscriptionConfig::new(my_id), collaborators)?;
//! let topic = registry.open(key);
//! topic.add_sender(SenderRegistration::Local {
//!     connection: publisher,
//!     source: true,
//!     request_supported: true,
//! })?;
//! topic.add_receiver(ReceiverRegistration::Local {
//!     connection: subscriber,
//!     drain: false,
//!     options: ReceiveOptions::normal(),
//! })?;
//! topic.distribute(publisher_id, telegrams, false);
//! ```

pub mod config;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports for convenience
pub use config::SubscriptionConfig;
pub use domain::{
    Acknowledgement, Action, CentralKind, ConnectionError, DistributionOutcome, DropReason,
    IncomingAcknowledgement, LinkState, OutwardRequest, ReceiveOptions, ReceiverState,
    RemoteNeed, RoleId, SendControl, SenderState, SubscriptionError, SubscriptionSnapshot,
};
pub use ports::{
    AccessPolicy, ApplicationConnection, Connection, PeerConnection, ReceiverRegistration,
    SenderRegistration, SystemTimeSource, TimeSource, TopicDirectory, TopicSubscriptions,
};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use service::{Collaborators, OutwardStatus, SubscriptionInfo};
