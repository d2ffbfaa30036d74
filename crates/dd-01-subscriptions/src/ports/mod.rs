//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** the per-topic API offered to the connection layer
//! - **Driven Ports (Outbound):** connections, access policy, topic directory, clock

pub mod inbound;
pub mod outbound;

pub use inbound::{ReceiverRegistration, SenderRegistration, TopicSubscriptions};
pub use outbound::{
    AccessPolicy, ApplicationConnection, Connection, PeerConnection, SystemTimeSource,
    TimeSource, TopicDirectory,
};
