//! # Core Domain Entities
//!
//! Identifiers shared by every layer of the distributor.
//!
//! ## Clusters
//!
//! - **Topics**: `TopicKey`
//! - **Participants**: `ConnectionId`, `UserId`, `DistributorId`

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CLUSTER A: TOPICS
// =============================================================================

/// Key of a data stream: object, attribute group, aspect and simulation variant.
///
/// Every subscription, telegram and routing decision is scoped to exactly one
/// topic key. Ordering is lexicographic over the fields so keys can be used in
/// sorted maps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TopicKey {
    /// Identifier of the system object.
    pub object_id: u64,
    /// Identifier of the attribute group.
    pub attribute_group: u64,
    /// Identifier of the aspect.
    pub aspect: u64,
    /// Simulation variant (0 for live data).
    pub simulation_variant: i16,
}

impl TopicKey {
    pub fn new(object_id: u64, attribute_group: u64, aspect: u64, simulation_variant: i16) -> Self {
        Self {
            object_id,
            attribute_group,
            aspect,
            simulation_variant,
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.object_id, self.attribute_group, self.aspect, self.simulation_variant
        )
    }
}

// =============================================================================
// CLUSTER B: PARTICIPANTS
// =============================================================================

/// Identity of one transport connection (local application or peer node).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ConnectionId(pub u64);

/// Identity of the user that authenticated a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UserId(pub u64);

/// Identity of a distributor node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DistributorId(pub u64);

macro_rules! display_id {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "#{}"), self.0)
                }
            }
        )*
    };
}

display_id!(ConnectionId => "conn", UserId => "user", DistributorId => "dist");
