//! Configuration for the subscription core.

use serde::{Deserialize, Serialize};
use shared_types::DistributorId;

use crate::domain::SubscriptionError;

/// Subscription configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Identity of this distributor. Never used as an outward candidate.
    pub local_distributor_id: DistributorId,
    /// Tear down rejected outward subscriptions once exactly one other is positive.
    pub stale_route_cleanup: bool,
    /// Follow better-route notifications with the redirection handshake.
    pub route_redirection: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            local_distributor_id: DistributorId(1),
            stale_route_cleanup: true,
            route_redirection: true,
        }
    }
}

impl SubscriptionConfig {
    pub fn new(local_distributor_id: DistributorId) -> Self {
        Self {
            local_distributor_id,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.local_distributor_id.0 == 0 {
            return Err(SubscriptionError::InvalidConfig(
                "local_distributor_id must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}
