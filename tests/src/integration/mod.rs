//! # Integration Tests
//!
//! Topics spread over several distributors wired through
//! [`Network`](crate::network::Network).

mod properties;
mod redirection;
mod scenarios;
