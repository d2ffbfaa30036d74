//! # Data-Distributor Test Suite
//!
//! Unified test crate for behavior that spans more than one distributor.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── network.rs        # In-process network of distributors
//! │
//! └── integration/      # Cross-node choreography
//!     ├── scenarios.rs  # Relaying, remote drains, ambiguity, connection loss
//!     ├── redirection.rs # Better-route handshake end to end
//!     └── properties.rs # Property tests on one topic
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p dd-tests
//!
//! # By category
//! cargo test -p dd-tests integration::scenarios::
//! cargo test -p dd-tests integration::properties::
//! ```

#![allow(dead_code)]

pub mod integration;
pub mod network;
