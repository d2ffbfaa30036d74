//! # Shared Types Crate
//!
//! This crate contains the entities exchanged between the subscription core and
//! its collaborators (connection adapters, policy engine, topic directory).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: topic keys, participant identifiers and the
//!   telegram record are defined once and reused by every crate.
//! - **Opaque Identities**: connections, users and distributors are distinct
//!   newtypes so they cannot be mixed up at call sites.

pub mod entities;
pub mod telegram;

pub use entities::*;
pub use telegram::*;
