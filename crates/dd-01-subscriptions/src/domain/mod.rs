//! # Domain Layer
//!
//! Role objects, the per-topic registration set and the value objects they
//! exchange. No locking happens here; the service layer serializes access.

pub mod errors;
pub mod invariants;
pub mod roles;
pub mod snapshot;
pub mod subscription_list;
pub mod value_objects;

pub use errors::*;
pub use roles::*;
pub use snapshot::*;
pub use subscription_list::*;
pub use value_objects::*;
