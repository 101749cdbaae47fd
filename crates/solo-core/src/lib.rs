//! solo-core: shared pieces of the single-holder TCP relay.
//!
//! Provides the admission gate that allows one peer address at a time,
//! the identity-resolution outcome types consumed by the status endpoint,
//! and the common error type.

pub mod error;
pub mod gate;
pub mod identity;

// Re-export commonly used items at crate root.
pub use error::{RelayError, RelayResult};
pub use gate::{AccessGate, Clock, GatePass, HolderRecord};
pub use identity::{parse_whois_json, Identity, IdentityResolver, WhoisOutcome};
