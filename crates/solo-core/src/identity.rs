//! Identity resolution types.
//!
//! The relay never decides who a peer *is*; it asks an external lookup and
//! consumes one of three outcomes. The lookup is injected as an
//! [`IdentityResolver`] so tests can swap the subprocess for a closure.

use crate::error::RelayResult;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

/// A human-friendly identity for a peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name of the user owning the peer.
    pub display_name: String,
    /// Name of the node/computer the peer connects from.
    pub computer_name: String,
}

/// Result of one identity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhoisOutcome {
    Resolved(Identity),
    /// The lookup ran but knows nothing about the address.
    NotFound,
    /// The lookup itself failed (spawn error, bad exit, malformed output).
    Failed(String),
}

/// Async strategy mapping an IP address string to a [`WhoisOutcome`].
pub type IdentityResolver = Arc<dyn Fn(String) -> BoxFuture<'static, WhoisOutcome> + Send + Sync>;

#[derive(Debug, Deserialize)]
struct WhoisDocument {
    #[serde(rename = "Node")]
    node: WhoisNode,
    #[serde(rename = "UserProfile")]
    user_profile: WhoisUserProfile,
}

#[derive(Debug, Deserialize)]
struct WhoisNode {
    #[serde(rename = "ComputedName", default)]
    computed_name: String,
}

#[derive(Debug, Deserialize)]
struct WhoisUserProfile {
    #[serde(rename = "DisplayName", default)]
    display_name: String,
}

/// Parse the JSON printed by `tailscale whois --json <ip>`.
///
/// Only `UserProfile.DisplayName` and `Node.ComputedName` are read; all
/// other fields are ignored.
pub fn parse_whois_json(raw: &[u8]) -> RelayResult<Identity> {
    let doc: WhoisDocument = serde_json::from_slice(raw)?;
    Ok(Identity {
        display_name: doc.user_profile.display_name,
        computer_name: doc.node.computed_name,
    })
}
