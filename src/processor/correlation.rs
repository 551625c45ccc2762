//! Header-priority rules for call identity

use std::hash::{DefaultHasher, Hash, Hasher};

use crate::constants::headers::{
    DOMAIN_NAME, GLOBAL_CALL_ID, OTHER_LEG_UNIQUE_ID, SIP_CALL_ID, SIP_FROM_HOST, SIP_TO_HOST,
    UNIQUE_ID,
};
use crate::protocol::Headers;

/// Correlation candidates when no stored state exists for a leg
pub const FALLBACK_CORRELATION: &[&str] =
    &[OTHER_LEG_UNIQUE_ID, UNIQUE_ID, SIP_CALL_ID, GLOBAL_CALL_ID];

/// Correlation candidates for early-call events
///
/// The SIP and global call ids group both legs, so they outrank the leg's
/// own `Unique-ID`, which is only a last resort.
pub const EARLY_CORRELATION: &[&str] =
    &[OTHER_LEG_UNIQUE_ID, SIP_CALL_ID, GLOBAL_CALL_ID, UNIQUE_ID];

pub const DOMAIN: &[&str] = &[DOMAIN_NAME, SIP_FROM_HOST, SIP_TO_HOST];

/// First non-empty header from `order`, or empty
#[must_use]
pub fn first_non_empty(headers: &Headers, order: &[&str]) -> String {
    headers.first_of(order).unwrap_or_default().to_string()
}

#[must_use]
pub fn early_correlation_id(headers: &Headers) -> String {
    first_non_empty(headers, EARLY_CORRELATION)
}

#[must_use]
pub fn fallback_correlation_id(headers: &Headers) -> String {
    first_non_empty(headers, FALLBACK_CORRELATION)
}

#[must_use]
pub fn domain_name(headers: &Headers) -> String {
    first_non_empty(headers, DOMAIN)
}

/// Worker index for a channel; stable for the life of the process
#[must_use]
pub fn shard_for(channel_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    channel_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
