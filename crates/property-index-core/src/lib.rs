//! Resolution and aggregation core for the property submission indexer.
//!
//! One inbound submission event flows through [`process_event`]:
//! - the content hash is turned into a CID ([`derive_content_id`]) and fetched
//!   with a bounded retry budget ([`fetch_with_retry`]),
//! - the root hash is walked through three linked documents to recover a
//!   jurisdiction ([`LinkResolver`]),
//! - the resulting [`PropertyRecord`] is persisted and the aggregate family is
//!   updated ([`update_aggregates`]).
//!
//! Persistence goes through the [`EntityStore`] collaborator; content goes
//! through the [`ContentFetcher`] collaborator. Neither is global state.

use time::{OffsetDateTime, UtcOffset};

pub mod aggregate;
pub mod cid;
pub mod config;
pub mod entity;
pub mod event;
pub mod fetch;
pub mod memory;
pub mod process;
pub mod resolve;

pub use aggregate::{update_aggregates, AggregateEffects};
pub use cid::{derive_content_id, encode_base32, CID_LENGTH};
pub use config::IndexerConfig;
pub use entity::{
    load_entity, save_entity, Entity, EntityKind, EntityStore, JurisdictionCounter,
    LabelCounter, LabelDedupPair, PropertyRecord, SubmitterJurisdictionCounter,
    SubmitterJurisdictionDedupPair, SubmitterJurisdictionLabelCounter,
    SubmitterJurisdictionLabelDedupPair, SubmitterLabelCounter, SubmitterLabelDedupPair,
};
pub use event::{EventPosition, RawSubmissionEvent, SubmissionEvent, SubmissionKind};
pub use fetch::{fetch_with_retry, ContentFetcher, FetchError, DEFAULT_MAX_ATTEMPTS};
pub use memory::InMemoryEntityStore;
pub use process::{process_event, ProcessOutcome};
pub use resolve::{Hop, LinkResolver, ResolutionError};

/// Reserved label assigned when content could not be fetched.
pub const TIMEOUT_LABEL: &str = "TIMEOUT";

/// Prefix of the content sentinel stored for timed-out fetches.
pub const TIMEOUT_CONTENT_PREFIX: &str = "TIMEOUT:";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum IndexError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("entity codec error: {0}")]
    Codec(String),
}

/// Lowercase `0x`-prefixed hex, the textual form of every hash and identity.
#[must_use]
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes `0x`-prefixed (or bare) hex into a fixed-width array.
///
/// # Errors
/// Returns [`IndexError::Validation`] for invalid hex or a width mismatch.
pub fn parse_hex_array<const N: usize>(field: &str, raw: &str) -> Result<[u8; N], IndexError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(trimmed)
        .map_err(|err| IndexError::Validation(format!("{field} is not valid hex: {err}")))?;
    let len = bytes.len();
    <[u8; N]>::try_from(bytes).map_err(|_| {
        IndexError::Validation(format!("{field} MUST be {N} bytes, got {len}"))
    })
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`IndexError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, IndexError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| IndexError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_array_accepts_prefixed_and_bare_input() {
        let prefixed: Result<[u8; 2], _> = parse_hex_array("field", "0xabcd");
        let bare: Result<[u8; 2], _> = parse_hex_array("field", "abcd");
        assert_eq!(prefixed, Ok([0xab, 0xcd]));
        assert_eq!(bare, Ok([0xab, 0xcd]));
    }

    #[test]
    fn hex_array_rejects_wrong_width() {
        let result: Result<[u8; 32], _> = parse_hex_array("root_hash", "0xabcd");
        match result {
            Err(IndexError::Validation(message)) => {
                assert!(message.contains("root_hash MUST be 32 bytes, got 2"));
            }
            other => panic!("expected width validation error, got {other:?}"),
        }
    }

    #[test]
    fn hex_round_trip_is_lowercase_and_prefixed() {
        assert_eq!(to_hex_prefixed(&[0xAB, 0x01]), "0xab01");
    }
}
