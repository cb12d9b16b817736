use serde::{Deserialize, Serialize};

use crate::{parse_hex_array, IndexError};

/// Inbound message shape. Both kinds carry the same fields and run through the
/// same pipeline; the kind is only carried into logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    DataSubmitted,
    DataGroupHeartBeat,
}

impl SubmissionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataSubmitted => "data_submitted",
            Self::DataGroupHeartBeat => "data_group_heart_beat",
        }
    }
}

/// Ledger order of an event: block first, then log index within the block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubmissionEvent {
    pub kind: SubmissionKind,
    pub root_hash: [u8; 32],
    pub group_hash: [u8; 32],
    pub submitter: [u8; 20],
    pub content_hash: [u8; 32],
    pub transaction_hash: [u8; 32],
    pub log_index: u64,
    pub block_timestamp: i64,
    pub block_number: u64,
}

impl SubmissionEvent {
    #[must_use]
    pub fn position(&self) -> EventPosition {
        EventPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

/// Wire form of a submission event: hashes and identities as `0x` hex.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawSubmissionEvent {
    pub kind: SubmissionKind,
    pub root_hash: String,
    pub group_hash: String,
    pub submitter: String,
    pub content_hash: String,
    pub transaction_hash: String,
    pub log_index: u64,
    pub block_timestamp: i64,
    pub block_number: u64,
}

impl RawSubmissionEvent {
    /// Decodes hex fields into fixed-width hashes.
    ///
    /// # Errors
    /// Returns [`IndexError::Validation`] for invalid hex, a wrong width, or a
    /// negative block timestamp.
    pub fn decode(&self) -> Result<SubmissionEvent, IndexError> {
        if self.block_timestamp < 0 {
            return Err(IndexError::Validation(format!(
                "block_timestamp MUST be non-negative, got {}",
                self.block_timestamp
            )));
        }
        Ok(SubmissionEvent {
            kind: self.kind,
            root_hash: parse_hex_array("root_hash", &self.root_hash)?,
            group_hash: parse_hex_array("group_hash", &self.group_hash)?,
            submitter: parse_hex_array("submitter", &self.submitter)?,
            content_hash: parse_hex_array("content_hash", &self.content_hash)?,
            transaction_hash: parse_hex_array("transaction_hash", &self.transaction_hash)?,
            log_index: self.log_index,
            block_timestamp: self.block_timestamp,
            block_number: self.block_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_raw() -> RawSubmissionEvent {
        RawSubmissionEvent {
            kind: SubmissionKind::DataGroupHeartBeat,
            root_hash: format!("0x{}", "11".repeat(32)),
            group_hash: format!("0x{}", "22".repeat(32)),
            submitter: format!("0x{}", "33".repeat(20)),
            content_hash: format!("0x{}", "44".repeat(32)),
            transaction_hash: format!("0x{}", "55".repeat(32)),
            log_index: 4,
            block_timestamp: 1_700_000_000,
            block_number: 99,
        }
    }

    #[test]
    fn decodes_wire_event() {
        let event = match fixture_raw().decode() {
            Ok(event) => event,
            Err(err) => panic!("decode failed: {err}"),
        };
        assert_eq!(event.root_hash, [0x11; 32]);
        assert_eq!(event.submitter, [0x33; 20]);
        assert_eq!(
            event.position(),
            EventPosition {
                block_number: 99,
                log_index: 4
            }
        );
    }

    #[test]
    fn rejects_negative_block_timestamp() {
        let mut raw = fixture_raw();
        raw.block_timestamp = -10;
        assert!(matches!(
            raw.decode(),
            Err(IndexError::Validation(message)) if message.contains("block_timestamp MUST be non-negative")
        ));
    }

    #[test]
    fn rejects_short_submitter() {
        let mut raw = fixture_raw();
        raw.submitter = format!("0x{}", "33".repeat(32));
        assert!(matches!(
            raw.decode(),
            Err(IndexError::Validation(message)) if message.contains("submitter MUST be 20 bytes")
        ));
    }

    #[test]
    fn kind_parses_from_snake_case() {
        let parsed: Result<SubmissionKind, _> = serde_json::from_str("\"data_submitted\"");
        assert!(matches!(parsed, Ok(SubmissionKind::DataSubmitted)));
        assert_eq!(SubmissionKind::DataGroupHeartBeat.as_str(), "data_group_heart_beat");
    }

    #[test]
    fn positions_order_by_block_then_log_index() {
        let earlier = EventPosition {
            block_number: 5,
            log_index: 9,
        };
        let later = EventPosition {
            block_number: 6,
            log_index: 0,
        };
        assert!(earlier < later);
        assert!(
            later
                < EventPosition {
                    block_number: 6,
                    log_index: 1
                }
        );
    }
}
