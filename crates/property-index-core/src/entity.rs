use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::IndexError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    LabelPair,
    LabelCounter,
    SubmitterLabelPair,
    SubmitterLabelCounter,
    SubmitterJurisdictionPair,
    SubmitterJurisdictionCounter,
    SubmitterJurisdictionLabelPair,
    SubmitterJurisdictionLabelCounter,
    JurisdictionCounter,
}

impl EntityKind {
    pub const ALL: [Self; 10] = [
        Self::Property,
        Self::LabelPair,
        Self::LabelCounter,
        Self::SubmitterLabelPair,
        Self::SubmitterLabelCounter,
        Self::SubmitterJurisdictionPair,
        Self::SubmitterJurisdictionCounter,
        Self::SubmitterJurisdictionLabelPair,
        Self::SubmitterJurisdictionLabelCounter,
        Self::JurisdictionCounter,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::LabelPair => "label_pair",
            Self::LabelCounter => "label_counter",
            Self::SubmitterLabelPair => "submitter_label_pair",
            Self::SubmitterLabelCounter => "submitter_label_counter",
            Self::SubmitterJurisdictionPair => "submitter_jurisdiction_pair",
            Self::SubmitterJurisdictionCounter => "submitter_jurisdiction_counter",
            Self::SubmitterJurisdictionLabelPair => "submitter_jurisdiction_label_pair",
            Self::SubmitterJurisdictionLabelCounter => "submitter_jurisdiction_label_counter",
            Self::JurisdictionCounter => "jurisdiction_counter",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Records and dedup pairs are written once and never touched again.
    #[must_use]
    pub fn is_immutable(self) -> bool {
        matches!(
            self,
            Self::Property
                | Self::LabelPair
                | Self::SubmitterLabelPair
                | Self::SubmitterJurisdictionPair
                | Self::SubmitterJurisdictionLabelPair
        )
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted entity with its own keyspace.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn key(&self) -> &str;
}

/// Keyed load/save collaborator backing every entity kind.
///
/// Payloads are the entity's JSON form; struct field order is preserved so
/// equal entities always serialize to equal bytes.
pub trait EntityStore {
    #[allow(clippy::missing_errors_doc)]
    fn load_payload(&self, kind: EntityKind, key: &str) -> Result<Option<Value>, IndexError>;

    #[allow(clippy::missing_errors_doc)]
    fn save_payload(&mut self, kind: EntityKind, key: &str, payload: Value)
        -> Result<(), IndexError>;
}

/// Loads and decodes one entity.
///
/// # Errors
/// Returns [`IndexError::Store`] from the backing store and
/// [`IndexError::Codec`] when the stored payload does not decode.
pub fn load_entity<T: Entity>(store: &dyn EntityStore, key: &str) -> Result<Option<T>, IndexError> {
    let Some(payload) = store.load_payload(T::KIND, key)? else {
        return Ok(None);
    };
    serde_json::from_value(payload)
        .map(Some)
        .map_err(|err| IndexError::Codec(format!("failed to decode {} {key}: {err}", T::KIND)))
}

/// Encodes and saves one entity under its own key.
///
/// # Errors
/// Returns [`IndexError::Codec`] when encoding fails and
/// [`IndexError::Store`] from the backing store.
pub fn save_entity<T: Entity>(store: &mut dyn EntityStore, entity: &T) -> Result<(), IndexError> {
    let payload = serde_json::to_value(entity).map_err(|err| {
        IndexError::Codec(format!("failed to encode {} {}: {err}", T::KIND, entity.key()))
    })?;
    store.save_payload(T::KIND, entity.key(), payload)
}

fn compose_key(parts: &[&str]) -> String {
    parts.join("-")
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PropertyRecord {
    pub id: String,
    pub root_hash: String,
    pub group_hash: String,
    pub submitter: String,
    pub content_hash: String,
    pub content: String,
    pub label: Option<String>,
    pub jurisdiction: Option<String>,
    pub timestamp: i64,
    pub block_number: u64,
    pub transaction_hash: String,
    pub owner: String,
}

impl PropertyRecord {
    #[must_use]
    pub fn record_key(transaction_hash: &str, log_index: u64) -> String {
        format!("{transaction_hash}-{log_index}")
    }
}

impl Entity for PropertyRecord {
    const KIND: EntityKind = EntityKind::Property;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LabelDedupPair {
    pub id: String,
    pub root_hash: String,
    pub label: String,
    pub first_seen_timestamp: i64,
    pub first_seen_block_number: u64,
}

impl LabelDedupPair {
    #[must_use]
    pub fn key_for(root_hash: &str, label: &str) -> String {
        compose_key(&[root_hash, label])
    }
}

impl Entity for LabelDedupPair {
    const KIND: EntityKind = EntityKind::LabelPair;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LabelCounter {
    pub id: String,
    pub label: String,
    pub unique_root_count: u64,
}

impl Entity for LabelCounter {
    const KIND: EntityKind = EntityKind::LabelCounter;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterLabelDedupPair {
    pub id: String,
    pub root_hash: String,
    pub submitter: String,
    pub label: String,
    pub first_seen_timestamp: i64,
    pub first_seen_block_number: u64,
}

impl SubmitterLabelDedupPair {
    #[must_use]
    pub fn key_for(root_hash: &str, submitter: &str, label: &str) -> String {
        compose_key(&[root_hash, submitter, label])
    }
}

impl Entity for SubmitterLabelDedupPair {
    const KIND: EntityKind = EntityKind::SubmitterLabelPair;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterLabelCounter {
    pub id: String,
    pub submitter: String,
    pub label: String,
    pub unique_root_count: u64,
}

impl SubmitterLabelCounter {
    #[must_use]
    pub fn key_for(submitter: &str, label: &str) -> String {
        compose_key(&[submitter, label])
    }
}

impl Entity for SubmitterLabelCounter {
    const KIND: EntityKind = EntityKind::SubmitterLabelCounter;

    fn key(&self) -> &str {
        &self.id
    }
}

/// Leaderboard witness that a submitter has contributed in a jurisdiction.
///
/// No counter is derived from it; its existence is the signal.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterJurisdictionDedupPair {
    pub id: String,
    pub submitter: String,
    pub jurisdiction: String,
    pub first_seen_timestamp: i64,
    pub first_seen_block_number: u64,
}

impl SubmitterJurisdictionDedupPair {
    #[must_use]
    pub fn key_for(submitter: &str, jurisdiction: &str) -> String {
        compose_key(&[submitter, jurisdiction])
    }
}

impl Entity for SubmitterJurisdictionDedupPair {
    const KIND: EntityKind = EntityKind::SubmitterJurisdictionPair;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterJurisdictionCounter {
    pub id: String,
    pub submitter: String,
    pub jurisdictions: Vec<String>,
    pub jurisdiction_count: u64,
    pub total_events: u64,
    pub first_activity_timestamp: i64,
    pub first_activity_block_number: u64,
    pub last_activity_timestamp: i64,
    pub last_activity_block_number: u64,
    pub events_per_second: Decimal,
}

impl Entity for SubmitterJurisdictionCounter {
    const KIND: EntityKind = EntityKind::SubmitterJurisdictionCounter;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterJurisdictionLabelDedupPair {
    pub id: String,
    pub submitter: String,
    pub jurisdiction: String,
    pub label: String,
    pub first_seen_timestamp: i64,
    pub first_seen_block_number: u64,
}

impl SubmitterJurisdictionLabelDedupPair {
    #[must_use]
    pub fn key_for(submitter: &str, jurisdiction: &str, label: &str) -> String {
        compose_key(&[submitter, jurisdiction, label])
    }
}

impl Entity for SubmitterJurisdictionLabelDedupPair {
    const KIND: EntityKind = EntityKind::SubmitterJurisdictionLabelPair;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitterJurisdictionLabelCounter {
    pub id: String,
    pub submitter: String,
    pub jurisdiction: String,
    pub label: String,
    pub event_count: u64,
    pub last_activity_timestamp: i64,
    pub last_activity_block_number: u64,
}

impl Entity for SubmitterJurisdictionLabelCounter {
    const KIND: EntityKind = EntityKind::SubmitterJurisdictionLabelCounter;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct JurisdictionCounter {
    pub id: String,
    pub jurisdiction: String,
    pub event_count: u64,
}

impl Entity for JurisdictionCounter {
    const KIND: EntityKind = EntityKind::JurisdictionCounter;

    fn key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("property_label_pair"), None);
    }

    #[test]
    fn serde_name_matches_store_name() {
        for kind in EntityKind::ALL {
            let encoded = match serde_json::to_value(kind) {
                Ok(value) => value,
                Err(err) => panic!("failed to encode kind: {err}"),
            };
            assert_eq!(encoded, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn composite_keys_join_with_dash() {
        assert_eq!(LabelDedupPair::key_for("0xaa", "Parcel"), "0xaa-Parcel");
        assert_eq!(
            SubmitterJurisdictionLabelDedupPair::key_for("0xbb", "Lee", "Parcel"),
            "0xbb-Lee-Parcel"
        );
        assert_eq!(PropertyRecord::record_key("0xcc", 7), "0xcc-7");
    }

    #[test]
    fn record_payload_keeps_field_order() {
        let record = PropertyRecord {
            id: "0xcc-0".to_string(),
            root_hash: "0x01".to_string(),
            group_hash: "0x02".to_string(),
            submitter: "0x03".to_string(),
            content_hash: "0x04".to_string(),
            content: "{}".to_string(),
            label: None,
            jurisdiction: None,
            timestamp: 1,
            block_number: 2,
            transaction_hash: "0xcc".to_string(),
            owner: "0x03".to_string(),
        };
        let encoded = match serde_json::to_string(&record) {
            Ok(value) => value,
            Err(err) => panic!("failed to encode record: {err}"),
        };
        assert!(encoded.starts_with("{\"id\":\"0xcc-0\",\"root_hash\":\"0x01\""));
    }
}
