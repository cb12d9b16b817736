//! Load-or-create maintenance of the nine aggregate entities.
//!
//! Dedup pairs are first-seen witnesses and are saved only when created.
//! Distinct counters (label, submitter-label) move only when their pair is
//! new. Activity counters (submitter-jurisdiction, submitter-jurisdiction-label,
//! jurisdiction) move on every qualifying event.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::entity::{
    load_entity, save_entity, EntityStore, JurisdictionCounter, LabelCounter, LabelDedupPair,
    PropertyRecord, SubmitterJurisdictionCounter, SubmitterJurisdictionDedupPair,
    SubmitterJurisdictionLabelCounter, SubmitterJurisdictionLabelDedupPair,
    SubmitterLabelCounter, SubmitterLabelDedupPair,
};
use crate::{IndexError, TIMEOUT_LABEL};

/// Which first-seen witnesses an event created.
#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct AggregateEffects {
    pub jurisdiction_branch: bool,
    pub label_branch: bool,
    pub new_submitter_jurisdiction_pair: bool,
    pub new_submitter_jurisdiction_label_pair: bool,
    pub new_label_pair: bool,
    pub new_submitter_label_pair: bool,
}

/// Applies one persisted record to the aggregate family.
///
/// # Errors
/// Returns [`IndexError`] only when the entity store fails or holds an
/// undecodable payload.
pub fn update_aggregates(
    store: &mut dyn EntityStore,
    record: &PropertyRecord,
    timestamp: i64,
    block_number: u64,
) -> Result<AggregateEffects, IndexError> {
    let mut effects = AggregateEffects::default();
    let label = countable_label(record);

    if let Some(jurisdiction) = record.jurisdiction.as_deref().filter(|j| !j.is_empty()) {
        effects.jurisdiction_branch = true;
        let submitter = record.submitter.as_str();

        effects.new_submitter_jurisdiction_pair =
            touch_submitter_jurisdiction_pair(store, submitter, jurisdiction, timestamp, block_number)?;

        if let Some(label) = label {
            effects.new_submitter_jurisdiction_label_pair = touch_submitter_jurisdiction_label(
                store,
                submitter,
                jurisdiction,
                label,
                timestamp,
                block_number,
            )?;
        }

        bump_submitter_jurisdiction_counter(store, submitter, jurisdiction, timestamp, block_number)?;
        bump_jurisdiction_counter(store, jurisdiction)?;
    }

    if let Some(label) = label {
        effects.label_branch = true;
        effects.new_label_pair =
            touch_label_pair(store, &record.root_hash, label, timestamp, block_number)?;
        effects.new_submitter_label_pair = touch_submitter_label_pair(
            store,
            &record.root_hash,
            &record.submitter,
            label,
            timestamp,
            block_number,
        )?;
    }

    Ok(effects)
}

/// Labels that take part in label aggregation: set, non-empty, not the
/// timeout sentinel.
fn countable_label(record: &PropertyRecord) -> Option<&str> {
    record
        .label
        .as_deref()
        .filter(|label| !label.is_empty() && *label != TIMEOUT_LABEL)
}

fn touch_submitter_jurisdiction_pair(
    store: &mut dyn EntityStore,
    submitter: &str,
    jurisdiction: &str,
    timestamp: i64,
    block_number: u64,
) -> Result<bool, IndexError> {
    let key = SubmitterJurisdictionDedupPair::key_for(submitter, jurisdiction);
    if load_entity::<SubmitterJurisdictionDedupPair>(store, &key)?.is_some() {
        return Ok(false);
    }

    save_entity(
        store,
        &SubmitterJurisdictionDedupPair {
            id: key,
            submitter: submitter.to_string(),
            jurisdiction: jurisdiction.to_string(),
            first_seen_timestamp: timestamp,
            first_seen_block_number: block_number,
        },
    )?;
    info!(submitter, jurisdiction, "new submitter-jurisdiction pair");
    Ok(true)
}

fn touch_submitter_jurisdiction_label(
    store: &mut dyn EntityStore,
    submitter: &str,
    jurisdiction: &str,
    label: &str,
    timestamp: i64,
    block_number: u64,
) -> Result<bool, IndexError> {
    let key = SubmitterJurisdictionLabelDedupPair::key_for(submitter, jurisdiction, label);

    let created = if load_entity::<SubmitterJurisdictionLabelDedupPair>(store, &key)?.is_some() {
        false
    } else {
        save_entity(
            store,
            &SubmitterJurisdictionLabelDedupPair {
                id: key.clone(),
                submitter: submitter.to_string(),
                jurisdiction: jurisdiction.to_string(),
                label: label.to_string(),
                first_seen_timestamp: timestamp,
                first_seen_block_number: block_number,
            },
        )?;
        info!(submitter, jurisdiction, label, "new submitter-jurisdiction-label combination");
        true
    };

    let mut counter = load_entity::<SubmitterJurisdictionLabelCounter>(store, &key)?.unwrap_or_else(
        || SubmitterJurisdictionLabelCounter {
            id: key.clone(),
            submitter: submitter.to_string(),
            jurisdiction: jurisdiction.to_string(),
            label: label.to_string(),
            event_count: 0,
            last_activity_timestamp: timestamp,
            last_activity_block_number: block_number,
        },
    );
    counter.event_count += 1;
    counter.last_activity_timestamp = timestamp;
    counter.last_activity_block_number = block_number;
    save_entity(store, &counter)?;

    debug!(
        submitter,
        jurisdiction,
        label,
        event_count = counter.event_count,
        "updated submitter-jurisdiction-label counter"
    );
    Ok(created)
}

fn bump_submitter_jurisdiction_counter(
    store: &mut dyn EntityStore,
    submitter: &str,
    jurisdiction: &str,
    timestamp: i64,
    block_number: u64,
) -> Result<(), IndexError> {
    let mut counter = load_entity::<SubmitterJurisdictionCounter>(store, submitter)?
        .unwrap_or_else(|| SubmitterJurisdictionCounter {
            id: submitter.to_string(),
            submitter: submitter.to_string(),
            jurisdictions: Vec::new(),
            jurisdiction_count: 0,
            total_events: 0,
            first_activity_timestamp: timestamp,
            first_activity_block_number: block_number,
            last_activity_timestamp: timestamp,
            last_activity_block_number: block_number,
            events_per_second: Decimal::ZERO,
        });

    if !counter.jurisdictions.iter().any(|seen| seen == jurisdiction) {
        counter.jurisdictions.push(jurisdiction.to_string());
        counter.jurisdiction_count = counter.jurisdictions.len() as u64;
    }

    counter.total_events += 1;
    counter.last_activity_timestamp = timestamp;
    counter.last_activity_block_number = block_number;

    if let Some(rate) = timestamp
        .checked_sub(counter.first_activity_timestamp)
        .and_then(|elapsed| events_per_second(counter.total_events, elapsed))
    {
        counter.events_per_second = rate;
    }

    save_entity(store, &counter)?;

    info!(
        submitter,
        jurisdictions = counter.jurisdiction_count,
        total_events = counter.total_events,
        events_per_second = %counter.events_per_second,
        "updated submitter jurisdiction stats"
    );
    Ok(())
}

/// `total / elapsed`, or `None` when no time has elapsed yet.
fn events_per_second(total_events: u64, elapsed_seconds: i64) -> Option<Decimal> {
    if elapsed_seconds <= 0 {
        return None;
    }
    Decimal::from(total_events).checked_div(Decimal::from(elapsed_seconds))
}

fn bump_jurisdiction_counter(
    store: &mut dyn EntityStore,
    jurisdiction: &str,
) -> Result<(), IndexError> {
    let mut counter = load_entity::<JurisdictionCounter>(store, jurisdiction)?.unwrap_or_else(|| {
        JurisdictionCounter {
            id: jurisdiction.to_string(),
            jurisdiction: jurisdiction.to_string(),
            event_count: 0,
        }
    });
    counter.event_count += 1;
    save_entity(store, &counter)?;

    debug!(jurisdiction, event_count = counter.event_count, "updated jurisdiction counter");
    Ok(())
}

fn touch_label_pair(
    store: &mut dyn EntityStore,
    root_hash: &str,
    label: &str,
    timestamp: i64,
    block_number: u64,
) -> Result<bool, IndexError> {
    let key = LabelDedupPair::key_for(root_hash, label);
    if load_entity::<LabelDedupPair>(store, &key)?.is_some() {
        return Ok(false);
    }

    save_entity(
        store,
        &LabelDedupPair {
            id: key.clone(),
            root_hash: root_hash.to_string(),
            label: label.to_string(),
            first_seen_timestamp: timestamp,
            first_seen_block_number: block_number,
        },
    )?;

    let mut counter = load_entity::<LabelCounter>(store, label)?.unwrap_or_else(|| LabelCounter {
        id: label.to_string(),
        label: label.to_string(),
        unique_root_count: 0,
    });
    counter.unique_root_count += 1;
    save_entity(store, &counter)?;

    info!(
        pair = %key,
        label,
        unique_root_count = counter.unique_root_count,
        "new root-label pair"
    );
    Ok(true)
}

fn touch_submitter_label_pair(
    store: &mut dyn EntityStore,
    root_hash: &str,
    submitter: &str,
    label: &str,
    timestamp: i64,
    block_number: u64,
) -> Result<bool, IndexError> {
    let key = SubmitterLabelDedupPair::key_for(root_hash, submitter, label);
    if load_entity::<SubmitterLabelDedupPair>(store, &key)?.is_some() {
        return Ok(false);
    }

    save_entity(
        store,
        &SubmitterLabelDedupPair {
            id: key.clone(),
            root_hash: root_hash.to_string(),
            submitter: submitter.to_string(),
            label: label.to_string(),
            first_seen_timestamp: timestamp,
            first_seen_block_number: block_number,
        },
    )?;

    let counter_key = SubmitterLabelCounter::key_for(submitter, label);
    let mut counter = load_entity::<SubmitterLabelCounter>(store, &counter_key)?.unwrap_or_else(
        || SubmitterLabelCounter {
            id: counter_key.clone(),
            submitter: submitter.to_string(),
            label: label.to_string(),
            unique_root_count: 0,
        },
    );
    counter.unique_root_count += 1;
    save_entity(store, &counter)?;

    info!(
        pair = %key,
        submitter,
        label,
        unique_root_count = counter.unique_root_count,
        "new root-submitter-label pair"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::memory::InMemoryEntityStore;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    fn fixture_record(
        root: &str,
        submitter: &str,
        label: Option<&str>,
        jurisdiction: Option<&str>,
    ) -> PropertyRecord {
        PropertyRecord {
            id: format!("0xtx-{root}"),
            root_hash: root.to_string(),
            group_hash: "0xgroup".to_string(),
            submitter: submitter.to_string(),
            content_hash: "0xcontent".to_string(),
            content: "{}".to_string(),
            label: label.map(str::to_string),
            jurisdiction: jurisdiction.map(str::to_string),
            timestamp: 1_000,
            block_number: 10,
            transaction_hash: "0xtx".to_string(),
            owner: submitter.to_string(),
        }
    }

    #[test]
    fn repeated_root_label_counts_once() {
        let mut store = InMemoryEntityStore::new();
        let record = fixture_record("0xroot", "0xsub", Some("Parcel"), None);

        let first = must_ok(update_aggregates(&mut store, &record, 1_000, 10));
        let second = must_ok(update_aggregates(&mut store, &record, 1_005, 11));

        assert!(first.new_label_pair);
        assert!(!second.new_label_pair);
        assert!(!second.new_submitter_label_pair);
        let counter = must_some(must_ok(load_entity::<LabelCounter>(&store, "Parcel")));
        assert_eq!(counter.unique_root_count, 1);
        assert_eq!(store.count(EntityKind::LabelPair), 1);
    }

    #[test]
    fn timeout_and_empty_labels_are_not_aggregated() {
        let mut store = InMemoryEntityStore::new();
        for label in [Some(TIMEOUT_LABEL), Some(""), None] {
            let record = fixture_record("0xroot", "0xsub", label, None);
            let effects = must_ok(update_aggregates(&mut store, &record, 1_000, 10));
            assert!(!effects.label_branch);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn empty_jurisdiction_skips_jurisdiction_branch() {
        let mut store = InMemoryEntityStore::new();
        let record = fixture_record("0xroot", "0xsub", None, Some(""));
        let effects = must_ok(update_aggregates(&mut store, &record, 1_000, 10));
        assert!(!effects.jurisdiction_branch);
        assert!(store.is_empty());
    }

    #[test]
    fn jurisdiction_without_label_skips_label_combination() {
        let mut store = InMemoryEntityStore::new();
        let record = fixture_record("0xroot", "0xsub", Some(TIMEOUT_LABEL), Some("Lee"));
        let effects = must_ok(update_aggregates(&mut store, &record, 1_000, 10));

        assert!(effects.new_submitter_jurisdiction_pair);
        assert_eq!(store.count(EntityKind::SubmitterJurisdictionLabelPair), 0);
        assert_eq!(store.count(EntityKind::SubmitterJurisdictionLabelCounter), 0);
        assert_eq!(store.count(EntityKind::SubmitterJurisdictionCounter), 1);
        assert_eq!(store.count(EntityKind::JurisdictionCounter), 1);
    }

    #[test]
    fn rate_is_total_over_elapsed_seconds() {
        let mut store = InMemoryEntityStore::new();
        let first = fixture_record("0xa", "0xsub", None, Some("Lee"));
        let second = fixture_record("0xb", "0xsub", None, Some("Lee"));

        must_ok(update_aggregates(&mut store, &first, 1_000, 10));
        let after_first = must_some(must_ok(load_entity::<SubmitterJurisdictionCounter>(
            &store, "0xsub",
        )));
        assert_eq!(after_first.events_per_second, Decimal::ZERO);

        must_ok(update_aggregates(&mut store, &second, 1_010, 11));
        let after_second = must_some(must_ok(load_entity::<SubmitterJurisdictionCounter>(
            &store, "0xsub",
        )));
        assert_eq!(after_second.total_events, 2);
        assert_eq!(after_second.events_per_second, Decimal::new(2, 1));
        assert_eq!(after_second.first_activity_timestamp, 1_000);
        assert_eq!(after_second.last_activity_timestamp, 1_010);
        assert_eq!(after_second.last_activity_block_number, 11);
    }

    #[test]
    fn same_second_events_keep_previous_rate() {
        let mut store = InMemoryEntityStore::new();
        for (root, ts) in [("0xa", 1_000), ("0xb", 1_004), ("0xc", 1_004)] {
            let record = fixture_record(root, "0xsub", None, Some("Lee"));
            must_ok(update_aggregates(&mut store, &record, ts, 10));
        }
        let counter = must_some(must_ok(load_entity::<SubmitterJurisdictionCounter>(
            &store, "0xsub",
        )));
        // 3 events over 4 seconds, recomputed on the third event.
        assert_eq!(counter.events_per_second, Decimal::new(75, 2));
    }

    #[test]
    fn overflowing_elapsed_time_keeps_previous_rate() {
        let mut store = InMemoryEntityStore::new();
        for (root, ts) in [("0xa", -10), ("0xb", i64::MAX)] {
            let record = fixture_record(root, "0xsub", None, Some("Lee"));
            must_ok(update_aggregates(&mut store, &record, ts, 10));
        }
        let counter = must_some(must_ok(load_entity::<SubmitterJurisdictionCounter>(
            &store, "0xsub",
        )));
        assert_eq!(counter.total_events, 2);
        assert_eq!(counter.last_activity_timestamp, i64::MAX);
        assert_eq!(counter.events_per_second, Decimal::ZERO);
    }

    #[test]
    fn jurisdiction_set_stays_duplicate_free() {
        let mut store = InMemoryEntityStore::new();
        for (root, jurisdiction) in [("0xa", "Lee"), ("0xb", "Collier"), ("0xc", "Lee")] {
            let record = fixture_record(root, "0xsub", None, Some(jurisdiction));
            must_ok(update_aggregates(&mut store, &record, 1_000, 10));
        }
        let counter = must_some(must_ok(load_entity::<SubmitterJurisdictionCounter>(
            &store, "0xsub",
        )));
        assert_eq!(counter.jurisdictions, vec!["Lee".to_string(), "Collier".to_string()]);
        assert_eq!(counter.jurisdiction_count, 2);
        assert_eq!(counter.total_events, 3);

        let lee = must_some(must_ok(load_entity::<JurisdictionCounter>(&store, "Lee")));
        assert_eq!(lee.event_count, 2);
    }

    #[test]
    fn submitter_jurisdiction_label_counter_counts_activity() {
        let mut store = InMemoryEntityStore::new();
        let record = fixture_record("0xroot", "0xsub", Some("Parcel"), Some("Lee"));

        let first = must_ok(update_aggregates(&mut store, &record, 1_000, 10));
        let second = must_ok(update_aggregates(&mut store, &record, 1_020, 12));

        assert!(first.new_submitter_jurisdiction_label_pair);
        assert!(!second.new_submitter_jurisdiction_label_pair);

        let key = SubmitterJurisdictionLabelDedupPair::key_for("0xsub", "Lee", "Parcel");
        let counter = must_some(must_ok(load_entity::<SubmitterJurisdictionLabelCounter>(
            &store, &key,
        )));
        assert_eq!(counter.event_count, 2);
        assert_eq!(counter.last_activity_timestamp, 1_020);
        assert_eq!(counter.last_activity_block_number, 12);

        let pair = must_some(must_ok(load_entity::<SubmitterJurisdictionLabelDedupPair>(
            &store, &key,
        )));
        assert_eq!(pair.first_seen_timestamp, 1_000);
    }

    #[test]
    fn submitter_label_counter_is_per_submitter() {
        let mut store = InMemoryEntityStore::new();
        for submitter in ["0xone", "0xtwo"] {
            let record = fixture_record("0xroot", submitter, Some("Parcel"), None);
            must_ok(update_aggregates(&mut store, &record, 1_000, 10));
        }

        let label = must_some(must_ok(load_entity::<LabelCounter>(&store, "Parcel")));
        assert_eq!(label.unique_root_count, 1);

        for submitter in ["0xone", "0xtwo"] {
            let key = SubmitterLabelCounter::key_for(submitter, "Parcel");
            let counter = must_some(must_ok(load_entity::<SubmitterLabelCounter>(&store, &key)));
            assert_eq!(counter.unique_root_count, 1);
        }
    }
}
