//! Per-event entry point.

use serde_json::Value;
use tracing::{info, warn};

use crate::aggregate::{update_aggregates, AggregateEffects};
use crate::cid::derive_content_id;
use crate::config::IndexerConfig;
use crate::entity::{save_entity, EntityStore, PropertyRecord};
use crate::event::SubmissionEvent;
use crate::fetch::{fetch_with_retry, ContentFetcher};
use crate::resolve::{LinkResolver, ResolutionError};
use crate::{to_hex_prefixed, IndexError, TIMEOUT_CONTENT_PREFIX, TIMEOUT_LABEL};

/// What happened to one event, for the host's run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub record_id: String,
    pub content_id: String,
    pub content_fetched: bool,
    pub label: Option<String>,
    pub jurisdiction: Option<String>,
    pub resolution_error: Option<ResolutionError>,
    pub aggregates: AggregateEffects,
}

impl ProcessOutcome {
    #[must_use]
    pub fn timed_out(&self) -> bool {
        !self.content_fetched
    }
}

/// Builds, persists and aggregates the record for one submission event.
///
/// Fetch, parse and link failures never escape: they end up as sentinel or
/// unset fields on a record that is always persisted.
///
/// # Errors
/// Returns [`IndexError`] only when the entity store fails.
pub fn process_event(
    event: &SubmissionEvent,
    store: &mut dyn EntityStore,
    fetcher: &dyn ContentFetcher,
    config: &IndexerConfig,
) -> Result<ProcessOutcome, IndexError> {
    let transaction_hash = to_hex_prefixed(&event.transaction_hash);
    let submitter = to_hex_prefixed(&event.submitter);
    let root_hash = to_hex_prefixed(&event.root_hash);
    let record_id = PropertyRecord::record_key(&transaction_hash, event.log_index);

    info!(
        event_kind = event.kind.as_str(),
        record_id = %record_id,
        root_hash = %root_hash,
        submitter = %submitter,
        block_number = event.block_number,
        "processing submission event"
    );

    let content_id = derive_content_id(&event.content_hash);
    let (content, label, content_fetched) =
        match fetch_with_retry(fetcher, &content_id, config.max_fetch_attempts) {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let label = extract_label(&content_id, &text);
                (text, label, true)
            }
            None => {
                warn!(
                    cid = %content_id,
                    record_id = %record_id,
                    "content fetch exhausted; storing timeout sentinel"
                );
                (
                    format!("{TIMEOUT_CONTENT_PREFIX}{content_id}"),
                    Some(TIMEOUT_LABEL.to_string()),
                    false,
                )
            }
        };

    let resolver = LinkResolver::new(fetcher, config.max_fetch_attempts);
    let (jurisdiction, resolution_error) = match resolver.resolve_jurisdiction(&event.root_hash) {
        Ok(jurisdiction) => (Some(jurisdiction), None),
        Err(err) => {
            warn!(
                root_hash = %root_hash,
                hop = %err.hop(),
                error = %err,
                "jurisdiction left unset"
            );
            (None, Some(err))
        }
    };

    let record = PropertyRecord {
        id: record_id.clone(),
        root_hash,
        group_hash: to_hex_prefixed(&event.group_hash),
        submitter: submitter.clone(),
        content_hash: to_hex_prefixed(&event.content_hash),
        content,
        label: label.clone(),
        jurisdiction: jurisdiction.clone(),
        timestamp: event.block_timestamp,
        block_number: event.block_number,
        transaction_hash,
        owner: submitter,
    };
    save_entity(store, &record)?;
    info!(
        record_id = %record_id,
        label = record.label.as_deref().unwrap_or(""),
        jurisdiction = record.jurisdiction.as_deref().unwrap_or(""),
        "property record saved"
    );

    let aggregates = update_aggregates(store, &record, event.block_timestamp, event.block_number)?;

    Ok(ProcessOutcome {
        record_id,
        content_id,
        content_fetched,
        label,
        jurisdiction,
        resolution_error,
        aggregates,
    })
}

/// Reads the top-level `label` of a property document.
fn extract_label(cid: &str, text: &str) -> Option<String> {
    let document: Value = match serde_json::from_str(text) {
        Ok(document) => document,
        Err(err) => {
            warn!(cid, error = %err, "content is not valid JSON; label left unset");
            return None;
        }
    };

    match document.get("label") {
        Some(Value::String(label)) => {
            info!(cid, label = %label, "label extracted");
            Some(label.clone())
        }
        Some(Value::Null) | None => {
            warn!(cid, "content has no label field");
            None
        }
        Some(other) => {
            warn!(cid, value = %other, "label is not a string; left unset");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_read_from_top_level() {
        assert_eq!(
            extract_label("bafk", r#"{"label":"Parcel","relationships":{}}"#),
            Some("Parcel".to_string())
        );
    }

    #[test]
    fn null_missing_and_non_text_labels_are_unset() {
        for text in [r#"{"label":null}"#, "{}", r#"{"label":7}"#, "not json", "[]"] {
            assert_eq!(extract_label("bafk", text), None, "{text}");
        }
    }

    #[test]
    fn empty_label_is_kept_verbatim() {
        assert_eq!(extract_label("bafk", r#"{"label":""}"#), Some(String::new()));
    }
}
