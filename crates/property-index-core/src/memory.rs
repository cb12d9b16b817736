use std::collections::BTreeMap;

use serde_json::Value;

use crate::entity::{EntityKind, EntityStore};
use crate::IndexError;

/// Ordered in-process [`EntityStore`] with the same write-once rule as the
/// SQLite store: immutable kinds reject a second save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryEntityStore {
    entities: BTreeMap<(EntityKind, String), Value>,
}

impl InMemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities.keys().filter(|(k, _)| *k == kind).count()
    }

    /// All entities in `(kind, key)` order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &str, &Value)> {
        self.entities
            .iter()
            .map(|((kind, key), value)| (*kind, key.as_str(), value))
    }
}

impl EntityStore for InMemoryEntityStore {
    fn load_payload(&self, kind: EntityKind, key: &str) -> Result<Option<Value>, IndexError> {
        Ok(self.entities.get(&(kind, key.to_string())).cloned())
    }

    fn save_payload(
        &mut self,
        kind: EntityKind,
        key: &str,
        payload: Value,
    ) -> Result<(), IndexError> {
        let slot = (kind, key.to_string());
        if kind.is_immutable() && self.entities.contains_key(&slot) {
            return Err(IndexError::Store(format!("{kind} {key} is write-once")));
        }
        self.entities.insert(slot, payload);
        Ok(())
    }
}
