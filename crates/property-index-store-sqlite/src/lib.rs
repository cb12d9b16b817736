#![allow(clippy::missing_errors_doc)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use property_index_core::{
    format_rfc3339, now_utc, EntityKind, EntityStore, EventPosition, IndexError, PropertyRecord,
    TIMEOUT_CONTENT_PREFIX,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

const ENTITY_MIGRATION_VERSION: i64 = 1;
const CURSOR_NAME: &str = "submission_events";

const SCHEMA_ENTITIES_V1: &str = r"
CREATE TABLE IF NOT EXISTS entities (
  kind TEXT NOT NULL CHECK (
    kind IN (
      'property',
      'label_pair',
      'label_counter',
      'submitter_label_pair',
      'submitter_label_counter',
      'submitter_jurisdiction_pair',
      'submitter_jurisdiction_counter',
      'submitter_jurisdiction_label_pair',
      'submitter_jurisdiction_label_counter',
      'jurisdiction_counter'
    )
  ),
  entity_key TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  PRIMARY KEY (kind, entity_key)
);

CREATE TRIGGER IF NOT EXISTS trg_entities_write_once
BEFORE UPDATE ON entities
WHEN OLD.kind IN (
  'property',
  'label_pair',
  'submitter_label_pair',
  'submitter_jurisdiction_pair',
  'submitter_jurisdiction_label_pair'
)
BEGIN
  SELECT RAISE(FAIL, 'property records and dedup pairs are write-once');
END;

CREATE TRIGGER IF NOT EXISTS trg_entities_no_delete
BEFORE DELETE ON entities
BEGIN
  SELECT RAISE(FAIL, 'entities are never deleted');
END;

CREATE TABLE IF NOT EXISTS ingest_cursor (
  cursor_name TEXT PRIMARY KEY,
  block_number INTEGER NOT NULL CHECK (block_number >= 0),
  log_index INTEGER NOT NULL CHECK (log_index >= 0),
  events_applied INTEGER NOT NULL CHECK (events_applied >= 0),
  updated_at TEXT NOT NULL
);
";

pub struct SqliteEntityStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct IngestCursor {
    pub block_number: u64,
    pub log_index: u64,
    pub events_applied: u64,
    pub updated_at: String,
}

impl IngestCursor {
    #[must_use]
    pub fn position(&self) -> EventPosition {
        EventPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EntityRow {
    pub kind: String,
    pub key: String,
    pub payload: Value,
}

/// A property whose content fetch ran out of attempts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct TimeoutRecord {
    pub record_id: String,
    pub content_id: String,
    pub root_hash: String,
    pub transaction_hash: String,
    pub block_number: u64,
}

impl SqliteEntityStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_ENTITIES_V1)
            .context("failed to apply entity schema")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![ENTITY_MIGRATION_VERSION, now],
            )
            .context("failed to register entity schema migration")?;

        Ok(())
    }

    pub fn cursor(&self) -> Result<Option<IngestCursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT block_number, log_index, events_applied, updated_at
             FROM ingest_cursor
             WHERE cursor_name = ?1",
        )?;

        let row = stmt
            .query_row(params![CURSOR_NAME], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()
            .context("failed to query ingest cursor")?;

        let Some((block_number, log_index, events_applied, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(IngestCursor {
            block_number: u64::try_from(block_number)
                .with_context(|| format!("invalid cursor block_number: {block_number}"))?,
            log_index: u64::try_from(log_index)
                .with_context(|| format!("invalid cursor log_index: {log_index}"))?,
            events_applied: u64::try_from(events_applied)
                .with_context(|| format!("invalid cursor events_applied: {events_applied}"))?,
            updated_at,
        }))
    }

    /// Runs `apply` against a transaction-scoped entity view and advances the
    /// ingest cursor to `position` in the same transaction.
    ///
    /// Returns `None` without calling `apply` when `position` is at or before
    /// the cursor, so re-ingesting a log is a no-op. Any error rolls back every
    /// write made for this event.
    pub fn apply_event<T>(
        &mut self,
        position: EventPosition,
        apply: impl FnOnce(&mut dyn EntityStore) -> Result<T, IndexError>,
    ) -> Result<Option<T>> {
        let previous = self.cursor()?;
        if let Some(cursor) = &previous {
            if position <= cursor.position() {
                debug!(
                    block_number = position.block_number,
                    log_index = position.log_index,
                    "event at or before ingest cursor; skipping"
                );
                return Ok(None);
            }
        }
        let events_applied = previous.map_or(0, |cursor| cursor.events_applied) + 1;

        let tx = self
            .conn
            .transaction()
            .context("failed to start event transaction")?;

        let value = {
            let mut view = SqliteEntities { conn: &tx };
            let entities: &mut dyn EntityStore = &mut view;
            apply(entities).with_context(|| {
                format!(
                    "failed to apply event at block {} log {}",
                    position.block_number, position.log_index
                )
            })?
        };

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        tx.execute(
            "INSERT INTO ingest_cursor(cursor_name, block_number, log_index, events_applied, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(cursor_name) DO UPDATE SET
               block_number = excluded.block_number,
               log_index = excluded.log_index,
               events_applied = excluded.events_applied,
               updated_at = excluded.updated_at",
            params![
                CURSOR_NAME,
                to_sql_integer("block_number", position.block_number)?,
                to_sql_integer("log_index", position.log_index)?,
                to_sql_integer("events_applied", events_applied)?,
                now
            ],
        )
        .context("failed to advance ingest cursor")?;

        tx.commit().context("failed to commit event transaction")?;
        Ok(Some(value))
    }

    pub fn load_entity_payload(&self, kind: EntityKind, key: &str) -> Result<Option<Value>> {
        load_payload_from(&self.conn, kind, key)
            .with_context(|| format!("failed to load {kind} {key}"))
    }

    /// Every entity, ordered by `(kind, entity_key)`.
    pub fn snapshot(&self) -> Result<Vec<EntityRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, entity_key, payload_json
             FROM entities
             ORDER BY kind ASC, entity_key ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut snapshot = Vec::new();
        for (kind, key, payload_json) in collect_rows(rows)? {
            let payload: Value = serde_json::from_str(&payload_json)
                .with_context(|| format!("invalid stored payload for {kind} {key}"))?;
            snapshot.push(EntityRow { kind, key, payload });
        }
        Ok(snapshot)
    }

    /// SHA-256 (hex) over the stored rows in snapshot order.
    pub fn snapshot_digest(&self) -> Result<String> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, entity_key, payload_json
             FROM entities
             ORDER BY kind ASC, entity_key ASC",
        )?;
        let mut rows = stmt.query([])?;

        let mut hasher = Sha256::new();
        while let Some(row) = rows.next()? {
            for column in 0..3 {
                let text: String = row.get(column)?;
                hasher.update(text.as_bytes());
                hasher.update([if column == 2 { b'\n' } else { b'\t' }]);
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Properties stored with the timeout content sentinel, oldest first.
    pub fn list_timeouts(&self, limit: Option<usize>) -> Result<Vec<TimeoutRecord>> {
        let mut query = "SELECT entity_key, payload_json
             FROM entities
             WHERE kind = 'property'
               AND json_extract(payload_json, '$.content') GLOB 'TIMEOUT:*'
             ORDER BY json_extract(payload_json, '$.block_number') ASC, entity_key ASC"
            .to_string();

        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut timeouts = Vec::new();
        for (key, payload_json) in collect_rows(rows)? {
            let record: PropertyRecord = serde_json::from_str(&payload_json)
                .with_context(|| format!("invalid stored property {key}"))?;
            let Some(content_id) = record.content.strip_prefix(TIMEOUT_CONTENT_PREFIX) else {
                continue;
            };
            timeouts.push(TimeoutRecord {
                record_id: record.id,
                content_id: content_id.to_string(),
                root_hash: record.root_hash,
                transaction_hash: record.transaction_hash,
                block_number: record.block_number,
            });
        }
        Ok(timeouts)
    }

    /// Row count per entity kind; kinds with no rows report zero.
    pub fn count_by_kind(&self) -> Result<BTreeMap<String, u64>> {
        let mut counts: BTreeMap<String, u64> = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), 0))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM entities GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for (kind, count) in collect_rows(rows)? {
            let count =
                u64::try_from(count).with_context(|| format!("invalid row count for {kind}"))?;
            counts.insert(kind, count);
        }
        Ok(counts)
    }
}

impl EntityStore for SqliteEntityStore {
    fn load_payload(&self, kind: EntityKind, key: &str) -> Result<Option<Value>, IndexError> {
        load_payload_from(&self.conn, kind, key).map_err(to_index_error)
    }

    fn save_payload(
        &mut self,
        kind: EntityKind,
        key: &str,
        payload: Value,
    ) -> Result<(), IndexError> {
        save_payload_to(&self.conn, kind, key, &payload).map_err(to_index_error)
    }
}

/// Entity view bound to one open event transaction.
struct SqliteEntities<'a> {
    conn: &'a Connection,
}

impl EntityStore for SqliteEntities<'_> {
    fn load_payload(&self, kind: EntityKind, key: &str) -> Result<Option<Value>, IndexError> {
        load_payload_from(self.conn, kind, key).map_err(to_index_error)
    }

    fn save_payload(
        &mut self,
        kind: EntityKind,
        key: &str,
        payload: Value,
    ) -> Result<(), IndexError> {
        save_payload_to(self.conn, kind, key, &payload).map_err(to_index_error)
    }
}

fn load_payload_from(conn: &Connection, kind: EntityKind, key: &str) -> Result<Option<Value>> {
    let raw = conn
        .query_row(
            "SELECT payload_json FROM entities WHERE kind = ?1 AND entity_key = ?2",
            params![kind.as_str(), key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("failed to query entity")?;

    raw.map(|payload_json| {
        serde_json::from_str(&payload_json).context("invalid stored entity payload")
    })
    .transpose()
}

fn save_payload_to(conn: &Connection, kind: EntityKind, key: &str, payload: &Value) -> Result<()> {
    let payload_json = serde_json::to_string(payload).context("failed to serialize payload")?;
    conn.execute(
        "INSERT INTO entities(kind, entity_key, payload_json)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(kind, entity_key) DO UPDATE SET
           payload_json = excluded.payload_json",
        params![kind.as_str(), key, payload_json],
    )
    .with_context(|| format!("failed to save {kind} {key}"))?;

    if kind.is_immutable() {
        debug!(kind = kind.as_str(), key, "write-once entity stored");
    }
    Ok(())
}

fn to_index_error(err: anyhow::Error) -> IndexError {
    IndexError::Store(format!("{err:#}"))
}

fn to_sql_integer(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{field} does not fit in sqlite INTEGER: {value}"))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
