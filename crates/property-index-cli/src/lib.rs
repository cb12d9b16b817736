//! `pidx`: host loop and operator surface for the property submission indexer.
//!
//! Embedding hosts can drive ingestion without the binary through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`read_event_log`] + [`ingest_events`] to replay a log against an open
//!   [`SqliteEntityStore`] with any [`ContentFetcher`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use property_index_core::config::{DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_GATEWAY_URL};
use property_index_core::{
    derive_content_id, parse_hex_array, process_event, ContentFetcher, EntityKind, EventPosition,
    IndexerConfig, RawSubmissionEvent, SubmissionEvent, DEFAULT_MAX_ATTEMPTS,
};
use property_index_store_sqlite::SqliteEntityStore;
use serde::Serialize;
use tracing::{info, info_span, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

pub mod gateway;

pub use gateway::GatewayFetcher;

#[derive(Debug, Parser)]
#[command(name = "pidx")]
#[command(about = "Property submission indexer")]
pub struct Cli {
    #[arg(long, env = "PIDX_DB", default_value = "./property_index.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a JSONL submission event log into the store.
    Ingest(IngestArgs),
    Entity {
        #[command(subcommand)]
        command: EntityCommand,
    },
    /// Print every stored entity in (kind, key) order.
    Snapshot(SnapshotArgs),
    Timeouts {
        #[command(subcommand)]
        command: TimeoutsCommand,
    },
    /// Per-kind entity counts and the ingest cursor.
    Stats,
    /// Derive the content identifier for a 32-byte hash.
    Cid(CidArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    events: PathBuf,
    #[arg(long, env = "PIDX_GATEWAY", default_value = DEFAULT_GATEWAY_URL)]
    gateway: String,
    #[arg(long, env = "PIDX_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    #[arg(long, env = "PIDX_FETCH_TIMEOUT_MS", default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
    fetch_timeout_ms: u64,
}

#[derive(Debug, Subcommand)]
pub enum EntityCommand {
    Show(EntityShowArgs),
}

#[derive(Debug, Args)]
pub struct EntityShowArgs {
    #[arg(long)]
    kind: String,
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Print only the SHA-256 digest of the snapshot.
    #[arg(long)]
    digest: bool,
}

#[derive(Debug, Subcommand)]
pub enum TimeoutsCommand {
    List(TimeoutsListArgs),
}

#[derive(Debug, Args)]
pub struct TimeoutsListArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CidArgs {
    #[arg(long)]
    hash: String,
}

/// Summary of one ingest run, printed as JSON.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub run_id: Ulid,
    pub events_read: usize,
    pub processed: usize,
    pub skipped: usize,
    pub timeouts: usize,
    pub unresolved_jurisdictions: usize,
    pub cursor: Option<EventPosition>,
}

/// Installs the stderr log subscriber (`RUST_LOG`, default `info`).
///
/// # Errors
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Executes the parsed top-level CLI command graph.
///
/// Ingest configuration is validated before the database file is touched.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Cid(args) => run_cid(&args),
        Command::Ingest(args) => {
            let config = ingest_config(&args)?;
            let mut store = open_store(&cli.db)?;
            run_ingest(&args.events, &mut store, &config)
        }
        command => {
            let mut store = open_store(&cli.db)?;
            run_with_store(command, &mut store)
        }
    }
}

fn open_store(db: &Path) -> Result<SqliteEntityStore> {
    let store = SqliteEntityStore::open(db)?;
    store.migrate()?;
    Ok(store)
}

fn ingest_config(args: &IngestArgs) -> Result<IndexerConfig> {
    let config = IndexerConfig {
        max_fetch_attempts: args.max_attempts,
        gateway_url: args.gateway.clone(),
        fetch_timeout_ms: args.fetch_timeout_ms,
    };
    config
        .validate()
        .map_err(|err| anyhow!("invalid indexer configuration: {err}"))?;
    Ok(config)
}

fn run_ingest(
    events_path: &Path,
    store: &mut SqliteEntityStore,
    config: &IndexerConfig,
) -> Result<()> {
    let events = read_event_log(events_path)?;
    let fetcher = GatewayFetcher::new(config.gateway_base(), config.fetch_timeout_ms);
    let report = ingest_events(store, &events, &fetcher, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_with_store(command: Command, store: &mut SqliteEntityStore) -> Result<()> {
    match command {
        Command::Ingest(args) => run_ingest(&args.events, store, &ingest_config(&args)?),
        Command::Entity {
            command: EntityCommand::Show(args),
        } => {
            let kind = parse_entity_kind(&args.kind)?;
            let payload = store
                .load_entity_payload(kind, &args.key)?
                .ok_or_else(|| anyhow!("entity not found: {kind} {}", args.key))?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Command::Snapshot(args) => {
            if args.digest {
                let digest = store.snapshot_digest()?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "digest": digest }))?
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&store.snapshot()?)?);
            }
            Ok(())
        }
        Command::Timeouts {
            command: TimeoutsCommand::List(args),
        } => {
            let timeouts = store.list_timeouts(args.limit)?;
            println!("{}", serde_json::to_string_pretty(&timeouts)?);
            Ok(())
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "cursor": store.cursor()?,
                "entities": store.count_by_kind()?,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Cid(args) => run_cid(&args),
    }
}

fn run_cid(args: &CidArgs) -> Result<()> {
    let hash: [u8; 32] = parse_hex_array("hash", &args.hash)
        .map_err(|err| anyhow!("invalid --hash: {err}"))?;
    let payload = serde_json::json!({
        "hash": args.hash,
        "cid": derive_content_id(&hash),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn parse_entity_kind(raw: &str) -> Result<EntityKind> {
    EntityKind::parse(raw).ok_or_else(|| {
        let known = EntityKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow!("unknown entity kind {raw:?}; expected one of: {known}")
    })
}

/// Reads and decodes a JSONL event log.
///
/// # Errors
/// Returns an error naming the line for unreadable JSON, bad hex or widths,
/// and for any event not strictly after its predecessor.
pub fn read_event_log(path: &Path) -> Result<Vec<SubmissionEvent>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read event log {}", path.display()))?;
    parse_event_log(&body)
}

/// Decodes JSONL event text; blank lines are ignored.
///
/// # Errors
/// See [`read_event_log`].
pub fn parse_event_log(body: &str) -> Result<Vec<SubmissionEvent>> {
    let mut events: Vec<SubmissionEvent> = Vec::new();

    for (index, line) in body.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let raw: RawSubmissionEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("line {line_no}: invalid event JSON"))?;
        let event = raw
            .decode()
            .with_context(|| format!("line {line_no}: invalid event"))?;

        if let Some(previous) = events.last() {
            if event.position() <= previous.position() {
                return Err(anyhow!(
                    "line {line_no}: event at block {} log {} MUST come after block {} log {}",
                    event.block_number,
                    event.log_index,
                    previous.block_number,
                    previous.log_index
                ));
            }
        }
        events.push(event);
    }

    Ok(events)
}

/// Applies `events` in order, one store transaction per event.
///
/// Events at or before the store's ingest cursor are skipped.
///
/// # Errors
/// Returns an error when the store fails; the failing event's writes are
/// rolled back and earlier events stay committed.
pub fn ingest_events(
    store: &mut SqliteEntityStore,
    events: &[SubmissionEvent],
    fetcher: &dyn ContentFetcher,
    config: &IndexerConfig,
) -> Result<IngestReport> {
    let run_id = Ulid::new();
    let span = info_span!("ingest", run_id = %run_id);
    let _entered = span.enter();

    let mut report = IngestReport {
        run_id,
        events_read: events.len(),
        processed: 0,
        skipped: 0,
        timeouts: 0,
        unresolved_jurisdictions: 0,
        cursor: None,
    };

    for event in events {
        let applied = store.apply_event(event.position(), |entities| {
            process_event(event, entities, fetcher, config)
        })?;

        match applied {
            Some(outcome) => {
                report.processed += 1;
                if outcome.timed_out() {
                    report.timeouts += 1;
                }
                if outcome.jurisdiction.is_none() {
                    report.unresolved_jurisdictions += 1;
                }
            }
            None => {
                report.skipped += 1;
            }
        }
    }

    report.cursor = store.cursor()?.map(|cursor| cursor.position());

    if report.timeouts > 0 {
        warn!(
            timeouts = report.timeouts,
            "some content fetches timed out; see `pidx timeouts list`"
        );
    }
    info!(
        events_read = report.events_read,
        processed = report.processed,
        skipped = report.skipped,
        "ingest finished"
    );

    Ok(report)
}
