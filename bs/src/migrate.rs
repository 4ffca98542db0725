//! Schema and payload-format migration for bundle files
//!
//! Migrations are append-only: never edit an existing step, only add new
//! ones at the end. Bundles without a `schema_version` table are version 1.
//! Each step runs in its own transaction together with the version bump, and
//! is idempotent, so a failed step leaves the file at the last completed
//! version.

use std::sync::Arc;

use rusqlite::{Connection, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::QueryContext;
use crate::serialization::{JsonSerializer, SerializationError, Serializer};
use crate::store::schema::{self, BlobTable};
use crate::store::{Query, Store, StoreError, scan_first_int};

/// Schema version of bundles written before the version marker existed
pub const INITIAL_SCHEMA_VERSION: u32 = 1;

/// Schema version this build reads and writes
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Errors from inside a single migration step
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{table} row {key}: {source}")]
    Reencode {
        table: &'static str,
        key: String,
        #[source]
        source: SerializationError,
    },
}

/// Errors from migrating a bundle; all of them leave the bundle unusable
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("bundle schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("not a bundle: missing {0} table")]
    NotABundle(&'static str),

    #[error("corrupt schema version marker: {0}")]
    CorruptVersion(i64),

    #[error("migration to schema version {version} failed: {source}")]
    StepFailed {
        version: u32,
        #[source]
        source: StepError,
    },

    #[error("failed to read schema version: {0}")]
    Store(#[from] StoreError),
}

impl MigrationError {
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Store(e) => e.is_canceled(),
            Self::StepFailed {
                source: StepError::Store(e),
                ..
            } => e.is_canceled(),
            _ => false,
        }
    }
}

type StepFn = fn(&Transaction<'_>, &dyn Serializer) -> Result<(), StepError>;

/// A single forward migration producing `version`
struct Migration {
    version: u32,
    description: &'static str,
    apply: StepFn,
}

/// Append-only migration list; versions must be consecutive from 2
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "add schema_version marker and moniker indexes",
        apply: add_version_marker_and_indexes,
    },
    Migration {
        version: 3,
        description: "re-encode payloads from json to binary",
        apply: reencode_payloads,
    },
];

/// Bring `store` up to `CURRENT_SCHEMA_VERSION`
///
/// Applies nothing when the bundle is already current.
pub async fn migrate(ctx: &QueryContext, store: &Store, serializer: Arc<dyn Serializer>) -> Result<(), MigrationError> {
    debug!(path = %store.path().display(), serializer = serializer.name(), "migrate: called");

    if !table_exists(ctx, store, "meta").await? {
        return Err(MigrationError::NotABundle("meta"));
    }

    let current = read_version(ctx, store).await?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::UnsupportedVersion {
            found: current,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if current == CURRENT_SCHEMA_VERSION {
        debug!(version = current, "migrate: already current");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            path = %store.path().display(),
            version = migration.version,
            description = migration.description,
            "Applying bundle migration"
        );

        let apply = migration.apply;
        let version = migration.version;
        let serializer = Arc::clone(&serializer);
        store
            .transaction(ctx, move |tx| {
                apply(tx, serializer.as_ref())?;
                write_version(tx, version)
            })
            .await
            .map_err(|source| MigrationError::StepFailed { version, source })?;
    }

    info!(path = %store.path().display(), version = CURRENT_SCHEMA_VERSION, "Bundle migrated");
    Ok(())
}

/// Stored schema version (1 when no marker exists)
pub async fn read_version(ctx: &QueryContext, store: &Store) -> Result<u32, MigrationError> {
    debug!("read_version: called");
    if !table_exists(ctx, store, "schema_version").await? {
        return Ok(INITIAL_SCHEMA_VERSION);
    }

    let version = scan_first_int(
        store
            .query(ctx, Query::new("SELECT version FROM schema_version LIMIT 1"))
            .await,
    )?;

    match version {
        None => Ok(INITIAL_SCHEMA_VERSION),
        Some(v) => match u32::try_from(v) {
            Ok(v) if v >= INITIAL_SCHEMA_VERSION => Ok(v),
            _ => Err(MigrationError::CorruptVersion(v)),
        },
    }
}

async fn table_exists(ctx: &QueryContext, store: &Store, name: &str) -> Result<bool, StoreError> {
    let count = scan_first_int(
        store
            .query(
                ctx,
                Query::new("SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?").bind(name.to_string()),
            )
            .await,
    )?;
    Ok(count.unwrap_or(0) > 0)
}

/// Replace the version marker; used by migrations and the bundle writer
pub(crate) fn write_version(conn: &Connection, version: u32) -> Result<(), StepError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn add_version_marker_and_indexes(tx: &Transaction<'_>, _serializer: &dyn Serializer) -> Result<(), StepError> {
    tx.execute_batch(schema::SCHEMA_VERSION_TABLE)?;
    tx.execute_batch(schema::MONIKER_INDEXES)?;
    Ok(())
}

fn reencode_payloads(tx: &Transaction<'_>, serializer: &dyn Serializer) -> Result<(), StepError> {
    let legacy = JsonSerializer::new();
    for table in BlobTable::ALL {
        let rewritten = reencode_table(tx, table, &legacy, serializer)?;
        debug!(table = table.quoted(), rewritten, "reencode_payloads: table done");
    }
    Ok(())
}

/// Re-encode every legacy blob in `table`, skipping rows already in the target encoding
fn reencode_table(
    tx: &Transaction<'_>,
    table: BlobTable,
    legacy: &dyn Serializer,
    target: &dyn Serializer,
) -> Result<usize, StepError> {
    let mut stmt = tx.prepare(&format!("SELECT rowid, data FROM {}", table.quoted()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let update = format!("UPDATE {} SET data = ?1 WHERE rowid = ?2", table.quoted());
    let mut rewritten = 0;
    for (rowid, data) in rows {
        if target.recognizes(&data) {
            continue;
        }

        let reencoded = match table {
            BlobTable::Documents => legacy
                .unmarshal_document_data(&data)
                .and_then(|d| target.marshal_document_data(&d)),
            BlobTable::ResultChunks => legacy
                .unmarshal_result_chunk_data(&data)
                .and_then(|c| target.marshal_result_chunk_data(&c)),
            BlobTable::Definitions | BlobTable::References => legacy
                .unmarshal_locations(&data)
                .and_then(|l| target.marshal_locations(&l)),
        }
        .map_err(|source| StepError::Reencode {
            table: table.quoted(),
            key: rowid.to_string(),
            source,
        })?;

        tx.execute(&update, rusqlite::params![reencoded, rowid])?;
        rewritten += 1;
    }

    Ok(rewritten)
}
