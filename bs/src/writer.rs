//! Bundle file producer
//!
//! Writes a fresh bundle at the current schema version. Everything is
//! written inside one transaction that `finish` commits; dropping an
//! unfinished writer leaves an empty, uncommitted file behind.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::migrate::{CURRENT_SCHEMA_VERSION, StepError, write_version};
use crate::serialization::{BinarySerializer, SerializationError, Serializer};
use crate::store::schema;
use crate::types::{DocumentData, Location, MetaData, ResultChunkData};

/// Errors from writing a bundle
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("bundle already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] SerializationError),

    #[error("failed to write schema version: {0}")]
    Version(#[from] StepError),
}

/// Moniker row to insert: scheme, identifier and its locations
pub type MonikerLocations = (String, String, Vec<Location>);

/// Writes one new bundle file
pub struct BundleWriter {
    path: PathBuf,
    conn: Connection,
    serializer: BinarySerializer,
}

impl BundleWriter {
    /// Create a new bundle file; fails if `path` already exists
    pub fn create(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "BundleWriter::create: called");

        if path.exists() {
            return Err(WriterError::AlreadyExists(path));
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(schema::BASE_TABLES)?;
        conn.execute_batch(schema::SCHEMA_VERSION_TABLE)?;
        conn.execute_batch(schema::MONIKER_INDEXES)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;

        Ok(Self {
            path,
            conn,
            serializer: BinarySerializer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_meta(&mut self, meta: MetaData) -> Result<(), WriterError> {
        debug!(num_result_chunks = meta.num_result_chunks, "write_meta: called");
        self.conn.execute("DELETE FROM meta", [])?;
        self.conn
            .execute("INSERT INTO meta (num_result_chunks) VALUES (?1)", [meta.num_result_chunks])?;
        Ok(())
    }

    pub fn write_documents<I>(&mut self, documents: I) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = (String, DocumentData)>,
    {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR REPLACE INTO documents (path, data) VALUES (?1, ?2)")?;
        let mut count = 0;
        for (path, document) in documents {
            let data = self.serializer.marshal_document_data(&document)?;
            stmt.execute(rusqlite::params![path, data])?;
            count += 1;
        }
        debug!(count, "write_documents: done");
        Ok(count)
    }

    pub fn write_result_chunks<I>(&mut self, chunks: I) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = (u32, ResultChunkData)>,
    {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR REPLACE INTO result_chunks (id, data) VALUES (?1, ?2)")?;
        let mut count = 0;
        for (id, chunk) in chunks {
            let data = self.serializer.marshal_result_chunk_data(&chunk)?;
            stmt.execute(rusqlite::params![id, data])?;
            count += 1;
        }
        debug!(count, "write_result_chunks: done");
        Ok(count)
    }

    pub fn write_definitions<I>(&mut self, rows: I) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = MonikerLocations>,
    {
        self.write_monikers("definitions", rows)
    }

    pub fn write_references<I>(&mut self, rows: I) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = MonikerLocations>,
    {
        self.write_monikers("references", rows)
    }

    fn write_monikers<I>(&mut self, table: &'static str, rows: I) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = MonikerLocations>,
    {
        let sql = format!(r#"INSERT INTO "{table}" (scheme, identifier, data) VALUES (?1, ?2, ?3)"#);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut count = 0;
        for (scheme, identifier, locations) in rows {
            let data = self.serializer.marshal_locations(&locations)?;
            stmt.execute(rusqlite::params![scheme, identifier, data])?;
            count += 1;
        }
        debug!(table, count, "write_monikers: done");
        Ok(count)
    }

    /// Stamp the schema version, commit and close the file
    pub fn finish(self) -> Result<PathBuf, WriterError> {
        debug!(path = %self.path.display(), "finish: called");
        write_version(&self.conn, CURRENT_SCHEMA_VERSION)?;
        self.conn.execute_batch("COMMIT")?;
        self.conn.close().map_err(|(_, e)| WriterError::Sqlite(e))?;

        info!(path = %self.path.display(), version = CURRENT_SCHEMA_VERSION, "Wrote bundle");
        Ok(self.path)
    }
}
