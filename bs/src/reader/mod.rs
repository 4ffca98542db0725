//! Bundle reader
//!
//! `Reader` is the query surface over one opened bundle. `SqliteReader`
//! serves bundle files; `MemoryReader` serves in-process data with the same
//! semantics and is what tests substitute for a real file.

mod memory;
mod pagination;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::QueryContext;
use crate::migrate::MigrationError;
use crate::serialization::SerializationError;
use crate::store::StoreError;
use crate::types::{DocumentData, Location, MetaData, ResultChunkData};

pub use memory::MemoryReader;
pub use pagination::Pagination;
pub use sqlite::SqliteReader;

/// Moniker-keyed location tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationTable {
    Definitions,
    References,
}

impl LocationTable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Definitions => "definitions",
            Self::References => "references",
        }
    }
}

/// Errors from reader operations
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The meta table has no rows
    #[error("no rows in meta table")]
    NoMetadata,

    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{op}: {source}")]
    Decode {
        op: &'static str,
        #[source]
        source: SerializationError,
    },

    #[error("migrate: {0}")]
    Migration(#[from] MigrationError),

    /// Opening failed and closing the half-open store failed as well
    #[error("{cause} (additionally, closing the store failed: {close})")]
    OpenAborted {
        cause: Box<ReaderError>,
        close: StoreError,
    },
}

impl ReaderError {
    pub(crate) fn store(op: &'static str) -> impl FnOnce(StoreError) -> ReaderError {
        move |source| ReaderError::Store { op, source }
    }

    pub(crate) fn decode(op: &'static str) -> impl FnOnce(SerializationError) -> ReaderError {
        move |source| ReaderError::Decode { op, source }
    }

    /// The bundle file does not exist at the storage layer
    pub fn is_bundle_not_found(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_bundle_not_found(),
            Self::OpenAborted { cause, .. } => cause.is_bundle_not_found(),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_canceled(),
            Self::Migration(e) => e.is_canceled(),
            Self::OpenAborted { cause, .. } => cause.is_canceled(),
            _ => false,
        }
    }
}

/// Read-only query surface over one bundle
///
/// Implementations are safe to share between concurrent callers. Missing
/// rows are never errors: lookups return `None` or an empty page instead.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Bundle metadata; `ReaderError::NoMetadata` if the meta table is empty
    async fn read_meta(&self, ctx: &QueryContext) -> Result<MetaData, ReaderError>;

    /// Document by exact path
    async fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>, ReaderError>;

    /// Result chunk by shard id
    async fn read_result_chunk(&self, ctx: &QueryContext, id: u32) -> Result<Option<ResultChunkData>, ReaderError>;

    /// Page of definition locations for a moniker, plus the full set size
    async fn read_definitions(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError>;

    /// Page of reference locations for a moniker, plus the full set size
    async fn read_references(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError>;

    /// Release the underlying storage; later calls fail
    async fn close(&self) -> Result<(), ReaderError>;

    /// Dispatch to `read_definitions` or `read_references`
    async fn read_locations(
        &self,
        ctx: &QueryContext,
        table: LocationTable,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        match table {
            LocationTable::Definitions => self.read_definitions(ctx, scheme, identifier, page).await,
            LocationTable::References => self.read_references(ctx, scheme, identifier, page).await,
        }
    }
}
