//! bundlestore - storage and query engine for precomputed code-intelligence bundles
//!
//! A bundle is one immutable SQLite file per indexed project and commit. It
//! holds per-document symbol ranges, hover text and diagnostics, a sharded
//! result-chunk table that maps result ids to locations, and moniker-keyed
//! definition and reference lists.
//!
//! Layers, leaves first:
//! - `serialization`: blob encodings for stored payloads
//! - `store`: one SQLite connection per bundle file
//! - `migrate`: schema and encoding upgrades applied on open
//! - `reader`: typed reads over an opened bundle
//! - `database`: position queries composed over a reader
//! - `writer`: produces new bundle files

pub mod context;
pub mod database;
pub mod migrate;
pub mod reader;
pub mod serialization;
pub mod store;
pub mod types;
pub mod writer;

pub use context::{Canceler, QueryContext};
pub use database::Database;
pub use migrate::{CURRENT_SCHEMA_VERSION, MigrationError, migrate};
pub use reader::{LocationTable, MemoryReader, Pagination, Reader, ReaderError, SqliteReader};
pub use serialization::{BinarySerializer, JsonSerializer, SerializationError, Serializer};
pub use store::{Store, StoreError};
pub use types::{
    Diagnostic, DiagnosticData, DocumentData, DocumentIdRangeId, Location, MetaData, MonikerData,
    PackageInformationData, Position, Range, RangeData, ResultChunkData,
};
pub use writer::{BundleWriter, WriterError};
