//! codeintel - query API over precomputed code-intelligence bundles
//!
//! Resolves an upload id to its dump through a `DumpCatalog`, opens the
//! dump's bundle through a `BundleManagerClient`, and answers diagnostics,
//! definitions, references, hover and moniker queries for file paths
//! relative to the repository root.

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod logging;

pub use api::{ApiError, CodeIntelApi};
pub use catalog::{CatalogError, Dump, DumpCatalog, MemoryCatalog};
pub use client::{BundleManagerClient, LocalBundleManager};
pub use config::{Config, QueryConfig, StorageConfig};
pub use connection::{Connection, DiagnosticConnection, LocationConnection, PageInfo, PageRequest};
pub use logging::setup_logging;
