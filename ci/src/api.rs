//! Code-intelligence query API
//!
//! Every operation takes a repository-relative file path and an upload id.
//! The upload's dump supplies the bundle root, which is stripped from the
//! path before the bundle is queried and put back on every returned path.

use std::sync::Arc;

use bundlestore::{Database, Diagnostic, Location, LocationTable, QueryContext, Range, ReaderError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{CatalogError, Dump, DumpCatalog};
use crate::client::BundleManagerClient;
use crate::config::QueryConfig;
use crate::connection::{Connection, CursorError, DiagnosticConnection, LocationConnection, PageRequest};

/// Errors from API operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// No dump exists for the upload id
    #[error("missing dump for upload {0}")]
    MissingDump(i64),

    #[error("catalog.get_dump_by_id: {0}")]
    Catalog(#[from] CatalogError),

    #[error("bundle.{op}: {source}")]
    Bundle {
        op: &'static str,
        #[source]
        source: ReaderError,
    },

    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),
}

impl ApiError {
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Bundle { source, .. } => source.is_canceled(),
            Self::Catalog(CatalogError::Canceled) => true,
            _ => false,
        }
    }
}

/// Query API over the catalog and the bundle manager
pub struct CodeIntelApi {
    catalog: Arc<dyn DumpCatalog>,
    bundles: Arc<dyn BundleManagerClient>,
    query: QueryConfig,
}

impl CodeIntelApi {
    pub fn new(catalog: Arc<dyn DumpCatalog>, bundles: Arc<dyn BundleManagerClient>, query: QueryConfig) -> Self {
        debug!(timeout_ms = query.timeout_ms, "CodeIntelApi::new: called");
        Self {
            catalog,
            bundles,
            query,
        }
    }

    /// Diagnostics for a file; empty if the upload's bundle file is gone
    pub async fn diagnostics(&self, ctx: &QueryContext, file: &str, upload_id: i64) -> Result<Vec<Diagnostic>, ApiError> {
        debug!(%file, upload_id, "diagnostics: called");
        let ctx = self.request_context(ctx);
        let dump = self.dump(&ctx, upload_id).await?;
        let Some(db) = self.database(&ctx, &dump).await? else {
            return Ok(Vec::new());
        };

        let path = path_in_bundle(&dump, file);
        let diagnostics = downgrade("diagnostics", &dump, db.diagnostics(&ctx, path).await, Vec::new)?;
        Ok(diagnostics
            .into_iter()
            .map(|diagnostic| with_root_diagnostic(&dump, diagnostic))
            .collect())
    }

    /// One page of diagnostics for a file
    pub async fn diagnostics_connection(
        &self,
        ctx: &QueryContext,
        file: &str,
        upload_id: i64,
        page: &PageRequest,
    ) -> Result<DiagnosticConnection, ApiError> {
        debug!(%file, upload_id, ?page, "diagnostics_connection: called");
        let (offset, window) = page.resolve(self.query.default_page_size)?;
        let diagnostics = self.diagnostics(ctx, file, upload_id).await?;
        let (nodes, total) = window.apply(diagnostics);
        Ok(Connection::from_page(nodes, total, offset))
    }

    /// Definition locations for the symbol at a position
    pub async fn definitions(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        upload_id: i64,
    ) -> Result<Vec<Location>, ApiError> {
        debug!(%file, line, character, upload_id, "definitions: called");
        let ctx = self.request_context(ctx);
        let dump = self.dump(&ctx, upload_id).await?;
        let Some(db) = self.database(&ctx, &dump).await? else {
            return Ok(Vec::new());
        };

        let path = path_in_bundle(&dump, file);
        let locations = downgrade(
            "definitions",
            &dump,
            db.definitions(&ctx, path, line, character).await,
            Vec::new,
        )?;
        Ok(locations.into_iter().map(|l| with_root(&dump, l)).collect())
    }

    /// One page of reference locations for the symbol at a position
    pub async fn references(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        upload_id: i64,
        page: &PageRequest,
    ) -> Result<LocationConnection, ApiError> {
        debug!(%file, line, character, upload_id, ?page, "references: called");
        let (offset, window) = page.resolve(self.query.default_page_size)?;
        let ctx = self.request_context(ctx);
        let dump = self.dump(&ctx, upload_id).await?;
        let Some(db) = self.database(&ctx, &dump).await? else {
            return Ok(Connection::empty());
        };

        let path = path_in_bundle(&dump, file);
        let locations = downgrade(
            "references",
            &dump,
            db.references(&ctx, path, line, character).await,
            Vec::new,
        )?;
        let (nodes, total) = window.apply(locations);
        Ok(Connection::from_page(nodes, total, offset).map(|l| with_root(&dump, l)))
    }

    /// Hover text and its range for the symbol at a position
    pub async fn hover(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        upload_id: i64,
    ) -> Result<Option<(String, Range)>, ApiError> {
        debug!(%file, line, character, upload_id, "hover: called");
        let ctx = self.request_context(ctx);
        let dump = self.dump(&ctx, upload_id).await?;
        let Some(db) = self.database(&ctx, &dump).await? else {
            return Ok(None);
        };

        let path = path_in_bundle(&dump, file);
        downgrade("hover", &dump, db.hover(&ctx, path, line, character).await, || None)
    }

    /// One page of the locations stored for a moniker in an upload's bundle
    pub async fn moniker_locations(
        &self,
        ctx: &QueryContext,
        table: LocationTable,
        scheme: &str,
        identifier: &str,
        upload_id: i64,
        page: &PageRequest,
    ) -> Result<LocationConnection, ApiError> {
        debug!(table = table.name(), %scheme, %identifier, upload_id, ?page, "moniker_locations: called");
        let (offset, window) = page.resolve(self.query.default_page_size)?;
        let ctx = self.request_context(ctx);
        let dump = self.dump(&ctx, upload_id).await?;
        let Some(db) = self.database(&ctx, &dump).await? else {
            return Ok(Connection::empty());
        };

        let (nodes, total) = downgrade(
            "moniker_locations",
            &dump,
            db.moniker_locations(&ctx, table, scheme, identifier, window).await,
            || (Vec::new(), 0),
        )?;
        Ok(Connection::from_page(nodes, total, offset).map(|l| with_root(&dump, l)))
    }

    fn request_context(&self, ctx: &QueryContext) -> QueryContext {
        ctx.clone().with_timeout(self.query.timeout())
    }

    async fn dump(&self, ctx: &QueryContext, upload_id: i64) -> Result<Dump, ApiError> {
        self.catalog
            .get_dump_by_id(ctx, upload_id)
            .await?
            .ok_or(ApiError::MissingDump(upload_id))
    }

    /// The dump's bundle database, or `None` if its file does not exist
    async fn database(&self, ctx: &QueryContext, dump: &Dump) -> Result<Option<Arc<Database>>, ApiError> {
        let opened = self.bundles.database(ctx, dump.id).await.map(Some);
        downgrade("open", dump, opened, || None)
    }
}

/// Map a missing bundle to `empty`; every other error is wrapped with `op`
fn downgrade<T>(
    op: &'static str,
    dump: &Dump,
    result: Result<T, ReaderError>,
    empty: impl FnOnce() -> T,
) -> Result<T, ApiError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_bundle_not_found() => {
            warn!(upload_id = dump.id, op, error = %e, "Bundle does not exist");
            Ok(empty())
        }
        Err(source) => Err(ApiError::Bundle { op, source }),
    }
}

fn path_in_bundle<'a>(dump: &Dump, file: &'a str) -> &'a str {
    file.strip_prefix(dump.root.as_str()).unwrap_or(file)
}

fn with_root(dump: &Dump, mut location: Location) -> Location {
    location.path = format!("{}{}", dump.root, location.path);
    location
}

fn with_root_diagnostic(dump: &Dump, mut diagnostic: Diagnostic) -> Diagnostic {
    diagnostic.location = with_root(dump, diagnostic.location);
    diagnostic
}
