//! Reader over a bundle file

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{LocationTable, Pagination, Reader, ReaderError};
use crate::context::QueryContext;
use crate::migrate::migrate;
use crate::serialization::{BinarySerializer, Serializer};
use crate::store::{Query, Store, StoreError, scan_first_bytes, scan_first_int};
use crate::types::{DocumentData, Location, MetaData, ResultChunkData};

/// Reader backed by one SQLite bundle file
pub struct SqliteReader {
    store: Store,
    serializer: Arc<dyn Serializer>,
}

impl std::fmt::Debug for SqliteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReader")
            .field("path", &self.store.path())
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

impl SqliteReader {
    /// Open a bundle file with the current serializer, migrating it if needed
    pub async fn open(ctx: &QueryContext, path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        Self::open_with(ctx, path, Arc::new(BinarySerializer::new())).await
    }

    /// Open a bundle file with an explicit serializer
    ///
    /// If migration fails the store is closed before returning; a close
    /// failure is reported alongside the original error.
    pub async fn open_with(
        ctx: &QueryContext,
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        debug!(path = %path.display(), serializer = serializer.name(), "SqliteReader::open_with: called");

        let store = Store::open(path).map_err(ReaderError::store("store.open"))?;

        if let Err(err) = migrate(ctx, &store, Arc::clone(&serializer)).await {
            let err = ReaderError::from(err);
            warn!(path = %path.display(), error = %err, "Bundle migration failed, closing store");
            return match store.close() {
                Ok(()) => Err(err),
                Err(close) => Err(ReaderError::OpenAborted {
                    cause: Box::new(err),
                    close,
                }),
            };
        }

        info!(path = %path.display(), "Opened bundle reader");
        Ok(Self { store, serializer })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Shared lookup-and-paginate routine for the moniker tables
    async fn read_locations_from(
        &self,
        ctx: &QueryContext,
        table: LocationTable,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        debug!(table = table.name(), %scheme, %identifier, ?page, "read_locations_from: called");

        let sql = format!(
            r#"SELECT data FROM "{}" WHERE scheme = ? AND identifier = ? LIMIT 1"#,
            table.name()
        );
        let query = Query::new(sql)
            .bind(scheme.to_string())
            .bind(identifier.to_string());

        let Some(data) =
            scan_first_bytes(self.store.query(ctx, query).await).map_err(ReaderError::store("read_locations"))?
        else {
            debug!(table = table.name(), "read_locations_from: no row for moniker");
            return Ok((Vec::new(), 0));
        };

        let locations = self
            .serializer
            .unmarshal_locations(&data)
            .map_err(ReaderError::decode("serializer.unmarshal_locations"))?;

        Ok(page.apply(locations))
    }
}

#[async_trait]
impl Reader for SqliteReader {
    async fn read_meta(&self, ctx: &QueryContext) -> Result<MetaData, ReaderError> {
        debug!("read_meta: called");
        let num_result_chunks = scan_first_int(
            self.store
                .query(ctx, Query::new("SELECT num_result_chunks FROM meta LIMIT 1"))
                .await,
        )
        .map_err(ReaderError::store("read_meta"))?
        .ok_or(ReaderError::NoMetadata)?;

        let num_result_chunks = u32::try_from(num_result_chunks).map_err(|_| ReaderError::Store {
            op: "read_meta",
            source: StoreError::Scan(format!("num_result_chunks out of range: {num_result_chunks}")),
        })?;

        Ok(MetaData { num_result_chunks })
    }

    async fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>, ReaderError> {
        debug!(%path, "read_document: called");
        let data = scan_first_bytes(
            self.store
                .query(
                    ctx,
                    Query::new("SELECT data FROM documents WHERE path = ? LIMIT 1").bind(path.to_string()),
                )
                .await,
        )
        .map_err(ReaderError::store("read_document"))?;

        let Some(data) = data else {
            return Ok(None);
        };

        let document = self
            .serializer
            .unmarshal_document_data(&data)
            .map_err(ReaderError::decode("serializer.unmarshal_document_data"))?;
        Ok(Some(document))
    }

    async fn read_result_chunk(&self, ctx: &QueryContext, id: u32) -> Result<Option<ResultChunkData>, ReaderError> {
        debug!(%id, "read_result_chunk: called");
        let data = scan_first_bytes(
            self.store
                .query(
                    ctx,
                    Query::new("SELECT data FROM result_chunks WHERE id = ? LIMIT 1").bind(id),
                )
                .await,
        )
        .map_err(ReaderError::store("read_result_chunk"))?;

        let Some(data) = data else {
            return Ok(None);
        };

        let chunk = self
            .serializer
            .unmarshal_result_chunk_data(&data)
            .map_err(ReaderError::decode("serializer.unmarshal_result_chunk_data"))?;
        Ok(Some(chunk))
    }

    async fn read_definitions(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        self.read_locations_from(ctx, LocationTable::Definitions, scheme, identifier, page)
            .await
    }

    async fn read_references(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        self.read_locations_from(ctx, LocationTable::References, scheme, identifier, page)
            .await
    }

    async fn close(&self) -> Result<(), ReaderError> {
        debug!(path = %self.store.path().display(), "close: called");
        self.store.close().map_err(ReaderError::store("close"))
    }
}
