//! In-process reader

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{Pagination, Reader, ReaderError};
use crate::context::QueryContext;
use crate::store::StoreError;
use crate::types::{DocumentData, Location, MetaData, ResultChunkData};

type MonikerKey = (String, String);

/// Reader over data held in memory
///
/// Mirrors `SqliteReader` semantics: missing rows are `None` or empty pages,
/// a missing meta row is `NoMetadata`, and every call after `close` fails.
#[derive(Debug, Default)]
pub struct MemoryReader {
    meta: Option<MetaData>,
    documents: HashMap<String, DocumentData>,
    result_chunks: HashMap<u32, ResultChunkData>,
    definitions: BTreeMap<MonikerKey, Vec<Location>>,
    references: BTreeMap<MonikerKey, Vec<Location>>,
    closed: AtomicBool,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(mut self, meta: MetaData) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_document(mut self, path: impl Into<String>, document: DocumentData) -> Self {
        self.documents.insert(path.into(), document);
        self
    }

    pub fn with_result_chunk(mut self, id: u32, chunk: ResultChunkData) -> Self {
        self.result_chunks.insert(id, chunk);
        self
    }

    pub fn with_definitions(
        mut self,
        scheme: impl Into<String>,
        identifier: impl Into<String>,
        locations: Vec<Location>,
    ) -> Self {
        self.definitions.insert((scheme.into(), identifier.into()), locations);
        self
    }

    pub fn with_references(
        mut self,
        scheme: impl Into<String>,
        identifier: impl Into<String>,
        locations: Vec<Location>,
    ) -> Self {
        self.references.insert((scheme.into(), identifier.into()), locations);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, ctx: &QueryContext, op: &'static str) -> Result<(), ReaderError> {
        if self.is_closed() {
            return Err(ReaderError::Store {
                op,
                source: StoreError::Closed,
            });
        }
        ctx.check().map_err(ReaderError::store(op))
    }

    fn lookup(
        map: &BTreeMap<MonikerKey, Vec<Location>>,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> (Vec<Location>, usize) {
        match map.get(&(scheme.to_string(), identifier.to_string())) {
            Some(locations) => page.apply(locations.clone()),
            None => (Vec::new(), 0),
        }
    }
}

#[async_trait]
impl Reader for MemoryReader {
    async fn read_meta(&self, ctx: &QueryContext) -> Result<MetaData, ReaderError> {
        self.ensure_open(ctx, "read_meta")?;
        self.meta.ok_or(ReaderError::NoMetadata)
    }

    async fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>, ReaderError> {
        debug!(%path, "read_document: called");
        self.ensure_open(ctx, "read_document")?;
        Ok(self.documents.get(path).cloned())
    }

    async fn read_result_chunk(&self, ctx: &QueryContext, id: u32) -> Result<Option<ResultChunkData>, ReaderError> {
        self.ensure_open(ctx, "read_result_chunk")?;
        Ok(self.result_chunks.get(&id).cloned())
    }

    async fn read_definitions(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        self.ensure_open(ctx, "read_locations")?;
        Ok(Self::lookup(&self.definitions, scheme, identifier, page))
    }

    async fn read_references(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        self.ensure_open(ctx, "read_locations")?;
        Ok(Self::lookup(&self.references, scheme, identifier, page))
    }

    async fn close(&self) -> Result<(), ReaderError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::LocationTable;
    use crate::serialization::fixtures;

    fn reader() -> MemoryReader {
        MemoryReader::new()
            .with_meta(MetaData { num_result_chunks: 1 })
            .with_document("src/a.go", fixtures::document())
            .with_result_chunk(0, fixtures::result_chunk())
            .with_references("gomod", "pkg.Foo", fixtures::locations())
    }

    #[tokio::test]
    async fn test_lookups() {
        let reader = reader();
        let ctx = QueryContext::background();

        assert_eq!(reader.read_meta(&ctx).await.unwrap().num_result_chunks, 1);
        assert!(reader.read_document(&ctx, "src/a.go").await.unwrap().is_some());
        assert!(reader.read_document(&ctx, "src/z.go").await.unwrap().is_none());
        assert!(reader.read_result_chunk(&ctx, 0).await.unwrap().is_some());

        let (page, total) = reader
            .read_locations(&ctx, LocationTable::References, "gomod", "pkg.Foo", Pagination::Window { skip: 0, take: 1 })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(total, 2);

        let (page, total) = reader
            .read_locations(&ctx, LocationTable::Definitions, "gomod", "pkg.Foo", Pagination::Unpaginated)
            .await
            .unwrap();
        assert!(page.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_missing_meta() {
        let err = MemoryReader::new()
            .read_meta(&QueryContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, ReaderError::NoMetadata));
    }

    #[tokio::test]
    async fn test_closed_reader_fails() {
        let reader = reader();
        reader.close().await.unwrap();
        assert!(reader.is_closed());

        let err = reader
            .read_document(&QueryContext::background(), "src/a.go")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReaderError::Store {
                source: StoreError::Closed,
                ..
            }
        ));
    }
}
