//! Position queries over one bundle
//!
//! `Database` answers "what is at line L, character C of file F" by
//! combining document lookups with the result-chunk indirection. It holds
//! no storage of its own and works with any `Reader`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::context::QueryContext;
use crate::reader::{LocationTable, Pagination, Reader, ReaderError};
use crate::types::{Diagnostic, DocumentData, Location, MetaData, MonikerData, Position, Range, RangeData, hash_key};

/// Query surface over one opened bundle
pub struct Database {
    reader: Arc<dyn Reader>,
    meta: OnceCell<MetaData>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("meta", &self.meta.get()).finish()
    }
}

impl Database {
    pub fn new(reader: Arc<dyn Reader>) -> Self {
        Self {
            reader,
            meta: OnceCell::new(),
        }
    }

    pub fn reader(&self) -> &Arc<dyn Reader> {
        &self.reader
    }

    /// Whether the bundle has a document at `path`
    pub async fn exists(&self, ctx: &QueryContext, path: &str) -> Result<bool, ReaderError> {
        debug!(%path, "exists: called");
        Ok(self.reader.read_document(ctx, path).await?.is_some())
    }

    /// Ranges containing the position, innermost first
    pub async fn ranges_at(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<RangeData>, ReaderError> {
        debug!(%path, line, character, "ranges_at: called");
        let Some(document) = self.reader.read_document(ctx, path).await? else {
            return Ok(Vec::new());
        };
        Ok(enclosing_ranges(&document, Position::new(line, character)))
    }

    /// Definition locations of the innermost range that has any
    pub async fn definitions(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ReaderError> {
        debug!(%path, line, character, "definitions: called");
        for range in self.ranges_at(ctx, path, line, character).await? {
            let Some(id) = range.definition_result_id else {
                continue;
            };
            let locations = self.resolve_result(ctx, &id).await?;
            if !locations.is_empty() {
                return Ok(locations);
            }
        }
        Ok(Vec::new())
    }

    /// Reference locations of every range at the position, deduplicated in first-seen order
    pub async fn references(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ReaderError> {
        debug!(%path, line, character, "references: called");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for range in self.ranges_at(ctx, path, line, character).await? {
            let Some(id) = range.reference_result_id else {
                continue;
            };
            for location in self.resolve_result(ctx, &id).await? {
                if seen.insert(location.clone()) {
                    out.push(location);
                }
            }
        }
        Ok(out)
    }

    /// Hover text of the innermost range that has any, with that range
    pub async fn hover(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>, ReaderError> {
        debug!(%path, line, character, "hover: called");
        let Some(document) = self.reader.read_document(ctx, path).await? else {
            return Ok(None);
        };

        let hover = enclosing_ranges(&document, Position::new(line, character))
            .into_iter()
            .find_map(|range| {
                let text = document.hover_results.get(range.hover_result_id.as_ref()?)?;
                Some((text.clone(), range.range))
            });
        Ok(hover)
    }

    /// Diagnostics attached to the document at `path`
    pub async fn diagnostics(&self, ctx: &QueryContext, path: &str) -> Result<Vec<Diagnostic>, ReaderError> {
        debug!(%path, "diagnostics: called");
        let Some(document) = self.reader.read_document(ctx, path).await? else {
            return Ok(Vec::new());
        };
        Ok(document
            .diagnostics
            .iter()
            .map(|data| Diagnostic::from_data(path, data))
            .collect())
    }

    /// Monikers of every range at the position, innermost range first
    pub async fn monikers_at(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<MonikerData>, ReaderError> {
        debug!(%path, line, character, "monikers_at: called");
        let Some(document) = self.reader.read_document(ctx, path).await? else {
            return Ok(Vec::new());
        };

        let monikers = enclosing_ranges(&document, Position::new(line, character))
            .iter()
            .flat_map(|range| range.moniker_ids.iter())
            .filter_map(|id| document.monikers.get(id).cloned())
            .collect();
        Ok(monikers)
    }

    /// Page of locations for a moniker, plus the full set size
    pub async fn moniker_locations(
        &self,
        ctx: &QueryContext,
        table: LocationTable,
        scheme: &str,
        identifier: &str,
        page: Pagination,
    ) -> Result<(Vec<Location>, usize), ReaderError> {
        debug!(table = table.name(), %scheme, %identifier, ?page, "moniker_locations: called");
        self.reader.read_locations(ctx, table, scheme, identifier, page).await
    }

    pub async fn close(&self) -> Result<(), ReaderError> {
        self.reader.close().await
    }

    async fn meta(&self, ctx: &QueryContext) -> Result<MetaData, ReaderError> {
        self.meta
            .get_or_try_init(|| self.reader.read_meta(ctx))
            .await
            .copied()
    }

    /// Follow a result id through its result chunk to concrete locations
    async fn resolve_result(&self, ctx: &QueryContext, result_id: &str) -> Result<Vec<Location>, ReaderError> {
        let meta = self.meta(ctx).await?;
        let chunk_id = hash_key(result_id, meta.num_result_chunks);
        debug!(%result_id, chunk_id, "resolve_result: called");

        let Some(chunk) = self.reader.read_result_chunk(ctx, chunk_id).await? else {
            return Ok(Vec::new());
        };
        let Some(pairs) = chunk.document_id_range_ids.get(result_id) else {
            return Ok(Vec::new());
        };

        let mut documents: HashMap<&str, Option<DocumentData>> = HashMap::new();
        let mut locations = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let Some(path) = chunk.document_paths.get(&pair.document_id) else {
                continue;
            };
            if !documents.contains_key(path.as_str()) {
                let document = self.reader.read_document(ctx, path).await?;
                documents.insert(path.as_str(), document);
            }
            let range = documents
                .get(path.as_str())
                .and_then(Option::as_ref)
                .and_then(|document| document.ranges.get(&pair.range_id));
            if let Some(range) = range {
                locations.push(Location::new(path.clone(), range.range));
            }
        }
        Ok(locations)
    }
}

/// Ranges of `document` containing `position`, innermost first
fn enclosing_ranges(document: &DocumentData, position: Position) -> Vec<RangeData> {
    let mut ranges: Vec<RangeData> = document
        .ranges
        .values()
        .filter(|range| range.range.contains(position))
        .cloned()
        .collect();
    ranges.sort_by(|a, b| {
        b.range
            .start
            .cmp(&a.range.start)
            .then_with(|| a.range.end.cmp(&b.range.end))
    });
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;
    use crate::serialization::fixtures;
    use crate::types::{DocumentIdRangeId, ResultChunkData};

    /// Two documents; `Foo` is defined in a.go and referenced from b.go
    fn database() -> Database {
        let mut a = fixtures::document();
        a.ranges.insert(
            "r0".to_string(),
            RangeData {
                range: Range::new(2, 0, 5, 1),
                hover_result_id: Some("h0".to_string()),
                ..Default::default()
            },
        );
        a.hover_results.insert("h0".to_string(), "outer".to_string());

        let mut b = DocumentData::default();
        b.ranges.insert(
            "r9".to_string(),
            RangeData {
                range: Range::new(10, 0, 10, 3),
                definition_result_id: Some("d1".to_string()),
                reference_result_id: Some("x1".to_string()),
                ..Default::default()
            },
        );

        let num_result_chunks = 4;
        let mut chunks: HashMap<u32, ResultChunkData> = HashMap::new();
        let pair = |document_id: &str, range_id: &str| DocumentIdRangeId {
            document_id: document_id.to_string(),
            range_id: range_id.to_string(),
        };
        for (result_id, pairs) in [
            ("d1", vec![pair("doc1", "r1")]),
            ("x1", vec![pair("doc1", "r1"), pair("doc2", "r9"), pair("doc1", "r1")]),
        ] {
            let chunk = chunks.entry(hash_key(result_id, num_result_chunks)).or_default();
            chunk.document_paths.insert("doc1".to_string(), "src/a.go".to_string());
            chunk.document_paths.insert("doc2".to_string(), "src/b.go".to_string());
            chunk.document_id_range_ids.insert(result_id.to_string(), pairs);
        }

        let mut reader = MemoryReader::new()
            .with_meta(MetaData { num_result_chunks })
            .with_document("src/a.go", a)
            .with_document("src/b.go", b)
            .with_references("gomod", "pkg.Foo", fixtures::locations());
        for (id, chunk) in chunks {
            reader = reader.with_result_chunk(id, chunk);
        }
        Database::new(Arc::new(reader))
    }

    #[tokio::test]
    async fn test_ranges_at_innermost_first() {
        let db = database();
        let ranges = db
            .ranges_at(&QueryContext::background(), "src/a.go", 3, 6)
            .await
            .unwrap();
        let spans: Vec<Range> = ranges.iter().map(|r| r.range).collect();
        assert_eq!(spans, vec![Range::new(3, 5, 3, 8), Range::new(2, 0, 5, 1)]);
    }

    #[tokio::test]
    async fn test_definitions_resolve_through_result_chunk() {
        let db = database();
        let locations = db
            .definitions(&QueryContext::background(), "src/b.go", 10, 1)
            .await
            .unwrap();
        assert_eq!(locations, vec![Location::new("src/a.go", Range::new(3, 5, 3, 8))]);
    }

    #[tokio::test]
    async fn test_references_are_deduplicated() {
        let db = database();
        let locations = db
            .references(&QueryContext::background(), "src/a.go", 3, 5)
            .await
            .unwrap();
        assert_eq!(
            locations,
            vec![
                Location::new("src/a.go", Range::new(3, 5, 3, 8)),
                Location::new("src/b.go", Range::new(10, 0, 10, 3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_hover_prefers_innermost() {
        let db = database();
        let ctx = QueryContext::background();

        let (text, range) = db.hover(&ctx, "src/a.go", 3, 7).await.unwrap().unwrap();
        assert!(text.contains("func Foo()"));
        assert_eq!(range, Range::new(3, 5, 3, 8));

        let (text, _) = db.hover(&ctx, "src/a.go", 4, 0).await.unwrap().unwrap();
        assert_eq!(text, "outer");

        assert!(db.hover(&ctx, "src/a.go", 40, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_diagnostics_and_monikers() {
        let db = database();
        let ctx = QueryContext::background();

        let diagnostics = db.diagnostics(&ctx, "src/a.go").await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.path, "src/a.go");
        assert_eq!(diagnostics[0].message, "undefined: bar");

        let monikers = db.monikers_at(&ctx, "src/a.go", 3, 5).await.unwrap();
        assert_eq!(monikers.len(), 1);
        assert_eq!(monikers[0].identifier, "pkg.Foo");
    }

    #[tokio::test]
    async fn test_missing_document_is_empty() {
        let db = database();
        let ctx = QueryContext::background();

        assert!(!db.exists(&ctx, "src/nope.go").await.unwrap());
        assert!(db.diagnostics(&ctx, "src/nope.go").await.unwrap().is_empty());
        assert!(db.definitions(&ctx, "src/nope.go", 0, 0).await.unwrap().is_empty());
        assert!(db.references(&ctx, "src/nope.go", 0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moniker_locations_paginate() {
        let db = database();
        let (locations, total) = db
            .moniker_locations(
                &QueryContext::background(),
                LocationTable::References,
                "gomod",
                "pkg.Foo",
                Pagination::Window { skip: 1, take: 1 },
            )
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(locations, vec![Location::new("src/b.go", Range::new(10, 0, 10, 3))]);
    }

    #[tokio::test]
    async fn test_missing_meta_fails_result_resolution() {
        let reader = MemoryReader::new().with_document("src/a.go", fixtures::document());
        let db = Database::new(Arc::new(reader));
        let err = db
            .definitions(&QueryContext::background(), "src/a.go", 3, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ReaderError::NoMetadata));
    }
}
