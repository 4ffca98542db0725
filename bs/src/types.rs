//! Bundle data model
//!
//! Every keyed collection is a `BTreeMap` so that encoding and iteration
//! order never depend on hashing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a range, result set, moniker, hover text or document within a bundle
pub type Id = String;

/// Per-bundle metadata (the single row of the `meta` table)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    /// Number of result-chunk shards the result-set table is split into
    pub num_result_chunks: u32,
}

/// Zero-based line/character position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open source range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(start_line, start_character),
            end: Position::new(end_line, end_character),
        }
    }

    /// Whether the position falls inside this range (start and end inclusive)
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Whether this range lies entirely within `other`
    pub fn is_within(&self, other: &Range) -> bool {
        other.start <= self.start && self.end <= other.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.character, self.end.line, self.end.character
        )
    }
}

/// A single symbol occurrence inside a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeData {
    pub range: Range,
    pub definition_result_id: Option<Id>,
    pub reference_result_id: Option<Id>,
    pub hover_result_id: Option<Id>,
    pub moniker_ids: Vec<Id>,
}

/// Moniker attached to a range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerData {
    /// "import", "export" or "local"
    pub kind: String,
    pub scheme: String,
    pub identifier: String,
    pub package_information_id: Option<Id>,
}

/// Package that provides a moniker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInformationData {
    pub name: String,
    pub version: String,
}

/// Diagnostic as stored inside a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticData {
    /// LSP severity: 1 error, 2 warning, 3 information, 4 hint
    pub severity: i32,
    pub code: String,
    pub message: String,
    pub source: String,
    pub range: Range,
}

/// Everything the bundle knows about one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentData {
    pub ranges: BTreeMap<Id, RangeData>,
    pub hover_results: BTreeMap<Id, String>,
    pub monikers: BTreeMap<Id, MonikerData>,
    pub package_information: BTreeMap<Id, PackageInformationData>,
    pub diagnostics: Vec<DiagnosticData>,
}

/// Pointer to a range inside a document, as stored in result chunks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdRangeId {
    pub document_id: Id,
    pub range_id: Id,
}

/// One shard of the result-set indirection table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChunkData {
    /// Document id -> document path
    pub document_paths: BTreeMap<Id, String>,
    /// Result-set id -> ordered (document, range) pairs realizing the result
    pub document_id_range_ids: BTreeMap<Id, Vec<DocumentIdRangeId>>,
}

/// A resolved (document path, range) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub range: Range,
}

impl Location {
    pub fn new(path: impl Into<String>, range: Range) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.range)
    }
}

/// Diagnostic resolved against its document path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: i32,
    pub code: String,
    pub source: String,
    pub message: String,
    pub location: Location,
}

impl Diagnostic {
    pub fn from_data(path: &str, data: &DiagnosticData) -> Self {
        Self {
            severity: data.severity,
            code: data.code.clone(),
            source: data.source.clone(),
            message: data.message.clone(),
            location: Location::new(path, data.range),
        }
    }
}

/// Shard index of the result chunk holding `id`
///
/// Java-style string hash over the id's characters, truncated to 32 bits.
pub fn hash_key(id: &str, num_result_chunks: u32) -> u32 {
    if num_result_chunks == 0 {
        return 0;
    }

    let mut hash: i32 = 0;
    for c in id.chars() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(c as i32);
    }

    hash.unsigned_abs() % num_result_chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains_is_inclusive() {
        let range = Range::new(3, 4, 3, 10);
        assert!(range.contains(Position::new(3, 4)));
        assert!(range.contains(Position::new(3, 10)));
        assert!(!range.contains(Position::new(3, 11)));
        assert!(!range.contains(Position::new(2, 5)));
    }

    #[test]
    fn test_multiline_range_contains() {
        let range = Range::new(1, 8, 4, 2);
        assert!(range.contains(Position::new(2, 0)));
        assert!(range.contains(Position::new(1, 100)));
        assert!(!range.contains(Position::new(4, 3)));
    }

    #[test]
    fn test_is_within() {
        let outer = Range::new(1, 0, 10, 0);
        let inner = Range::new(2, 4, 2, 9);
        assert!(inner.is_within(&outer));
        assert!(!outer.is_within(&inner));
    }

    #[test]
    fn test_hash_key_is_stable_and_bounded() {
        for id in ["1", "42", "result:1234", "ünïcödé"] {
            let key = hash_key(id, 4);
            assert!(key < 4);
            assert_eq!(key, hash_key(id, 4));
        }
    }

    #[test]
    fn test_hash_key_known_values() {
        // "a" = 97, "ab" = 97 * 31 + 98 = 3105
        assert_eq!(hash_key("a", 1000), 97);
        assert_eq!(hash_key("ab", 1000), 105);
    }

    #[test]
    fn test_hash_key_zero_chunks() {
        assert_eq!(hash_key("anything", 0), 0);
    }

    #[test]
    fn test_location_display() {
        let location = Location::new("src/a.go", Range::new(1, 2, 3, 4));
        assert_eq!(location.to_string(), "src/a.go:1:2-3:4");
    }
}
