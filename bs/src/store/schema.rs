//! Bundle table layout
//!
//! Table and column names are shared with bundle producers and must not
//! change. Later schema versions only add to `BASE_TABLES`.

/// Tables present in every bundle since schema version 1
pub const BASE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        num_result_chunks INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY,
        data BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS result_chunks (
        id   INTEGER PRIMARY KEY,
        data BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS definitions (
        scheme     TEXT NOT NULL,
        identifier TEXT NOT NULL,
        data       BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS "references" (
        scheme     TEXT NOT NULL,
        identifier TEXT NOT NULL,
        data       BLOB NOT NULL
    );
"#;

/// Version marker table, added in schema version 2
pub const SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );
"#;

/// Moniker lookup indexes, added in schema version 2
pub const MONIKER_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_definitions_moniker ON definitions(scheme, identifier);
    CREATE INDEX IF NOT EXISTS idx_references_moniker ON "references"(scheme, identifier);
"#;

/// Tables whose `data` column holds an encoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobTable {
    Documents,
    ResultChunks,
    Definitions,
    References,
}

impl BlobTable {
    pub const ALL: [BlobTable; 4] = [
        BlobTable::Documents,
        BlobTable::ResultChunks,
        BlobTable::Definitions,
        BlobTable::References,
    ];

    /// Quoted table name, safe to splice into SQL
    pub fn quoted(&self) -> &'static str {
        match self {
            Self::Documents => "\"documents\"",
            Self::ResultChunks => "\"result_chunks\"",
            Self::Definitions => "\"definitions\"",
            Self::References => "\"references\"",
        }
    }
}
