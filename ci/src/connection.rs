//! Paged result connections
//!
//! A connection is one page of nodes plus the total count and a cursor for
//! the next page. Cursors are opaque base64 tokens wrapping the offset of
//! the next node.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bundlestore::{Diagnostic, Location, Pagination};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding,

    #[error("cursor does not hold an offset")]
    Offset,
}

/// Pagination state of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// One page of nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection<T> {
    pub nodes: Vec<T>,
    pub total_count: usize,
    pub page_info: PageInfo,
}

pub type LocationConnection = Connection<Location>;
pub type DiagnosticConnection = Connection<Diagnostic>;

impl<T> Connection<T> {
    /// Connection for `nodes` starting at `offset` within `total_count` items
    pub fn from_page(nodes: Vec<T>, total_count: usize, offset: usize) -> Self {
        let next = offset.saturating_add(nodes.len());
        let has_next_page = !nodes.is_empty() && next < total_count;
        Self {
            nodes,
            total_count,
            page_info: PageInfo {
                has_next_page,
                end_cursor: has_next_page.then(|| encode_cursor(next)),
            },
        }
    }

    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            total_count: 0,
            page_info: PageInfo::default(),
        }
    }

    /// Replace every node, keeping counts and cursors
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            nodes: self.nodes.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_info: self.page_info,
        }
    }
}

/// Page request in connection terms: at most `first` nodes after `after`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub first: Option<usize>,
    pub after: Option<String>,
}

impl PageRequest {
    pub fn first(first: usize) -> Self {
        Self {
            first: Some(first),
            after: None,
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Offset and window for this request, falling back to `default_page_size`
    pub fn resolve(&self, default_page_size: usize) -> Result<(usize, Pagination), CursorError> {
        let offset = match &self.after {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        let take = self.first.unwrap_or(default_page_size);
        Ok((offset, Pagination::Window { skip: offset, take }))
    }
}

pub fn encode_cursor(offset: usize) -> String {
    STANDARD.encode(offset.to_string())
}

pub fn decode_cursor(cursor: &str) -> Result<usize, CursorError> {
    let bytes = STANDARD.decode(cursor).map_err(|_| CursorError::Encoding)?;
    let text = String::from_utf8(bytes).map_err(|_| CursorError::Offset)?;
    text.parse().map_err(|_| CursorError::Offset)
}
