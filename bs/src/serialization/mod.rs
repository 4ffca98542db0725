//! Payload encoding for stored blobs
//!
//! Documents, result chunks and location lists are stored as opaque blobs.
//! `BinarySerializer` is the current encoding; `JsonSerializer` reads and
//! writes the encoding of schema-version-1 bundles and exists so the
//! migrator can rewrite them.

mod binary;
mod json;

use std::fmt;

use thiserror::Error;

use crate::types::{DocumentData, Location, ResultChunkData};

pub use binary::{BinarySerializer, FORMAT_MARKER, FORMAT_VERSION};
pub use json::JsonSerializer;

/// Which payload type an encode/decode was working on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    DocumentData,
    ResultChunkData,
    Locations,
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentData => write!(f, "document data"),
            Self::ResultChunkData => write!(f, "result chunk data"),
            Self::Locations => write!(f, "locations"),
        }
    }
}

/// Errors from encoding or decoding a payload
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode {payload}: {message}")]
    Encode { payload: Payload, message: String },

    #[error("failed to decode {payload}: {message}")]
    Decode { payload: Payload, message: String },

    #[error("failed to decode {payload}: unsupported encoding version {found} (supported: {supported})")]
    UnsupportedVersion { payload: Payload, found: u8, supported: u8 },
}

impl SerializationError {
    pub fn payload(&self) -> Payload {
        match self {
            Self::Encode { payload, .. } | Self::Decode { payload, .. } | Self::UnsupportedVersion { payload, .. } => {
                *payload
            }
        }
    }
}

/// Stateless codec for the three stored payload types
pub trait Serializer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether `data` carries this serializer's encoding
    fn recognizes(&self, data: &[u8]) -> bool;

    fn marshal_document_data(&self, document: &DocumentData) -> Result<Vec<u8>, SerializationError>;

    fn marshal_result_chunk_data(&self, result_chunk: &ResultChunkData) -> Result<Vec<u8>, SerializationError>;

    fn marshal_locations(&self, locations: &[Location]) -> Result<Vec<u8>, SerializationError>;

    fn unmarshal_document_data(&self, data: &[u8]) -> Result<DocumentData, SerializationError>;

    fn unmarshal_result_chunk_data(&self, data: &[u8]) -> Result<ResultChunkData, SerializationError>;

    fn unmarshal_locations(&self, data: &[u8]) -> Result<Vec<Location>, SerializationError>;
}


#[cfg(test)]
pub(crate) mod strategies {
    use proptest::collection::{btree_map, vec};
    use proptest::option;
    use proptest::prelude::*;

    use crate::types::{
        DiagnosticData, DocumentData, DocumentIdRangeId, Location, MonikerData, PackageInformationData, Range,
        RangeData, ResultChunkData,
    };

    fn arb_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,6}"
    }

    pub fn arb_range() -> impl Strategy<Value = Range> {
        (0u32..5000, 0u32..200, 0u32..5000, 0u32..200).prop_map(|(sl, sc, el, ec)| Range::new(sl, sc, el, ec))
    }

    pub fn arb_location() -> impl Strategy<Value = Location> {
        ("[a-z/]{1,12}\\.go", arb_range()).prop_map(|(path, range)| Location::new(path, range))
    }

    fn arb_range_data() -> impl Strategy<Value = RangeData> {
        (
            arb_range(),
            option::of(arb_id()),
            option::of(arb_id()),
            option::of(arb_id()),
            vec(arb_id(), 0..3),
        )
            .prop_map(
                |(range, definition_result_id, reference_result_id, hover_result_id, moniker_ids)| RangeData {
                    range,
                    definition_result_id,
                    reference_result_id,
                    hover_result_id,
                    moniker_ids,
                },
            )
    }

    fn arb_moniker() -> impl Strategy<Value = MonikerData> {
        ("import|export|local", "[a-z]{2,6}", "\\PC{1,20}", option::of(arb_id())).prop_map(
            |(kind, scheme, identifier, package_information_id)| MonikerData {
                kind,
                scheme,
                identifier,
                package_information_id,
            },
        )
    }

    fn arb_diagnostic() -> impl Strategy<Value = DiagnosticData> {
        (any::<i32>(), "[A-Z0-9]{0,5}", "\\PC{0,40}", "[a-z]{0,6}", arb_range()).prop_map(
            |(severity, code, message, source, range)| DiagnosticData {
                severity,
                code,
                message,
                source,
                range,
            },
        )
    }

    pub fn arb_document() -> impl Strategy<Value = DocumentData> {
        (
            btree_map(arb_id(), arb_range_data(), 0..6),
            btree_map(arb_id(), "\\PC{0,60}", 0..4),
            btree_map(arb_id(), arb_moniker(), 0..4),
            btree_map(
                arb_id(),
                ("[a-z./]{1,20}", "v[0-9]\\.[0-9]\\.[0-9]")
                    .prop_map(|(name, version)| PackageInformationData { name, version }),
                0..3,
            ),
            vec(arb_diagnostic(), 0..4),
        )
            .prop_map(
                |(ranges, hover_results, monikers, package_information, diagnostics)| DocumentData {
                    ranges,
                    hover_results,
                    monikers,
                    package_information,
                    diagnostics,
                },
            )
    }

    pub fn arb_result_chunk() -> impl Strategy<Value = ResultChunkData> {
        let pair = (arb_id(), arb_id()).prop_map(|(document_id, range_id)| DocumentIdRangeId { document_id, range_id });
        (
            btree_map(arb_id(), "[a-z/]{1,12}\\.go", 0..6),
            btree_map(arb_id(), vec(pair, 0..5), 0..6),
        )
            .prop_map(|(document_paths, document_id_range_ids)| ResultChunkData {
                document_paths,
                document_id_range_ids,
            })
    }
}
