//! Current blob encoding: version header + bincode body
//!
//! Layout: `[FORMAT_MARKER, FORMAT_VERSION, bincode...]`. The leading zero
//! byte can never start a JSON text, so legacy blobs are told apart by
//! their first byte.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Payload, SerializationError, Serializer};
use crate::types::{DocumentData, Location, ResultChunkData};

/// First byte of every binary-encoded blob
pub const FORMAT_MARKER: u8 = 0x00;

/// Bump when any stored struct changes layout
pub const FORMAT_VERSION: u8 = 2;

const HEADER_LEN: usize = 2;

/// bincode-backed serializer for the current format
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl BinarySerializer {
    pub fn new() -> Self {
        Self
    }

    fn encode<T: Serialize + ?Sized>(&self, payload: Payload, value: &T) -> Result<Vec<u8>, SerializationError> {
        let body = bincode::serialize(value).map_err(|e| SerializationError::Encode {
            payload,
            message: e.to_string(),
        })?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(FORMAT_MARKER);
        out.push(FORMAT_VERSION);
        out.extend(body);
        Ok(out)
    }

    fn decode<T: DeserializeOwned>(&self, payload: Payload, data: &[u8]) -> Result<T, SerializationError> {
        if data.len() < HEADER_LEN {
            return Err(SerializationError::Decode {
                payload,
                message: format!("blob too short ({} bytes)", data.len()),
            });
        }
        if data[0] != FORMAT_MARKER {
            return Err(SerializationError::Decode {
                payload,
                message: format!("unexpected leading byte {:#04x}", data[0]),
            });
        }
        if data[1] != FORMAT_VERSION {
            return Err(SerializationError::UnsupportedVersion {
                payload,
                found: data[1],
                supported: FORMAT_VERSION,
            });
        }

        bincode::deserialize(&data[HEADER_LEN..]).map_err(|e| SerializationError::Decode {
            payload,
            message: e.to_string(),
        })
    }
}

impl Serializer for BinarySerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn recognizes(&self, data: &[u8]) -> bool {
        data.len() >= HEADER_LEN && data[0] == FORMAT_MARKER && data[1] == FORMAT_VERSION
    }

    fn marshal_document_data(&self, document: &DocumentData) -> Result<Vec<u8>, SerializationError> {
        self.encode(Payload::DocumentData, document)
    }

    fn marshal_result_chunk_data(&self, result_chunk: &ResultChunkData) -> Result<Vec<u8>, SerializationError> {
        self.encode(Payload::ResultChunkData, result_chunk)
    }

    fn marshal_locations(&self, locations: &[Location]) -> Result<Vec<u8>, SerializationError> {
        self.encode(Payload::Locations, locations)
    }

    fn unmarshal_document_data(&self, data: &[u8]) -> Result<DocumentData, SerializationError> {
        self.decode(Payload::DocumentData, data)
    }

    fn unmarshal_result_chunk_data(&self, data: &[u8]) -> Result<ResultChunkData, SerializationError> {
        self.decode(Payload::ResultChunkData, data)
    }

    fn unmarshal_locations(&self, data: &[u8]) -> Result<Vec<Location>, SerializationError> {
        self.decode(Payload::Locations, data)
    }
}
