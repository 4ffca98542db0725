//! Legacy blob encoding used by schema-version-1 bundles

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Payload, SerializationError, Serializer};
use crate::types::{DocumentData, Location, ResultChunkData};

/// JSON text serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }

    fn encode<T: Serialize + ?Sized>(&self, payload: Payload, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(|e| SerializationError::Encode {
            payload,
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: Payload, data: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(data).map_err(|e| SerializationError::Decode {
            payload,
            message: e.to_string(),
        })
    }
}

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn recognizes(&self, data: &[u8]) -> bool {
        matches!(
            data.iter().find(|b| !b.is_ascii_whitespace()),
            Some(b'{') | Some(b'[')
        )
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
