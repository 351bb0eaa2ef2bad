//! Schema-typed value serialization.
//!
//! The harness only needs a total, deterministic, mutually inverse pair for
//! string values. `LocalSerializer` provides that without a registry.

use bytes::Bytes;
use drover_core::SchemaError;
use serde::{Deserialize, Serialize};

/// Wire encoding of a message value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// Raw UTF-8 bytes.
    #[default]
    String,
    /// A JSON string literal.
    Json,
}

/// Converts values to and from their wire encoding.
pub trait Serializer: Send + Sync {
    /// Encodes `value` with the given schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented in the schema.
    fn serialize(&self, value: &str, schema: SchemaType) -> Result<Bytes, SchemaError>;

    /// Decodes `bytes` with the given schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn deserialize(&self, bytes: &[u8], schema: SchemaType) -> Result<String, SchemaError>;
}

/// In-process serializer for the built-in schema types.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSerializer;

impl Serializer for LocalSerializer {
    fn serialize(&self, value: &str, schema: SchemaType) -> Result<Bytes, SchemaError> {
        match schema {
            SchemaType::String => Ok(Bytes::copy_from_slice(value.as_bytes())),
            SchemaType::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| SchemaError::InvalidJson {
                    reason: e.to_string(),
                }),
        }
    }

    fn deserialize(&self, bytes: &[u8], schema: SchemaType) -> Result<String, SchemaError> {
        match schema {
            SchemaType::String => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| SchemaError::InvalidUtf8 {
                    reason: e.to_string(),
                }),
            SchemaType::Json => {
                serde_json::from_slice::<String>(bytes).map_err(|e| SchemaError::InvalidJson {
                    reason: e.to_string(),
                })
            }
        }
    }
}
