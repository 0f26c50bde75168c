//! Serialization framework for workflow and activity arguments.
//!
//! This module provides the byte-level codec used everywhere the harness
//! crosses an argument boundary: workflow inputs, activity inputs and
//! results, signal payloads, query arguments and mock return values.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;

/// Trait for data converters/serializers
pub trait DataConverter: Send + Sync {
    /// Encode a value to bytes
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodingError>;
    /// Decode bytes to a value
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncodingError>;
}

/// Default JSON data converter
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDataConverter;

impl JsonDataConverter {
    pub fn new() -> Self {
        Self
    }
}

impl DataConverter for JsonDataConverter {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(value).map_err(|e| EncodingError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncodingError> {
        serde_json::from_slice(data).map_err(|e| EncodingError::Deserialization(e.to_string()))
    }
}

/// Encoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    Serialization(String),
    Deserialization(String),
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            EncodingError::Deserialization(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for EncodingError {}

/// An encoded single value that can be decoded later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    data: Vec<u8>,
}

impl EncodedValue {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode to a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        JsonDataConverter::new().decode(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoded positional arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValues {
    data: Vec<u8>,
}

impl EncodedValues {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode all arguments at once; tuples decode from the positional form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        JsonDataConverter::new().decode(&self.data)
    }

    /// Decode into one JSON value per positional argument.
    pub fn positional(&self) -> Result<Vec<Value>, EncodingError> {
        to_positional_values(Some(&self.data))
    }
}

/// Encode a single argument
pub fn encode_arg<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodingError> {
    JsonDataConverter::new().encode(value)
}

/// Encode a set of arguments. A tuple encodes to a positional list; a single
/// value encodes as itself.
pub fn encode_args<T: Serialize>(args: &T) -> Result<Vec<u8>, EncodingError> {
    JsonDataConverter::new().encode(args)
}

/// Decode a set of arguments into the concrete type the target function
/// declares (a tuple for multi-argument functions).
pub fn decode_args<T: DeserializeOwned>(data: Option<&[u8]>) -> Result<T, EncodingError> {
    match data {
        Some(bytes) => JsonDataConverter::new().decode(bytes),
        None => JsonDataConverter::new().decode(b"null"),
    }
}

/// Decode encoded arguments into one JSON value per position, for mock
/// argument matching. A non-list encoding is treated as a single argument;
/// an absent or null encoding as no arguments.
pub fn to_positional_values(data: Option<&[u8]>) -> Result<Vec<Value>, EncodingError> {
    let bytes = match data {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return Ok(Vec::new()),
    };
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| EncodingError::Deserialization(e.to_string()))?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        single => Ok(vec![single]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: String,
        amount: i64,
    }

    #[test]
    fn encode_decode_struct() {
        let original = Order {
            id: "ord-7".to_string(),
            amount: 42,
        };
        let encoded = encode_arg(&original).unwrap();
        let decoded: Order = EncodedValue::new(encoded).decode().unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn tuple_args_decode_positionally() {
        let encoded = encode_args(&(3, "retry")).unwrap();
        let values = to_positional_values(Some(&encoded)).unwrap();
        assert_eq!(values, vec![serde_json::json!(3), serde_json::json!("retry")]);
    }

    #[test]
    fn single_arg_decodes_as_one_position() {
        let encoded = encode_args(&5).unwrap();
        let values = to_positional_values(Some(&encoded)).unwrap();
        assert_eq!(values, vec![serde_json::json!(5)]);
    }

    #[test]
    fn unit_args_decode_to_empty() {
        let encoded = encode_args(&()).unwrap();
        assert!(to_positional_values(Some(&encoded)).unwrap().is_empty());
        assert!(to_positional_values(None).unwrap().is_empty());
    }

    #[test]
    fn decode_args_handles_missing_input() {
        let decoded: Option<i32> = decode_args(None).unwrap();
        assert_eq!(decoded, None);
    }
}
