//! Text and binary encodings for genomes.
//!
//! These are hooks for a persistence layer: they encode a single value and
//! leave file framing to the caller. Text is JSON, binary is bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BreedResult;

/// Encode as JSON text.
///
/// # Errors
///
/// Returns [`BreedError::Codec`](crate::BreedError::Codec) if serialization fails.
pub fn to_text<T: Serialize>(value: &T) -> BreedResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode from JSON text.
///
/// # Errors
///
/// Returns [`BreedError::Codec`](crate::BreedError::Codec) on malformed input.
pub fn from_text<T: DeserializeOwned>(text: &str) -> BreedResult<T> {
    Ok(serde_json::from_str(text)?)
}

/// Encode as compact binary.
///
/// # Errors
///
/// Returns [`BreedError::Codec`](crate::BreedError::Codec) if serialization fails.
pub fn to_binary<T: Serialize>(value: &T) -> BreedResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode from compact binary.
///
/// # Errors
///
/// Returns [`BreedError::Codec`](crate::BreedError::Codec) on truncated or malformed input.
pub fn from_binary<T: DeserializeOwned>(bytes: &[u8]) -> BreedResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
