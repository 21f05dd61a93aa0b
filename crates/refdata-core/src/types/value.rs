//! Reference data values and their storage envelope
//!
//! Every stored value is prefixed with a one byte type id so the variant
//! can be recovered without inspecting the payload:
//!
//! | Type id | Variant | Payload |
//! |---------|---------|---------|
//! | `0` | [`RefDataValue::String`] | UTF-8 text |
//! | `1` | [`RefDataValue::Binary`] | opaque bytes (e.g. a serialised XML fragment) |
//! | `2` | [`RefDataValue::Null`] | empty |

use crate::error::{RefDataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Binary,
    Null,
}

impl ValueType {
    pub const fn type_id(self) -> u8 {
        match self {
            ValueType::String => 0,
            ValueType::Binary => 1,
            ValueType::Null => 2,
        }
    }

    pub fn from_type_id(type_id: u8) -> Result<Self> {
        match type_id {
            0 => Ok(ValueType::String),
            1 => Ok(ValueType::Binary),
            2 => Ok(ValueType::Null),
            other => Err(RefDataError::Serialization(format!(
                "Unknown value type id {}",
                other
            ))),
        }
    }
}

/// A stored reference data value.
///
/// `Null` is an explicit negative entry: the key is known and maps to
/// nothing, which is different from the key being absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefDataValue {
    String(String),
    Binary(Vec<u8>),
    Null,
}

impl RefDataValue {
    pub fn string(value: impl Into<String>) -> Self {
        RefDataValue::String(value.into())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            RefDataValue::String(_) => ValueType::String,
            RefDataValue::Binary(_) => ValueType::Binary,
            RefDataValue::Null => ValueType::Null,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RefDataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RefDataValue::Null)
    }

    /// Encode into the storage envelope
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload: &[u8] = match self {
            RefDataValue::String(s) => s.as_bytes(),
            RefDataValue::Binary(b) => b,
            RefDataValue::Null => &[],
        };
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(self.value_type().type_id());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Split an envelope into its type and borrowed payload
    pub fn split_envelope(bytes: &[u8]) -> Result<(ValueType, &[u8])> {
        let (&type_id, payload) = bytes
            .split_first()
            .ok_or_else(|| RefDataError::Serialization("Empty value envelope".into()))?;
        Ok((ValueType::from_type_id(type_id)?, payload))
    }

    /// Decode from the storage envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (value_type, payload) = Self::split_envelope(bytes)?;
        match value_type {
            ValueType::String => std::str::from_utf8(payload)
                .map(|s| RefDataValue::String(s.to_string()))
                .map_err(|e| RefDataError::Serialization(e.to_string())),
            ValueType::Binary => Ok(RefDataValue::Binary(payload.to_vec())),
            ValueType::Null => {
                if payload.is_empty() {
                    Ok(RefDataValue::Null)
                } else {
                    Err(RefDataError::Serialization(
                        "Null value with a non-empty payload".into(),
                    ))
                }
            }
        }
    }
}

impl fmt::Display for RefDataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefDataValue::String(s) => write!(f, "{}", s),
            RefDataValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
            RefDataValue::Null => write!(f, "<null>"),
        }
    }
}
