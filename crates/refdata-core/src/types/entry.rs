use crate::types::processing::RefDataProcessingInfo;
use crate::types::stream::{MapDefinition, RefStreamDefinition};
use crate::types::value::RefDataValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Key of a stored entry, either an exact string key or a half-open
/// `[from, to)` range of integer keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefStoreKey {
    Key(String),
    Range(Range<i64>),
}

impl fmt::Display for RefStoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefStoreKey::Key(k) => f.write_str(k),
            RefStoreKey::Range(r) => write!(f, "[{}, {})", r.start, r.end),
        }
    }
}

/// A single stored entry as returned by the listing operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefStoreEntry {
    pub feed_name: Option<String>,
    pub map_definition: MapDefinition,
    pub key: RefStoreKey,
    pub value: RefDataValue,
    pub processing_info: Option<RefDataProcessingInfo>,
}

/// Processing record of one ref stream plus the maps it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfoResponse {
    pub feed_name: Option<String>,
    pub ref_stream_definition: RefStreamDefinition,
    pub processing_info: RefDataProcessingInfo,
    pub map_names: Vec<String>,
}
