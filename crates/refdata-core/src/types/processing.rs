use crate::error::{RefDataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Load status of one ref stream definition.
///
/// `UNKNOWN` (no record) and `LoadInProgress` may be retried, `Complete`
/// is terminal until the stream is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    LoadInProgress,
    Complete,
    /// Purge has started. Entries may be partially removed and the record
    /// itself is deleted once the last entry is gone.
    Purged,
}

impl ProcessingState {
    pub const ALL: [ProcessingState; 3] = [
        ProcessingState::LoadInProgress,
        ProcessingState::Complete,
        ProcessingState::Purged,
    ];

    pub const fn id(self) -> u8 {
        match self {
            ProcessingState::LoadInProgress => 0,
            ProcessingState::Complete => 1,
            ProcessingState::Purged => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(ProcessingState::LoadInProgress),
            1 => Ok(ProcessingState::Complete),
            2 => Ok(ProcessingState::Purged),
            other => Err(RefDataError::Serialization(format!(
                "Unknown processing state id {}",
                other
            ))),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProcessingState::LoadInProgress => "LOAD_IN_PROGRESS",
            ProcessingState::Complete => "COMPLETE",
            ProcessingState::Purged => "PURGED",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Processing record stored per ref stream definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefDataProcessingInfo {
    pub create_time_ms: i64,
    pub last_access_time_ms: i64,
    pub effective_time_ms: i64,
    pub state: ProcessingState,
}

const ENCODED_LEN: usize = 1 + 8 * 3;

impl RefDataProcessingInfo {
    pub fn new(now_ms: i64, effective_time_ms: i64, state: ProcessingState) -> Self {
        Self {
            create_time_ms: now_ms,
            last_access_time_ms: now_ms,
            effective_time_ms,
            state,
        }
    }

    pub fn with_state(mut self, state: ProcessingState) -> Self {
        self.state = state;
        self
    }

    pub fn with_last_access_time(mut self, last_access_time_ms: i64) -> Self {
        self.last_access_time_ms = last_access_time_ms;
        self
    }

    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut bytes = [0u8; ENCODED_LEN];
        bytes[0] = self.state.id();
        bytes[1..9].copy_from_slice(&self.create_time_ms.to_be_bytes());
        bytes[9..17].copy_from_slice(&self.last_access_time_ms.to_be_bytes());
        bytes[17..25].copy_from_slice(&self.effective_time_ms.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCODED_LEN {
            return Err(RefDataError::Serialization(format!(
                "Processing info requires exactly {} bytes, found {}",
                ENCODED_LEN,
                bytes.len()
            )));
        }
        let read_i64 = |from: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[from..from + 8]);
            i64::from_be_bytes(buf)
        };
        Ok(Self {
            state: ProcessingState::from_id(bytes[0])?,
            create_time_ms: read_i64(1),
            last_access_time_ms: read_i64(9),
            effective_time_ms: read_i64(17),
        })
    }
}
