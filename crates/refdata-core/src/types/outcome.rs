use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters for one completed load session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub key_value_puts: u64,
    pub range_value_puts: u64,
    /// Intermediate commits made before completion
    pub commits: u64,
}

impl LoadStats {
    pub fn total_puts(&self) -> u64 {
        self.key_value_puts + self.range_value_puts
    }
}

/// Result of `do_with_loader_unless_complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The load body ran and processing completed
    Loaded(LoadStats),
    /// The stream was already `COMPLETE`; the load body was not invoked
    AlreadyComplete,
}

impl LoadOutcome {
    pub fn was_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }
}

/// What a purge removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub ref_streams_purged: u64,
    pub entries_deleted: u64,
    pub duration: Duration,
}

impl PurgeSummary {
    /// Combine two summaries, e.g. from different stores
    pub fn merge(self, other: PurgeSummary) -> PurgeSummary {
        PurgeSummary {
            ref_streams_purged: self.ref_streams_purged + other.ref_streams_purged,
            entries_deleted: self.entries_deleted + other.entries_deleted,
            duration: self.duration + other.duration,
        }
    }
}
