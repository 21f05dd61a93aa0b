use crate::types::stream::StreamId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One versioned instance of a feed's reference data, as supplied by the
/// meta service.
///
/// Ordered by effective time, then stream id, so a `BTreeSet` of these can
/// answer floor queries directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveMeta {
    pub id: StreamId,
    pub feed_name: String,
    pub type_name: String,
    pub effective_ms: i64,
}

impl EffectiveMeta {
    pub fn new(
        id: StreamId,
        feed_name: impl Into<String>,
        type_name: impl Into<String>,
        effective_ms: i64,
    ) -> Self {
        Self {
            id,
            feed_name: feed_name.into(),
            type_name: type_name.into(),
            effective_ms,
        }
    }
}

impl Ord for EffectiveMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_ms
            .cmp(&other.effective_ms)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.feed_name.cmp(&other.feed_name))
            .then_with(|| self.type_name.cmp(&other.type_name))
    }
}

impl PartialOrd for EffectiveMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
