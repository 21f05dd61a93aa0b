//! Services the store calls out to but does not own

use crate::error::Result;
use crate::types::{DocRef, EffectiveMeta, RefStreamDefinition, StreamId};

/// Stream metadata
pub trait MetaService: Send + Sync {
    /// Name of the feed owning `stream_id`, `None` if no meta record exists
    fn feed_name(&self, stream_id: StreamId) -> Result<Option<String>>;

    /// Every effective stream of `stream_type` in `feed_name`
    fn effective_meta(&self, feed_name: &str, stream_type: &str) -> Result<Vec<EffectiveMeta>>;
}

/// Feed documents, used to give each feed store a stable directory name
pub trait FeedDocService: Send + Sync {
    /// Uuids of feed docs with this name. Exactly one is expected.
    fn feed_uuids(&self, feed_name: &str) -> Result<Vec<String>>;

    /// Name of the feed doc with this uuid
    fn feed_name(&self, feed_uuid: &str) -> Result<Option<String>>;
}

/// Runs reference loader pipelines
pub trait ReferenceDataLoader: Send + Sync {
    /// Current version of the loader pipeline
    fn pipeline_version(&self, pipeline: &DocRef) -> Result<String>;

    /// Materialise `def`. Implementations write through
    /// `do_with_loader_unless_complete` and must leave the stream either
    /// `COMPLETE` or failed.
    fn load(&self, def: &RefStreamDefinition) -> Result<()>;
}
