use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stream (meta record) holding reference data
pub type StreamId = i64;

/// Reference to a document (pipeline, feed) by its stable uuid and display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub uuid: String,
    pub name: String,
}

impl DocRef {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// One versioned ingest of reference data: the stream `stream_id` as
/// processed by a specific version of a reference loader pipeline.
///
/// Immutable. The owning feed of `stream_id` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefStreamDefinition {
    pub pipeline_uuid: String,
    pub pipeline_version: String,
    pub stream_id: StreamId,
}

impl RefStreamDefinition {
    pub fn new(
        pipeline_uuid: impl Into<String>,
        pipeline_version: impl Into<String>,
        stream_id: StreamId,
    ) -> Self {
        Self {
            pipeline_uuid: pipeline_uuid.into(),
            pipeline_version: pipeline_version.into(),
            stream_id,
        }
    }
}

impl fmt::Display for RefStreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream {} (pipeline {} v{})",
            self.stream_id, self.pipeline_uuid, self.pipeline_version
        )
    }
}

/// A named map within a ref stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapDefinition {
    pub ref_stream_definition: RefStreamDefinition,
    pub map_name: String,
}

impl MapDefinition {
    pub fn new(ref_stream_definition: RefStreamDefinition, map_name: impl Into<String>) -> Self {
        Self {
            ref_stream_definition,
            map_name: map_name.into(),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.ref_stream_definition.stream_id
    }
}

impl fmt::Display for MapDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map '{}' in {}", self.map_name, self.ref_stream_definition)
    }
}

/// Association between a consuming pipeline and a reference feed.
///
/// `pipeline` is the reference loader pipeline, `feed` the feed whose
/// streams it loads and `stream_type` the type of those streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineReference {
    pub pipeline: DocRef,
    pub feed: DocRef,
    pub stream_type: String,
}

impl PipelineReference {
    pub fn new(pipeline: DocRef, feed: DocRef, stream_type: impl Into<String>) -> Self {
        Self {
            pipeline,
            feed,
            stream_type: stream_type.into(),
        }
    }

    /// True when every identifying part is present
    pub fn is_fully_formed(&self) -> bool {
        !self.pipeline.uuid.is_empty()
            && !self.feed.uuid.is_empty()
            && !self.feed.name.is_empty()
            && !self.stream_type.is_empty()
    }
}

impl fmt::Display for PipelineReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline: '{}', feed: '{}', type: '{}'",
            self.pipeline.name, self.feed.name, self.stream_type
        )
    }
}
