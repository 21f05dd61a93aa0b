//! Refdata Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use refdata::prelude::*;
//! ```

// Core types
pub use crate::{
    DocRef, EffectiveMeta, LookupIdentifier, MapDefinition, PipelineReference, ProcessingState,
    RefDataError, RefDataValue, RefStreamDefinition, Result, StreamId,
};

// Configs
pub use crate::{CacheConfig, LmdbConfig, ReferenceDataConfig, SyncMode};

// Traits
pub use crate::{FeedDocService, MetaService, RefDataLoader, RefDataStore, ReferenceDataLoader};

// Implementations
pub use crate::{DelegatingRefDataStore, LmdbRefDataStore, RefDataDb, RefDataValueProxy};

// Lookups
pub use crate::{EffectiveStreamCache, ReferenceData, ReferenceDataResult, Severity};

// Re-export common external deps
pub use std::sync::Arc;
pub use tracing;
