//! Refdata Core: Types and traits for the reference data store
//!
//! This crate defines the abstractions shared by the storage backend and
//! the lookup layer:
//! - Data model: ref streams, maps, effective streams, lookup identifiers
//! - Value envelope: tagged string / binary / null values
//! - Store traits: `RefDataStore` and its `RefDataLoader` write session
//! - Collaborator traits: meta service, feed docs, loader pipelines
//! - Keyed lock registry for per-stream load exclusion

pub mod config;
pub mod error;
pub mod lock_manager;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{CacheConfig, LmdbConfig, ReadPoolConfig, ReferenceDataConfig, SyncMode};
pub use error::{RefDataError, Result};
pub use lock_manager::{KeyedLockGuard, LockManager};
pub use traits::{FeedDocService, MetaService, RefDataLoader, RefDataStore, ReferenceDataLoader};
pub use types::{
    DocRef, EffectiveMeta, LoadOutcome, LoadStats, LookupIdentifier, MapDefinition,
    PipelineReference, ProcessingInfoResponse, ProcessingState, PurgeSummary,
    RefDataProcessingInfo, RefDataValue, RefStoreEntry, RefStoreKey, RefStreamDefinition,
    StreamId, ValueType, NESTED_MAP_DELIMITER,
};
