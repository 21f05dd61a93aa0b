//! Refdata: feed-partitioned, temporally versioned reference data
//!
//! Reference data arrives as versioned streams per feed, each effective
//! from a point in time. This crate answers "what did `key` map to in
//! `map` at time `T`":
//! - **Store router**: one LMDB store per feed, created on first use, with
//!   one-time migration out of a legacy shared store
//! - **Effective stream cache**: floor selection of the stream in force at
//!   a given time
//! - **Lookup orchestrator**: ordered pipeline references, on-demand loads
//!   and chained (`A/B/C`) map lookups
//!
//! # Quick Start
//!
//! ```no_run
//! use refdata::prelude::*;
//! # fn services() -> (Arc<dyn MetaService>, Arc<dyn FeedDocService>, Arc<dyn ReferenceDataLoader>) { unimplemented!() }
//!
//! # fn main() -> Result<()> {
//! let (meta, feed_docs, loader) = services();
//! let db = RefDataDb::open("./ref-data", meta, feed_docs)?;
//! let reference_data = db.reference_data(loader);
//!
//! let references = vec![PipelineReference::new(
//!     DocRef::new("pipeline-uuid", "Reference Loader"),
//!     DocRef::new("feed-uuid", "USER_TO_LOCATION"),
//!     "Reference",
//! )];
//! let lookup = LookupIdentifier::new("USER_TO_LOCATION", "user1", 1_700_000_000_000);
//! let value = reference_data.get_value(&references, &lookup)?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod delegating_store;
pub mod effective_stream_cache;
pub mod feed_store_dir;
pub mod prelude;
pub mod reference_data;
pub mod result;

// Re-export core types
pub use refdata_core::{
    config::{CacheConfig, LmdbConfig, ReadPoolConfig, ReferenceDataConfig, SyncMode},
    error::{RefDataError, Result},
    traits::{FeedDocService, MetaService, RefDataLoader, RefDataStore, ReferenceDataLoader},
    types::{
        DocRef, EffectiveMeta, LoadOutcome, LoadStats, LookupIdentifier, MapDefinition,
        PipelineReference, ProcessingInfoResponse, ProcessingState, PurgeSummary,
        RefDataProcessingInfo, RefDataValue, RefStoreEntry, RefStoreKey, RefStreamDefinition,
        StreamId, ValueType,
    },
    LockManager,
};

// Re-export implementations
pub use refdata_lmdb::{LmdbRefDataLoader, LmdbRefDataStore, RefDataValueProxy};

// Re-export main types from this crate
pub use db::RefDataDb;
pub use delegating_store::DelegatingRefDataStore;
pub use effective_stream_cache::{EffectiveStreamCache, EffectiveStreamKey};
pub use reference_data::ReferenceData;
pub use result::{EffectiveStreamMatch, ReferenceDataResult, Severity};
