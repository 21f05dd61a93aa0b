pub mod lmdb;
pub mod reference_data;

pub use lmdb::{LmdbConfig, ReadPoolConfig, SyncMode};
pub use reference_data::{CacheConfig, ReferenceDataConfig};
