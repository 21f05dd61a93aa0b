//! LMDB-backed reference data store
//!
//! One LMDB environment per feed, holding key values, range values and a
//! processing record per ref stream.
//!
//! Key features:
//! - Sign-flipped big-endian integer encoding so byte order is numeric order
//! - Per ref stream loader exclusion with "skip if already complete"
//! - Optional batched commits during large loads
//! - Lazy value proxies that copy on resolve
//! - Batched purges and legacy store migration
//! - Optional read transaction pooling

pub mod diagnostics;
pub mod iter;
pub mod keys;
pub mod loader;
pub mod migrate;
pub mod proxy;
pub mod purge;
pub mod read_pool;
pub mod store;

pub use loader::LmdbRefDataLoader;
pub use proxy::RefDataValueProxy;
pub use read_pool::{LmdbReadPool, PooledLmdbReadTxn};
pub use store::{LmdbRefDataStore, DATA_FILE_NAME};
