use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefDataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Store is full, max store size of {max_store_size} bytes exceeded")]
    StoreFull { max_store_size: usize },

    #[error("Key too long: {len} bytes, maximum is {max} bytes")]
    KeyTooLong { len: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed resolution error: {0}")]
    FeedResolution(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RefDataError>;

// Collaborator errors:
//
// Implementations of `MetaService`, `FeedDocService` and `ReferenceDataLoader`
// live outside this workspace. Their failures are carried through the
// `#[from] anyhow::Error` variant, e.g.
//
// impl MetaService for DbMetaService {
//     fn feed_name(&self, stream_id: StreamId) -> Result<Option<String>> {
//         let row = self.pool.query_feed(stream_id).map_err(anyhow::Error::from)?;
//         Ok(row.map(|r| r.feed_name))
//     }
//     ...
// }
