pub mod collaborators;
pub mod store;

pub use collaborators::{FeedDocService, MetaService, ReferenceDataLoader};
pub use store::{RefDataLoader, RefDataStore};
