pub mod entry;
pub mod lookup;
pub mod meta;
pub mod outcome;
pub mod processing;
pub mod stream;
pub mod value;

pub use entry::{ProcessingInfoResponse, RefStoreEntry, RefStoreKey};
pub use lookup::{LookupIdentifier, NESTED_MAP_DELIMITER};
pub use meta::EffectiveMeta;
pub use outcome::{LoadOutcome, LoadStats, PurgeSummary};
pub use processing::{ProcessingState, RefDataProcessingInfo};
pub use stream::{DocRef, MapDefinition, PipelineReference, RefStreamDefinition, StreamId};
pub use value::{RefDataValue, ValueType};
