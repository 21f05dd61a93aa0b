use crate::store::LmdbRefDataStore;
use refdata_core::{
    error::Result,
    traits::RefDataStore,
    types::{MapDefinition, RefDataValue, ValueType},
};
use std::fmt;
use std::sync::Arc;

/// Lazy binding to one value in one store
///
/// Creating a proxy performs no I/O. Each resolution opens its own read
/// transaction and copies the value out before it closes, so a proxy stays
/// valid for as long as it is held, independent of the transaction it was
/// created under.
#[derive(Clone)]
pub struct RefDataValueProxy {
    store: Arc<LmdbRefDataStore>,
    map_definition: MapDefinition,
    key: String,
}

impl RefDataValueProxy {
    pub fn new(
        store: Arc<LmdbRefDataStore>,
        map_definition: MapDefinition,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            map_definition,
            key: key.into(),
        }
    }

    pub fn map_definition(&self) -> &MapDefinition {
        &self.map_definition
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<LmdbRefDataStore> {
        &self.store
    }

    /// Resolve the value, `None` if the key is absent
    pub fn supply_value(&self) -> Result<Option<RefDataValue>> {
        self.store.get_value(&self.map_definition, &self.key)
    }

    /// Resolve against the stored bytes without decoding them
    pub fn consume_bytes<F, R>(&self, consumer: F) -> Result<Option<R>>
    where
        F: FnOnce(ValueType, &[u8]) -> R,
    {
        self.store
            .consume_value_bytes(&self.map_definition, &self.key, consumer)
    }
}

impl fmt::Debug for RefDataValueProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefDataValueProxy")
            .field("store", &self.store.path())
            .field("map_definition", &self.map_definition)
            .field("key", &self.key)
            .finish()
    }
}
