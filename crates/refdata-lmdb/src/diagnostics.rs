use crate::iter;
use crate::keys;
use crate::store::LmdbRefDataStore;
use refdata_core::{
    error::Result,
    traits::RefDataStore,
    types::{ProcessingState, RefDataProcessingInfo, RefDataValue},
};
use serde_json::{json, Value};

impl LmdbRefDataStore {
    /// Path, size, entry counts, environment settings and a count of ref
    /// streams per processing state
    pub fn system_info(&self) -> Result<Value> {
        let mut state_counts = serde_json::Map::new();
        for state in ProcessingState::ALL {
            state_counts.insert(state.display_name().to_string(), json!(0));
        }
        for info in self.list_processing_info(usize::MAX)? {
            let name = info.processing_info.state.display_name();
            let count = state_counts.get(name).and_then(Value::as_u64).unwrap_or(0);
            state_counts.insert(name.to_string(), json!(count + 1));
        }

        let lmdb = &self.config().lmdb;
        Ok(json!({
            "path": self.path().display().to_string(),
            "feed_name": self.feed_name(),
            "size_on_disk": self.size_on_disk()?,
            "key_value_entries": self.key_value_entry_count()?,
            "range_value_entries": self.range_value_entry_count()?,
            "processing_info_entries": self.processing_info_entry_count()?,
            "processing_states": state_counts,
            "environment": {
                "max_store_size": lmdb.max_store_size,
                "max_readers": lmdb.max_readers,
                "sync_mode": format!("{:?}", lmdb.sync_mode),
                "read_ahead_enabled": lmdb.read_ahead_enabled,
                "read_pool_enabled": self.read_pool().is_enabled(),
                "read_pool_available_permits": self.read_pool().available_permits(),
            },
        }))
    }

    pub(crate) fn dump_contents<C>(&self, mut consumer: C) -> Result<()>
    where
        C: FnMut(&str),
    {
        let read = self.read()?;
        let txn = read.txn();
        let header = format!(
            "Contents of {} (feed: {})",
            self.path().display(),
            self.feed_name().unwrap_or("<legacy>")
        );
        consumer(header.as_str());

        iter::scan_from(txn, self.processing_info_db, &[], |key, value| {
            let (def, _) = keys::decode_stream_def(key)?;
            let info = RefDataProcessingInfo::from_bytes(value)?;
            let line = format!(
                "processing_info: {} state: {} created: {} last access: {} effective: {}",
                def, info.state, info.create_time_ms, info.last_access_time_ms, info.effective_time_ms
            );
            consumer(line.as_str());
            Ok(true)
        })?;

        iter::scan_from(txn, self.key_value_db, &[], |key, value| {
            let (map_def, key) = keys::decode_key_value_key(key)?;
            let value = RefDataValue::from_bytes(value)?;
            consumer(format!("key_value: {} key: {} value: {}", map_def, key, value).as_str());
            Ok(true)
        })?;

        iter::scan_from(txn, self.range_value_db, &[], |key, value| {
            let (map_def, range) = keys::decode_range_value_key(key)?;
            let value = RefDataValue::from_bytes(value)?;
            let line = format!(
                "range_value: {} range: [{}, {}) value: {}",
                map_def, range.start, range.end, value
            );
            consumer(line.as_str());
            Ok(true)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::{
        traits::RefDataLoader,
        types::{MapDefinition, RefStreamDefinition},
        ReferenceDataConfig,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_system_info_and_dump() {
        let dir = TempDir::new().unwrap();
        let config = ReferenceDataConfig::new(dir.path());
        let store = Arc::new(
            LmdbRefDataStore::open(dir.path().join("s"), Some("FEED".into()), &config).unwrap(),
        );
        let def = RefStreamDefinition::new("pipe", "1", 9);
        let map = MapDefinition::new(def.clone(), "MAP");
        store
            .do_with_loader_unless_complete(&def, 0, |loader| {
                loader.put(&map, "k", &RefDataValue::string("v"))?;
                loader.put_range(&map, -5..5, &RefDataValue::Null)?;
                loader.complete_processing()
            })
            .unwrap();

        let info = store.system_info().unwrap();
        assert_eq!(info["feed_name"], "FEED");
        assert_eq!(info["key_value_entries"], 1);
        assert_eq!(info["range_value_entries"], 1);
        assert_eq!(info["processing_states"]["COMPLETE"], 1);
        assert_eq!(info["processing_states"]["PURGED"], 0);

        let mut lines = Vec::new();
        store
            .log_all_contents_with(|line| lines.push(line.to_string()))
            .unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("key: k value: v"));
        assert!(lines[3].contains("range: [-5, 5)"));

        let proxy = store.get_value_proxy(&map, "-1");
        drop(store);
        assert_eq!(proxy.supply_value().unwrap(), Some(RefDataValue::Null));
        assert_eq!(proxy.consume_bytes(|_, bytes| bytes.len()).unwrap(), Some(0));
    }
}
