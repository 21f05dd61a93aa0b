//! Batched deletion of ref streams

use crate::iter;
use crate::keys;
use crate::store::{now_ms, LmdbRefDataStore};
use lmdb::{Database, Transaction};
use refdata_core::{
    error::Result,
    observe,
    types::{ProcessingState, PurgeSummary, RefDataProcessingInfo, RefStreamDefinition, StreamId},
};
use std::time::{Duration, Instant};

impl LmdbRefDataStore {
    /// Delete every key starting with `prefix` from `db`, at most
    /// `purge_batch_size` keys per write transaction
    pub(crate) fn delete_prefix(&self, db: Database, prefix: &[u8]) -> Result<u64> {
        let batch_size = self.config.purge_batch_size.max(1);
        let mut deleted = 0u64;
        loop {
            let mut txn = self.write_txn()?;
            let batch = iter::keys_with_prefix(&txn, db, prefix, batch_size)?;
            for key in &batch {
                match txn.del(db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(self.map_write_error(e)),
                }
            }
            txn.commit().map_err(|e| self.map_write_error(e))?;
            deleted += batch.len() as u64;
            if batch.len() < batch_size {
                return Ok(deleted);
            }
        }
    }

    fn set_state(&self, def_key: &[u8], state: ProcessingState) -> Result<()> {
        let mut txn = self.write_txn()?;
        if let Some(info) = self.processing_info(&txn, def_key)? {
            self.put_processing_info(&mut txn, def_key, &info.with_state(state))?;
        }
        txn.commit().map_err(|e| self.map_write_error(e))
    }

    /// Remove all data of `def`, then its processing record. The caller
    /// holds the loader lock for `def`.
    fn purge_ref_stream(&self, def: &RefStreamDefinition) -> Result<u64> {
        let def_key = keys::stream_def_key(def)?;
        self.set_state(&def_key, ProcessingState::Purged)?;

        let mut deleted = self.delete_prefix(self.key_value_db, &def_key)?;
        deleted += self.delete_prefix(self.range_value_db, &def_key)?;

        let mut txn = self.write_txn()?;
        match txn.del(self.processing_info_db, &def_key, None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(self.map_write_error(e)),
        }
        txn.commit().map_err(|e| self.map_write_error(e))?;

        tracing::debug!("Purged {} ({} entries)", def, deleted);
        Ok(deleted)
    }

    fn processing_infos_with_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(RefStreamDefinition, RefDataProcessingInfo)>> {
        let read = self.read()?;
        let mut infos = Vec::new();
        iter::scan_prefix(read.txn(), self.processing_info_db, prefix, |key, value| {
            let (def, _) = keys::decode_stream_def(key)?;
            let info = RefDataProcessingInfo::from_bytes(value)?;
            infos.push((def, self.with_pending_last_access(key, info)));
            Ok(true)
        })?;
        Ok(infos)
    }

    /// Purge every ref stream whose last access is older than `age`.
    ///
    /// Streams currently being loaded are skipped and picked up by a later
    /// purge.
    pub fn purge_older_than(&self, age: Duration) -> Result<PurgeSummary> {
        let start = Instant::now();
        let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(age_ms);
        self.flush_last_access()?;

        let candidates: Vec<_> = self
            .processing_infos_with_prefix(&[])?
            .into_iter()
            .filter(|(_, info)| info.last_access_time_ms < cutoff)
            .map(|(def, _)| def)
            .collect();

        let mut summary = PurgeSummary::default();
        for def in candidates {
            let Some(_guard) = self.loader_locks.try_lock(&def) else {
                tracing::debug!("Skipping purge of {} while it is being loaded", def);
                continue;
            };
            // A read may have refreshed the last access since the scan
            let still_old = self
                .get_processing_info(&def)?
                .map(|info| {
                    info.last_access_time_ms < cutoff || info.state == ProcessingState::Purged
                })
                .unwrap_or(false);
            if !still_old {
                continue;
            }
            summary.entries_deleted += self.purge_ref_stream(&def)?;
            summary.ref_streams_purged += 1;
        }
        summary.duration = start.elapsed();

        tracing::info!(
            "Purged {} ref streams ({} entries) older than {:?} from {} in {:?}",
            summary.ref_streams_purged,
            summary.entries_deleted,
            age,
            self.path().display(),
            summary.duration
        );
        observe::record_purge(summary.ref_streams_purged, summary.entries_deleted);
        Ok(summary)
    }

    /// Purge every ref stream definition of `stream_id`, whatever its age
    pub fn purge_stream_id(&self, stream_id: StreamId) -> Result<PurgeSummary> {
        let start = Instant::now();
        let prefix = keys::stream_id_prefix(stream_id);
        let mut summary = PurgeSummary::default();

        for (def, _) in self.processing_infos_with_prefix(&prefix)? {
            let _guard = self.loader_locks.lock(&def);
            summary.entries_deleted += self.purge_ref_stream(&def)?;
            summary.ref_streams_purged += 1;
        }

        // Entries left behind by an interrupted purge or migration
        summary.entries_deleted += self.delete_prefix(self.key_value_db, &prefix)?;
        summary.entries_deleted += self.delete_prefix(self.range_value_db, &prefix)?;
        summary.duration = start.elapsed();

        tracing::info!(
            "Purged stream {} ({} ref streams, {} entries) from {}",
            stream_id,
            summary.ref_streams_purged,
            summary.entries_deleted,
            self.path().display()
        );
        observe::record_purge(summary.ref_streams_purged, summary.entries_deleted);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::{
        traits::{RefDataLoader, RefDataStore},
        types::{MapDefinition, RefDataValue},
        ReferenceDataConfig,
    };
    use tempfile::TempDir;

    fn load(store: &LmdbRefDataStore, stream_id: StreamId, entries: usize) -> MapDefinition {
        let def = RefStreamDefinition::new("pipe", "1", stream_id);
        let map = MapDefinition::new(def.clone(), "MAP");
        store
            .do_with_loader_unless_complete(&def, 0, |loader| {
                for i in 0..entries {
                    loader.put(&map, &format!("key{}", i), &RefDataValue::string("v"))?;
                }
                loader.put_range(&map, 0..10, &RefDataValue::string("r"))?;
                loader.complete_processing()
            })
            .unwrap();
        map
    }

    fn open(dir: &TempDir) -> LmdbRefDataStore {
        let config = ReferenceDataConfig::new(dir.path()).with_purge_batch_size(3);
        LmdbRefDataStore::open(dir.path().join("store"), Some("FEED".into()), &config).unwrap()
    }

    #[test]
    fn test_purge_stream_id_removes_everything_in_batches() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let purged_map = load(&store, 1, 10);
        let kept_map = load(&store, 2, 2);

        let summary = store.purge(1).unwrap();
        assert_eq!(summary.ref_streams_purged, 1);
        assert_eq!(summary.entries_deleted, 11);

        assert!(!store.exists(&purged_map).unwrap());
        assert!(store.get_load_state(&purged_map.ref_stream_definition).unwrap().is_none());
        assert!(!store.exists_stream(1).unwrap());
        assert!(store.exists(&kept_map).unwrap());
        assert_eq!(store.processing_info_entry_count().unwrap(), 1);
    }

    #[test]
    fn test_purge_old_data_uses_last_access() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let map = load(&store, 1, 2);

        let summary = store.purge_old_data().unwrap();
        assert_eq!(summary.ref_streams_purged, 0);
        assert!(store.exists(&map).unwrap());

        std::thread::sleep(Duration::from_millis(5));
        let summary = store.purge_old_data_older_than(Duration::ZERO).unwrap();
        assert_eq!(summary.ref_streams_purged, 1);
        assert!(!store.exists(&map).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_purge_keeps_streams_read_since_last_flush() {
        let dir = TempDir::new().unwrap();
        let config = ReferenceDataConfig::new(dir.path()).with_last_access_refresh(Duration::ZERO);
        let store =
            LmdbRefDataStore::open(dir.path().join("store"), Some("FEED".into()), &config).unwrap();
        let read_map = load(&store, 1, 2);
        let idle_map = load(&store, 2, 2);

        std::thread::sleep(Duration::from_millis(300));
        store.get_load_state(&read_map.ref_stream_definition).unwrap();

        let summary = store.purge_older_than(Duration::from_millis(200)).unwrap();
        assert_eq!(summary.ref_streams_purged, 1);
        assert!(store.exists(&read_map).unwrap());
        assert!(!store.exists(&idle_map).unwrap());
    }
}
