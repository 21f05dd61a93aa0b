use crate::keys;
use crate::store::{now_ms, LmdbRefDataStore};
use lmdb::{RwTransaction, Transaction, WriteFlags};
use refdata_core::{
    error::{RefDataError, Result},
    traits::RefDataLoader,
    types::{
        LoadStats, MapDefinition, ProcessingState, RefDataProcessingInfo, RefDataValue,
        RefStreamDefinition,
    },
};
use std::ops::Range;

/// Write session for one ref stream in an [`LmdbRefDataStore`]
///
/// Holds the environment's single write transaction for its whole life.
/// The processing record is written as `LOAD_IN_PROGRESS` in the same
/// transaction as the first puts, so aborting before any commit leaves no
/// trace of the load.
pub struct LmdbRefDataLoader<'a> {
    store: &'a LmdbRefDataStore,
    txn: Option<RwTransaction<'a>>,
    def: RefStreamDefinition,
    def_key: Vec<u8>,
    info: RefDataProcessingInfo,
    puts_since_commit: usize,
    stats: LoadStats,
    complete: bool,
}

impl<'a> LmdbRefDataLoader<'a> {
    pub(crate) fn begin(
        store: &'a LmdbRefDataStore,
        def: RefStreamDefinition,
        effective_time_ms: i64,
    ) -> Result<Self> {
        let def_key = keys::stream_def_key(&def)?;
        let mut txn = store.write_txn()?;

        let now = now_ms();
        let info = match store.processing_info(&txn, &def_key)? {
            // Retry of an earlier attempt keeps its create time
            Some(existing) => RefDataProcessingInfo {
                last_access_time_ms: now,
                effective_time_ms,
                state: ProcessingState::LoadInProgress,
                ..existing
            },
            None => RefDataProcessingInfo::new(now, effective_time_ms, ProcessingState::LoadInProgress),
        };
        store.put_processing_info(&mut txn, &def_key, &info)?;

        Ok(Self {
            store,
            txn: Some(txn),
            def,
            def_key,
            info,
            puts_since_commit: 0,
            stats: LoadStats::default(),
            complete: false,
        })
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    fn txn_mut(&mut self) -> Result<&mut RwTransaction<'a>> {
        self.txn
            .as_mut()
            .ok_or_else(|| RefDataError::InvalidState("Loader transaction already closed".into()))
    }

    fn check_map(&self, map_definition: &MapDefinition) -> Result<()> {
        if self.complete {
            return Err(RefDataError::InvalidState(format!(
                "Load of {} is already complete",
                self.def
            )));
        }
        if map_definition.ref_stream_definition != self.def {
            return Err(RefDataError::InvalidState(format!(
                "{} does not belong to the load of {}",
                map_definition, self.def
            )));
        }
        Ok(())
    }

    fn put_bytes(&mut self, db: lmdb::Database, key: &[u8], value: &[u8]) -> Result<()> {
        let store = self.store;
        self.txn_mut()?
            .put(db, &key, &value, WriteFlags::empty())
            .map_err(|e| store.map_write_error(e))?;
        self.puts_since_commit += 1;
        self.commit_if_due()
    }

    /// Commit and reopen the write transaction every
    /// `max_puts_before_commit` puts
    fn commit_if_due(&mut self) -> Result<()> {
        let max_puts = self.store.config.max_puts_before_commit;
        if max_puts == 0 || self.puts_since_commit < max_puts {
            return Ok(());
        }
        if let Some(txn) = self.txn.take() {
            txn.commit().map_err(|e| self.store.map_write_error(e))?;
        }
        self.txn = Some(self.store.write_txn()?);
        self.puts_since_commit = 0;
        self.stats.commits += 1;
        tracing::trace!("Committed batch {} of {}", self.stats.commits, self.def);
        Ok(())
    }

    /// Drop everything written since the last commit
    pub fn abort(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }
}

impl<'a> RefDataLoader for LmdbRefDataLoader<'a> {
    fn ref_stream_definition(&self) -> &RefStreamDefinition {
        &self.def
    }

    fn put(
        &mut self,
        map_definition: &MapDefinition,
        key: &str,
        value: &RefDataValue,
    ) -> Result<()> {
        self.check_map(map_definition)?;
        let encoded = keys::key_value_key(map_definition, key)?;
        self.put_bytes(self.store.key_value_db, &encoded, &value.to_bytes())?;
        self.stats.key_value_puts += 1;
        Ok(())
    }

    fn put_range(
        &mut self,
        map_definition: &MapDefinition,
        range: Range<i64>,
        value: &RefDataValue,
    ) -> Result<()> {
        self.check_map(map_definition)?;
        if range.is_empty() {
            return Err(RefDataError::InvalidState(format!(
                "Empty range [{}, {}) in {}",
                range.start, range.end, map_definition
            )));
        }
        let encoded = keys::range_value_key(map_definition, &range)?;
        self.put_bytes(self.store.range_value_db, &encoded, &value.to_bytes())?;
        self.stats.range_value_puts += 1;
        Ok(())
    }

    fn complete_processing(&mut self) -> Result<()> {
        if self.complete {
            return Ok(());
        }
        let store = self.store;
        let info = self
            .info
            .with_state(ProcessingState::Complete)
            .with_last_access_time(now_ms());
        let def_key = self.def_key.clone();

        let mut txn = self
            .txn
            .take()
            .ok_or_else(|| RefDataError::InvalidState("Loader transaction already closed".into()))?;
        store.put_processing_info(&mut txn, &def_key, &info)?;
        txn.commit().map_err(|e| store.map_write_error(e))?;

        self.info = info;
        self.complete = true;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

impl<'a> Drop for LmdbRefDataLoader<'a> {
    fn drop(&mut self) {
        self.abort();
    }
}
