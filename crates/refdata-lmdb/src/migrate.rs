//! Copying ref streams out of the legacy store

use crate::iter;
use crate::keys;
use crate::store::LmdbRefDataStore;
use lmdb::{Transaction, WriteFlags};
use refdata_core::{
    error::{RefDataError, Result},
    types::StreamId,
};

impl LmdbRefDataStore {
    /// Move every entry of `stream_id` from this store into `target`.
    ///
    /// All key, range and processing entries are copied in a single write
    /// transaction on `target`, so a failure leaves `target` untouched.
    /// The copied entries are then deleted from this store in batches.
    /// Returns the number of entries copied.
    pub fn migrate_ref_streams(&self, stream_id: StreamId, target: &LmdbRefDataStore) -> Result<u64> {
        if std::ptr::eq(self, target) {
            return Err(RefDataError::Migration(
                "Cannot migrate a store into itself".into(),
            ));
        }
        let prefix = keys::stream_id_prefix(stream_id);
        let mut copied = 0u64;

        {
            let read = self.read()?;
            let source_txn = read.txn();
            let mut target_txn = target.write_txn()?;

            for (source_db, target_db) in [
                (self.key_value_db, target.key_value_db),
                (self.range_value_db, target.range_value_db),
                (self.processing_info_db, target.processing_info_db),
            ] {
                iter::scan_prefix(source_txn, source_db, &prefix, |key, value| {
                    target_txn
                        .put(target_db, &key, &value, WriteFlags::empty())
                        .map_err(|e| target.map_write_error(e))?;
                    copied += 1;
                    Ok(true)
                })?;
            }

            target_txn
                .commit()
                .map_err(|e| target.map_write_error(e))?;
        }

        let mut deleted = self.delete_prefix(self.key_value_db, &prefix)?;
        deleted += self.delete_prefix(self.range_value_db, &prefix)?;
        deleted += self.delete_prefix(self.processing_info_db, &prefix)?;

        tracing::info!(
            "Migrated stream {} from {} to {} ({} entries copied, {} deleted)",
            stream_id,
            self.path().display(),
            target.path().display(),
            copied,
            deleted
        );
        Ok(copied)
    }
}
