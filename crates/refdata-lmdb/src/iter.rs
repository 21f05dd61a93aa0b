//! Cursor scans over a single database
//!
//! Seeks use `MDB_SET_RANGE` through [`Cursor::get`] so a start key past
//! the last entry ends the scan instead of failing.

use lmdb::{Cursor, Database, Transaction};
use lmdb_sys::{MDB_FIRST, MDB_GET_CURRENT, MDB_NEXT, MDB_SET_RANGE};
use refdata_core::error::{RefDataError, Result};

/// Visit entries with key >= `start` in key order until `visit` returns
/// `false`. An empty `start` scans from the first entry.
pub fn scan_from<'txn, T, F>(txn: &'txn T, db: Database, start: &[u8], mut visit: F) -> Result<()>
where
    T: Transaction,
    F: FnMut(&'txn [u8], &'txn [u8]) -> Result<bool>,
{
    let cursor = txn
        .open_ro_cursor(db)
        .map_err(|e| RefDataError::Transaction(e.to_string()))?;

    let mut next = if start.is_empty() {
        cursor.get(None, None, MDB_FIRST)
    } else {
        cursor
            .get(Some(start), None, MDB_SET_RANGE)
            .and_then(|_| cursor.get(None, None, MDB_GET_CURRENT))
    };

    loop {
        match next {
            Ok((Some(key), value)) => {
                if !visit(key, value)? {
                    break;
                }
            }
            Ok((None, _)) | Err(lmdb::Error::NotFound) => break,
            Err(e) => return Err(RefDataError::Transaction(e.to_string())),
        }
        next = cursor.get(None, None, MDB_NEXT);
    }
    Ok(())
}

/// Visit every entry whose key starts with `prefix`
pub fn scan_prefix<'txn, T, F>(txn: &'txn T, db: Database, prefix: &[u8], mut visit: F) -> Result<()>
where
    T: Transaction,
    F: FnMut(&'txn [u8], &'txn [u8]) -> Result<bool>,
{
    scan_from(txn, db, prefix, |key, value| {
        if !key.starts_with(prefix) {
            return Ok(false);
        }
        visit(key, value)
    })
}

/// True if any key starts with `prefix`
pub fn any_with_prefix<T: Transaction>(txn: &T, db: Database, prefix: &[u8]) -> Result<bool> {
    let mut found = false;
    scan_prefix(txn, db, prefix, |_, _| {
        found = true;
        Ok(false)
    })?;
    Ok(found)
}

/// Up to `limit` keys starting with `prefix`, copied out of the transaction
pub fn keys_with_prefix<T: Transaction>(
    txn: &T,
    db: Database,
    prefix: &[u8],
    limit: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    if limit == 0 {
        return Ok(keys);
    }
    scan_prefix(txn, db, prefix, |key, _| {
        keys.push(key.to_vec());
        Ok(keys.len() < limit)
    })?;
    Ok(keys)
}

pub fn count_entries<T: Transaction>(txn: &T, db: Database) -> Result<usize> {
    let mut count = 0;
    scan_from(txn, db, &[], |_, _| {
        count += 1;
        Ok(true)
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmdb::{DatabaseFlags, Environment, WriteFlags};
    use tempfile::TempDir;

    fn env_with(keys: &[&[u8]]) -> (TempDir, Environment, Database) {
        let temp_dir = TempDir::new().unwrap();
        let mut builder = Environment::new();
        builder.set_max_dbs(1);
        let env = builder.open(temp_dir.path()).unwrap();
        let db = env.create_db(Some("test"), DatabaseFlags::empty()).unwrap();
        {
            let mut txn = env.begin_rw_txn().unwrap();
            for key in keys {
                txn.put(db, key, b"v", WriteFlags::empty()).unwrap();
            }
            txn.commit().unwrap();
        }
        (temp_dir, env, db)
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let (_dir, env, db) = env_with(&[b"a1", b"a2", b"b1", b"b2", b"c1"]);
        let txn = env.begin_ro_txn().unwrap();
        let keys = keys_with_prefix(&txn, db, b"b", usize::MAX).unwrap();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
        assert_eq!(keys_with_prefix(&txn, db, b"a", 1).unwrap().len(), 1);
        assert_eq!(count_entries(&txn, db).unwrap(), 5);
    }

    #[test]
    fn test_seek_past_last_key_is_empty() {
        let (_dir, env, db) = env_with(&[b"a1"]);
        let txn = env.begin_ro_txn().unwrap();
        assert!(!any_with_prefix(&txn, db, b"z").unwrap());
        assert!(any_with_prefix(&txn, db, b"a").unwrap());
    }

    #[test]
    fn test_empty_database() {
        let (_dir, env, db) = env_with(&[]);
        let txn = env.begin_ro_txn().unwrap();
        assert_eq!(count_entries(&txn, db).unwrap(), 0);
        assert!(!any_with_prefix(&txn, db, b"a").unwrap());
    }
}
