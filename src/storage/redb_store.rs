//! Minimal embedded key-value store wrapping `redb`, trimmed from the
//! teacher's `nexus_raft::storage::redb_store` down to what the WAL,
//! snapshot directory and applied-index store actually need: a single
//! default table with get/set/delete, plus ordered scan for the WAL's
//! "last entry" lookup.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::Result;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("default");

/// A redb-backed key-value store.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open or create a redb database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path)?;
        {
            // Ensure the table exists so reads against an empty store
            // don't have to special-case TableDoesNotExist.
            let write_txn = db.begin_write()?;
            let _ = write_txn.open_table(TABLE)?;
            write_txn.commit()?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn set_many(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            for (k, v) in entries {
                table.insert(k.as_slice(), v.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove_range(&self, keys: impl Iterator<Item = Vec<u8>>) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            for k in keys {
                table.remove(k.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        Ok(table.is_empty()?)
    }

    /// Last key-value pair in lexicographic key order.
    pub fn last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        match table.iter()?.next_back() {
            Some(Ok((k, v))) => Ok(Some((k.value().to_vec(), v.value().to_vec()))),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// All key-value pairs with keys in `[low, high)`, in key order.
    pub fn range(&self, low: &[u8], high: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let mut out = Vec::new();
        for item in table.range(low..high)? {
            let (k, v) = item?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(out)
    }
}
