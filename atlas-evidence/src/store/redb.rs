//! Durable backend on top of redb.

use std::fmt;
use std::path::Path;

use atlas_common::error::{AtlasError, Result};
use redb::{Database, ReadableTable, TableDefinition};

use super::db::{BatchOp, Db};

const EVIDENCE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("evidence");

pub struct RedbDb {
    db: Database,
}

impl fmt::Debug for RedbDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbDb")
            .field("db", &"Redb")
            .finish()
    }
}

fn storage_err<E: fmt::Display>(e: E) -> AtlasError {
    AtlasError::Storage(e.to_string())
}

impl RedbDb {
    /// Opens (or creates) `evidence.redb` inside `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let path = data_dir.as_ref().join("evidence.redb");

        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _table = write_txn.open_table(EVIDENCE_TABLE).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

impl Db for RedbDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(EVIDENCE_TABLE).map_err(storage_err)?;

        let value = table.get(key).map_err(storage_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_batch(vec![BatchOp::Put(key.to_vec(), value.to_vec())])
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write_batch(vec![BatchOp::Delete(key.to_vec())])
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(EVIDENCE_TABLE).map_err(storage_err)?;

        let mut out = Vec::new();
        for entry in table.range::<&[u8]>(prefix..).map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(EVIDENCE_TABLE).map_err(storage_err)?;
            for op in &ops {
                match op {
                    BatchOp::Put(k, v) => {
                        table.insert(k.as_slice(), v.as_slice()).map_err(storage_err)?;
                    }
                    BatchOp::Delete(k) => {
                        table.remove(k.as_slice()).map_err(storage_err)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = RedbDb::open(dir.path()).unwrap();
            db.write_batch(vec![
                BatchOp::Put(vec![1, 2], b"a".to_vec()),
                BatchOp::Put(vec![1, 1], b"b".to_vec()),
                BatchOp::Put(vec![2, 0], b"c".to_vec()),
            ])
            .unwrap();
            db.delete(&[2, 0]).unwrap();
        }

        let db = RedbDb::open(dir.path()).unwrap();
        let items = db.iter_prefix(&[1]).unwrap();
        assert_eq!(
            items,
            vec![(vec![1, 1], b"b".to_vec()), (vec![1, 2], b"a".to_vec())]
        );
        assert!(!db.has(&[2, 0]).unwrap());
    }
}
