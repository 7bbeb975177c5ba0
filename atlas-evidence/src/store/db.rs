//! Minimal key-value backend used by the evidence store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use atlas_common::error::{AtlasError, Result};

/// One step of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Durable, ordered key-value storage.
pub trait Db: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies every operation or none of them.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;
}

/// In-memory backend. Clones share the same data, which lets a test drop a
/// pool and reopen another one over the same "disk".
#[derive(Clone, Default)]
pub struct MemDb {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MemDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDb").field("entries", &self.len()).finish()
    }
}

fn poisoned() -> AtlasError {
    AtlasError::Storage("memdb lock poisoned".to_string())
}

impl Db for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for op in ops {
            match op {
                BatchOp::Put(k, v) => {
                    entries.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    entries.remove(&k);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_iteration_is_ordered_and_bounded() {
        let db = MemDb::new();
        db.set(&[1, 3], b"c").unwrap();
        db.set(&[1, 1], b"a").unwrap();
        db.set(&[2, 0], b"x").unwrap();
        db.set(&[0, 9], b"y").unwrap();

        let items = db.iter_prefix(&[1]).unwrap();
        let keys: Vec<Vec<u8>> = items.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![1, 1], vec![1, 3]]);
    }

    #[test]
    fn test_clones_share_data() {
        let db = MemDb::new();
        let other = db.clone();
        db.set(b"k", b"v").unwrap();
        assert_eq!(other.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(other.has(b"k").unwrap());
    }

    #[test]
    fn test_batch_applies_puts_and_deletes() {
        let db = MemDb::new();
        db.set(b"old", b"1").unwrap();
        db.write_batch(vec![
            BatchOp::Put(b"new".to_vec(), b"2".to_vec()),
            BatchOp::Delete(b"old".to_vec()),
        ])
        .unwrap();
        assert!(!db.has(b"old").unwrap());
        assert_eq!(db.get(b"new").unwrap(), Some(b"2".to_vec()));
    }
}
