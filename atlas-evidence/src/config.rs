use std::{fs, io, path::Path, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{db::{Db, MemDb}, redb::RedbDb};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Redb,
}

/// Where and how the evidence pool keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub backend: StorageBackend,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/evidence"),
            backend: StorageBackend::Redb,
        }
    }
}

impl EvidenceConfig {
    pub fn open_db(&self) -> Result<Arc<dyn Db>> {
        let db: Arc<dyn Db> = match self.backend {
            StorageBackend::Memory => Arc::new(MemDb::new()),
            StorageBackend::Redb => Arc::new(RedbDb::open(&self.data_dir)?),
        };
        Ok(db)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str::<EvidenceConfig>(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_roundtrip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence.json");

        let config = EvidenceConfig {
            data_dir: dir.path().join("db"),
            backend: StorageBackend::Memory,
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(EvidenceConfig::load_from_file(&path).unwrap(), config);

        fs::write(&path, r#"{ "data_dir": "somewhere" }"#).unwrap();
        let loaded = EvidenceConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.backend, StorageBackend::Redb);

        fs::write(&path, "not json").unwrap();
        let err = EvidenceConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_open_redb_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = EvidenceConfig {
            data_dir: dir.path().join("nested").join("evidence"),
            backend: StorageBackend::Redb,
        };
        let db = config.open_db().unwrap();
        db.set(b"k", b"v").unwrap();
        assert!(config.data_dir.join("evidence.redb").exists());
    }
}
