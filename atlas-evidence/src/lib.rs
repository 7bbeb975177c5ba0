//! Evidence pool: collects, verifies, persists and hands out proof of
//! validator misbehavior for inclusion in blocks.

pub mod config;
pub mod error;
pub mod expiry;
pub mod mock;
pub mod pending;
pub mod pool;
pub mod ports;
pub mod store;
pub mod verifier;

pub use config::{EvidenceConfig, StorageBackend};
pub use error::{EvidenceError, InvalidReason, Result};
pub use expiry::ExpiryPolicy;
pub use pending::{PendingList, PendingStatus};
pub use pool::Pool;
pub use ports::{BlockStore, StateProvider};
pub use store::{db::{Db, MemDb}, redb::RedbDb, EvidenceRecord, EvidenceStore, Stage};
