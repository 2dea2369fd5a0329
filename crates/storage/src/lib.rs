pub mod db;
pub mod kv;
pub mod ledger;

pub use db::{create_db, create_memory_db, DbPool};
pub use kv::{KeyedStore, MemoryStore, SqliteStore, StoreError};
pub use ledger::{MemoryLedger, SqliteLedger};
