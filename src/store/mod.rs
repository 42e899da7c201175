pub mod repo;
pub mod sqlite;

pub use repo::{CacheStore, MemoryStore};
pub use sqlite::SqliteStore;
