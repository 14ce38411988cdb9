mod memory;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{DurableStore, LAST_UPDATE_KEY, StorageChange, TOKEN_KEY};
