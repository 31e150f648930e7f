//! Repository Layer
//!
//! Key-value storage behind the persistence adapter.

mod traits;
mod db;
mod sqlite_store;
mod memory_store;


pub use traits::KeyValueStore;
pub use db::{init_db, DbState};
pub use sqlite_store::SqliteStore;
pub use memory_store::MemoryStore;
