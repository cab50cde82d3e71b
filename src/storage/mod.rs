mod memory;
mod sqlite;

pub use memory::{MemoryConnection, MemorySegmentStore};
pub use sqlite::SqliteSegmentStore;
