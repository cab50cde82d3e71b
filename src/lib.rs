pub mod config;
pub mod contracts;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod sign;
pub mod storage;

pub use config::StorageConfig;
pub use provider::{global, SegmentAllocator, SqliteSegmentAllocator};
