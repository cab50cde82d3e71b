pub mod error;
pub mod group;
pub mod store;

pub use error::{AllocatorError, LockResultExt, PoolError, StoreError};
pub use group::{validate_group_name, AdvanceFormula, GroupInfo, IdRange, MAX_GROUP_NAME_LEN};
pub use store::SegmentStore;
