use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::contracts::{
    validate_group_name, AdvanceFormula, GroupInfo, IdRange, LockResultExt, SegmentStore,
    StoreError,
};

/// In-process segment store. State lives as long as any clone of the store.
///
/// Useful for embedding the allocator without a database and for tests:
/// [`MemorySegmentStore::operations`] counts every store call that reached
/// the rows.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentStore {
    rows: Arc<Mutex<HashMap<String, GroupInfo>>>,
    operations: Arc<AtomicU64>,
    connections: Arc<AtomicU64>,
}

/// Handle standing in for a connection. Carries only an id for logging.
#[derive(Debug)]
pub struct MemoryConnection {
    pub id: u64,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get`, `create` and `advance` calls served.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Number of groups stored.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.rows.lock().map_lock_err()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }
}

impl SegmentStore for MemorySegmentStore {
    type Conn = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, StoreError> {
        let id = self.connections.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryConnection { id })
    }

    fn get(
        &self,
        _conn: &mut MemoryConnection,
        group: &str,
    ) -> Result<Option<GroupInfo>, StoreError> {
        validate_group_name(group)?;
        self.record_operation();
        Ok(self.rows.lock().map_lock_err()?.get(group).cloned())
    }

    fn create(
        &self,
        _conn: &mut MemoryConnection,
        group: &str,
        start: u64,
        step: u32,
    ) -> Result<bool, StoreError> {
        validate_group_name(group)?;
        self.record_operation();

        let mut rows = self.rows.lock().map_lock_err()?;
        if rows.contains_key(group) {
            return Ok(false);
        }

        let now = Utc::now();
        rows.insert(
            group.to_string(),
            GroupInfo {
                name: group.to_string(),
                start,
                step,
                count: 0,
                range: IdRange::new(start, start),
                created_at: now,
                last_modified: now,
            },
        );
        Ok(true)
    }

    fn advance(
        &self,
        _conn: &mut MemoryConnection,
        group: &str,
        formula: AdvanceFormula,
    ) -> Result<Option<IdRange>, StoreError> {
        validate_group_name(group)?;
        self.record_operation();

        let mut rows = self.rows.lock().map_lock_err()?;
        let Some(info) = rows.get_mut(group) else {
            return Ok(None);
        };

        let next = info.next_range(formula)?;
        let count = info.count.checked_add(1).ok_or_else(|| StoreError::Overflow {
            group: group.to_string(),
            detail: format!("count {} + 1", info.count),
        })?;
        info.count = count;
        info.range = next;
        info.last_modified = Utc::now();

        Ok(Some(next))
    }
}
