use crate::contracts::error::StoreError;
use crate::contracts::group::{AdvanceFormula, GroupInfo, IdRange};

/// Durable per-group segment records.
///
/// Connections are opened through [`SegmentStore::connect`] and handed back
/// to every operation, so callers decide how many exist (see `pool`).
///
/// # Invariants
/// - `create` never modifies an existing row
/// - `advance` bumps `count` by exactly one per successful call
/// - `advance` only writes if the row still holds the state it read
/// - Rows are never deleted
pub trait SegmentStore: Send + Sync {
    type Conn: Send;

    /// Opens a new connection to the backing store.
    fn connect(&self) -> Result<Self::Conn, StoreError>;

    /// Reads the row for `group`. Returns `None` if the group does not exist.
    fn get(&self, conn: &mut Self::Conn, group: &str) -> Result<Option<GroupInfo>, StoreError>;

    /// Inserts a zero-width segment at `start`.
    /// Returns false without touching the row if `group` already exists.
    fn create(
        &self,
        conn: &mut Self::Conn,
        group: &str,
        start: u64,
        step: u32,
    ) -> Result<bool, StoreError>;

    /// Replaces the current segment of `group` with the next one.
    /// Returns `None` if the group does not exist.
    fn advance(
        &self,
        conn: &mut Self::Conn,
        group: &str,
        formula: AdvanceFormula,
    ) -> Result<Option<IdRange>, StoreError>;
}
