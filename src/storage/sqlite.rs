use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::contracts::{
    validate_group_name, AdvanceFormula, GroupInfo, IdRange, SegmentStore, StoreError,
};

const CREATE_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "group" (
    name TEXT PRIMARY KEY NOT NULL,
    start INTEGER NOT NULL,
    step INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    "begin" INTEGER NOT NULL,
    "end" INTEGER NOT NULL,
    creation_dt INTEGER NOT NULL,
    last_modified INTEGER NOT NULL
)"#;

const SELECT_GROUP: &str = r#"SELECT start, step, count, "begin", "end", creation_dt, last_modified
    FROM "group" WHERE name = ?1"#;

const INSERT_GROUP: &str = r#"INSERT OR IGNORE INTO "group"
    (name, start, step, count, "begin", "end", creation_dt, last_modified)
    VALUES (?1, ?2, ?3, 0, ?2, ?2, ?4, ?4)"#;

/// Compare-and-swap on the state observed by the preceding read.
const ADVANCE_GROUP: &str = r#"UPDATE "group"
    SET "begin" = ?1, "end" = ?2, count = ?3, last_modified = ?4
    WHERE name = ?5 AND "begin" = ?6 AND "end" = ?7 AND count = ?8"#;

/// SQLite-backed segment store.
///
/// Every connection opens the same database file; WAL mode lets readers run
/// alongside the single writer, and `busy_timeout` bounds how long a writer
/// waits for another connection's write to finish.
///
/// Schema:
/// - "group": (name TEXT PRIMARY KEY, start, step, count, begin, end,
///   creation_dt, last_modified)
///
/// Unsigned values are stored bit-cast to `INTEGER` so the full `u64` range
/// survives. SQL only ever compares them for equality.
#[derive(Debug, Clone)]
pub struct SqliteSegmentStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteSegmentStore {
    /// Opens the database at `path`, creating the file and the schema if
    /// they do not exist.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidInput(
                "database path is empty".to_string(),
            ));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let store = Self { path, busy_timeout };
        let conn = store.connect()?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sqlite_err("PRAGMA journal_mode"))?;
        conn.execute(CREATE_TABLE, [])
            .map_err(sqlite_err(CREATE_TABLE))?;

        tracing::info!(
            path = %store.path.display(),
            journal_mode = %journal_mode,
            "Opened SQLite segment store"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SegmentStore for SqliteSegmentStore {
    type Conn = Connection;

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(sqlite_err("OPEN"))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(sqlite_err("PRAGMA busy_timeout"))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(sqlite_err("PRAGMA synchronous"))?;
        Ok(conn)
    }

    fn get(&self, conn: &mut Connection, group: &str) -> Result<Option<GroupInfo>, StoreError> {
        validate_group_name(group)?;

        let row = conn
            .query_row(SELECT_GROUP, params![group], |row| {
                Ok(RawRow {
                    start: row.get(0)?,
                    step: row.get(1)?,
                    count: row.get(2)?,
                    begin: row.get(3)?,
                    end: row.get(4)?,
                    creation_dt: row.get(5)?,
                    last_modified: row.get(6)?,
                })
            })
            .optional()
            .map_err(sqlite_err(SELECT_GROUP))?;

        row.map(|raw| raw.into_group_info(group)).transpose()
    }

    fn create(
        &self,
        conn: &mut Connection,
        group: &str,
        start: u64,
        step: u32,
    ) -> Result<bool, StoreError> {
        validate_group_name(group)?;

        let now = Utc::now().timestamp_millis();
        let inserted = conn
            .execute(
                INSERT_GROUP,
                params![group, to_column(start), i64::from(step), now],
            )
            .map_err(sqlite_err(INSERT_GROUP))?;

        Ok(inserted == 1)
    }

    fn advance(
        &self,
        conn: &mut Connection,
        group: &str,
        formula: AdvanceFormula,
    ) -> Result<Option<IdRange>, StoreError> {
        let Some(info) = self.get(conn, group)? else {
            return Ok(None);
        };

        let next = info.next_range(formula)?;
        let count = info.count.checked_add(1).ok_or_else(|| StoreError::Overflow {
            group: group.to_string(),
            detail: format!("count {} + 1", info.count),
        })?;

        let updated = conn
            .execute(
                ADVANCE_GROUP,
                params![
                    to_column(next.begin),
                    to_column(next.end),
                    to_column(count),
                    Utc::now().timestamp_millis(),
                    group,
                    to_column(info.range.begin),
                    to_column(info.range.end),
                    to_column(info.count),
                ],
            )
            .map_err(sqlite_err(ADVANCE_GROUP))?;

        if updated == 0 {
            return Err(StoreError::Conflict(group.to_string()));
        }

        tracing::debug!(
            group,
            begin = next.begin,
            end = next.end,
            count,
            "Advanced segment"
        );
        Ok(Some(next))
    }
}

/// Column values of one "group" row as SQLite returns them.
struct RawRow {
    start: i64,
    step: i64,
    count: i64,
    begin: i64,
    end: i64,
    creation_dt: i64,
    last_modified: i64,
}

impl RawRow {
    fn into_group_info(self, group: &str) -> Result<GroupInfo, StoreError> {
        let step = u32::try_from(self.step).map_err(|_| {
            StoreError::InvariantViolation(format!(
                "step {} of group '{}' does not fit in u32",
                self.step, group
            ))
        })?;

        Ok(GroupInfo {
            name: group.to_string(),
            start: from_column(self.start),
            step,
            count: from_column(self.count),
            range: IdRange::new(from_column(self.begin), from_column(self.end)),
            created_at: timestamp(group, "creation_dt", self.creation_dt)?,
            last_modified: timestamp(group, "last_modified", self.last_modified)?,
        })
    }
}

#[inline]
fn to_column(value: u64) -> i64 {
    value as i64
}

#[inline]
fn from_column(value: i64) -> u64 {
    value as u64
}

fn timestamp(group: &str, column: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::InvariantViolation(format!(
            "{} {} of group '{}' is out of range",
            column, millis, group
        ))
    })
}

fn sqlite_err(statement: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { statement, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteSegmentStore, Connection, TempDir) {
        let dir = TempDir::new().unwrap();
        let store =
            SqliteSegmentStore::open(dir.path().join("idcenter.db"), Duration::from_secs(1))
                .unwrap();
        let conn = store.connect().unwrap();
        (store, conn, dir)
    }

    #[test]
    fn create_inserts_zero_width_segment() {
        let (store, mut conn, _dir) = create_test_store();
        assert!(store.create(&mut conn, "orders", 1000, 2000).unwrap());

        let info = store.get(&mut conn, "orders").unwrap().unwrap();
        assert_eq!(info.name, "orders");
        assert_eq!(info.start, 1000);
        assert_eq!(info.step, 2000);
        assert_eq!(info.count, 0);
        assert_eq!(info.range, IdRange::new(1000, 1000));
        assert_eq!(info.created_at, info.last_modified);
    }

    #[test]
    fn create_leaves_existing_row_untouched() {
        let (store, mut conn, _dir) = create_test_store();
        assert!(store.create(&mut conn, "orders", 1000, 2000).unwrap());
        let before = store.get(&mut conn, "orders").unwrap().unwrap();

        assert!(!store.create(&mut conn, "orders", 5, 7).unwrap());
        let after = store.get(&mut conn, "orders").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn get_missing_group_is_none() {
        let (store, mut conn, _dir) = create_test_store();
        assert!(store.get(&mut conn, "missing").unwrap().is_none());
    }

    #[test]
    fn advance_missing_group_is_none() {
        let (store, mut conn, _dir) = create_test_store();
        let result = store
            .advance(&mut conn, "missing", AdvanceFormula::Contiguous)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn advance_persists_range_and_count() {
        let (store, mut conn, _dir) = create_test_store();
        store.create(&mut conn, "orders", 1000, 2000).unwrap();

        let first = store
            .advance(&mut conn, "orders", AdvanceFormula::Contiguous)
            .unwrap()
            .unwrap();
        assert_eq!(first, IdRange::new(1000, 3000));

        let second = store
            .advance(&mut conn, "orders", AdvanceFormula::Contiguous)
            .unwrap()
            .unwrap();
        assert_eq!(second, IdRange::new(3000, 5000));

        let info = store.get(&mut conn, "orders").unwrap().unwrap();
        assert_eq!(info.count, 2);
        assert_eq!(info.range, second);
        assert_eq!(info.start, 1000);
    }

    #[test]
    fn advance_uses_legacy_arithmetic_when_asked() {
        let (store, mut conn, _dir) = create_test_store();
        store.create(&mut conn, "legacy", 1000, 2000).unwrap();

        let first = store
            .advance(&mut conn, "legacy", AdvanceFormula::Legacy)
            .unwrap()
            .unwrap();
        assert_eq!(first, IdRange::new(2000, 3000));

        let second = store
            .advance(&mut conn, "legacy", AdvanceFormula::Legacy)
            .unwrap()
            .unwrap();
        assert_eq!(second, IdRange::new(5000, 5000));
    }

    #[test]
    fn full_u64_range_round_trips() {
        let (store, mut conn, _dir) = create_test_store();
        let start = u64::MAX - 10;
        store.create(&mut conn, "huge", start, 5).unwrap();

        let next = store
            .advance(&mut conn, "huge", AdvanceFormula::Contiguous)
            .unwrap()
            .unwrap();
        assert_eq!(next, IdRange::new(start, start + 5));

        let info = store.get(&mut conn, "huge").unwrap().unwrap();
        assert_eq!(info.start, start);
        assert_eq!(info.range, next);

        store
            .advance(&mut conn, "huge", AdvanceFormula::Contiguous)
            .unwrap();
        let err = store
            .advance(&mut conn, "huge", AdvanceFormula::Contiguous)
            .unwrap_err();
        assert!(matches!(err, StoreError::Overflow { .. }));
    }

    #[test]
    fn stale_write_is_rejected() {
        let (store, mut conn, _dir) = create_test_store();
        store.create(&mut conn, "orders", 0, 10).unwrap();

        // Another process advances the row between our read and write.
        let mut other = store.connect().unwrap();
        store
            .advance(&mut other, "orders", AdvanceFormula::Contiguous)
            .unwrap();

        let updated = conn
            .execute(
                ADVANCE_GROUP,
                params![10i64, 20i64, 1i64, 0i64, "orders", 0i64, 0i64, 0i64],
            )
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn hostile_group_names_are_plain_keys() {
        let (store, mut conn, _dir) = create_test_store();
        let name = r#"x"; DROP TABLE "group"; --"#;
        assert!(store.create(&mut conn, name, 1, 1).unwrap());
        assert!(store.create(&mut conn, "other", 1, 1).unwrap());
        assert_eq!(store.get(&mut conn, name).unwrap().unwrap().name, name);
        assert!(store.get(&mut conn, "other").unwrap().is_some());
    }

    #[test]
    fn invalid_group_names_are_rejected() {
        let (store, mut conn, _dir) = create_test_store();
        assert!(matches!(
            store.get(&mut conn, ""),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create(&mut conn, "", 1, 1),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn open_rejects_empty_path() {
        let result = SqliteSegmentStore::open("", Duration::from_secs(1));
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    }
}
