use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::db::{DedupRow, InsertDisposition, InsertOutcome, NewCrashEntry};

/// Oldest ledger schema that can be migrated forward; `0` is an empty file.
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Ledger written by a newer crashvault.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed deduplication ledger.
///
/// Each public method is a single atomic unit; nothing is held open between
/// calls beyond the connection itself.
#[derive(Debug)]
pub struct CrashLedger {
    conn: Connection,
}

impl CrashLedger {
    /// Open or create the ledger file and migrate it.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory ledger, handy for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Record one occurrence: insert a new row or bump the existing one.
    ///
    /// Re-inserting the dump directory the row already points at changes nothing.
    pub fn insert_or_bump(&self, entry: &NewCrashEntry) -> DbResult<InsertOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let disposition = match query_row(&tx, &entry.uuid, entry.uid)? {
            None => {
                tx.execute(
                    r#"
                    INSERT INTO crashes (uuid, uid, dump_dir, count, reported, message, time)
                    VALUES (?1, ?2, ?3, 1, 0, '', ?4)
                    "#,
                    params![entry.uuid, entry.uid, entry.dump_dir, entry.time],
                )?;
                InsertDisposition::Created
            }
            Some(row) if row.dump_dir == entry.dump_dir => InsertDisposition::AlreadyStored,
            Some(_) => {
                tx.execute(
                    r#"
                    UPDATE crashes
                    SET count = count + 1, time = ?3
                    WHERE uuid = ?1 AND uid = ?2
                    "#,
                    params![entry.uuid, entry.uid, entry.time],
                )?;
                InsertDisposition::Repeat
            }
        };

        let row = query_row(&tx, &entry.uuid, entry.uid)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(InsertOutcome { row, disposition })
    }

    pub fn get(&self, uuid: &str, uid: u32) -> DbResult<Option<DedupRow>> {
        query_row(&self.conn, uuid, uid)
    }

    /// Rows of `uid`, or all rows when `uid` is `None`, ordered by uuid.
    pub fn list(&self, uid: Option<u32>) -> DbResult<Vec<DedupRow>> {
        let mut stmt = if uid.is_some() {
            self.conn.prepare(
                r#"
                SELECT uuid, uid, dump_dir, count, reported, message, time
                FROM crashes
                WHERE uid = ?1
                ORDER BY uuid, uid
                "#,
            )?
        } else {
            self.conn.prepare(
                r#"
                SELECT uuid, uid, dump_dir, count, reported, message, time
                FROM crashes
                ORDER BY uuid, uid
                "#,
            )?
        };

        let rows = if let Some(uid) = uid {
            stmt.query_map(params![uid], map_row)?
        } else {
            stmt.query_map([], map_row)?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Row that references `dump_dir`, if any.
    pub fn find_by_dump_dir(&self, dump_dir: &str) -> DbResult<Option<DedupRow>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT uuid, uid, dump_dir, count, reported, message, time
                FROM crashes
                WHERE dump_dir = ?1
                "#,
                params![dump_dir],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mark a row reported with the given message. Returns whether a row matched.
    pub fn set_reported(&self, uuid: &str, uid: u32, message: &str) -> DbResult<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE crashes
            SET reported = 1, message = ?3
            WHERE uuid = ?1 AND uid = ?2
            "#,
            params![uuid, uid, message],
        )?;
        Ok(changed > 0)
    }

    /// Delete a row. Returns whether a row matched.
    pub fn delete(&self, uuid: &str, uid: u32) -> DbResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM crashes WHERE uuid = ?1 AND uid = ?2", params![uuid, uid])?;
        Ok(changed > 0)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DedupRow> {
    let reported: i32 = row.get(4)?;
    Ok(DedupRow {
        uuid: row.get(0)?,
        uid: row.get(1)?,
        dump_dir: row.get(2)?,
        count: row.get(3)?,
        reported: reported != 0,
        message: row.get(5)?,
        time: row.get(6)?,
    })
}

fn query_row(conn: &Connection, uuid: &str, uid: u32) -> DbResult<Option<DedupRow>> {
    let row = conn
        .query_row(
            r#"
            SELECT uuid, uid, dump_dir, count, reported, message, time
            FROM crashes
            WHERE uuid = ?1 AND uid = ?2
            "#,
            params![uuid, uid],
            map_row,
        )
        .optional()?;
    Ok(row)
}

/// Migrate the ledger to `CURRENT_SCHEMA_VERSION`, tracked in `PRAGMA user_version`.
///
/// 1 creates `crashes` keyed by (uuid, uid); 2 indexes `dump_dir`.
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS crashes (
                uuid      TEXT NOT NULL,
                uid       INTEGER NOT NULL,
                dump_dir  TEXT NOT NULL,
                count     INTEGER NOT NULL DEFAULT 1,
                reported  INTEGER NOT NULL DEFAULT 0,
                message   TEXT NOT NULL DEFAULT '',
                time      INTEGER NOT NULL,
                PRIMARY KEY (uuid, uid)
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE INDEX IF NOT EXISTS crashes_dump_dir ON crashes (dump_dir);
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
