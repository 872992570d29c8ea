// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The relational CRUD shared by all three index backends (§4.2). Each
//! backend (plaintext, encrypted-local, encrypted-remote) differs only in
//! how it gets a plaintext sqlite file onto local disk before opening it and
//! what it does with that file on `Close` -- the schema and queries
//! themselves are identical, same as the original's three near-identical
//! `fsindex`/`efsindex`/`s3index` packages.

use std::path::Path;

use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_util::FileRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const CREATE_SCRIPT: &str = "CREATE TABLE IF NOT EXISTS fileinfo (
    path TEXT PRIMARY KEY NOT NULL,
    lastsynced TEXT NOT NULL,
    updated TEXT NOT NULL,
    deleted INTEGER NOT NULL,
    storedpath TEXT NULL,
    trackingvalue INTEGER NULL
);";

pub struct SqliteStore {
    conn: Connection,
}

fn to_rfc3339(d: DateTime<Utc>) -> String {
    d.to_rfc3339()
}

fn from_rfc3339(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| make_err!(Code::IndexError, "corrupt timestamp in index: {e}"))
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)
            .map_err(|e| make_err!(Code::IndexError, "cannot open sqlite db at {}: {e}", path.display()))?;
        conn.execute_batch(CREATE_SCRIPT)
            .map_err(|e| make_err!(Code::IndexError, "cannot run create script: {e}"))?;
        Ok(SqliteStore { conn })
    }

    pub fn get_file_info(&self, path: &str) -> Result<FileRecord, Error> {
        self.conn
            .query_row(
                "SELECT path, lastsynced, updated, deleted, storedpath, trackingvalue
                 FROM fileinfo WHERE path = ?1",
                params![path],
                row_to_record,
            )
            .optional()
            .map_err(|e| make_err!(Code::IndexError, "error querying database: {e}"))?
            .err_tip_with_code(|_| (Code::NotFound, format!("no index entry for path: {path}")))
    }

    pub fn set_file_info(&self, record: &FileRecord) -> Result<(), Error> {
        self.conn
            .execute(
                "INSERT INTO fileinfo (path, lastsynced, updated, deleted, storedpath, trackingvalue)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                    lastsynced = excluded.lastsynced,
                    updated = excluded.updated,
                    deleted = excluded.deleted,
                    storedpath = excluded.storedpath,
                    trackingvalue = excluded.trackingvalue",
                params![
                    record.path,
                    to_rfc3339(record.last_synced),
                    to_rfc3339(record.updated),
                    record.deleted,
                    record.stored_path,
                    record.tracking_value,
                ],
            )
            .map_err(|e| make_err!(Code::IndexError, "cannot upsert file info: {e}"))?;
        Ok(())
    }

    pub fn update_path(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let affected = self
            .conn
            .execute(
                "UPDATE fileinfo SET path = ?1 WHERE path = ?2",
                params![new_path, old_path],
            )
            .map_err(|e| make_err!(Code::IndexError, "could not update path: {e}"))?;
        if affected == 0 {
            return Err(make_err!(Code::NotFound, "no index entry for path: {old_path}"));
        }
        Ok(())
    }

    pub fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<FileRecord>, Error> {
        let effective_limit = if limit <= 0 { -1 } else { limit };
        let mut stmt = if offset > 0 {
            self.conn
                .prepare(
                    "SELECT path, lastsynced, updated, deleted, storedpath, trackingvalue
                     FROM fileinfo LIMIT ?1 OFFSET ?2",
                )
                .map_err(|e| make_err!(Code::IndexError, "could not prepare page query: {e}"))?
        } else {
            self.conn
                .prepare(
                    "SELECT path, lastsynced, updated, deleted, storedpath, trackingvalue
                     FROM fileinfo LIMIT ?1",
                )
                .map_err(|e| make_err!(Code::IndexError, "could not prepare page query: {e}"))?
        };

        let rows = if offset > 0 {
            stmt.query_map(params![effective_limit, offset], row_to_record)
        } else {
            stmt.query_map(params![effective_limit], row_to_record)
        }
        .map_err(|e| make_err!(Code::IndexError, "could not get rows: {e}"))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| make_err!(Code::IndexError, "error scanning row: {e}"))?);
        }
        Ok(results)
    }

    pub fn mark_deleted(&self, tracking_value: i64) -> Result<(), Error> {
        // Select the rows this call is about to tombstone *before* mutating
        // anything, guarded by `deleted = 0` exactly like the original's
        // single UPDATE (`fsindex.go:35`). Pre-existing tombstones never
        // match this SELECT, so a record already marked deleted on a prior
        // run is never re-touched here.
        let mut stmt = self
            .conn
            .prepare("SELECT path, lastsynced FROM fileinfo WHERE trackingvalue != ?1 AND deleted = 0")
            .map_err(|e| make_err!(Code::IndexError, "could not prepare mark-deleted query: {e}"))?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![tracking_value], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| make_err!(Code::IndexError, "could not scan rows to delete: {e}"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| make_err!(Code::IndexError, "error scanning rows to delete: {e}"))?;
        drop(stmt);

        // `updated` is bumped to `lastsynced + 1s`, not just set equal to
        // it, so the tombstone sorts strictly after the last agreed-upon
        // state; sqlite has no portable RFC3339 interval arithmetic, so the
        // nudge happens here in Rust rather than in the UPDATE itself.
        for (path, last_synced) in rows {
            let last_synced = from_rfc3339(&last_synced)?;
            let nudged = last_synced + chrono::Duration::seconds(1);
            self.conn
                .execute(
                    "UPDATE fileinfo SET deleted = 1, updated = ?1 WHERE path = ?2",
                    params![to_rfc3339(nudged), path],
                )
                .map_err(|e| make_err!(Code::IndexError, "could not mark deleted files: {e}"))?;
        }
        Ok(())
    }

    pub fn close(self) {
        drop(self.conn);
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(0)?;
    let last_synced: String = row.get(1)?;
    let updated: String = row.get(2)?;
    let deleted: bool = row.get(3)?;
    let stored_path: Option<String> = row.get(4)?;
    let tracking_value: Option<i64> = row.get(5)?;

    Ok(FileRecord {
        path,
        updated: from_rfc3339(&updated).unwrap_or_default(),
        last_synced: from_rfc3339(&last_synced).unwrap_or_default(),
        deleted,
        stored_path,
        tracking_value: tracking_value.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buttercup_util::FileRecord;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    fn store() -> SqliteStore {
        SqliteStore::open(Path::new(":memory:")).unwrap()
    }

    #[test]
    fn missing_path_is_not_found() {
        let s = store();
        let err = s.get_file_info("missing.txt").unwrap_err();
        assert_eq!(err.code, Code::NotFound);
    }

    #[test]
    fn set_then_get_round_trips() {
        let s = store();
        let mut record = FileRecord::new("foo.txt", Utc::now());
        record.stored_path = Some("ab/cd/ef".to_string());
        s.set_file_info(&record).unwrap();
        let fetched = s.get_file_info("foo.txt").unwrap();
        assert_eq!(fetched.path, "foo.txt");
        assert_eq!(fetched.stored_path, record.stored_path);
    }

    #[test]
    fn update_path_renames_in_place() {
        let s = store();
        s.set_file_info(&FileRecord::new("a.txt", Utc::now())).unwrap();
        s.update_path("a.txt", "b.txt").unwrap();
        assert!(s.get_file_info("a.txt").is_err());
        assert!(s.get_file_info("b.txt").is_ok());
    }

    #[test]
    fn update_path_on_missing_is_not_found() {
        let s = store();
        let err = s.update_path("missing", "new").unwrap_err();
        assert_eq!(err.code, Code::NotFound);
    }

    #[test]
    fn get_page_zero_limit_returns_all() {
        let s = store();
        for i in 0..5 {
            s.set_file_info(&FileRecord::new(format!("f{i}.txt"), Utc::now())).unwrap();
        }
        assert_eq!(s.get_page(0, 0).unwrap().len(), 5);
    }

    #[test]
    fn get_page_offset_past_end_is_empty() {
        let s = store();
        s.set_file_info(&FileRecord::new("only.txt", Utc::now())).unwrap();
        assert!(s.get_page(10, 0).unwrap().is_empty());
    }

    #[test]
    fn mark_deleted_tombstones_unstamped_rows() {
        let s = store();
        let now = Utc::now();
        let mut kept = FileRecord::new("kept.txt", now);
        kept.tracking_value = 7;
        kept.last_synced = now;
        s.set_file_info(&kept).unwrap();

        let mut stale = FileRecord::new("stale.txt", now);
        stale.tracking_value = 6;
        stale.last_synced = now;
        s.set_file_info(&stale).unwrap();

        s.mark_deleted(7).unwrap();

        assert!(!s.get_file_info("kept.txt").unwrap().deleted);
        let stale_after = s.get_file_info("stale.txt").unwrap();
        assert!(stale_after.deleted);
        assert!(stale_after.updated > now);
    }

    #[test]
    fn mark_deleted_does_not_re_nudge_an_already_synced_tombstone() {
        let s = store();
        let now = Utc::now();

        let mut stale = FileRecord::new("stale.txt", now);
        stale.tracking_value = 6;
        stale.last_synced = now;
        s.set_file_info(&stale).unwrap();

        // First rescan (epoch 7) tombstones it and nudges `updated` ahead of
        // `lastsynced`.
        s.mark_deleted(7).unwrap();
        let after_first = s.get_file_info("stale.txt").unwrap();
        assert!(after_first.deleted);
        assert!(after_first.updated > now);

        // The deletion gets synced: `lastsynced` catches up to `updated`.
        let mut synced = after_first.clone();
        synced.last_synced = synced.updated;
        s.set_file_info(&synced).unwrap();

        // A later rescan (epoch 8) must not touch the already-deleted
        // record again -- its stale `trackingvalue` (6) still differs from
        // the new epoch, but `deleted = 0` no longer matches it.
        s.mark_deleted(8).unwrap();
        let after_second = s.get_file_info("stale.txt").unwrap();
        assert_eq!(after_second.updated, synced.updated);
        assert_eq!(after_second.last_synced, synced.last_synced);
    }
}
