//! The database capability: the only path from script land to the SQL
//! engine. `rusqlite` plays the "embedded SQL engine" role spec.md treats
//! as an external library exposing prepare/bind/step/finalize and PRAGMA
//! tuning; everything below this module is rusqlite's problem, not ours.
//!
//! The prepared-statement cache described in spec.md's data model
//! (bounded LRU, reset-and-reuse on hit, finalize-and-free on eviction) is
//! rusqlite's own statement cache (`Connection::prepare_cached`), not a
//! reimplementation — see DESIGN.md for why duplicating a self-referential
//! LRU cache in safe Rust would just be re-deriving what the engine already
//! gets right.

use hull_core::{Column, HullError, RowControl, Value, STACK_ROW_COLUMNS};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::cell::Cell;
use std::path::Path;

/// Statements beyond this bound are evicted LRU; sized generously for a
/// single-process local application.
pub const STATEMENT_CACHE_CAPACITY: usize = 128;

/// A single database handle, shared across all requests. Transactions are
/// per-request; [`Database::guard_stale_txn`] rolls back whatever a crashed
/// prior request left open before any new work runs.
pub struct Database {
    conn: Connection,
    in_transaction: Cell<bool>,
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.pragma_update(None, "cache_size", -16_384i64)?; // 16 MiB, negative = KiB
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 256 * 1024 * 1024i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    Ok(())
}

impl Database {
    /// Open the database at `path`, applying the fixed PRAGMA set.
    pub fn init(path: &Path) -> Result<Self, HullError> {
        let conn = Connection::open(path).map_err(|e| HullError::IoError(e.to_string()))?;
        apply_pragmas(&conn).map_err(|e| HullError::IoError(e.to_string()))?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(Database {
            conn,
            in_transaction: Cell::new(false),
        })
    }

    /// Roll back any transaction left open by a crashed prior request,
    /// restoring autocommit, before any work in the current request runs.
    pub fn guard_stale_txn(&self) -> Result<(), HullError> {
        if self.in_transaction.get() && !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| HullError::IoError(e.to_string()))?;
        }
        self.in_transaction.set(false);
        Ok(())
    }

    pub fn begin(&self) -> Result<(), HullError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| HullError::IoError(e.to_string()))?;
        self.in_transaction.set(true);
        Ok(())
    }

    pub fn commit(&self) -> Result<(), HullError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| HullError::IoError(e.to_string()))?;
        self.in_transaction.set(false);
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), HullError> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| HullError::IoError(e.to_string()))?;
        self.in_transaction.set(false);
        Ok(())
    }

    pub fn last_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Execute a non-query statement (insert/update/delete/ddl). Returns
    /// the number of rows affected.
    pub fn exec(&self, sql: &str, params: &[Value<'_>]) -> Result<usize, HullError> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| HullError::IoError(e.to_string()))?;
        bind_params(&mut stmt, params)?;
        stmt.raw_execute().map_err(|e| {
            // Failed binding/execution resets the statement before return —
            // `raw_execute` on a cached statement is reset on drop regardless
            // of outcome, so there is no partial state left behind.
            HullError::IoError(e.to_string())
        })
    }

    /// Run `sql` and invoke `row_cb` once per row. The capability owns
    /// column storage for the duration of the callback only; `row_cb` must
    /// copy what it needs. Returns the number of rows visited.
    pub fn query<F>(&self, sql: &str, params: &[Value<'_>], mut row_cb: F) -> Result<usize, HullError>
    where
        F: FnMut(&[Column<'_>]) -> RowControl,
    {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| HullError::IoError(e.to_string()))?;
        bind_params(&mut stmt, params)?;

        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.raw_query();
        let mut visited = 0usize;

        loop {
            let row = rows
                .next()
                .map_err(|e| HullError::IoError(e.to_string()))?;
            let Some(row) = row else { break };
            visited += 1;

            let mut stack_columns: [Option<Column<'_>>; STACK_ROW_COLUMNS] = [None; STACK_ROW_COLUMNS];
            let mut heap_columns: Vec<Column<'_>> = Vec::new();
            let wide = column_names.len() > STACK_ROW_COLUMNS;
            if wide {
                heap_columns.reserve(column_names.len());
            }

            for (idx, name) in column_names.iter().enumerate() {
                let value_ref = row
                    .get_ref(idx)
                    .map_err(|e| HullError::IoError(e.to_string()))?;
                // `owned_text`/`owned_blob` borrow from the row's lifetime,
                // which lives exactly as long as this callback invocation.
                let value = convert_value(value_ref);
                let column = Column { name, value };
                if wide {
                    heap_columns.push(column);
                } else {
                    stack_columns[idx] = Some(column);
                }
            }

            let control = if wide {
                row_cb(&heap_columns)
            } else {
                let slice: Vec<Column<'_>> = stack_columns[..column_names.len()]
                    .iter()
                    .map(|c| c.unwrap())
                    .collect();
                row_cb(&slice)
            };

            if control == RowControl::Stop {
                break;
            }
        }

        Ok(visited)
    }

    pub fn shutdown(self) -> Result<(), HullError> {
        self.conn
            .close()
            .map_err(|(_, e)| HullError::IoError(e.to_string()))
    }
}

fn bind_params(stmt: &mut rusqlite::CachedStatement<'_>, params: &[Value<'_>]) -> Result<(), HullError> {
    for (idx, value) in params.iter().enumerate() {
        let result = match value {
            Value::Nil => stmt.raw_bind_parameter(idx + 1, rusqlite::types::Null),
            Value::Int(i) => stmt.raw_bind_parameter(idx + 1, *i),
            Value::Real(f) => stmt.raw_bind_parameter(idx + 1, *f),
            Value::Text(s) => stmt.raw_bind_parameter(idx + 1, *s),
            Value::Blob(b) => stmt.raw_bind_parameter(idx + 1, *b),
            Value::Bool(b) => stmt.raw_bind_parameter(idx + 1, *b as i64),
        };
        if let Err(e) = result {
            // Reset before returning so no partial binding state survives.
            stmt.discard();
            return Err(HullError::IoError(e.to_string()));
        }
    }
    Ok(())
}

fn convert_value<'a>(value_ref: ValueRef<'a>) -> Value<'a> {
    match value_ref {
        ValueRef::Null => Value::Nil,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(std::str::from_utf8(t).unwrap_or("")),
        ValueRef::Blob(b) => Value::Blob(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db() -> Database {
        Database::init(Path::new(":memory:")).unwrap()
    }

    #[test]
    fn round_trip_value_by_type() {
        let db = scratch_db();
        db.exec("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        db.exec("INSERT INTO t (v) VALUES (?)", &[Value::Int(42)]).unwrap();
        let mut seen = None;
        db.query("SELECT v FROM t", &[], |cols| {
            seen = cols[0].value.as_int();
            RowControl::Stop
        })
        .unwrap();
        assert_eq!(seen, Some(42));
    }

    #[test]
    fn guard_stale_txn_rolls_back_open_transaction() {
        let db = scratch_db();
        db.exec("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        db.begin().unwrap();
        db.exec("INSERT INTO t (v) VALUES (1)", &[]).unwrap();
        // Simulate a crashed request: never commits.
        db.guard_stale_txn().unwrap();
        let mut count = 0i64;
        db.query("SELECT COUNT(*) FROM t", &[], |cols| {
            count = cols[0].value.as_int().unwrap();
            RowControl::Stop
        })
        .unwrap();
        assert_eq!(count, 0, "stale insert should have been rolled back");
        // Autocommit restored: a fresh transaction should succeed.
        db.begin().unwrap();
        db.exec("INSERT INTO t (v) VALUES (2)", &[]).unwrap();
        db.commit().unwrap();
    }

    #[test]
    fn wide_row_spills_to_heap() {
        let db = scratch_db();
        let cols: Vec<String> = (0..40).map(|i| format!("c{i} INTEGER")).collect();
        db.exec(&format!("CREATE TABLE wide ({})", cols.join(", ")), &[])
            .unwrap();
        let placeholders: Vec<&str> = (0..40).map(|_| "?").collect();
        let params: Vec<Value> = (0..40).map(|i| Value::Int(i)).collect();
        db.exec(
            &format!("INSERT INTO wide VALUES ({})", placeholders.join(", ")),
            &params,
        )
        .unwrap();
        let mut seen_columns = 0;
        db.query("SELECT * FROM wide", &[], |cols| {
            seen_columns = cols.len();
            RowControl::Stop
        })
        .unwrap();
        assert_eq!(seen_columns, 40);
    }

    #[test]
    fn exec_error_does_not_poison_connection() {
        let db = scratch_db();
        assert!(db.exec("NOT VALID SQL", &[]).is_err());
        db.exec("CREATE TABLE t (v INTEGER)", &[]).unwrap();
    }
}
