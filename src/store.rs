//!
//! tabletalk table store
//! ---------------------
//! Embedded relational store holding every table from the most recent upload
//! batch. Backed by SQLite, either transient (a single shared in-memory
//! connection, dies with the process) or persistent (a database file, where
//! each operation opens its own short-lived connection so one slow query
//! never blocks unrelated ingestion).
//!
//! Key responsibilities:
//! - `load`: create-or-replace a table from parsed tabular data.
//! - `query`: execute a read statement and return rows as ordered
//!   name-to-value mappings, projection order preserved.
//!
//! The public API centers around `TableStore`, a cheap-to-clone handle that
//! is shared across requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// One result row: column name -> JSON value, in projection order.
pub type Row = serde_json::Map<String, Value>;

/// How long a file-backed connection waits on a held write lock before
/// giving up, so overlapping ingestion and queries don't fail immediately
/// with "database is locked".
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine-level failure from a read query. The message is the engine's own
/// diagnostic text, passed through verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

/// Column affinity chosen by the ingestion pipeline's type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn affinity(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }
}

/// A fully parsed table ready to be materialized in the store.
///
/// `columns` preserves source header order; `kinds` is parallel to it.
/// Cell values are kept as raw strings (None = empty cell) and converted to
/// typed SQL values at load time according to the column kind.
#[derive(Debug, Clone)]
pub struct TableData {
    pub name: String,
    pub columns: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    pub rows: Vec<Vec<Option<String>>>,
}

enum Backing {
    /// Shared in-memory database guarded by a mutex. SQLite in-memory
    /// databases are per-connection, so all operations reuse this one.
    Memory(Mutex<Connection>),
    /// On-disk database file; every operation opens a fresh connection.
    File(PathBuf),
}

/// Shared handle to the relational store.
#[derive(Clone)]
pub struct TableStore {
    inner: Arc<Backing>,
}

impl TableStore {
    /// Create a transient store that lives as long as the process.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite database")?;
        Ok(Self { inner: Arc::new(Backing::Memory(Mutex::new(conn))) })
    }

    /// Create a persistent store at the given file path. The file is created
    /// lazily on first use.
    pub fn at_path<P: AsRef<Path>>(path: P) -> Self {
        Self { inner: Arc::new(Backing::File(path.as_ref().to_path_buf())) }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self.inner.as_ref() {
            Backing::Memory(conn) => f(&conn.lock()),
            Backing::File(path) => {
                let conn = Connection::open(path)
                    .with_context(|| format!("opening sqlite database at {}", path.display()))?;
                conn.busy_timeout(BUSY_TIMEOUT)
                    .context("setting sqlite busy timeout")?;
                f(&conn)
            }
        }
    }

    /// Create or replace the named table with the given data.
    ///
    /// Replace semantics: any existing table of the same name is dropped
    /// first, so queries afterwards see only the new rows.
    pub fn load(&self, table: &TableData) -> Result<()> {
        debug!(target: "tabletalk::store", "load: table='{}' columns={} rows={}",
            table.name, table.columns.len(), table.rows.len());
        self.with_conn(|conn| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name)))
                .with_context(|| format!("dropping previous table '{}'", table.name))?;

            let col_defs: Vec<String> = table
                .columns
                .iter()
                .zip(table.kinds.iter())
                .map(|(c, k)| format!("{} {}", quote_ident(c), k.affinity()))
                .collect();
            let create = format!("CREATE TABLE {} ({})", quote_ident(&table.name), col_defs.join(", "));
            conn.execute_batch(&create)
                .with_context(|| format!("creating table '{}'", table.name))?;

            let placeholders: Vec<String> =
                (1..=table.columns.len()).map(|i| format!("?{i}")).collect();
            let insert = format!(
                "INSERT INTO {} VALUES ({})",
                quote_ident(&table.name),
                placeholders.join(", ")
            );

            // Single transaction per table keeps the load fast and atomic;
            // dropping it without commit rolls back on any insert failure.
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx
                    .prepare(&insert)
                    .with_context(|| format!("preparing insert for '{}'", table.name))?;
                for row in &table.rows {
                    let params: Vec<SqlValue> = row
                        .iter()
                        .zip(table.kinds.iter())
                        .map(|(cell, kind)| to_sql_value(cell.as_deref(), *kind))
                        .collect();
                    stmt.execute(rusqlite::params_from_iter(params))
                        .with_context(|| format!("inserting row into '{}'", table.name))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Names of all user tables currently materialized in the store.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    /// Drop the named table if it exists.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        debug!(target: "tabletalk::store", "drop_table: table='{}'", name);
        self.with_conn(|conn| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))
                .with_context(|| format!("dropping table '{name}'"))
        })
    }

    /// Execute a read query and return its rows in order.
    ///
    /// Any engine failure (syntax error, unknown table/column) comes back as
    /// `QueryError` carrying the engine diagnostic; the caller decides how
    /// far it propagates.
    pub fn query(&self, sql: &str) -> std::result::Result<Vec<Row>, QueryError> {
        let run = |conn: &Connection| -> std::result::Result<Vec<Row>, QueryError> {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| QueryError { message: e.to_string() })?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = stmt
                .query([])
                .map_err(|e| QueryError { message: e.to_string() })?;
            let mut out = Vec::new();
            loop {
                let row = match rows.next() {
                    Ok(Some(r)) => r,
                    Ok(None) => break,
                    Err(e) => return Err(QueryError { message: e.to_string() }),
                };
                let mut map = Row::new();
                for (idx, name) in columns.iter().enumerate() {
                    let v = row
                        .get_ref(idx)
                        .map_err(|e| QueryError { message: e.to_string() })?;
                    map.insert(name.clone(), ref_to_json(v));
                }
                out.push(map);
            }
            Ok(out)
        };

        match self.inner.as_ref() {
            Backing::Memory(conn) => run(&conn.lock()),
            Backing::File(path) => {
                let conn = Connection::open(path)
                    .map_err(|e| QueryError { message: e.to_string() })?;
                conn.busy_timeout(BUSY_TIMEOUT)
                    .map_err(|e| QueryError { message: e.to_string() })?;
                run(&conn)
            }
        }
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(cell: Option<&str>, kind: ColumnKind) -> SqlValue {
    let Some(text) = cell else { return SqlValue::Null };
    match kind {
        ColumnKind::Integer => match text.parse::<i64>() {
            Ok(n) => SqlValue::Integer(n),
            Err(_) => SqlValue::Text(text.to_string()),
        },
        ColumnKind::Real => match text.parse::<f64>() {
            Ok(f) => SqlValue::Real(f),
            Err(_) => SqlValue::Text(text.to_string()),
        },
        ColumnKind::Text => SqlValue::Text(text.to_string()),
    }
}

fn ref_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cities() -> TableData {
        TableData {
            name: "city".into(),
            columns: vec!["name".into(), "population".into()],
            kinds: vec![ColumnKind::Text, ColumnKind::Integer],
            rows: vec![
                vec![Some("Oslo".into()), Some("709000".into())],
                vec![Some("Bergen".into()), Some("285000".into())],
            ],
        }
    }

    #[test]
    fn load_then_query_preserves_projection_order() {
        let store = TableStore::in_memory().unwrap();
        store.load(&cities()).unwrap();
        let rows = store.query("select population, name from city order by name").unwrap();
        assert_eq!(rows.len(), 2);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, ["population", "name"]);
        assert_eq!(rows[0]["name"], "Bergen");
        assert_eq!(rows[0]["population"], 285000);
    }

    #[test]
    fn reload_replaces_previous_rows() {
        let store = TableStore::in_memory().unwrap();
        store.load(&cities()).unwrap();
        let mut second = cities();
        second.rows = vec![vec![Some("Tromso".into()), Some("77000".into())]];
        store.load(&second).unwrap();
        let rows = store.query("select name from city").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Tromso");
    }

    #[test]
    fn query_error_carries_engine_diagnostic() {
        let store = TableStore::in_memory().unwrap();
        let err = store.query("select * from missing").unwrap_err();
        assert!(err.message.contains("no such table"), "got: {}", err.message);
    }

    #[test]
    fn empty_cells_become_null() {
        let store = TableStore::in_memory().unwrap();
        let table = TableData {
            name: "t".into(),
            columns: vec!["a".into()],
            kinds: vec![ColumnKind::Integer],
            rows: vec![vec![None], vec![Some("5".into())]],
        };
        store.load(&table).unwrap();
        let rows = store.query("select a from t where a is null").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], Value::Null);
    }

    #[test]
    fn table_names_lists_user_tables_only() {
        let store = TableStore::in_memory().unwrap();
        assert!(store.table_names().unwrap().is_empty());
        store.load(&cities()).unwrap();
        assert_eq!(store.table_names().unwrap(), vec!["city"]);
    }

    #[test]
    fn drop_table_removes_it_and_is_idempotent() {
        let store = TableStore::in_memory().unwrap();
        store.load(&cities()).unwrap();
        store.drop_table("city").unwrap();
        assert!(store.table_names().unwrap().is_empty());
        assert!(store.query("select * from city").is_err());
        // Dropping again is a no-op.
        store.drop_table("city").unwrap();
    }

    #[test]
    fn file_backed_query_waits_out_a_held_write_lock() {
        use std::thread;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.db");
        let store = TableStore::at_path(&path);
        store.load(&cities()).unwrap();

        // Hold an exclusive lock on a separate connection, release it
        // shortly after the query starts; the busy timeout must make the
        // query wait instead of failing with "database is locked".
        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();
        let handle = {
            let store = store.clone();
            thread::spawn(move || store.query("select count(*) as n from city"))
        };
        thread::sleep(Duration::from_millis(200));
        locker.execute_batch("COMMIT").unwrap();
        let rows = handle.join().unwrap().unwrap();
        assert_eq!(rows[0]["n"], 2);
    }

    #[test]
    fn file_backed_store_survives_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.db");
        let store = TableStore::at_path(&path);
        store.load(&cities()).unwrap();
        // A second handle to the same path sees the loaded table.
        let other = TableStore::at_path(&path);
        let rows = other.query("select count(*) as n from city").unwrap();
        assert_eq!(rows[0]["n"], 2);
    }
}
