//! Generic persistent record store.
//!
//! A [`Store`] keeps one SQLite database per call site (a project's state
//! directory, the shared OAuth database, ...) and persists arbitrary
//! [`Record`] implementors as JSON blobs, with a secondary `index_entries`
//! table holding the subset of fields each record wants to be filterable on.
//!
//! Every write is also appended to a `<collection>.jsonl` log next to the
//! database file before the SQLite transaction commits. The JSONL log is
//! never read back except by [`Store::rebuild_indexes`] recovering a
//! database that was deleted or corrupted; SQLite remains the source of
//! truth for reads.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A value stored in the secondary index, used for equality filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    fn to_sql_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Int(i) => i.to_string(),
            IndexValue::Bool(b) => b.to_string(),
        }
    }
}

/// Comparison used by a [`Filter`] against an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A single equality/inequality constraint applied during [`Store::list`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }
}

/// Anything persistable in a [`Store`] implements `Record`.
///
/// `indexed_fields` returns the subset of the record worth filtering on;
/// it is recomputed on every `put` and by `rebuild_indexes`.
pub trait Record: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// A SQLite-backed, JSONL-logged generic record store.
pub struct Store {
    conn: Connection,
    dir: PathBuf,
}

impl Store {
    /// Open (creating if needed) a store rooted at `dir`. The SQLite file
    /// lives at `dir/store.db`; each collection gets its own `dir/<name>.jsonl`
    /// append log.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let conn = Connection::open(dir.join("store.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                json TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );
            CREATE TABLE IF NOT EXISTS index_entries (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_index_entries_lookup
                ON index_entries (collection, field, value);",
        )?;
        debug!(?dir, "Store::open: opened");
        Ok(Self { conn, dir })
    }

    fn jsonl_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    fn append_log(&self, collection: &str, json: &str) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(self.jsonl_path(collection))?;
        writeln!(f, "{json}")?;
        Ok(())
    }

    /// Insert or update a record, replacing its index entries.
    pub fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        let collection = T::collection_name();
        let json = serde_json::to_string(record)?;
        self.append_log(collection, &json)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO records (collection, id, json, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at",
            params![collection, record.id(), json, record.updated_at()],
        )?;
        tx.execute(
            "DELETE FROM index_entries WHERE collection = ?1 AND id = ?2",
            params![collection, record.id()],
        )?;
        for (field, value) in record.indexed_fields() {
            tx.execute(
                "INSERT INTO index_entries (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)",
                params![collection, record.id(), field, value.to_sql_text()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch a single record by id.
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let collection = T::collection_name();
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT json FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// Delete a record and its index entries.
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<()> {
        let collection = T::collection_name();
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.execute(
            "DELETE FROM index_entries WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// List every record in `T`'s collection matching all `filters` (AND).
    ///
    /// With no filters this is a full collection scan. With filters, the
    /// first filter narrows via the `index_entries` table and the rest are
    /// applied in-memory against the deserialized record's own
    /// `indexed_fields()` — correct for the small per-project record counts
    /// this store is designed for.
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let collection = T::collection_name();
        let mut stmt = self.conn.prepare("SELECT json FROM records WHERE collection = ?1")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let record: T = serde_json::from_str(&json)?;
            let fields = record.indexed_fields();
            let matches = filters.iter().all(|f| {
                let actual = fields.get(&f.field);
                match f.op {
                    FilterOp::Eq => actual == Some(&f.value),
                    FilterOp::Ne => actual != Some(&f.value),
                }
            });
            if matches {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Recompute `index_entries` for every record in `T`'s collection.
    /// Used after opening a store that may have been written by an older
    /// record schema, or to repair a database rebuilt from the JSONL log.
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        let records: Vec<T> = self.list(&[])?;
        let collection = T::collection_name();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM index_entries WHERE collection = ?1", params![collection])?;
        for record in &records {
            for (field, value) in record.indexed_fields() {
                tx.execute(
                    "INSERT INTO index_entries (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)",
                    params![collection, record.id(), field, value.to_sql_text()],
                )?;
            }
        }
        tx.commit()?;
        debug!(collection, count = records.len(), "Store::rebuild_indexes: done");
        Ok(records.len())
    }

    /// Replay a collection's JSONL log into SQLite. Used to recover a store
    /// whose `store.db` was deleted or lost but whose append log survived.
    pub fn replay_log<T: Record>(&mut self) -> Result<usize> {
        let collection = T::collection_name();
        let path = self.jsonl_path(collection);
        if !path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(&path)?;
        let mut count = 0;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => {
                    self.put(&record)?;
                    count += 1;
                }
                Err(e) => warn!(collection, error = %e, "replay_log: skipping malformed line"),
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("status".to_string(), IndexValue::String(self.status.clone()));
            m
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let w = Widget {
            id: "w1".into(),
            status: "pending".into(),
            updated_at: now_ms(),
        };
        store.put(&w).unwrap();
        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched, w);
    }

    #[test]
    fn list_filters_by_indexed_field() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        for (id, status) in [("w1", "pending"), ("w2", "done"), ("w3", "pending")] {
            store
                .put(&Widget {
                    id: id.into(),
                    status: status.into(),
                    updated_at: now_ms(),
                })
                .unwrap();
        }

        let pending: Vec<Widget> = store
            .list(&[Filter::eq("status", IndexValue::String("pending".into()))])
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|w| w.status == "pending"));
    }

    #[test]
    fn delete_removes_record_and_index() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let w = Widget {
            id: "w1".into(),
            status: "pending".into(),
            updated_at: now_ms(),
        };
        store.put(&w).unwrap();
        store.delete::<Widget>("w1").unwrap();
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        let all: Vec<Widget> = store.list(&[]).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn replay_log_recovers_deleted_database() {
        let dir = tempdir().unwrap();
        {
            let mut store = Store::open(dir.path()).unwrap();
            store
                .put(&Widget {
                    id: "w1".into(),
                    status: "pending".into(),
                    updated_at: now_ms(),
                })
                .unwrap();
        }
        fs::remove_file(dir.path().join("store.db")).unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let recovered = store.replay_log::<Widget>().unwrap();
        assert_eq!(recovered, 1);
        assert!(store.get::<Widget>("w1").unwrap().is_some());
    }
}
