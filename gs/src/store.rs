//! SQLite-backed Store

use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::record::{Filter, IndexValue, Record};
use crate::schema::SCHEMA;

const DB_FILE: &str = "goalstore.db";

/// Record store owning one SQLite connection
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "Store::open: called");
        fs::create_dir_all(dir).context(format!("Failed to create store directory {}", dir.display()))?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path).context(format!("Failed to open database {}", db_path.display()))?;
        conn.execute_batch(SCHEMA).context("Failed to initialize schema")?;

        info!("Opened store at {}", db_path.display());
        Ok(Self {
            conn,
            path: Some(db_path),
        })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        debug!("Store::open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA).context("Failed to initialize schema")?;
        Ok(Self { conn, path: None })
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn create<T: Record>(&mut self, record: T) -> Result<String> {
        debug!(collection = T::collection_name(), id = %record.id(), "Store::create: called");
        insert_record(&self.conn, &record)?;
        Ok(record.id().to_string())
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        debug!(collection = T::collection_name(), %id, "Store::get: called");
        get_record(&self.conn, id)
    }

    /// Replace an existing record; errors when the id is unknown
    pub fn update<T: Record>(&mut self, record: T) -> Result<()> {
        debug!(collection = T::collection_name(), id = %record.id(), "Store::update: called");
        update_record(&self.conn, &record)
    }

    /// Delete a record, returning whether it existed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        debug!(collection = T::collection_name(), %id, "Store::delete: called");
        delete_record::<T>(&self.conn, id)
    }

    /// List records matching every filter, in insertion order
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        debug!(collection = T::collection_name(), filter_count = filters.len(), "Store::list: called");
        list_records(&self.conn, filters)
    }

    /// Delete every record whose indexed `field` equals `value`
    pub fn delete_by_index<T: Record>(&mut self, field: &str, value: IndexValue) -> Result<usize> {
        debug!(collection = T::collection_name(), %field, ?value, "Store::delete_by_index: called");
        delete_by_index::<T>(&self.conn, field, &value)
    }

    /// Rewrite the index rows of every record in the collection
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        debug!(collection = T::collection_name(), "Store::rebuild_indexes: called");
        let tx = self.conn.transaction()?;
        let records: Vec<T> = list_records(&tx, &[])?;
        for record in &records {
            write_indexes(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Run `f` inside one transaction
    ///
    /// Any error returned by `f` rolls back every write it made.
    pub fn batch<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Batch<'_>) -> Result<R>,
    {
        debug!("Store::batch: called");
        let tx = self.conn.transaction()?;
        let out = {
            let batch = Batch { conn: &tx };
            f(&batch)?
        };
        tx.commit().context("Failed to commit batch")?;
        debug!("Store::batch: committed");
        Ok(out)
    }
}

/// Write handle scoped to an open transaction
pub struct Batch<'a> {
    conn: &'a Connection,
}

impl Batch<'_> {
    pub fn create<T: Record>(&self, record: &T) -> Result<()> {
        insert_record(self.conn, record)
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        get_record(self.conn, id)
    }

    pub fn update<T: Record>(&self, record: &T) -> Result<()> {
        update_record(self.conn, record)
    }

    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        delete_record::<T>(self.conn, id)
    }

    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        list_records(self.conn, filters)
    }

    pub fn delete_by_index<T: Record>(&self, field: &str, value: IndexValue) -> Result<usize> {
        delete_by_index::<T>(self.conn, field, &value)
    }
}

fn insert_record<T: Record>(conn: &Connection, record: &T) -> Result<()> {
    let data = serde_json::to_string(record).context("Failed to serialize record")?;
    conn.execute(
        "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![T::collection_name(), record.id(), data, record.updated_at()],
    )
    .context(format!("Failed to insert {} {}", T::collection_name(), record.id()))?;
    write_indexes(conn, record)
}

fn update_record<T: Record>(conn: &Connection, record: &T) -> Result<()> {
    let data = serde_json::to_string(record).context("Failed to serialize record")?;
    let changed = conn.execute(
        "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
        params![T::collection_name(), record.id(), data, record.updated_at()],
    )?;
    if changed == 0 {
        return Err(eyre!("{} {} not found", T::collection_name(), record.id()));
    }
    write_indexes(conn, record)
}

fn write_indexes<T: Record>(conn: &Connection, record: &T) -> Result<()> {
    conn.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
        params![T::collection_name(), record.id()],
    )?;
    for (field, value) in record.indexed_fields() {
        let (text, int) = value.columns();
        conn.execute(
            "INSERT INTO record_indexes (collection, id, field, value_text, value_int) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![T::collection_name(), record.id(), field, text, int],
        )?;
    }
    Ok(())
}

fn get_record<T: Record>(conn: &Connection, id: &str) -> Result<Option<T>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
            params![T::collection_name(), id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => {
            let record = serde_json::from_str(&data)
                .context(format!("Failed to deserialize {} {}", T::collection_name(), id))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn delete_record<T: Record>(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM records WHERE collection = ?1 AND id = ?2",
        params![T::collection_name(), id],
    )?;
    Ok(changed > 0)
}

fn list_records<T: Record>(conn: &Connection, filters: &[Filter]) -> Result<Vec<T>> {
    let mut sql = String::from("SELECT r.data FROM records r WHERE r.collection = ?");
    let mut values = vec![rusqlite::types::Value::Text(T::collection_name().to_string())];

    for filter in filters {
        let column = if filter.value.is_text() { "value_text" } else { "value_int" };
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM record_indexes ix WHERE ix.collection = r.collection \
             AND ix.id = r.id AND ix.field = ? AND ix.{} {} ?)",
            column,
            filter.op.as_sql()
        ));
        values.push(rusqlite::types::Value::Text(filter.field.clone()));
        values.push(filter.value.to_sql_value());
    }
    sql.push_str(" ORDER BY r.rowid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for row in rows {
        let data = row?;
        let record = serde_json::from_str(&data).context(format!("Failed to deserialize {}", T::collection_name()))?;
        records.push(record);
    }
    Ok(records)
}

fn delete_by_index<T: Record>(conn: &Connection, field: &str, value: &IndexValue) -> Result<usize> {
    let column = if value.is_text() { "value_text" } else { "value_int" };
    let sql = format!(
        "DELETE FROM records WHERE collection = ?1 AND id IN \
         (SELECT id FROM record_indexes WHERE collection = ?1 AND field = ?2 AND {} = ?3)",
        column
    );
    let changed = conn.execute(&sql, params![T::collection_name(), field, value.to_sql_value()])?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FilterOp, now_ms};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        owner: String,
        rank: i64,
        pinned: bool,
        updated_at: i64,
    }

    impl Note {
        fn new(id: &str, owner: &str, rank: i64) -> Self {
            Self {
                id: id.to_string(),
                owner: owner.to_string(),
                rank,
                pinned: false,
                updated_at: now_ms(),
            }
        }
    }

    impl Record for Note {
        fn id(&self) -> &str {
            &self.id
        }

        fn updated_at(&self) -> i64 {
            self.updated_at
        }

        fn collection_name() -> &'static str {
            "notes"
        }

        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut fields = HashMap::new();
            fields.insert("owner".to_string(), IndexValue::String(self.owner.clone()));
            fields.insert("rank".to_string(), IndexValue::Int(self.rank));
            fields.insert("pinned".to_string(), IndexValue::Bool(self.pinned));
            fields
        }
    }

    #[test]
    fn test_crud_roundtrip() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.create(Note::new("n1", "alice", 1)).unwrap();
        assert_eq!(id, "n1");

        let fetched: Note = store.get("n1").unwrap().unwrap();
        assert_eq!(fetched.owner, "alice");

        let mut changed = fetched.clone();
        changed.rank = 7;
        store.update(changed).unwrap();
        let fetched: Note = store.get("n1").unwrap().unwrap();
        assert_eq!(fetched.rank, 7);

        assert!(store.delete::<Note>("n1").unwrap());
        assert!(store.get::<Note>("n1").unwrap().is_none());
        assert!(!store.delete::<Note>("n1").unwrap());
    }

    #[test]
    fn test_update_missing_record_fails() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.update(Note::new("ghost", "alice", 1)).is_err());
    }

    #[test]
    fn test_duplicate_create_fails() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("n1", "alice", 1)).unwrap();
        assert!(store.create(Note::new("n1", "bob", 2)).is_err());
    }

    #[test]
    fn test_list_with_filters_keeps_insertion_order() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("c", "alice", 3)).unwrap();
        store.create(Note::new("a", "bob", 1)).unwrap();
        store.create(Note::new("b", "alice", 2)).unwrap();

        let alice: Vec<Note> = store.list(&[Filter::eq("owner", "alice")]).unwrap();
        let ids: Vec<_> = alice.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let high: Vec<Note> = store
            .list(&[Filter {
                field: "rank".to_string(),
                op: FilterOp::Gte,
                value: IndexValue::Int(2),
            }])
            .unwrap();
        assert_eq!(high.len(), 2);

        let pinned: Vec<Note> = store
            .list(&[Filter {
                field: "pinned".to_string(),
                op: FilterOp::Eq,
                value: IndexValue::Bool(true),
            }])
            .unwrap();
        assert!(pinned.is_empty());
    }

    #[test]
    fn test_delete_by_index() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("a", "alice", 1)).unwrap();
        store.create(Note::new("b", "alice", 2)).unwrap();
        store.create(Note::new("c", "bob", 3)).unwrap();

        let removed = store
            .delete_by_index::<Note>("owner", IndexValue::String("alice".to_string()))
            .unwrap();
        assert_eq!(removed, 2);

        let rest: Vec<Note> = store.list(&[]).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "c");
    }

    #[test]
    fn test_batch_commits_all_writes() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .batch(|batch| {
                batch.create(&Note::new("a", "alice", 1))?;
                batch.create(&Note::new("b", "alice", 2))?;
                Ok(())
            })
            .unwrap();

        let all: Vec<Note> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("keep", "alice", 1)).unwrap();

        let result: Result<()> = store.batch(|batch| {
            batch.delete::<Note>("keep")?;
            batch.create(&Note::new("new", "alice", 2))?;
            Err(eyre!("abort"))
        });
        assert!(result.is_err());

        let all: Vec<Note> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "keep");
    }

    #[test]
    fn test_index_rows_follow_updates() {
        let mut store = Store::open_in_memory().unwrap();
        let mut note = Note::new("a", "alice", 1);
        store.create(note.clone()).unwrap();

        note.owner = "bob".to_string();
        store.update(note).unwrap();

        let alice: Vec<Note> = store.list(&[Filter::eq("owner", "alice")]).unwrap();
        let bob: Vec<Note> = store.list(&[Filter::eq("owner", "bob")]).unwrap();
        assert!(alice.is_empty());
        assert_eq!(bob.len(), 1);
    }

    #[test]
    fn test_rebuild_indexes_counts_records() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.create(Note::new("a", "alice", 1)).unwrap();
        store.create(Note::new("b", "bob", 2)).unwrap();
        assert_eq!(store.rebuild_indexes::<Note>().unwrap(), 2);
        assert!(store.path().unwrap().ends_with(DB_FILE));
    }
}
