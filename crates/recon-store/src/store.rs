use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};

use recon_model::Document;

use crate::cursor::Cursor;
use crate::error::StoreError;
use crate::filter::Filter;

/// Store-assigned document id (the SQLite rowid).
pub type DocId = i64;

const TABLE_PREFIX: &str = "c_";

pub(crate) fn validate_collection(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_field(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Handle to an open document store. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open_path(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open (creating if necessary) the named collection.
    pub fn collection(&self, name: &str) -> Result<Collection, StoreError> {
        validate_collection(name)?;
        let table = format!("{TABLE_PREFIX}{name}");
        self.lock().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL);"
        ))?;
        Ok(Collection {
            store: self.clone(),
            name: name.to_string(),
            table,
        })
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        validate_collection(name)?;
        let table = format!("{TABLE_PREFIX}{name}");
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        Ok(stmt.exists(params![table])?)
    }

    pub fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name GLOB 'c_*' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix(TABLE_PREFIX).map(str::to_string))
            .collect())
    }

    /// Drop the named collection. Returns whether it existed.
    pub fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let existed = self.collection_exists(name)?;
        if existed {
            let table = format!("{TABLE_PREFIX}{name}");
            self.lock().execute_batch(&format!("DROP TABLE \"{table}\";"))?;
        }
        Ok(existed)
    }
}

/// Outcome of a keyed upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(DocId),
    Updated(DocId),
}

/// Handle to one named collection.
#[derive(Clone)]
pub struct Collection {
    store: Store,
    name: String,
    table: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub fn insert_one(&self, doc: &Document) -> Result<DocId, StoreError> {
        let text = serde_json::to_string(doc)?;
        let conn = self.store.lock();
        conn.execute(
            &format!("INSERT INTO \"{}\" (doc) VALUES (?1)", self.table),
            params![text],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a batch atomically. A unique-index violation rolls the whole
    /// batch back and surfaces as [`StoreError::DuplicateKey`]; callers that
    /// tolerate duplicates retry document by document.
    pub fn insert_many(&self, docs: &[Document]) -> Result<Vec<DocId>, StoreError> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(docs.len());
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO \"{}\" (doc) VALUES (?1)", self.table))?;
            for doc in docs {
                let text = serde_json::to_string(doc)?;
                stmt.execute(params![text])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let (where_sql, filter_params) = filter.to_sql()?;
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {where_sql}",
            self.table
        ))?;
        let count: i64 = stmt.query_row(params_from_iter(filter_params), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn get(&self, id: DocId) -> Result<Option<Document>, StoreError> {
        let conn = self.store.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT doc FROM \"{}\" WHERE id = ?1", self.table))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let text: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    /// Materialize every matching document. Prefer [`Collection::find_batches`]
    /// for anything unbounded.
    pub fn find_all(&self, filter: &Filter) -> Result<Vec<(DocId, Document)>, StoreError> {
        let (where_sql, filter_params) = filter.to_sql()?;
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, doc FROM \"{}\" WHERE {where_sql} ORDER BY id",
            self.table
        ))?;
        let mut out = Vec::new();
        let mut rows = stmt.query(params_from_iter(filter_params))?;
        while let Some(row) = rows.next()? {
            let id: DocId = row.get(0)?;
            let text: String = row.get(1)?;
            out.push((id, serde_json::from_str(&text)?));
        }
        Ok(out)
    }

    /// Stream matching documents in id order, `batch_size` at a time. Only
    /// one batch is resident at any moment.
    pub fn find_batches(&self, filter: &Filter, batch_size: usize) -> Result<Cursor, StoreError> {
        Cursor::new(self.clone(), filter, batch_size)
    }

    /// Documents whose `field` equals any of `keys`.
    pub fn find_in(
        &self,
        field: &str,
        keys: &[String],
    ) -> Result<Vec<(DocId, Document)>, StoreError> {
        validate_field(field)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, doc FROM \"{}\" WHERE json_extract(doc, '$.{field}') IN ({placeholders}) ORDER BY id",
            self.table
        ))?;
        let mut out = Vec::new();
        let mut rows = stmt.query(params_from_iter(keys.iter().map(|k| SqlValue::Text(k.clone()))))?;
        while let Some(row) = rows.next()? {
            let id: DocId = row.get(0)?;
            let text: String = row.get(1)?;
            out.push((id, serde_json::from_str(&text)?));
        }
        Ok(out)
    }

    /// Documents where either `field_a` or `field_b` equals any of `keys`
    /// (the merger's two-key prefetch).
    pub fn find_by_either(
        &self,
        field_a: &str,
        field_b: &str,
        keys: &[String],
    ) -> Result<Vec<(DocId, Document)>, StoreError> {
        validate_field(field_a)?;
        validate_field(field_b)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, doc FROM \"{table}\" WHERE json_extract(doc, '$.{field_a}') IN ({placeholders}) \
             OR json_extract(doc, '$.{field_b}') IN ({placeholders}) ORDER BY id",
            table = self.table
        ))?;
        let params: Vec<SqlValue> = keys
            .iter()
            .chain(keys.iter())
            .map(|k| SqlValue::Text(k.clone()))
            .collect();
        let mut out = Vec::new();
        let mut rows = stmt.query(params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            let id: DocId = row.get(0)?;
            let text: String = row.get(1)?;
            out.push((id, serde_json::from_str(&text)?));
        }
        Ok(out)
    }

    /// Merge `fields` into every document whose `field` equals `key`
    /// (`$set` semantics: nulls are stored, not deleted). Returns the number
    /// of documents updated.
    pub fn update_by_key(
        &self,
        field: &str,
        key: &str,
        fields: &Document,
    ) -> Result<usize, StoreError> {
        validate_field(field)?;
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        let matching: Vec<(DocId, String)> = {
            let mut select = tx.prepare(&format!(
                "SELECT id, doc FROM \"{}\" WHERE json_extract(doc, '$.{field}') = ?1",
                self.table
            ))?;
            let mut rows = select.query(params![key])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?));
            }
            out
        };
        let mut updated = 0usize;
        {
            let mut update =
                tx.prepare(&format!("UPDATE \"{}\" SET doc = ?1 WHERE id = ?2", self.table))?;
            for (id, text) in matching {
                let mut doc: Document = serde_json::from_str(&text)?;
                doc.merge(fields);
                update.execute(params![serde_json::to_string(&doc)?, id])?;
                updated += 1;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Merge `fields` into the document with the given id.
    pub fn update_by_id(&self, id: DocId, fields: &Document) -> Result<bool, StoreError> {
        let conn = self.store.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT doc FROM \"{}\" WHERE id = ?1", self.table))?;
        let mut rows = stmt.query(params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(false);
        };
        let text: String = row.get(0)?;
        drop(rows);
        drop(stmt);
        let mut doc: Document = serde_json::from_str(&text)?;
        doc.merge(fields);
        conn.execute(
            &format!("UPDATE \"{}\" SET doc = ?1 WHERE id = ?2", self.table),
            params![serde_json::to_string(&doc)?, id],
        )?;
        Ok(true)
    }

    /// Keyed upsert: merge `fields` into the first document whose `field`
    /// equals `key`, or insert `{field: key} ∪ fields` when none matches.
    pub fn upsert_by_key(
        &self,
        field: &str,
        key: &str,
        fields: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        validate_field(field)?;
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        let existing: Option<(DocId, String)> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, doc FROM \"{}\" WHERE json_extract(doc, '$.{field}') = ?1 ORDER BY id LIMIT 1",
                self.table
            ))?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };
        let outcome = match existing {
            Some((id, text)) => {
                let mut doc: Document = serde_json::from_str(&text)?;
                doc.merge(fields);
                tx.execute(
                    &format!("UPDATE \"{}\" SET doc = ?1 WHERE id = ?2", self.table),
                    params![serde_json::to_string(&doc)?, id],
                )?;
                UpsertOutcome::Updated(id)
            }
            None => {
                let mut doc = Document::new();
                doc.insert(field, key);
                doc.merge(fields);
                tx.execute(
                    &format!("INSERT INTO \"{}\" (doc) VALUES (?1)", self.table),
                    params![serde_json::to_string(&doc)?],
                )?;
                UpsertOutcome::Inserted(tx.last_insert_rowid())
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Delete documents by id. Returns the number removed.
    pub fn delete_ids(&self, ids: &[DocId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.store.lock();
        let deleted = conn.execute(
            &format!("DELETE FROM \"{}\" WHERE id IN ({placeholders})", self.table),
            params_from_iter(ids.iter().map(|id| SqlValue::Integer(*id))),
        )?;
        Ok(deleted)
    }

    /// Delete documents matching a keyed equality. Returns the number
    /// removed.
    pub fn delete_by_key(&self, field: &str, key: &str) -> Result<usize, StoreError> {
        validate_field(field)?;
        let conn = self.store.lock();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE json_extract(doc, '$.{field}') = ?1",
                self.table
            ),
            params![key],
        )?;
        Ok(deleted)
    }

    /// Ensure a (non-unique) index on one document attribute.
    pub fn ensure_index(&self, field: &str) -> Result<(), StoreError> {
        validate_field(field)?;
        self.store.lock().execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{table}_{field}\" ON \"{table}\" (json_extract(doc, '$.{field}'));",
            table = self.table
        ))?;
        Ok(())
    }

    /// Ensure a unique index on one attribute, scoped to documents where
    /// the attribute is non-null (null identities may repeat freely).
    pub fn ensure_unique_index(&self, field: &str) -> Result<(), StoreError> {
        validate_field(field)?;
        self.store.lock().execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uniq_{table}_{field}\" ON \"{table}\" (json_extract(doc, '$.{field}')) \
             WHERE json_extract(doc, '$.{field}') IS NOT NULL;",
            table = self.table
        ))?;
        Ok(())
    }
}
