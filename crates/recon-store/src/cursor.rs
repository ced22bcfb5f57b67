//! Batched, rowid-paged iteration over a collection.

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use recon_model::Document;

use crate::error::StoreError;
use crate::filter::Filter;
use crate::store::{Collection, DocId};

/// Streams matching documents in id order, one batch at a time. Paging by
/// `id > last_seen` keeps the cursor stable while the batch loop mutates
/// the collection (the promoter deletes raw rows between batches).
pub struct Cursor {
    collection: Collection,
    where_sql: String,
    params: Vec<SqlValue>,
    batch_size: usize,
    last_id: DocId,
    done: bool,
}

impl Cursor {
    pub(crate) fn new(
        collection: Collection,
        filter: &Filter,
        batch_size: usize,
    ) -> Result<Self, StoreError> {
        let (where_sql, params) = filter.to_sql()?;
        Ok(Cursor {
            collection,
            where_sql,
            params,
            batch_size: batch_size.max(1),
            last_id: 0,
            done: false,
        })
    }

    /// Fetch the next batch; an empty vector means the cursor is exhausted.
    pub fn next_batch(&mut self) -> Result<Vec<(DocId, Document)>, StoreError> {
        if self.done {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, doc FROM \"{}\" WHERE ({}) AND id > ? ORDER BY id LIMIT ?",
            self.collection.table(),
            self.where_sql
        );
        let store = self.collection.store().clone();
        let conn = store.lock();
        let mut stmt = conn.prepare(&sql)?;

        let mut bound: Vec<SqlValue> = self.params.clone();
        bound.push(SqlValue::Integer(self.last_id));
        bound.push(SqlValue::Integer(self.batch_size as i64));

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut rows = stmt.query(params_from_iter(bound))?;
        while let Some(row) = rows.next()? {
            let id: DocId = row.get(0)?;
            let text: String = row.get(1)?;
            batch.push((id, serde_json::from_str::<Document>(&text)?));
        }

        match batch.last() {
            Some((id, _)) => self.last_id = *id,
            None => self.done = true,
        }
        if batch.len() < self.batch_size {
            self.done = true;
        }
        Ok(batch)
    }

    /// True once every matching document has been yielded.
    pub fn is_exhausted(&self) -> bool {
        self.done
    }
}
