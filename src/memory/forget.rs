//! Hard deletion of records.
//!
//! Removes the row from `records`, its FTS5 mirror, and its vector.
//! `record_tags` rows cascade through the foreign key.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::store::MemoryStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetResult {
    pub id: String,
    pub deleted: bool,
}

impl MemoryStore {
    /// Delete a record. Unknown ids fail with `NotFound` every time.
    pub fn forget(&self, id: &str) -> StoreResult<ForgetResult> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::IdRequired);
        }
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            let rowid: Option<i64> = tx
                .query_row("SELECT rowid FROM records WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            let Some(rowid) = rowid else {
                return Err(StoreError::NotFound(id.to_string()));
            };
            tx.execute("DELETE FROM records_fts WHERE rowid = ?1", params![rowid])?;
            tx.execute("DELETE FROM records_vec WHERE id = ?1", params![id])?;
            tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })?;
        tracing::debug!(id, store = self.target().as_str(), "record forgotten");
        Ok(ForgetResult {
            id: id.to_string(),
            deleted: true,
        })
    }
}
