use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;

use crate::database::record::{Record, RecordSummary};
use crate::database::schema::SCHEMA;

const MATCH_PREDICATE: &str = "(title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\')";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create schema: {0}")]
    Schema(#[source] rusqlite::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub struct RecordRepository {
    conn: Connection,
}

impl RecordRepository {
    /// Opens a fresh writable store and installs the schema. The schema is
    /// created without `IF NOT EXISTS`, so calling this on a populated store
    /// fails instead of silently reusing it.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        // Bulk load only; a run that fails deletes the file anyway.
        conn.pragma_update(None, "synchronous", "OFF")?;
        Self::bootstrap(conn)
    }

    /// Opens an existing store for serving. A missing file is an error
    /// rather than a new empty database.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(StoreError::Schema)?;
        Ok(Self { conn })
    }

    pub fn insert_record(&self, record: &Record) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO records (id, title, content, thumb_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            record.id,
            record.title,
            record.content,
            record.thumb_url,
            record.updated_at
        ])?;
        Ok(())
    }

    pub fn insert_tag(&self, record_id: i64, tag: &str) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO tags (record_id, tag) VALUES (?1, ?2)")?;
        stmt.execute(params![record_id, tag])?;
        Ok(())
    }

    pub fn insert_image(&self, record_id: i64, url: &str) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO images (record_id, url) VALUES (?1, ?2)")?;
        stmt.execute(params![record_id, url])?;
        Ok(())
    }

    /// Counts records whose title or content contains `query`, optionally
    /// restricted to ids strictly greater than `after`.
    pub fn count_matches(&self, query: &str, after: Option<i64>) -> Result<u64, StoreError> {
        let pattern = like_pattern(query);
        let count: i64 = match after {
            None => self.conn.query_row(
                &format!("SELECT COUNT(1) FROM records WHERE {MATCH_PREDICATE}"),
                params![pattern],
                |row| row.get(0),
            )?,
            Some(id) => self.conn.query_row(
                &format!("SELECT COUNT(1) FROM records WHERE {MATCH_PREDICATE} AND id > ?2"),
                params![pattern, id],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as u64)
    }

    /// Fetches up to `limit` matching records with `id > cursor`, ascending.
    pub fn fetch_page(
        &self,
        query: &str,
        cursor: i64,
        limit: u32,
    ) -> Result<Vec<RecordSummary>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT id, title, content, thumb_url FROM records
             WHERE {MATCH_PREDICATE} AND id > ?2
             ORDER BY id ASC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![like_pattern(query), cursor, limit], |row| {
            Ok(RecordSummary {
                id: row.get(0)?,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                thumb_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_records(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM records", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    #[cfg(test)]
    pub fn tags_for(&self, record_id: i64) -> Result<Vec<String>, StoreError> {
        self.children("SELECT tag FROM tags WHERE record_id = ?1 ORDER BY id", record_id)
    }

    #[cfg(test)]
    pub fn images_for(&self, record_id: i64) -> Result<Vec<String>, StoreError> {
        self.children("SELECT url FROM images WHERE record_id = ?1 ORDER BY id", record_id)
    }

    #[cfg(test)]
    fn children(&self, sql: &str, record_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![record_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Builds a LIKE pattern that matches `query` as a literal substring.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
