use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::database::record::RecordSummary;
use crate::database::repo::{RecordRepository, StoreError};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_CURSOR: i64 = 0;

/// `executionTime` is reported as nanoseconds divided by this constant,
/// kept for compatibility with existing clients.
const EXECUTION_TIME_DIVISOR: f64 = 10_000_000.0;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing search query in query params")]
    MissingQuery,
    #[error("query failed: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub size: u32,
    pub cursor: i64,
}

impl SearchRequest {
    /// Builds a request from raw parameters. Only the query is mandatory;
    /// a size or cursor that does not parse falls back to its default.
    pub fn from_params(
        query: Option<&str>,
        size: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Self, SearchError> {
        let query = match query {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => return Err(SearchError::MissingQuery),
        };

        let size = size
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|&s| s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let cursor = cursor
            .and_then(|c| c.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_CURSOR);

        Ok(Self {
            query,
            size,
            cursor,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub docs: Vec<RecordSummary>,
    pub count: u64,
    pub remaining_items: u64,
    pub size: u32,
    pub cursor: i64,
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}

/// Keyword search over the record store with cursor pagination.
///
/// Each search opens its own read-only connection, so concurrent requests
/// never wait on each other; the store is not written while serving.
#[derive(Clone)]
pub struct SearchEngine {
    db_path: Arc<PathBuf>,
}

impl SearchEngine {
    /// Checks that the store can be opened and remembers where it is.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        RecordRepository::open_read_only(db_path)?;
        Ok(Self {
            db_path: Arc::new(db_path.to_path_buf()),
        })
    }

    pub fn record_count(&self) -> Result<u64, StoreError> {
        RecordRepository::open_read_only(&self.db_path)?.count_records()
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchPage, SearchError> {
        let repo = RecordRepository::open_read_only(&self.db_path)?;

        let count = repo.count_matches(&request.query, None)?;

        let start = Instant::now();
        let docs = repo.fetch_page(&request.query, request.cursor, request.size)?;
        let elapsed = start.elapsed();

        let last_id = docs.last().map(|doc| doc.id);
        let remaining_items = match last_id {
            Some(id) => repo.count_matches(&request.query, Some(id))?,
            None => 0,
        };
        // A cursor is only handed out while there is something left to fetch.
        let next_cursor = last_id.filter(|_| remaining_items > 0);

        debug!(
            query = %request.query,
            cursor = request.cursor,
            returned = docs.len(),
            count,
            remaining_items,
            "Search executed"
        );

        Ok(SearchPage {
            docs,
            count,
            remaining_items,
            size: request.size,
            cursor: request.cursor,
            execution_time: elapsed.as_nanos() as f64 / EXECUTION_TIME_DIVISOR,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::record::Record;
    use tempfile::TempDir;

    /// The returned directory owns the store file and must outlive the engine.
    fn engine_with(records: &[(i64, &str, &str)]) -> (TempDir, SearchEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store.db");
        let repo = RecordRepository::create(&db).unwrap();
        for (id, title, content) in records {
            repo.insert_record(&Record {
                id: *id,
                title: title.to_string(),
                content: content.to_string(),
                ..Record::default()
            })
            .unwrap();
        }
        drop(repo);
        let engine = SearchEngine::open(&db).unwrap();
        (dir, engine)
    }

    fn request(query: &str, size: u32, cursor: i64) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            size,
            cursor,
        }
    }

    fn ids(page: &SearchPage) -> Vec<i64> {
        page.docs.iter().map(|d| d.id).collect()
    }

    #[test]
    fn test_from_params_defaults() {
        let req = SearchRequest::from_params(Some("rust"), None, None).unwrap();
        assert_eq!(req, request("rust", 10, 0));

        let req = SearchRequest::from_params(Some("rust"), Some("abc"), Some("x1")).unwrap();
        assert_eq!(req, request("rust", 10, 0));

        let req = SearchRequest::from_params(Some("rust"), Some("0"), Some("-3")).unwrap();
        assert_eq!(req, request("rust", 10, -3));

        let req = SearchRequest::from_params(Some("rust"), Some("25"), Some("40")).unwrap();
        assert_eq!(req, request("rust", 25, 40));
    }

    #[test]
    fn test_from_params_requires_query() {
        assert!(matches!(
            SearchRequest::from_params(None, Some("5"), None),
            Err(SearchError::MissingQuery)
        ));
        assert!(matches!(
            SearchRequest::from_params(Some(""), None, None),
            Err(SearchError::MissingQuery)
        ));
    }

    #[test]
    fn test_no_matches() {
        let (_dir, engine) = engine_with(&[(1, "alpha", "one"), (2, "beta", "two")]);
        let page = engine.search(&request("zzz", 10, 0)).unwrap();

        assert_eq!(page.count, 0);
        assert!(page.docs.is_empty());
        assert_eq!(page.remaining_items, 0);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_two_page_walk() {
        let (_dir, engine) = engine_with(&[(1, "a", "common"), (2, "b", "common"), (3, "c", "common")]);

        let first = engine.search(&request("common", 2, 0)).unwrap();
        assert_eq!(ids(&first), vec![1, 2]);
        assert_eq!(first.count, 3);
        assert_eq!(first.remaining_items, 1);
        assert_eq!(first.next_cursor, Some(2));

        let second = engine.search(&request("common", 2, 2)).unwrap();
        assert_eq!(ids(&second), vec![3]);
        assert_eq!(second.count, 3);
        assert_eq!(second.remaining_items, 0);
        assert_eq!(second.next_cursor, None);

        let past_end = engine.search(&request("common", 2, 3)).unwrap();
        assert!(past_end.docs.is_empty());
        assert_eq!(past_end.remaining_items, 0);
        assert_eq!(past_end.next_cursor, None);
    }

    #[test]
    fn test_cursor_chain_covers_result_set() {
        let rows: Vec<(i64, String, String)> = (1..=23)
            .map(|id| {
                let title = if id % 3 == 0 { "needle" } else { "hay" };
                (id * 10, title.to_string(), format!("row {id}"))
            })
            .collect();
        let borrowed: Vec<(i64, &str, &str)> = rows
            .iter()
            .map(|(id, t, c)| (*id, t.as_str(), c.as_str()))
            .collect();
        let (_dir, engine) = engine_with(&borrowed);

        let expected: Vec<i64> = rows
            .iter()
            .filter(|(_, t, _)| t == "needle")
            .map(|(id, _, _)| *id)
            .collect();

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let page = engine.search(&request("needle", 2, cursor)).unwrap();
            assert_eq!(page.count, expected.len() as u64);
            seen.extend(ids(&page));
            assert_eq!(page.remaining_items, (expected.len() - seen.len()) as u64);
            if page.remaining_items == 0 {
                assert_eq!(page.next_cursor, None);
                break;
            }
            cursor = page.next_cursor.unwrap();
        }

        assert_eq!(seen, expected);
    }

    #[test]
    fn test_page_serializes_wire_names() {
        let (_dir, engine) = engine_with(&[(1, "a", "common"), (2, "b", "common")]);
        let page = engine.search(&request("common", 1, 0)).unwrap();
        let value = serde_json::to_value(&page).unwrap();

        assert_eq!(value["count"], 2);
        assert_eq!(value["remainingItems"], 1);
        assert_eq!(value["size"], 1);
        assert_eq!(value["cursor"], 0);
        assert_eq!(value["nextCursor"], 1);
        assert!(value["executionTime"].is_f64());
        assert_eq!(value["docs"][0]["title"], "a");
        assert!(value["docs"][0].get("tags").is_none());
    }

    #[test]
    fn test_open_requires_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SearchEngine::open(&dir.path().join("missing.db")).is_err());
    }

    #[test]
    fn test_concurrent_searches_agree() {
        let rows: Vec<(i64, String, String)> = (1..=50)
            .map(|id| (id, format!("item {id}"), "shared".to_string()))
            .collect();
        let borrowed: Vec<(i64, &str, &str)> = rows
            .iter()
            .map(|(id, t, c)| (*id, t.as_str(), c.as_str()))
            .collect();
        let (_dir, engine) = engine_with(&borrowed);
        assert_eq!(engine.record_count().unwrap(), 50);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.search(&request("shared", 5, i * 5)).unwrap())
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let page = handle.join().unwrap();
            let start = i as i64 * 5;
            assert_eq!(ids(&page), (start + 1..=start + 5).collect::<Vec<_>>());
            assert_eq!(page.count, 50);
        }
    }

    #[test]
    fn test_store_without_records_table_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("foreign.db");
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (x INTEGER)")
            .unwrap();

        let engine = SearchEngine::open(&db).unwrap();
        assert!(matches!(
            engine.search(&request("anything", 10, 0)),
            Err(SearchError::Store(_))
        ));
    }

    #[test]
    fn test_empty_page_omits_next_cursor() {
        let (_dir, engine) = engine_with(&[(1, "a", "b")]);
        let page = engine.search(&request("missing", 10, 0)).unwrap();
        let value = serde_json::to_value(&page).unwrap();

        assert!(value.get("nextCursor").is_none());
        assert_eq!(value["docs"], serde_json::json!([]));
    }
}
