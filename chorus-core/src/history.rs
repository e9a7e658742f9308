// ABOUTME: Persistent history of queries, responses, ratings, and derived stats.
// ABOUTME: Backed by a key-value store; SQLite for the process, in-memory for tests.

use crate::query::{Query, QueryResponse};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const KEY_QUERIES: &str = "queries";
pub const KEY_RESPONSES: &str = "responses";
pub const KEY_PREFERENCES: &str = "preferences";
pub const KEY_RATINGS: &str = "ratings";
pub const KEY_STATS: &str = "stats";

/// Default cap on retained query history
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Minimal key-value persistence boundary
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let data = self
            .data
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// SQLite-backed store: one kv table of JSON values
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;

        let db_path = data_dir.join("history.db");
        let conn = Connection::open(&db_path).context("Failed to open SQLite database")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        tracing::info!(db = %db_path.display(), "History store initialized");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = db.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let raw = stmt.query_row(params![key], |row| row.get::<_, String>(0));

        match raw {
            Ok(text) => Ok(Some(
                serde_json::from_str(&text).context("Corrupt JSON value in store")?,
            )),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let text = serde_json::to_string(value)?;
        db.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, text],
        )?;
        Ok(())
    }
}

/// A thumbs verdict on one provider's reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RatingVerdict {
    Up,
    Down,
}

/// One rating applied to a (query, provider) reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub query_id: String,
    pub provider_id: String,
    pub verdict: RatingVerdict,
    pub timestamp: i64,
}

impl Rating {
    pub fn new(
        query_id: impl Into<String>,
        provider_id: impl Into<String>,
        verdict: RatingVerdict,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            provider_id: provider_id.into(),
            verdict,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Per-provider thumb tallies
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThumbCounts {
    pub up: u64,
    pub down: u64,
}

/// Derived aggregate counters over all ratings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    pub total: u64,
    pub thumbs_by_provider: BTreeMap<String, ThumbCounts>,
}

/// History of past queries, replies, and ratings on top of a KvStore.
///
/// Stat updates are read-modify-write against the store; within one process
/// they are serialized by the store's connection lock, across processes the
/// last writer wins.
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KvStore>,
    cap: usize,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KvStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Prepend the query to history, evicting the oldest past the cap
    pub fn record_query(&self, query: &Query) -> Result<()> {
        let mut queries = self.queries()?;
        queries.insert(0, query.clone());
        queries.truncate(self.cap);
        self.store
            .set(KEY_QUERIES, &serde_json::to_value(&queries)?)
    }

    /// Stored queries, newest first
    pub fn queries(&self) -> Result<Vec<Query>> {
        match self.store.get(KEY_QUERIES)? {
            Some(value) => Ok(serde_json::from_value(value).context("Corrupt query history")?),
            None => Ok(Vec::new()),
        }
    }

    /// Append a response to the response log
    pub fn record_response(&self, response: &QueryResponse) -> Result<()> {
        let mut responses = self.responses()?;
        responses.push(response.clone());
        self.store
            .set(KEY_RESPONSES, &serde_json::to_value(&responses)?)
    }

    pub fn responses(&self) -> Result<Vec<QueryResponse>> {
        match self.store.get(KEY_RESPONSES)? {
            Some(value) => Ok(serde_json::from_value(value).context("Corrupt response log")?),
            None => Ok(Vec::new()),
        }
    }

    pub fn preference(&self, key: &str) -> Result<Option<Value>> {
        let prefs = self.preferences()?;
        Ok(prefs.get(key).cloned())
    }

    pub fn set_preference(&self, key: &str, value: Value) -> Result<()> {
        let mut prefs = self.preferences()?;
        prefs.insert(key.to_string(), value);
        self.store
            .set(KEY_PREFERENCES, &serde_json::to_value(&prefs)?)
    }

    fn preferences(&self) -> Result<BTreeMap<String, Value>> {
        match self.store.get(KEY_PREFERENCES)? {
            Some(value) => Ok(serde_json::from_value(value).context("Corrupt preferences")?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Append a rating and refresh the derived stats
    pub fn add_rating(&self, rating: Rating) -> Result<RatingStats> {
        let mut ratings = self.ratings()?;
        ratings.push(rating.clone());
        self.store
            .set(KEY_RATINGS, &serde_json::to_value(&ratings)?)?;

        let mut stats = self.rating_stats()?;
        stats.total += 1;
        let counts = stats
            .thumbs_by_provider
            .entry(rating.provider_id.clone())
            .or_default();
        match rating.verdict {
            RatingVerdict::Up => counts.up += 1,
            RatingVerdict::Down => counts.down += 1,
        }
        self.store.set(KEY_STATS, &serde_json::to_value(&stats)?)?;
        Ok(stats)
    }

    pub fn ratings(&self) -> Result<Vec<Rating>> {
        match self.store.get(KEY_RATINGS)? {
            Some(value) => Ok(serde_json::from_value(value).context("Corrupt ratings")?),
            None => Ok(Vec::new()),
        }
    }

    pub fn rating_stats(&self) -> Result<RatingStats> {
        match self.store.get(KEY_STATS)? {
            Some(value) => Ok(serde_json::from_value(value).context("Corrupt rating stats")?),
            None => Ok(RatingStats::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_history(cap: usize) -> HistoryStore {
        HistoryStore::new(Arc::new(MemoryStore::new()), cap)
    }

    fn query(text: &str) -> Query {
        Query::new(text, vec!["claude".to_string()])
    }

    #[test]
    fn test_queries_newest_first() {
        let history = memory_history(10);
        history.record_query(&query("first")).unwrap();
        history.record_query(&query("second")).unwrap();

        let stored = history.queries().unwrap();
        assert_eq!(stored[0].text, "second");
        assert_eq!(stored[1].text, "first");
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let history = memory_history(100);
        for i in 0..100 {
            history.record_query(&query(&format!("q{}", i))).unwrap();
        }
        history.record_query(&query("newest")).unwrap();

        let stored = history.queries().unwrap();
        assert_eq!(stored.len(), 100);
        assert_eq!(stored[0].text, "newest");
        assert!(stored.iter().all(|q| q.text != "q0"));
    }

    #[test]
    fn test_responses_append_only() {
        let history = memory_history(10);
        let r1 = QueryResponse::success("q1", "claude", "one", 5);
        let r2 = QueryResponse::failure("q1", "gemini", "down");
        history.record_response(&r1).unwrap();
        history.record_response(&r2).unwrap();

        let stored = history.responses().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].provider_id, "claude");
        assert!(stored[1].is_error());
    }

    #[test]
    fn test_rating_stats_aggregate() {
        let history = memory_history(10);
        history
            .add_rating(Rating::new("q1", "claude", RatingVerdict::Up))
            .unwrap();
        history
            .add_rating(Rating::new("q1", "gemini", RatingVerdict::Down))
            .unwrap();
        let stats = history
            .add_rating(Rating::new("q2", "claude", RatingVerdict::Up))
            .unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.thumbs_by_provider["claude"].up, 2);
        assert_eq!(stats.thumbs_by_provider["claude"].down, 0);
        assert_eq!(stats.thumbs_by_provider["gemini"].down, 1);
        assert_eq!(history.ratings().unwrap().len(), 3);
    }

    #[test]
    fn test_preferences_roundtrip() {
        let history = memory_history(10);
        history
            .set_preference("defaultProviders", serde_json::json!(["claude"]))
            .unwrap();
        assert_eq!(
            history.preference("defaultProviders").unwrap(),
            Some(serde_json::json!(["claude"]))
        );
        assert_eq!(history.preference("missing").unwrap(), None);
    }

    #[test]
    fn test_sqlite_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();

        store
            .set("queries", &serde_json::json!([{"id": "q1"}]))
            .unwrap();
        assert_eq!(
            store.get("queries").unwrap(),
            Some(serde_json::json!([{"id": "q1"}]))
        );
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("queries", &serde_json::json!([])).unwrap();
        assert_eq!(store.get("queries").unwrap(), Some(serde_json::json!([])));
    }
}
