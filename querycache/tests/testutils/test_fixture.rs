//! Cache fixture backed by an in-memory workout data source

use async_trait::async_trait;
use parking_lot::Mutex;
use querycache::{
    CacheConfig, CacheKeyBuilder, CacheOptions, CacheWarmer, Fetched, QueryCache, WarmingPhase,
    WarmingTaskError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rows per table, keyed by user id
#[derive(Debug, Default)]
pub struct InMemorySource {
    tables: Mutex<HashMap<(String, String), Vec<Value>>>,
    reads: AtomicUsize,
    failing: Mutex<Option<String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, user_id: &str, row: Value) {
        self.tables
            .lock()
            .entry((table.to_string(), user_id.to_string()))
            .or_default()
            .push(row);
    }

    /// Make every subsequent read fail with `message`
    pub fn fail_with(&self, message: &str) {
        *self.failing.lock() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.failing.lock() = None;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn list(&self, table: &str, user_id: &str) -> Result<Value, String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(message) = self.failing.lock().clone() {
            return Err(message);
        }

        let rows = self
            .tables
            .lock()
            .get(&(table.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(Value::Array(rows))
    }
}

pub struct TestFixture {
    pub cache: Arc<QueryCache>,
    pub source: Arc<InMemorySource>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        super::init_logging();
        let cache = Arc::new(QueryCache::new(config).expect("valid cache config"));
        let source = Arc::new(InMemorySource::new());
        Self { cache, source }
    }

    /// Seed a few workout logs and programs for `user_id`
    pub fn seed_user(&self, user_id: &str) {
        for day in 1..=3 {
            self.source.insert(
                "workout_logs",
                user_id,
                json!({"user_id": user_id, "day": day, "volume": day * 1000}),
            );
        }
        self.source.insert(
            "programs",
            user_id,
            json!({"user_id": user_id, "name": "5x5", "weeks": 12}),
        );
    }

    pub fn key(table: &str, user_id: &str) -> String {
        CacheKeyBuilder::new(table, "list").user(user_id).build()
    }

    /// Read `table` for `user_id` through the cache
    pub async fn list(&self, table: &str, user_id: &str) -> Result<Fetched<Value>, String> {
        let key = Self::key(table, user_id);
        let options = CacheOptions::new().table(table).user(user_id);
        let source = Arc::clone(&self.source);
        let (table, user) = (table.to_string(), user_id.to_string());
        self.cache
            .get_with_cache(&key, move || async move { source.list(&table, &user).await }, &options)
            .await
    }
}

/// Warmer that pulls a user's tables into the fixture's cache
pub struct FixtureWarmer {
    pub cache: Arc<QueryCache>,
    pub source: Arc<InMemorySource>,
}

#[async_trait]
impl CacheWarmer for FixtureWarmer {
    async fn warm(&self, user_id: &str, phase: &WarmingPhase) -> Result<(), WarmingTaskError> {
        let tables: &[&str] = match phase {
            WarmingPhase::Essential => &["workout_logs"],
            WarmingPhase::Secondary => &["programs"],
            WarmingPhase::Full | WarmingPhase::Page(_) => &["workout_logs", "programs"],
        };

        for table in tables {
            let key = TestFixture::key(table, user_id);
            let options = CacheOptions::new().table(*table).user(user_id);
            let source = Arc::clone(&self.source);
            let (t, u) = (table.to_string(), user_id.to_string());
            self.cache
                .get_with_cache(&key, move || async move { source.list(&t, &u).await }, &options)
                .await
                .map_err(WarmingTaskError::new)?;
        }
        Ok(())
    }
}

/// Warmer that records every call and fails for selected users
#[derive(Default)]
pub struct RecordingWarmer {
    pub calls: Mutex<Vec<(String, WarmingPhase)>>,
    pub failures: Mutex<HashMap<String, WarmingTaskError>>,
}

impl RecordingWarmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_user(&self, user_id: &str, error: WarmingTaskError) {
        self.failures.lock().insert(user_id.to_string(), error);
    }

    pub fn users(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(user, _)| user.clone()).collect()
    }
}

#[async_trait]
impl CacheWarmer for RecordingWarmer {
    async fn warm(&self, user_id: &str, phase: &WarmingPhase) -> Result<(), WarmingTaskError> {
        self.calls.lock().push((user_id.to_string(), phase.clone()));
        tokio::task::yield_now().await;
        match self.failures.lock().get(user_id) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
