// DuckDB Connection Pool
// Keyed store of open connections: creation, reuse, eviction and active-database tracking

use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::audit::ensure_audit_tables;
use super::drivers::duckdb::DuckDbConnection;
use super::path::{CanonicalPath, PathResolver};
use super::traits::DatabaseError;

/// Rows seeded into every fresh in-memory database
const DEMO_ITEMS: [(i32, &str, i32); 7] = [
    (1, "Alpha", 10),
    (2, "Bravo", 25),
    (3, "Charlie", 5),
    (4, "Delta", 30),
    (5, "Echo", 15),
    (6, "Foxtrot", 40),
    (7, "Golf", 20),
];

/// Pool tuning knobs
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub data_dir: PathBuf,
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
    /// Close the previously active database when a different one is opened
    pub exclusive_active_database: bool,
    pub open_timeout: Duration,
}

impl PoolSettings {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_pool_size: 10,
            idle_timeout: Duration::from_secs(15 * 60),
            exclusive_active_database: true,
            open_timeout: Duration::from_secs(30),
        }
    }
}

struct PoolEntry {
    handle: Arc<DuckDbConnection>,
    last_accessed: Instant,
}

#[derive(Default)]
struct PoolState {
    /// Insertion-ordered so LRU ties resolve to the first entry encountered
    entries: IndexMap<CanonicalPath, PoolEntry>,
    active: Option<CanonicalPath>,
}

/// Process-wide owner of every open DuckDB connection.
///
/// All map and active-path mutations happen under one async mutex, which is
/// held across open and bootstrap so a path is never opened twice.
pub struct ConnectionPool {
    settings: PoolSettings,
    resolver: PathResolver,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(mut settings: PoolSettings) -> Self {
        settings.max_pool_size = settings.max_pool_size.max(1);
        let resolver = PathResolver::new(settings.data_dir.clone());
        settings.data_dir = resolver.data_dir().to_path_buf();
        Self {
            resolver,
            settings,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Resolve raw input against the data directory and the current active path
    pub async fn resolve(&self, input: Option<&str>) -> CanonicalPath {
        let state = self.state.lock().await;
        self.resolver.resolve(input, state.active.as_ref())
    }

    pub async fn active_path(&self) -> Option<CanonicalPath> {
        self.state.lock().await.active.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    pub async fn contains(&self, path: &CanonicalPath) -> bool {
        self.state.lock().await.entries.contains_key(path)
    }

    pub async fn last_accessed(&self, path: &CanonicalPath) -> Option<Instant> {
        self.state
            .lock()
            .await
            .entries
            .get(path)
            .map(|entry| entry.last_accessed)
    }

    /// Get the connection for `path`, opening it if needed.
    ///
    /// Entries displaced by the exclusive switch or by eviction are removed
    /// under the lock and closed after it is released. A close waits for any
    /// engine call still running on that handle.
    pub async fn acquire(&self, path: &CanonicalPath) -> Result<Arc<DuckDbConnection>, DatabaseError> {
        let mut state = self.state.lock().await;

        if let Some(entry) = state.entries.get_mut(path) {
            entry.last_accessed = Instant::now();
            let handle = Arc::clone(&entry.handle);
            state.active = Some(path.clone());
            return Ok(handle);
        }

        let mut displaced = Vec::new();

        if self.settings.exclusive_active_database {
            if let Some(previous) = state.active.clone().filter(|active| active != path) {
                if let Some(entry) = state.entries.shift_remove(&previous) {
                    info!("[POOL] Switching active database {} -> {}", previous, path);
                    state.active = None;
                    displaced.push(entry.handle);
                }
            }
        }

        if state.entries.len() >= self.settings.max_pool_size {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                if let Some(entry) = state.entries.shift_remove(&oldest) {
                    info!("[POOL] Pool full, evicting least recently used {}", oldest);
                    if state.active.as_ref() == Some(&oldest) {
                        state.active = None;
                    }
                    displaced.push(entry.handle);
                }
            }
        }

        let opened = self.open(path).await;
        if let Ok(handle) = &opened {
            state.entries.insert(
                path.clone(),
                PoolEntry {
                    handle: Arc::clone(handle),
                    last_accessed: Instant::now(),
                },
            );
            state.active = Some(path.clone());
            info!("[POOL] Opened {} (pool size {})", path, state.entries.len());
        }
        drop(state);

        for handle in displaced {
            close_handle(handle).await;
        }

        opened
    }

    async fn open(&self, path: &CanonicalPath) -> Result<Arc<DuckDbConnection>, DatabaseError> {
        if !path.is_memory() {
            if let Some(parent) = path.as_path().parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let target = path.clone();
        let task = tokio::task::spawn_blocking(move || {
            let handle = DuckDbConnection::open(&target)?;
            bootstrap(&handle)?;
            Ok::<_, DatabaseError>(handle)
        });

        let handle = tokio::time::timeout(self.settings.open_timeout, task)
            .await
            .map_err(|_| DatabaseError::Timeout)???;

        Ok(Arc::new(handle))
    }

    /// Close the entry for `path` (default: active path, else in-memory).
    ///
    /// Returns false only when the engine reported an error while closing.
    pub async fn close(&self, path: Option<&CanonicalPath>) -> bool {
        let mut state = self.state.lock().await;
        let target = path
            .cloned()
            .or_else(|| state.active.clone())
            .unwrap_or_else(CanonicalPath::memory);

        let entry = state.entries.shift_remove(&target);
        if state.active.as_ref() == Some(&target) {
            state.active = None;
        }
        drop(state);

        match entry {
            Some(entry) => {
                info!("[POOL] Closing {}", target);
                close_handle(entry.handle).await
            }
            None => true,
        }
    }

    /// Close every pooled connection
    pub async fn close_all(&self) {
        let mut state = self.state.lock().await;
        state.active = None;
        let entries: Vec<_> = state.entries.drain(..).collect();
        drop(state);

        for (path, entry) in entries {
            debug!("[POOL] Shutdown closing {}", path);
            close_handle(entry.handle).await;
        }
    }

    /// Close entries idle for longer than the idle timeout
    pub async fn reap_idle(&self) -> usize {
        self.reap_idle_at(Instant::now()).await
    }

    /// Reap relative to `now`; returns how many entries were closed
    pub async fn reap_idle_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let idle_timeout = self.settings.idle_timeout;

        let expired: Vec<CanonicalPath> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_accessed) > idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = state.entries.shift_remove(&key) {
                if state.active.as_ref() == Some(&key) {
                    state.active = None;
                }
                reaped.push((key, entry));
            }
        }
        drop(state);

        let count = reaped.len();
        for (path, entry) in reaped {
            info!("[POOL] Closing idle connection {}", path);
            close_handle(entry.handle).await;
        }
        count
    }
}

/// Disconnect on the blocking pool; errors are logged, never raised
async fn close_handle(handle: Arc<DuckDbConnection>) -> bool {
    let path = handle.path().clone();
    let result = tokio::task::spawn_blocking(move || handle.close()).await;
    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("[POOL] Error closing {}: {}", path, e);
            false
        }
        Err(e) => {
            warn!("[POOL] Close task for {} failed: {}", path, e);
            false
        }
    }
}

/// Schema setup run once per freshly opened connection (blocking)
fn bootstrap(handle: &DuckDbConnection) -> Result<(), DatabaseError> {
    if handle.path().is_memory() {
        return handle.with_conn(seed_demo_items);
    }

    if let Err(e) = handle.with_conn(ensure_audit_tables) {
        warn!("[POOL] Could not create audit tables in {}: {}", handle.path(), e);
    }
    Ok(())
}

fn seed_demo_items(conn: &duckdb::Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, name VARCHAR, value INTEGER)",
    )?;
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO items (id, name, value) VALUES (?, ?, ?)")?;
    for (id, name, value) in DEMO_ITEMS {
        stmt.execute(duckdb::params![id, name, value])?;
    }
    Ok(())
}
