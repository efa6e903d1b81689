//! Per-chat router sessions

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info};

use crate::{
    error::Result,
    events::{AgentEvent, AgentEventStream, emit},
    router::{Request, Router},
};

/// Idle time after which a session may be evicted
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Table size past which idle sessions are evicted
pub const DEFAULT_SESSION_CAPACITY: usize = 100;

/// Time source for session bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Keyed storage for live sessions
pub trait SessionStore<T>: Send + Sync {
    /// Look up a session and mark it as used
    fn get(&self, key: &str) -> Option<T>;

    /// Return the session under `key`, creating it with `create` when absent
    fn get_or_insert_with(&self, key: &str, create: &mut dyn FnMut() -> Result<T>) -> Result<T>;

    /// Drop every session idle past the TTL, returning how many went
    fn evict_idle(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry<T> {
    value: T,
    last_accessed: Instant,
}

/// Session table in process memory.
///
/// Idle entries are only swept once the table grows past its capacity.
pub struct InMemorySessionStore<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
}

impl<T> InMemorySessionStore<T> {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            ttl,
            capacity,
        }
    }

    fn sweep(&self, entries: &mut HashMap<String, Entry<T>>) -> usize {
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_accessed) <= self.ttl);
        let evicted = before - entries.len();
        info!(evicted, remaining = entries.len(), "Cleaned up stale sessions");
        evicted
    }
}

impl<T> Default for InMemorySessionStore<T> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), DEFAULT_SESSION_TTL, DEFAULT_SESSION_CAPACITY)
    }
}

impl<T: Clone + Send> SessionStore<T> for InMemorySessionStore<T> {
    fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = self.clock.now();
        Some(entry.value.clone())
    }

    fn get_or_insert_with(&self, key: &str, create: &mut dyn FnMut() -> Result<T>) -> Result<T> {
        let mut entries = self.entries.lock();
        if entries.len() > self.capacity {
            self.sweep(&mut entries);
        }

        let now = self.clock.now();
        if let Some(entry) = entries.get_mut(key) {
            info!(session = key, "Resuming session");
            entry.last_accessed = now;
            return Ok(entry.value.clone());
        }

        info!(session = key, "Creating new session");
        let value = create()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                last_accessed: now,
            },
        );
        Ok(value)
    }

    fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A router shared by every request on one chat
pub type SharedRouter = Arc<tokio::sync::Mutex<Router>>;

/// Builds the router for a new session
pub type RouterBuilder = Arc<dyn Fn() -> Result<Router> + Send + Sync>;

fn session_key(user_id: &str, chat_id: &str) -> String {
    format!("{}:{}", user_id, chat_id)
}

/// Process-wide table of routers keyed by user and chat
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore<SharedRouter>>,
    builder: RouterBuilder,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore<SharedRouter>>, builder: RouterBuilder) -> Self {
        Self { store, builder }
    }

    /// Manager over an in-memory table with the given limits
    pub fn in_memory(builder: RouterBuilder, ttl: Duration, capacity: usize) -> Self {
        let store = InMemorySessionStore::new(Arc::new(SystemClock), ttl, capacity);
        Self::new(Arc::new(store), builder)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get_or_create(&self, user_id: &str, chat_id: &str) -> Result<SharedRouter> {
        let builder = &self.builder;
        self.store
            .get_or_insert_with(&session_key(user_id, chat_id), &mut || {
                Ok(Arc::new(tokio::sync::Mutex::new(builder()?)))
            })
    }

    /// Clear a session's history and results. Unknown sessions are left alone.
    pub async fn reset(&self, user_id: &str, chat_id: &str) -> bool {
        let key = session_key(user_id, chat_id);
        match self.store.get(&key) {
            Some(router) => {
                router.lock().await.reset();
                info!(session = %key, "Conversation reset");
                true
            }
            None => {
                info!(session = %key, "Reset called for non-existent session");
                false
            }
        }
    }

    /// Run a request on the session's router in the background.
    ///
    /// Requests on one session run one at a time. A failure that escapes the
    /// router becomes a final error event.
    pub fn stream(&self, chat_id: &str, request: Request) -> Result<AgentEventStream> {
        let router = self.get_or_create(&request.user_id, chat_id)?;
        let key = session_key(&request.user_id, chat_id);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut router = router.lock().await;
            if let Err(e) = router.run(&request, &tx).await {
                error!(session = %key, error = %e, "Streaming error");
                emit(&tx, AgentEvent::error("Error during streaming"));
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
