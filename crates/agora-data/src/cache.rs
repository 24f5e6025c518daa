//! Keyed query cache with explicit invalidation.
//!
//! # Design
//! - Entries are keyed by resource plus the read's parameter map, so two
//!   reads with the same filter share one entry.
//! - Invalidation only marks entries stale; the next read refetches.
//! - Every change is broadcast so views can re-read without polling.
//! - Reads take a [`ReadTicket`] before fetching. Rows fetched across an
//!   invalidation that covers their key land stale; rows fetched across a
//!   `clear` are dropped.

use std::collections::{HashMap, VecDeque};
use std::collections::hash_map::DefaultHasher;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_models::QueryParams;
use agora_telemetry::Metrics;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const EVENT_CAPACITY: usize = 256;
const RECENT_INVALIDATIONS: usize = 64;

/// Logical collections the cache groups entries by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// Community listings.
    Communities,
    /// Communities a user belongs to.
    MyCommunities,
    /// Single community lookups.
    Community,
    /// Post feeds.
    Posts,
    /// Transaction listings.
    Transactions,
    /// Single transaction lookups.
    Transaction,
    /// Offer listings.
    Offers,
}

impl Resource {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Communities => "communities",
            Self::MyCommunities => "my_communities",
            Self::Community => "community",
            Self::Posts => "posts",
            Self::Transactions => "transactions",
            Self::Transaction => "transaction",
            Self::Offers => "offers",
        }
    }
}

impl Display for Resource {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identity of one cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Collection the read belongs to.
    pub resource: Resource,
    /// Read parameters in canonical order.
    pub params: QueryParams,
}

impl QueryKey {
    /// Key with the given parameters.
    #[must_use]
    pub const fn new(resource: Resource, params: QueryParams) -> Self {
        Self { resource, params }
    }

    /// Key with no parameters.
    #[must_use]
    pub fn bare(resource: Resource) -> Self {
        Self::new(resource, QueryParams::new())
    }

    /// Copy of this key with one more parameter.
    #[must_use]
    pub fn with_param(&self, name: &str, value: impl ToString) -> Self {
        let mut key = self.clone();
        key.params.insert(name.to_string(), value.to_string());
        key
    }

    /// Stable hash of the key.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Which cached reads a write affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Every entry of the resource.
    Resource(Resource),
    /// Entries of `resource` whose parameters agree with a written record.
    ///
    /// For each `(field, value)` an entry matches when it has no such
    /// parameter or has exactly that value. A `None` value only matches
    /// entries without the parameter.
    Matching {
        /// Collection to scan.
        resource: Resource,
        /// Record fields in their parameter form.
        fields: Vec<(&'static str, Option<String>)>,
    },
    /// Exactly one entry.
    Key(QueryKey),
}

impl Invalidation {
    /// Resource this invalidation targets.
    #[must_use]
    pub const fn resource(&self) -> Resource {
        match self {
            Self::Resource(resource) | Self::Matching { resource, .. } => *resource,
            Self::Key(key) => key.resource,
        }
    }

    fn applies_to(&self, key: &QueryKey) -> bool {
        match self {
            Self::Resource(resource) => key.resource == *resource,
            Self::Matching { resource, fields } => {
                key.resource == *resource
                    && fields.iter().all(|(field, value)| {
                        key.params
                            .get(*field)
                            .is_none_or(|param| value.as_deref() == Some(param.as_str()))
                    })
            }
            Self::Key(target) => key == target,
        }
    }
}

/// Change notification emitted by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Fresh rows were stored for a key.
    Stored {
        /// Resource of the stored key.
        resource: Resource,
        /// Fingerprint of the stored key.
        fingerprint: u64,
    },
    /// Entries were marked stale.
    Invalidated {
        /// Resource the invalidation targeted.
        resource: Resource,
        /// Number of entries affected.
        count: usize,
    },
    /// Every entry was dropped.
    Cleared,
}

/// Receiver for [`CacheEvent`]s.
pub struct CacheEvents {
    receiver: broadcast::Receiver<CacheEvent>,
}

impl CacheEvents {
    /// Next event; lagging receivers skip ahead instead of failing.
    pub async fn next(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Rows as returned by the backend.
    pub rows: Vec<Value>,
    /// When the rows were fetched.
    pub fetched_at: Instant,
    /// Set by invalidation.
    pub stale: bool,
}

/// Cache position captured before a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket {
    epoch: u64,
    generation: u64,
}

/// Shared query cache; clones observe the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    epoch: u64,
    generation: u64,
    recent: VecDeque<(u64, Invalidation)>,
}

impl CacheState {
    fn invalidated_since(&self, ticket: ReadTicket, key: &QueryKey) -> bool {
        if self.generation == ticket.generation {
            return false;
        }
        let evicted = self
            .recent
            .front()
            .is_none_or(|(generation, _)| *generation > ticket.generation + 1);
        evicted
            || self
                .recent
                .iter()
                .filter(|(generation, _)| *generation > ticket.generation)
                .any(|(_, invalidation)| invalidation.applies_to(key))
    }
}

struct CacheInner {
    state: RwLock<CacheState>,
    stale_after: Duration,
    events: broadcast::Sender<CacheEvent>,
    metrics: Option<Metrics>,
}

impl QueryCache {
    /// Cache whose entries expire `stale_after` after being fetched.
    ///
    /// A zero window disables reuse: every read refetches.
    #[must_use]
    pub fn new(stale_after: Duration) -> Self {
        Self::build(stale_after, None)
    }

    /// Cache that records lookups and invalidations in `metrics`.
    #[must_use]
    pub fn with_metrics(stale_after: Duration, metrics: Metrics) -> Self {
        Self::build(stale_after, Some(metrics))
    }

    fn build(stale_after: Duration, metrics: Option<Metrics>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                state: RwLock::new(CacheState::default()),
                stale_after,
                events,
                metrics,
            }),
        }
    }

    /// Rows for `key` when present, not invalidated, and inside the window.
    pub async fn get_fresh(&self, key: &QueryKey) -> Option<Vec<Value>> {
        let rows = {
            let state = self.inner.state.read().await;
            state
                .entries
                .get(key)
                .filter(|entry| !entry.stale && entry.fetched_at.elapsed() < self.inner.stale_after)
                .map(|entry| entry.rows.clone())
        };
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_cache_lookup(key.resource.as_str(), rows.is_some());
        }
        rows
    }

    /// Entry for `key` regardless of freshness.
    pub async fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.state.read().await.entries.get(key).cloned()
    }

    /// Position to hand back to [`Self::store_fetched`] once a fetch returns.
    pub async fn ticket(&self) -> ReadTicket {
        let state = self.inner.state.read().await;
        ReadTicket {
            epoch: state.epoch,
            generation: state.generation,
        }
    }

    /// Store freshly fetched rows for `key`.
    pub async fn store(&self, key: QueryKey, rows: Vec<Value>) {
        let mut state = self.inner.state.write().await;
        self.insert(&mut state, key, rows, false);
    }

    /// Store rows fetched after `ticket` was taken.
    ///
    /// Rows are dropped when the cache was cleared in the meantime and stored
    /// stale when an invalidation covering `key` ran in the meantime. Returns
    /// whether anything was stored.
    pub async fn store_fetched(&self, key: QueryKey, rows: Vec<Value>, ticket: ReadTicket) -> bool {
        let mut state = self.inner.state.write().await;
        if state.epoch != ticket.epoch {
            debug!(resource = %key.resource, "cache cleared during fetch; rows dropped");
            return false;
        }
        let stale = state.invalidated_since(ticket, &key);
        if stale {
            debug!(resource = %key.resource, "cache invalidated during fetch; rows stored stale");
        }
        self.insert(&mut state, key, rows, stale);
        true
    }

    fn insert(&self, state: &mut CacheState, key: QueryKey, rows: Vec<Value>, stale: bool) {
        let event = CacheEvent::Stored {
            resource: key.resource,
            fingerprint: key.fingerprint(),
        };
        state.entries.insert(
            key,
            CacheEntry {
                rows,
                fetched_at: Instant::now(),
                stale,
            },
        );
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_cache_entries(state.entries.len());
        }
        let _ = self.inner.events.send(event);
    }

    /// Mark matching entries stale and return how many were affected.
    pub async fn invalidate(&self, invalidation: &Invalidation) -> usize {
        let mut count = 0;
        {
            let mut state = self.inner.state.write().await;
            for (key, entry) in &mut state.entries {
                if invalidation.applies_to(key) {
                    entry.stale = true;
                    count += 1;
                }
            }
            state.generation += 1;
            let generation = state.generation;
            state.recent.push_back((generation, invalidation.clone()));
            if state.recent.len() > RECENT_INVALIDATIONS {
                state.recent.pop_front();
            }
        }
        let resource = invalidation.resource();
        debug!(resource = %resource, count, "cache invalidated");
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_invalidation(resource.as_str(), count);
        }
        let _ = self
            .inner
            .events
            .send(CacheEvent::Invalidated { resource, count });
        count
    }

    /// Replace the row with `id` in every entry of `resource`.
    ///
    /// Freshness is left untouched; returns the number of rows replaced.
    pub async fn replace_row(&self, resource: Resource, id: &str, row: &Value) -> usize {
        let mut state = self.inner.state.write().await;
        let mut replaced = 0;
        let rows = state
            .entries
            .iter_mut()
            .filter(|(key, _)| key.resource == resource)
            .flat_map(|(_, entry)| entry.rows.iter_mut());
        for cached in rows {
            if cached.get("id").and_then(Value::as_str) == Some(id) {
                *cached = row.clone();
                replaced += 1;
            }
        }
        replaced
    }

    /// Drop every entry (for example on sign-out).
    pub async fn clear(&self) {
        {
            let mut state = self.inner.state.write().await;
            state.entries.clear();
            state.recent.clear();
            state.epoch += 1;
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_cache_entries(0);
        }
        let _ = self.inner.events.send(CacheEvent::Cleared);
    }

    /// Number of entries held.
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.entries.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.entries.is_empty()
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> CacheEvents {
        CacheEvents {
            receiver: self.inner.events.subscribe(),
        }
    }
}
