//! State shared by every hook: backend, cache, and cancellation.

use std::future::Future;
use std::sync::Arc;

use agora_client::{Backend, ClientError, ClientResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::{Invalidation, QueryCache, QueryKey};

/// Default rows per page when a read does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Handles every hook is built from.
#[derive(Clone)]
pub struct HookContext {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
    cancel: Option<CancellationToken>,
    page_size: u32,
}

impl HookContext {
    /// Context over `backend` and `cache`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, cache: QueryCache) -> Self {
        Self {
            backend,
            cache,
            cancel: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the default page size (zero is ignored).
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        if page_size > 0 {
            self.page_size = page_size;
        }
        self
    }

    /// Copy of this context whose calls stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut context = self.clone();
        context.cancel = Some(token);
        context
    }

    /// Backend the hooks talk to.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Shared cache.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Page size applied when a read does not choose one.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fail fast when the context has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Cancelled`] once the token fires.
    pub fn ensure_live(&self, operation: &'static str) -> ClientResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            Err(ClientError::Cancelled { operation })
        } else {
            Ok(())
        }
    }

    /// Run `work` unless cancellation fires first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Cancelled`] when cancelled, otherwise the
    /// result of `work`.
    pub async fn guard<T, F>(&self, operation: &'static str, work: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        let Some(token) = &self.cancel else {
            return work.await;
        };
        self.ensure_live(operation)?;
        tokio::select! {
            biased;
            () = token.cancelled() => Err(ClientError::Cancelled { operation }),
            result = work => result,
        }
    }

    /// Serve `key` from cache or run `fetch` and cache its rows.
    ///
    /// Nothing is cached when the call is cancelled or fails, or when the
    /// cache is cleared while `fetch` runs.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error or [`ClientError::Cancelled`].
    pub async fn read_through<F>(
        &self,
        operation: &'static str,
        key: QueryKey,
        fetch: F,
    ) -> ClientResult<Vec<Value>>
    where
        F: Future<Output = ClientResult<Vec<Value>>>,
    {
        self.ensure_live(operation)?;
        if let Some(rows) = self.cache.get_fresh(&key).await {
            return Ok(rows);
        }
        let ticket = self.cache.ticket().await;
        let rows = self.guard(operation, fetch).await?;
        self.ensure_live(operation)?;
        self.cache.store_fetched(key, rows.clone(), ticket).await;
        Ok(rows)
    }

    /// Like [`Self::read_through`] for single-record lookups.
    ///
    /// An empty result is reported as [`ClientError::NotFound`] and is not
    /// cached, so a record created later is found on the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] for a miss; otherwise propagates the
    /// fetch error or [`ClientError::Cancelled`].
    pub async fn read_one<F>(
        &self,
        operation: &'static str,
        resource: &'static str,
        key: QueryKey,
        fetch: F,
    ) -> ClientResult<Value>
    where
        F: Future<Output = ClientResult<Vec<Value>>>,
    {
        self.ensure_live(operation)?;
        let rows = if let Some(rows) = self.cache.get_fresh(&key).await {
            rows
        } else {
            let ticket = self.cache.ticket().await;
            let rows = self.guard(operation, fetch).await?;
            self.ensure_live(operation)?;
            if !rows.is_empty() {
                self.cache.store_fetched(key, rows.clone(), ticket).await;
            }
            rows
        };
        single_row(operation, resource, rows)
    }

    /// Apply invalidations after a write the backend acknowledged.
    pub async fn invalidate(&self, invalidations: &[Invalidation]) {
        for invalidation in invalidations {
            self.cache.invalidate(invalidation).await;
        }
    }
}

/// Decode backend rows into typed records.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] for the first row that does not fit `T`.
pub fn decode_rows<T: DeserializeOwned>(
    operation: &'static str,
    rows: Vec<Value>,
) -> ClientResult<Vec<T>> {
    rows.into_iter()
        .map(|row| decode_row(operation, row))
        .collect()
}

/// Decode one backend row.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] when the row does not fit `T`.
pub fn decode_row<T: DeserializeOwned>(operation: &'static str, row: Value) -> ClientResult<T> {
    serde_json::from_value(row).map_err(|source| ClientError::Decode { operation, source })
}

/// Serialize a payload for the backend.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] if the payload cannot be represented as JSON.
pub fn encode<T: serde::Serialize>(operation: &'static str, value: &T) -> ClientResult<Value> {
    serde_json::to_value(value).map_err(|source| ClientError::Decode { operation, source })
}

/// First row of a write response.
///
/// # Errors
///
/// Returns [`ClientError::NotFound`] when the write affected nothing.
pub fn single_row(
    operation: &'static str,
    resource: &'static str,
    rows: Vec<Value>,
) -> ClientResult<Value> {
    rows.into_iter().next().ok_or(ClientError::NotFound {
        operation,
        resource,
    })
}
