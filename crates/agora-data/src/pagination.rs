//! Restartable page-by-page reads.

use std::marker::PhantomData;
use std::sync::Arc;

use agora_client::{ClientResult, SelectQuery};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::QueryKey;
use crate::context::{HookContext, decode_rows};

/// Produces one window of rows.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Rows `offset..offset + limit` in server order.
    async fn fetch(&self, offset: u64, limit: u32) -> ClientResult<Vec<Value>>;
}

/// Page source backed by a plain select.
pub struct QueryPages {
    context: HookContext,
    query: SelectQuery,
}

impl QueryPages {
    /// Pages of `query`; any range already on the query is replaced.
    #[must_use]
    pub const fn new(context: HookContext, query: SelectQuery) -> Self {
        Self { context, query }
    }
}

#[async_trait]
impl PageSource for QueryPages {
    async fn fetch(&self, offset: u64, limit: u32) -> ClientResult<Vec<Value>> {
        let query = self.query.clone().range(offset, limit);
        self.context.backend().select(&query).await
    }
}

/// One page of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Zero-based page number.
    pub index: u64,
    /// Records in server order.
    pub items: Vec<T>,
    /// Whether another page may follow.
    pub has_more: bool,
}

/// Finite cursor over a paged read.
///
/// Page `i` covers rows `i * page_size .. (i + 1) * page_size` and is cached
/// under the feed key plus `page=i`. A page shorter than `page_size` ends the
/// feed; an empty page past the first is not reported.
pub struct Feed<T> {
    context: HookContext,
    operation: &'static str,
    key: QueryKey,
    source: Arc<dyn PageSource>,
    page_size: u32,
    next_index: u64,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Feed<T> {
    /// Feed over `source`, cached under `key`.
    #[must_use]
    pub fn new(
        context: HookContext,
        operation: &'static str,
        key: QueryKey,
        source: Arc<dyn PageSource>,
        page_size: u32,
    ) -> Self {
        Self {
            context,
            operation,
            key,
            source,
            page_size: page_size.max(1),
            next_index: 0,
            exhausted: false,
            _marker: PhantomData,
        }
    }

    /// Rows per page.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Whether the last page has been returned.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Load the next page, or `None` once the feed is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates backend, decode, and cancellation errors; the cursor does
    /// not advance on error.
    pub async fn next_page(&mut self) -> ClientResult<Option<Page<T>>> {
        if self.exhausted {
            return Ok(None);
        }
        let index = self.next_index;
        let offset = index.saturating_mul(u64::from(self.page_size));
        let rows = self
            .context
            .read_through(
                self.operation,
                self.key.with_param("page", index),
                self.source.fetch(offset, self.page_size),
            )
            .await?;
        let items: Vec<T> = decode_rows(self.operation, rows)?;

        self.next_index += 1;
        if items.len() < usize::try_from(self.page_size).unwrap_or(usize::MAX) {
            self.exhausted = true;
        }
        if items.is_empty() && index > 0 {
            return Ok(None);
        }
        Ok(Some(Page {
            index,
            items,
            has_more: !self.exhausted,
        }))
    }

    /// Rewind to the first page.
    pub const fn restart(&mut self) {
        self.next_index = 0;
        self.exhausted = false;
    }

    /// Drain the remaining pages into one list.
    ///
    /// # Errors
    ///
    /// Propagates the first page error.
    pub async fn collect_all(&mut self) -> ClientResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page.items);
        }
        Ok(items)
    }
}
