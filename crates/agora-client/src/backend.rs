//! Substitutable data backend.
//!
//! Hooks only ever talk to `dyn Backend`, so tests swap the REST adapter for
//! an in-memory fake without touching hook code.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientResult;
use crate::query::{Filter, SelectQuery, Table};

/// Row-level operations offered by the hosted backend.
///
/// Writes return the affected rows as stored, including server defaults.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read rows matching `query`, in the requested order.
    async fn select(&self, query: &SelectQuery) -> ClientResult<Vec<Value>>;

    /// Insert one row.
    async fn insert(&self, table: Table, row: Value) -> ClientResult<Value>;

    /// Insert several rows in one request.
    async fn insert_many(&self, table: Table, rows: Vec<Value>) -> ClientResult<Vec<Value>>;

    /// Insert or merge one row keyed by the `on_conflict` columns.
    async fn upsert(&self, table: Table, row: Value, on_conflict: &[&str]) -> ClientResult<Value>;

    /// Patch every row matching `filters`.
    ///
    /// Fails with `NotFound` when nothing matched.
    async fn update(&self, table: Table, filters: &[Filter], patch: Value)
    -> ClientResult<Vec<Value>>;

    /// Delete every row matching `filters`.
    ///
    /// Fails with `NotFound` when nothing matched.
    async fn delete(&self, table: Table, filters: &[Filter]) -> ClientResult<Vec<Value>>;
}
