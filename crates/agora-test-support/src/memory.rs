//! In-memory stand-in for the hosted backend.
//!
//! Rows are plain JSON objects. Inserts apply the column defaults and
//! constraints the real schema enforces, and failures carry the same
//! Postgres error codes the REST adapter would surface.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agora_client::{Backend, ClientError, ClientResult, Filter, SelectQuery, Table};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

/// Unique keys per table.
const UNIQUE_KEYS: &[(Table, &[&str])] = &[
    (Table::Communities, &["slug"]),
    (Table::Communities, &["name"]),
    (Table::CommunityMembers, &["community_id", "user_id"]),
    (Table::PostReactions, &["post_id", "user_id"]),
];

/// `(table, column) -> referenced table` (always its `id`).
const FOREIGN_KEYS: &[(Table, &str, Table)] = &[
    (Table::CommunityMembers, "community_id", Table::Communities),
    (Table::PostMedia, "post_id", Table::Posts),
    (Table::PostReactions, "post_id", Table::Posts),
    (Table::Transactions, "listing_id", Table::Listings),
    (Table::Offers, "listing_id", Table::Listings),
];

#[derive(Default)]
struct State {
    tables: BTreeMap<Table, Vec<Value>>,
    calls: BTreeMap<(Table, &'static str), usize>,
    outage: bool,
    failing_writes: BTreeSet<Table>,
}

impl State {
    fn rows(&self, table: Table) -> &[Value] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    fn rows_mut(&mut self, table: Table) -> &mut Vec<Value> {
        self.tables.entry(table).or_default()
    }
}

/// Backend holding every table in process memory.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (for cancellation tests).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert rows directly, applying defaults but skipping constraints and
    /// call accounting.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.lock();
        for mut row in rows {
            apply_defaults(table, &mut row);
            state.rows_mut(table).push(row);
        }
    }

    /// Snapshot of every row in `table`.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().rows(table).to_vec()
    }

    /// Calls made for `table` and `op` (`select`, `insert`, `update`, ...).
    #[must_use]
    pub fn calls(&self, table: Table, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|((t, o), _)| *t == table && *o == op)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Calls made across every table and operation.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every call fail as a 503 until switched off.
    pub fn set_outage(&self, outage: bool) {
        self.lock().outage = outage;
    }

    /// Make writes to `table` fail as a 503 until switched off; reads still work.
    pub fn fail_writes(&self, table: Table, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_writes.insert(table);
        } else {
            state.failing_writes.remove(&table);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, table: Table, op: &'static str) -> ClientResult<MutexGuard<'_, State>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        *state.calls.entry((table, op)).or_default() += 1;
        if state.outage || (op != "select" && state.failing_writes.contains(&table)) {
            return Err(ClientError::Unavailable {
                operation: op,
                status: 503,
                message: Some("service unavailable".into()),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn select(&self, query: &SelectQuery) -> ClientResult<Vec<Value>> {
        let state = self.enter(query.table, "select").await?;
        let mut rows: Vec<Value> = state
            .rows(query.table)
            .iter()
            .filter(|row| query.filters.iter().all(|filter| matches(filter, row)))
            .cloned()
            .collect();
        drop(state);

        rows.sort_by(|left, right| {
            query
                .order
                .iter()
                .map(|key| {
                    let ordering = compare(left.get(key.column), right.get(key.column));
                    if key.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let rows = match query.range {
            Some(range) => rows
                .into_iter()
                .skip(usize::try_from(range.offset).unwrap_or(usize::MAX))
                .take(usize::try_from(range.limit).unwrap_or(usize::MAX))
                .collect(),
            None => rows,
        };
        Ok(rows
            .into_iter()
            .map(|row| project(&query.columns, row))
            .collect())
    }

    async fn insert(&self, table: Table, row: Value) -> ClientResult<Value> {
        let mut state = self.enter(table, "insert").await?;
        insert_row(&mut state, table, row, "insert")
    }

    async fn insert_many(&self, table: Table, rows: Vec<Value>) -> ClientResult<Vec<Value>> {
        let mut state = self.enter(table, "insert_many").await?;
        let before = state.rows(table).to_vec();
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            match insert_row(&mut state, table, row, "insert_many") {
                Ok(row) => stored.push(row),
                Err(err) => {
                    *state.rows_mut(table) = before;
                    return Err(err);
                }
            }
        }
        Ok(stored)
    }

    async fn upsert(&self, table: Table, row: Value, on_conflict: &[&str]) -> ClientResult<Value> {
        let mut state = self.enter(table, "upsert").await?;
        let existing = state.rows_mut(table).iter_mut().find(|stored| {
            on_conflict
                .iter()
                .all(|column| stored.get(*column) == row.get(*column))
        });
        if let Some(stored) = existing {
            merge(stored, &row);
            return Ok(stored.clone());
        }
        insert_row(&mut state, table, row, "upsert")
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Value,
    ) -> ClientResult<Vec<Value>> {
        let mut state = self.enter(table, "update").await?;
        let now = now();
        let mut updated = Vec::new();
        for row in state.rows_mut(table).iter_mut() {
            if filters.iter().all(|filter| matches(filter, row)) {
                merge(row, &patch);
                if has_updated_at(table) && patch.get("updated_at").is_none() {
                    set(row, "updated_at", Value::String(now.clone()));
                }
                updated.push(row.clone());
            }
        }
        if updated.is_empty() {
            return Err(ClientError::NotFound {
                operation: "update",
                resource: table.as_str(),
            });
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> ClientResult<Vec<Value>> {
        let mut state = self.enter(table, "delete").await?;
        let (removed, kept): (Vec<Value>, Vec<Value>) = std::mem::take(state.rows_mut(table))
            .into_iter()
            .partition(|row| filters.iter().all(|filter| matches(filter, row)));
        *state.rows_mut(table) = kept;
        if removed.is_empty() {
            return Err(ClientError::NotFound {
                operation: "delete",
                resource: table.as_str(),
            });
        }
        if table == Table::CommunityMembers {
            for member in &removed {
                adjust_member_count(&mut state, member, -1);
            }
        }
        if table == Table::Posts {
            let ids: Vec<&Value> = removed.iter().filter_map(|row| row.get("id")).collect();
            for child in [Table::PostMedia, Table::PostReactions] {
                state
                    .rows_mut(child)
                    .retain(|row| row.get("post_id").is_none_or(|id| !ids.contains(&id)));
            }
        }
        Ok(removed)
    }
}

fn insert_row(
    state: &mut State,
    table: Table,
    mut row: Value,
    operation: &'static str,
) -> ClientResult<Value> {
    if !row.is_object() {
        return Err(rejected(operation, 400, "PGRST102", "body must be a JSON object".into()));
    }
    apply_defaults(table, &mut row);
    check_constraints(state, table, &row, operation)?;
    if table == Table::CommunityMembers {
        adjust_member_count(state, &row, 1);
    }
    state.rows_mut(table).push(row.clone());
    Ok(row)
}

fn check_constraints(
    state: &State,
    table: Table,
    row: &Value,
    operation: &'static str,
) -> ClientResult<()> {
    for (_, columns) in UNIQUE_KEYS.iter().filter(|(t, _)| *t == table) {
        let clash = state.rows(table).iter().any(|stored| {
            columns
                .iter()
                .all(|column| !is_null(row.get(*column)) && stored.get(*column) == row.get(*column))
        });
        if clash {
            return Err(rejected(
                operation,
                409,
                UNIQUE_VIOLATION,
                format!(
                    "duplicate key value violates unique constraint \"{table}_{}_key\"",
                    columns.join("_")
                ),
            ));
        }
    }
    for (_, column, target) in FOREIGN_KEYS.iter().filter(|(t, _, _)| *t == table) {
        let Some(reference) = row.get(*column).filter(|value| !value.is_null()) else {
            continue;
        };
        if !state
            .rows(*target)
            .iter()
            .any(|stored| stored.get("id") == Some(reference))
        {
            return Err(rejected(
                operation,
                409,
                FOREIGN_KEY_VIOLATION,
                format!(
                    "insert or update on table \"{table}\" violates foreign key constraint \"{table}_{column}_fkey\""
                ),
            ));
        }
    }
    if table == Table::Posts {
        let user = !is_null(row.get("actor_user_id"));
        let org = !is_null(row.get("actor_org_id"));
        let kind = row.get("actor_type").and_then(Value::as_str);
        let valid = matches!((kind, user, org), (Some("user"), true, false) | (Some("org"), false, true));
        if !valid {
            return Err(rejected(
                operation,
                400,
                CHECK_VIOLATION,
                "new row for relation \"posts\" violates check constraint \"posts_actor_check\"".into(),
            ));
        }
    }
    if table == Table::Transactions && row.get("quantity").and_then(Value::as_u64) == Some(0) {
        return Err(rejected(
            operation,
            400,
            CHECK_VIOLATION,
            "new row for relation \"transactions\" violates check constraint \"transactions_quantity_check\"".into(),
        ));
    }
    Ok(())
}

fn rejected(operation: &'static str, status: u16, code: &str, message: String) -> ClientError {
    ClientError::Rejected {
        operation,
        status,
        code: Some(code.to_string()),
        message: Some(message),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

const fn has_updated_at(table: Table) -> bool {
    matches!(
        table,
        Table::Communities | Table::Posts | Table::Transactions | Table::Listings
    )
}

fn apply_defaults(table: Table, row: &mut Value) {
    let now = now();
    let has_id = !matches!(table, Table::CommunityMembers | Table::PostReactions);
    if has_id {
        default(row, "id", || json!(Uuid::new_v4()));
    }
    let stamp = if table == Table::CommunityMembers {
        "joined_at"
    } else {
        "created_at"
    };
    default(row, stamp, || json!(now));
    match table {
        Table::Communities => {
            default(row, "member_count", || json!(0));
            default(row, "is_public", || json!(true));
        }
        Table::Posts => {
            for counter in ["likes_count", "comments_count", "shares_count"] {
                default(row, counter, || json!(0));
            }
        }
        Table::Transactions => {
            default(row, "status", || json!("pending_payment"));
            default(row, "platform_fee", || json!(0));
            default(row, "shipping_fee", || json!(0));
        }
        Table::Offers => default(row, "status", || json!("pending")),
        Table::PostMedia => default(row, "position", || json!(0)),
        _ => {}
    }
}

fn default(row: &mut Value, column: &str, value: impl FnOnce() -> Value) {
    if let Some(object) = row.as_object_mut() {
        if is_null(object.get(column)) {
            object.insert(column.to_string(), value());
        }
    }
}

fn set(row: &mut Value, column: &str, value: Value) {
    if let Some(object) = row.as_object_mut() {
        object.insert(column.to_string(), value);
    }
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(source)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn adjust_member_count(state: &mut State, member: &Value, delta: i64) {
    let Some(community_id) = member.get("community_id").cloned() else {
        return;
    };
    if let Some(community) = state
        .rows_mut(Table::Communities)
        .iter_mut()
        .find(|row| row.get("id") == Some(&community_id))
    {
        let count = community
            .get("member_count")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        set(community, "member_count", json!((count + delta).max(0)));
    }
}

fn project(columns: &str, row: Value) -> Value {
    if columns.trim() == "*" {
        return row;
    }
    let Value::Object(object) = row else {
        return row;
    };
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    Value::Object(
        object
            .into_iter()
            .filter(|(key, _)| wanted.contains(&key.as_str()))
            .collect::<Map<String, Value>>(),
    )
}

fn is_null(value: Option<&Value>) -> bool {
    value.is_none_or(Value::is_null)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(filter: &Filter, row: &Value) -> bool {
    match filter {
        Filter::Eq { column, value } => text(row.get(*column)).as_deref() == Some(value.as_str()),
        Filter::Neq { column, value } => {
            text(row.get(*column)).is_some_and(|stored| stored != *value)
        }
        Filter::In { column, values } => {
            text(row.get(*column)).is_some_and(|stored| values.contains(&stored))
        }
        Filter::IsNull { column } => is_null(row.get(*column)),
        Filter::NotNull { column } => !is_null(row.get(*column)),
        Filter::ILike { column, pattern } => text(row.get(*column))
            .is_some_and(|stored| glob(&pattern.to_lowercase(), &stored.to_lowercase())),
        Filter::AnyOf(filters) => filters.iter().any(|nested| matches(nested, row)),
    }
}

fn glob(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let [first, middle @ .., last] = parts.as_slice() else {
        return pattern == text;
    };
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

// Nulls sort after every value, as in Postgres ascending order.
fn compare(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left.filter(|v| !v.is_null()), right.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(a), Some(b)) => text(Some(a)).cmp(&text(Some(b))),
    }
}
