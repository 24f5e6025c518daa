//! Marketplace transactions: listing, lifecycle, and ratings.
//!
//! # Design
//! - Status changes are checked against the transaction state machine first,
//!   then written with a `status=eq.<current>` guard so a concurrent writer
//!   surfaces as [`ClientError::StaleStatus`] instead of being overwritten.
//! - Successful writes refresh the cached single-record view in place and
//!   mark list views stale.

use agora_client::{ClientError, ClientResult, Filter, Order, SelectQuery, Table};
use agora_models::{
    CreateTransactionData, ModelError, PartyRole, RatingSide, Transaction, TransactionFilter,
    TransactionStatus, validate_rating,
};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::info;
use uuid::Uuid;

use crate::cache::{Invalidation, QueryKey, Resource};
use crate::context::{HookContext, decode_row, decode_rows, encode, single_row};

/// Hook for the `transactions` table.
#[derive(Clone)]
pub struct Transactions {
    ctx: HookContext,
}

impl Transactions {
    /// Hook over `ctx`.
    #[must_use]
    pub const fn new(ctx: HookContext) -> Self {
        Self { ctx }
    }

    /// Transactions matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backend, decode, and cancellation errors.
    pub async fn list(&self, filter: &TransactionFilter) -> ClientResult<Vec<Transaction>> {
        const OP: &str = "transactions.list";
        let key = QueryKey::new(Resource::Transactions, filter.params());
        let party = filter.user_id.map(|user| match filter.role {
            PartyRole::Buyer => Filter::equals("buyer_id", user),
            PartyRole::Seller => Filter::equals("seller_id", user),
            PartyRole::Any => Filter::AnyOf(vec![
                Filter::equals("buyer_id", user),
                Filter::equals("seller_id", user),
            ]),
        });
        let mut query = SelectQuery::new(Table::Transactions)
            .filter_opt(party)
            .filter_opt(filter.status.map(|status| Filter::equals("status", status)))
            .order(Order::desc("created_at"));
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let rows = self
            .ctx
            .read_through(OP, key, self.ctx.backend().select(&query))
            .await?;
        decode_rows(OP, rows)
    }

    /// Transaction `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] for an unknown id.
    pub async fn get(&self, id: Uuid) -> ClientResult<Transaction> {
        const OP: &str = "transactions.get";
        let query = by_id(id);
        let row = self
            .ctx
            .read_one(OP, "transaction", single_key(id), self.ctx.backend().select(&query))
            .await?;
        decode_row(OP, row)
    }

    /// Open a transaction in `pending_payment`.
    ///
    /// The total is stored as given; pricing rules belong to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for a bad payload and
    /// [`ClientError::Rejected`] when the listing does not exist.
    pub async fn create(&self, data: CreateTransactionData) -> ClientResult<Transaction> {
        const OP: &str = "transactions.create";
        data.validate().map_err(|err| ClientError::invalid(OP, err))?;
        let payload = encode(OP, &data)?;
        let stored = self
            .ctx
            .guard(OP, self.ctx.backend().insert(Table::Transactions, payload))
            .await?;
        let transaction: Transaction = decode_row(OP, stored)?;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Transactions)])
            .await;
        info!(
            transaction_id = %transaction.id,
            listing_id = %transaction.listing_id,
            "transaction opened"
        );
        Ok(transaction)
    }

    /// Move transaction `id` to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] wrapping a transition error for moves
    /// outside the state machine, [`ClientError::StaleStatus`] when another
    /// writer changed the status first, and [`ClientError::NotFound`] for an
    /// unknown id.
    pub async fn transition(
        &self,
        id: Uuid,
        next: TransactionStatus,
    ) -> ClientResult<Transaction> {
        const OP: &str = "transactions.transition";
        let current = self.fetch_fresh(OP, id).await?;
        let from = current.status;
        from.transition(next)
            .map_err(|err| ClientError::invalid(OP, err.into()))?;

        let mut patch = Map::new();
        patch.insert("status".into(), json!(next));
        if let Some(column) = next.timestamp_column() {
            patch.insert(column.into(), json!(Utc::now()));
        }
        let filters = [
            Filter::equals("id", id),
            Filter::equals("status", from),
        ];
        let updated = self
            .guarded_update(OP, &filters, Value::Object(patch), from.as_str())
            .await?;
        info!(transaction_id = %id, %from, to = %next, "transaction status changed");
        Ok(updated)
    }

    /// Record `side`'s rating and optional review on a completed transaction.
    ///
    /// Each side may rate once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for an out-of-range rating, a
    /// transaction that is not completed, or a side that already rated.
    pub async fn rate(
        &self,
        id: Uuid,
        side: RatingSide,
        rating: u8,
        review: Option<&str>,
    ) -> ClientResult<Transaction> {
        const OP: &str = "transactions.rate";
        let review = validate_rating(rating, review).map_err(|err| ClientError::invalid(OP, err))?;
        let current = self.fetch_fresh(OP, id).await?;
        if current.status != TransactionStatus::Completed {
            return Err(ClientError::invalid(
                OP,
                ModelError::InvalidField {
                    field: "status",
                    reason: "transaction_not_completed",
                },
            ));
        }
        let already_rated = ClientError::invalid(
            OP,
            ModelError::InvalidField {
                field: "rating",
                reason: "already_rated",
            },
        );
        if current.rating_for(side).is_some() {
            return Err(already_rated);
        }

        let (rating_column, review_column) = side.columns();
        let filters = [
            Filter::equals("id", id),
            Filter::equals("status", TransactionStatus::Completed),
            Filter::IsNull {
                column: rating_column,
            },
        ];
        let patch = json!({ rating_column: rating, review_column: review });
        match self
            .guarded_update(OP, &filters, patch, TransactionStatus::Completed.as_str())
            .await
        {
            Err(ClientError::StaleStatus { .. }) => Err(already_rated),
            other => other,
        }
    }

    async fn fetch_fresh(&self, operation: &'static str, id: Uuid) -> ClientResult<Transaction> {
        let rows = self
            .ctx
            .guard(operation, self.ctx.backend().select(&by_id(id)))
            .await?;
        decode_row(operation, single_row(operation, "transaction", rows)?)
    }

    async fn guarded_update(
        &self,
        operation: &'static str,
        filters: &[Filter],
        patch: Value,
        expected: &'static str,
    ) -> ClientResult<Transaction> {
        let ticket = self.ctx.cache().ticket().await;
        let rows = match self
            .ctx
            .guard(
                operation,
                self.ctx.backend().update(Table::Transactions, filters, patch),
            )
            .await
        {
            Ok(rows) => rows,
            Err(ClientError::NotFound { .. }) => {
                return Err(ClientError::StaleStatus {
                    operation,
                    expected,
                });
            }
            Err(err) => return Err(err),
        };
        let row = single_row(operation, "transaction", rows)?;
        let transaction: Transaction = decode_row(operation, row.clone())?;
        self.ctx
            .cache()
            .store_fetched(single_key(transaction.id), vec![row], ticket)
            .await;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Transactions)])
            .await;
        Ok(transaction)
    }
}

fn by_id(id: Uuid) -> SelectQuery {
    SelectQuery::new(Table::Transactions)
        .filter(Filter::equals("id", id))
        .limit(1)
}

fn single_key(id: Uuid) -> QueryKey {
    QueryKey::bare(Resource::Transaction).with_param("id", id)
}
