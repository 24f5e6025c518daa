//! Price offers on listings.

use agora_client::{ClientError, ClientResult, Filter, Order, SelectQuery, Table};
use agora_models::{CreateOfferData, Offer, OfferFilter, OfferStatus};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::cache::{Invalidation, QueryKey, Resource};
use crate::context::{HookContext, decode_row, decode_rows, encode, single_row};

/// Hook for the `offers` table.
#[derive(Clone)]
pub struct Offers {
    ctx: HookContext,
}

impl Offers {
    /// Hook over `ctx`.
    #[must_use]
    pub const fn new(ctx: HookContext) -> Self {
        Self { ctx }
    }

    /// Offers matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates backend, decode, and cancellation errors.
    pub async fn list(&self, filter: &OfferFilter) -> ClientResult<Vec<Offer>> {
        const OP: &str = "offers.list";
        let key = QueryKey::new(Resource::Offers, filter.params());
        let mut query = SelectQuery::new(Table::Offers)
            .filter_opt(filter.listing_id.map(|id| Filter::equals("listing_id", id)))
            .filter_opt(filter.buyer_id.map(|id| Filter::equals("buyer_id", id)))
            .filter_opt(filter.seller_id.map(|id| Filter::equals("seller_id", id)))
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

    /// Propose a price on a listing; the offer starts `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for a bad payload and
    /// [`ClientError::Rejected`] when the listing does not exist.
    pub async fn create(&self, data: CreateOfferData) -> ClientResult<Offer> {
        const OP: &str = "offers.create";
        data.validate(Utc::now())
            .map_err(|err| ClientError::invalid(OP, err))?;
        let payload = encode(OP, &data)?;
        let stored = self
            .ctx
            .guard(OP, self.ctx.backend().insert(Table::Offers, payload))
            .await?;
        let offer: Offer = decode_row(OP, stored)?;
        self.ctx
            .invalidate(&[Invalidation::Matching {
                resource: Resource::Offers,
                fields: vec![
                    ("listing_id", Some(offer.listing_id.to_string())),
                    ("buyer_id", Some(offer.buyer_id.to_string())),
                    ("seller_id", Some(offer.seller_id.to_string())),
                    ("status", Some(offer.status.to_string())),
                ],
            }])
            .await;
        info!(offer_id = %offer.id, listing_id = %offer.listing_id, "offer placed");
        Ok(offer)
    }

    /// Move a pending offer to `next` and stamp `responded_at`.
    ///
    /// Other offers on the same listing are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] wrapping a transition error when the
    /// offer is no longer pending or `next` is `pending`, and
    /// [`ClientError::StaleStatus`] when another writer answered first.
    pub async fn respond(&self, id: Uuid, next: OfferStatus) -> ClientResult<Offer> {
        const OP: &str = "offers.respond";
        let query = SelectQuery::new(Table::Offers)
            .filter(Filter::equals("id", id))
            .limit(1);
        let rows = self.ctx.guard(OP, self.ctx.backend().select(&query)).await?;
        let current: Offer = decode_row(OP, single_row(OP, "offer", rows)?)?;
        current
            .status
            .transition(next)
            .map_err(|err| ClientError::invalid(OP, err.into()))?;

        let filters = [
            Filter::equals("id", id),
            Filter::equals("status", current.status),
        ];
        let patch = json!({ "status": next, "responded_at": Utc::now() });
        let rows = match self
            .ctx
            .guard(OP, self.ctx.backend().update(Table::Offers, &filters, patch))
            .await
        {
            Ok(rows) => rows,
            Err(ClientError::NotFound { .. }) => {
                return Err(ClientError::StaleStatus {
                    operation: OP,
                    expected: current.status.as_str(),
                });
            }
            Err(err) => return Err(err),
        };
        let offer: Offer = decode_row(OP, single_row(OP, "offer", rows)?)?;
        self.ctx
            .invalidate(&[Invalidation::Matching {
                resource: Resource::Offers,
                fields: vec![("listing_id", Some(offer.listing_id.to_string()))],
            }])
            .await;
        info!(offer_id = %id, status = %offer.status, "offer answered");
        Ok(offer)
    }

    /// [`Self::respond`] with the target status given as a wire label.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for labels outside the offer machine,
    /// otherwise as [`Self::respond`].
    pub async fn respond_label(&self, id: Uuid, label: &str) -> ClientResult<Offer> {
        let next = label
            .parse::<OfferStatus>()
            .map_err(|err| ClientError::invalid("offers.respond", err))?;
        self.respond(id, next).await
    }
}
