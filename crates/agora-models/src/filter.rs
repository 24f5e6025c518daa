//! Read filters and their cache parameters.
//!
//! Every filter renders to a flat, ordered parameter map. The map doubles as
//! the cache key suffix and as the vocabulary for record-based invalidation.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::post::Actor;
use crate::status::{OfferStatus, TransactionStatus};

/// Ordered cache parameters for a read.
pub type QueryParams = BTreeMap<String, String>;

fn put(params: &mut QueryParams, key: &str, value: Option<impl ToString>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.to_string());
    }
}

/// Filter for community listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommunityFilter {
    /// Case-insensitive name search.
    pub search: Option<String>,
    /// Only return public communities.
    pub only_public: bool,
    /// Maximum rows to return.
    pub limit: Option<u32>,
}

impl CommunityFilter {
    /// Cache parameters for this filter.
    #[must_use]
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        put(
            &mut params,
            "search",
            self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        );
        if self.only_public {
            params.insert("is_public".into(), "true".into());
        }
        put(&mut params, "limit", self.limit);
        params
    }
}

/// Filter for post feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    /// Restrict to one community.
    pub community_id: Option<Uuid>,
    /// Restrict to one topic.
    pub topic_id: Option<Uuid>,
    /// Restrict to one region.
    pub region: Option<String>,
    /// Restrict to one author ("only mine").
    pub author: Option<Actor>,
    /// Attach this viewer's reactions.
    pub viewer_id: Option<Uuid>,
    /// Rows per page.
    pub page_size: Option<u32>,
}

impl PostFilter {
    /// Cache parameters for this filter.
    #[must_use]
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        put(&mut params, "community_id", self.community_id);
        put(&mut params, "topic_id", self.topic_id);
        put(&mut params, "region", self.region.as_deref());
        put(&mut params, "author", self.author.map(Actor::id));
        put(&mut params, "viewer_id", self.viewer_id);
        put(&mut params, "page_size", self.page_size);
        params
    }
}

/// Which side of a transaction the filtering user is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartyRole {
    /// User is the buyer.
    Buyer,
    /// User is the seller.
    Seller,
    /// User is either party.
    #[default]
    Any,
}

impl PartyRole {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Any => "any",
        }
    }
}

/// Filter for transaction listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Party whose transactions to list.
    pub user_id: Option<Uuid>,
    /// Side the party is on.
    pub role: PartyRole,
    /// Restrict to one status.
    pub status: Option<TransactionStatus>,
    /// Maximum rows to return.
    pub limit: Option<u32>,
}

impl TransactionFilter {
    /// Cache parameters for this filter.
    #[must_use]
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        put(&mut params, "user_id", self.user_id);
        if self.user_id.is_some() {
            params.insert("role".into(), self.role.as_str().into());
        }
        put(&mut params, "status", self.status);
        put(&mut params, "limit", self.limit);
        params
    }
}

/// Filter for offer listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferFilter {
    /// Restrict to one listing.
    pub listing_id: Option<Uuid>,
    /// Restrict to one buyer.
    pub buyer_id: Option<Uuid>,
    /// Restrict to one seller.
    pub seller_id: Option<Uuid>,
    /// Restrict to one status.
    pub status: Option<OfferStatus>,
    /// Maximum rows to return.
    pub limit: Option<u32>,
}

impl OfferFilter {
    /// Cache parameters for this filter.
    #[must_use]
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        put(&mut params, "listing_id", self.listing_id);
        put(&mut params, "buyer_id", self.buyer_id);
        put(&mut params, "seller_id", self.seller_id);
        put(&mut params, "status", self.status);
        put(&mut params, "limit", self.limit);
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_have_no_params() {
        assert!(CommunityFilter::default().params().is_empty());
        assert!(PostFilter::default().params().is_empty());
        assert!(TransactionFilter::default().params().is_empty());
        assert!(OfferFilter::default().params().is_empty());
    }

    #[test]
    fn post_params_are_stable_and_complete() {
        let community = Uuid::new_v4();
        let author = Uuid::new_v4();
        let filter = PostFilter {
            community_id: Some(community),
            author: Some(Actor::User(author)),
            region: Some("north".into()),
            page_size: Some(20),
            ..PostFilter::default()
        };
        let params = filter.params();
        assert_eq!(params.get("community_id"), Some(&community.to_string()));
        assert_eq!(params.get("author"), Some(&author.to_string()));
        assert_eq!(params.get("region").map(String::as_str), Some("north"));
        assert_eq!(params.get("page_size").map(String::as_str), Some("20"));
        assert_eq!(params, filter.clone().params());
    }

    #[test]
    fn blank_search_is_ignored() {
        let filter = CommunityFilter {
            search: Some("   ".into()),
            only_public: true,
            limit: None,
        };
        let params = filter.params();
        assert!(!params.contains_key("search"));
        assert_eq!(params.get("is_public").map(String::as_str), Some("true"));
    }

    #[test]
    fn role_only_matters_with_a_user() {
        let anonymous = TransactionFilter {
            role: PartyRole::Seller,
            ..TransactionFilter::default()
        };
        assert!(anonymous.params().is_empty());

        let seller = TransactionFilter {
            user_id: Some(Uuid::nil()),
            role: PartyRole::Seller,
            status: Some(TransactionStatus::Shipped),
            limit: None,
        };
        let params = seller.params();
        assert_eq!(params.get("role").map(String::as_str), Some("seller"));
        assert_eq!(params.get("status").map(String::as_str), Some("shipped"));
    }
}
