//! Payload builders and seed helpers.

use agora_client::Table;
use agora_models::{
    Actor, CreateCommunityData, CreateOfferData, CreatePostData, CreateTransactionData, Money,
    PaymentMethod, ShippingMethod,
};
use serde_json::json;
use uuid::Uuid;

use crate::memory::InMemoryBackend;

/// Seed a listing owned by `seller` and return its id.
pub fn seed_listing(backend: &InMemoryBackend, seller: Uuid, price: Money) -> Uuid {
    let id = Uuid::new_v4();
    backend.seed(
        Table::Listings,
        [json!({
            "id": id,
            "seller_id": seller,
            "title": "Used bicycle",
            "price": price,
            "quantity": 1,
        })],
    );
    id
}

/// Community payload with a derived slug.
#[must_use]
pub fn community(name: &str, created_by: Uuid) -> CreateCommunityData {
    CreateCommunityData {
        name: name.to_string(),
        slug: None,
        description: None,
        is_public: true,
        created_by,
    }
}

/// Text post by `actor`, optionally inside a community.
#[must_use]
pub fn post(actor: Actor, community_id: Option<Uuid>, content: &str) -> CreatePostData {
    CreatePostData {
        content: content.to_string(),
        actor,
        community_id,
        topic_id: None,
        region: None,
        media: Vec::new(),
    }
}

/// Single-unit purchase of `listing_id` at `price` with no fees.
#[must_use]
pub fn purchase(listing_id: Uuid, buyer_id: Uuid, seller_id: Uuid, price: Money) -> CreateTransactionData {
    CreateTransactionData {
        listing_id,
        buyer_id,
        seller_id,
        quantity: 1,
        product_price: price,
        platform_fee: Money::ZERO,
        shipping_fee: Money::ZERO,
        total_amount: price,
        payment_method: PaymentMethod::Card,
        shipping_method: ShippingMethod::Pickup,
    }
}

/// Open-ended offer on `listing_id`.
#[must_use]
pub fn offer(listing_id: Uuid, buyer_id: Uuid, seller_id: Uuid, price: Money) -> CreateOfferData {
    CreateOfferData {
        listing_id,
        buyer_id,
        seller_id,
        offered_price: price,
        message: None,
        expires_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_listing_is_visible() {
        let backend = InMemoryBackend::new();
        let seller = Uuid::new_v4();
        let id = seed_listing(&backend, seller, Money::from_major(40));
        let rows = backend.rows(Table::Listings);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(id));
        assert_eq!(backend.total_calls(), 0);
    }

    #[test]
    fn payloads_are_valid() {
        let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(purchase(Uuid::new_v4(), buyer, seller, Money::from_major(5))
            .validate()
            .is_ok());
        assert!(community("Rust Berlin", buyer).into_row().is_ok());
        assert!(post(Actor::User(buyer), None, "hello").into_parts().is_ok());
    }
}
