//! Marketplace transactions and offers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::money::Money;
use crate::status::{OfferStatus, TransactionStatus};

/// How the buyer pays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the payment provider.
    Card,
    /// Direct bank transfer.
    BankTransfer,
    /// In-app wallet balance.
    Wallet,
    /// Cash on pickup.
    Cash,
}

/// How the item reaches the buyer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    /// Buyer collects in person.
    Pickup,
    /// Standard parcel service.
    Standard,
    /// Expedited parcel service.
    Express,
}

/// Which party leaves a post-completion rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingSide {
    /// The buyer rates the seller.
    Buyer,
    /// The seller rates the buyer.
    Seller,
}

impl RatingSide {
    /// Columns holding this side's `(rating, review)`.
    #[must_use]
    pub const fn columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Buyer => ("buyer_rating", "buyer_review"),
            Self::Seller => ("seller_rating", "seller_review"),
        }
    }
}

/// Purchase of a listed item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Stable identifier.
    pub id: Uuid,
    /// Listing being purchased.
    pub listing_id: Uuid,
    /// Purchasing profile.
    pub buyer_id: Uuid,
    /// Selling profile.
    pub seller_id: Uuid,
    /// Units purchased.
    pub quantity: u32,
    /// Unit price.
    pub product_price: Money,
    /// Platform commission.
    #[serde(default)]
    pub platform_fee: Money,
    /// Shipping charge.
    #[serde(default)]
    pub shipping_fee: Money,
    /// Amount charged to the buyer.
    pub total_amount: Money,
    /// Payment method.
    pub payment_method: PaymentMethod,
    /// Shipping method.
    pub shipping_method: ShippingMethod,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Carrier tracking reference.
    #[serde(default)]
    pub tracking_number: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// When payment was captured.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// When the item shipped.
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
    /// When the item was delivered.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the sale completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Buyer's rating of the seller (1-5).
    #[serde(default)]
    pub buyer_rating: Option<u8>,
    /// Buyer's review text.
    #[serde(default)]
    pub buyer_review: Option<String>,
    /// Seller's rating of the buyer (1-5).
    #[serde(default)]
    pub seller_rating: Option<u8>,
    /// Seller's review text.
    #[serde(default)]
    pub seller_review: Option<String>,
}

impl Transaction {
    /// Rating already left by `side`, if any.
    #[must_use]
    pub const fn rating_for(&self, side: RatingSide) -> Option<u8> {
        match side {
            RatingSide::Buyer => self.buyer_rating,
            RatingSide::Seller => self.seller_rating,
        }
    }
}

/// Payload for opening a transaction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateTransactionData {
    /// Listing being purchased.
    pub listing_id: Uuid,
    /// Purchasing profile.
    pub buyer_id: Uuid,
    /// Selling profile.
    pub seller_id: Uuid,
    /// Units purchased.
    pub quantity: u32,
    /// Unit price.
    pub product_price: Money,
    /// Platform commission.
    pub platform_fee: Money,
    /// Shipping charge.
    pub shipping_fee: Money,
    /// Amount charged to the buyer; pricing rules belong to the backend.
    pub total_amount: Money,
    /// Payment method.
    pub payment_method: PaymentMethod,
    /// Shipping method.
    pub shipping_method: ShippingMethod,
}

impl CreateTransactionData {
    /// Validate the structural requirements of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] when the quantity is zero or the
    /// buyer and seller are the same profile.
    pub fn validate(&self) -> ModelResult<()> {
        if self.quantity == 0 {
            return Err(ModelError::field("quantity", "must_be_positive"));
        }
        if self.buyer_id == self.seller_id {
            return Err(ModelError::field("buyer_id", "must_differ_from_seller"));
        }
        Ok(())
    }
}

/// Validate a 1-5 star rating and optional review.
///
/// # Errors
///
/// Returns [`ModelError::InvalidField`] for out-of-range ratings.
pub fn validate_rating(rating: u8, review: Option<&str>) -> ModelResult<Option<String>> {
    if !(1..=5).contains(&rating) {
        return Err(ModelError::field("rating", "must_be_between_1_and_5"));
    }
    Ok(review
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}

/// Price proposal on a listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offer {
    /// Stable identifier.
    pub id: Uuid,
    /// Listing the offer targets.
    pub listing_id: Uuid,
    /// Proposing profile.
    pub buyer_id: Uuid,
    /// Listing owner.
    pub seller_id: Uuid,
    /// Proposed price.
    pub offered_price: Money,
    /// Note to the seller.
    #[serde(default)]
    pub message: Option<String>,
    /// Lifecycle status.
    pub status: OfferStatus,
    /// Deadline after which the offer lapses.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set once, when the offer leaves `pending`.
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

/// Payload for proposing a price.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateOfferData {
    /// Listing the offer targets.
    pub listing_id: Uuid,
    /// Proposing profile.
    pub buyer_id: Uuid,
    /// Listing owner.
    pub seller_id: Uuid,
    /// Proposed price.
    pub offered_price: Money,
    /// Note to the seller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Deadline after which the offer lapses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateOfferData {
    /// Validate the payload against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] for a zero price, a self-offer, or
    /// an expiry that is not in the future.
    pub fn validate(&self, now: DateTime<Utc>) -> ModelResult<()> {
        if self.offered_price.is_zero() {
            return Err(ModelError::field("offered_price", "must_be_positive"));
        }
        if self.buyer_id == self.seller_id {
            return Err(ModelError::field("buyer_id", "must_differ_from_seller"));
        }
        if self.expires_at.is_some_and(|expires| expires <= now) {
            return Err(ModelError::field("expires_at", "must_be_in_future"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn transaction_payload() -> CreateTransactionData {
        CreateTransactionData {
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            quantity: 2,
            product_price: Money::from_cents(5_000),
            platform_fee: Money::from_cents(250),
            shipping_fee: Money::from_cents(500),
            total_amount: Money::from_cents(10_750),
            payment_method: PaymentMethod::Card,
            shipping_method: ShippingMethod::Standard,
        }
    }

    #[test]
    fn underpriced_total_is_left_to_the_backend() {
        let mut payload = transaction_payload();
        payload.total_amount = Money::from_cents(1);
        assert!(payload.total_amount < payload.product_price.times(payload.quantity));
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn transaction_requires_quantity_and_distinct_parties() {
        let mut payload = transaction_payload();
        payload.quantity = 0;
        assert!(payload.validate().is_err());

        let mut payload = transaction_payload();
        payload.seller_id = payload.buyer_id;
        assert_eq!(
            payload.validate(),
            Err(ModelError::field("buyer_id", "must_differ_from_seller"))
        );
    }

    #[test]
    fn decodes_transaction_rows() -> anyhow::Result<()> {
        let row = json!({
            "id": Uuid::new_v4(),
            "listing_id": Uuid::new_v4(),
            "buyer_id": Uuid::new_v4(),
            "seller_id": Uuid::new_v4(),
            "quantity": 1,
            "product_price": 19.99,
            "platform_fee": 1,
            "shipping_fee": 0,
            "total_amount": "20.99",
            "payment_method": "bank_transfer",
            "shipping_method": "pickup",
            "status": "pending_payment",
            "created_at": "2026-03-01T10:00:00Z",
        });
        let tx: Transaction = serde_json::from_value(row)?;
        assert_eq!(tx.total_amount, Money::from_cents(2_099));
        assert_eq!(tx.status, TransactionStatus::PendingPayment);
        assert_eq!(tx.rating_for(RatingSide::Buyer), None);
        Ok(())
    }

    #[test]
    fn negative_fees_do_not_decode() {
        let row = json!({
            "id": Uuid::new_v4(),
            "listing_id": Uuid::new_v4(),
            "buyer_id": Uuid::new_v4(),
            "seller_id": Uuid::new_v4(),
            "quantity": 1,
            "product_price": 10,
            "platform_fee": -1,
            "total_amount": 10,
            "payment_method": "card",
            "shipping_method": "pickup",
            "status": "paid",
            "created_at": "2026-03-01T10:00:00Z",
        });
        assert!(serde_json::from_value::<Transaction>(row).is_err());
    }

    #[test]
    fn ratings_are_bounded() {
        assert!(validate_rating(0, None).is_err());
        assert!(validate_rating(6, None).is_err());
        assert_eq!(validate_rating(5, Some("  great ")), Ok(Some("great".into())));
        assert_eq!(validate_rating(3, Some("   ")), Ok(None));
    }

    #[test]
    fn offers_need_future_expiry_and_positive_price() {
        let now = Utc::now();
        let mut offer = CreateOfferData {
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            offered_price: Money::from_cents(1_000),
            message: None,
            expires_at: Some(now + Duration::hours(1)),
        };
        assert!(offer.validate(now).is_ok());

        offer.expires_at = Some(now);
        assert!(offer.validate(now).is_err());

        offer.expires_at = None;
        offer.offered_price = Money::ZERO;
        assert_eq!(
            offer.validate(now),
            Err(ModelError::field("offered_price", "must_be_positive"))
        );
    }
}
