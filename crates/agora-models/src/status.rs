//! Status state machines for transactions and offers.
//!
//! # Design
//! - Each machine is an explicit transition table; anything not listed is rejected.
//! - Terminal states have an empty successor set.
//! - Parsing from the wire only accepts the machine's own labels.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, TransitionError};

/// Lifecycle of a purchase between a buyer and a seller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, waiting for the buyer to pay.
    PendingPayment,
    /// Payment captured.
    Paid,
    /// Seller handed the item to the carrier.
    Shipped,
    /// Carrier reported delivery.
    Delivered,
    /// Buyer confirmed receipt; the sale is closed.
    Completed,
    /// Either side abandoned the sale.
    Cancelled,
    /// Escalated to the backend's dispute process.
    Disputed,
}

impl TransactionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::PendingPayment,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Completed,
        Self::Cancelled,
        Self::Disputed,
    ];

    /// Wire label used by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// Statuses reachable in one step from `self`.
    ///
    /// Disputes are settled by the backend, so the client defines no exit from
    /// `Disputed`.
    #[must_use]
    pub const fn allowed_next(self) -> &'static [Self] {
        match self {
            Self::PendingPayment => &[Self::Paid, Self::Cancelled, Self::Disputed],
            Self::Paid => &[Self::Shipped, Self::Cancelled, Self::Disputed],
            Self::Shipped => &[Self::Delivered, Self::Cancelled, Self::Disputed],
            Self::Delivered => &[Self::Completed, Self::Cancelled, Self::Disputed],
            Self::Completed | Self::Cancelled | Self::Disputed => &[],
        }
    }

    /// Whether no further transition is defined.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when `next` is not a legal successor.
    pub fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                entity: "transaction",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    /// Timestamp column stamped when a transaction enters this status.
    #[must_use]
    pub const fn timestamp_column(self) -> Option<&'static str> {
        match self {
            Self::Paid => Some("paid_at"),
            Self::Shipped => Some("shipped_at"),
            Self::Delivered => Some("delivered_at"),
            Self::Completed => Some("completed_at"),
            Self::PendingPayment | Self::Cancelled | Self::Disputed => None,
        }
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or(ModelError::field("status", "unknown_transaction_status"))
    }
}

/// Lifecycle of a price proposal on a listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Awaiting the seller's answer.
    Pending,
    /// Seller agreed to the price.
    Accepted,
    /// Seller declined.
    Rejected,
    /// The offer lapsed before an answer.
    Expired,
    /// The buyer withdrew the offer.
    Cancelled,
}

impl OfferStatus {
    /// Every status; `Pending` first.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Accepted,
        Self::Rejected,
        Self::Expired,
        Self::Cancelled,
    ];

    /// Wire label used by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step from `self`.
    #[must_use]
    pub const fn allowed_next(self) -> &'static [Self] {
        match self {
            Self::Pending => &[
                Self::Accepted,
                Self::Rejected,
                Self::Expired,
                Self::Cancelled,
            ],
            Self::Accepted | Self::Rejected | Self::Expired | Self::Cancelled => &[],
        }
    }

    /// Whether no further transition is defined.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when `next` is not a legal successor.
    pub fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                entity: "offer",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    /// Validate a transition requested by wire label.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] for labels outside the offer
    /// machine and [`ModelError::Transition`] for illegal successors.
    pub fn transition_to_label(self, next: &str) -> Result<Self, ModelError> {
        let next = next.parse::<Self>()?;
        Ok(self.transition(next)?)
    }
}

impl Display for OfferStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or(ModelError::field("status", "unknown_offer_status"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_happy_path_walks_to_completed() {
        let mut status = TransactionStatus::PendingPayment;
        for next in [
            TransactionStatus::Paid,
            TransactionStatus::Shipped,
            TransactionStatus::Delivered,
            TransactionStatus::Completed,
        ] {
            status = status.transition(next).expect("happy path transition");
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn side_exits_are_reachable_from_every_open_state() {
        for status in TransactionStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(TransactionStatus::Cancelled));
            assert!(status.can_transition_to(TransactionStatus::Disputed));
        }
    }

    #[test]
    fn terminal_transaction_states_reject_everything() {
        for terminal in [
            TransactionStatus::Completed,
            TransactionStatus::Cancelled,
            TransactionStatus::Disputed,
        ] {
            for next in TransactionStatus::ALL {
                assert!(terminal.transition(next).is_err(), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn transaction_cannot_skip_steps_or_stay_put() {
        let err = TransactionStatus::PendingPayment
            .transition(TransactionStatus::Shipped)
            .expect_err("skipping payment must fail");
        assert_eq!(err.from, "pending_payment");
        assert_eq!(err.to, "shipped");
        assert!(
            TransactionStatus::Paid
                .transition(TransactionStatus::Paid)
                .is_err()
        );
    }

    #[test]
    fn offer_leaves_pending_exactly_once() {
        for next in OfferStatus::ALL.into_iter().skip(1) {
            let landed = OfferStatus::Pending.transition(next).expect("pending exit");
            assert!(landed.is_terminal());
            assert!(landed.transition(OfferStatus::Pending).is_err());
        }
    }

    #[test]
    fn offer_rejects_transaction_only_labels() {
        let err = OfferStatus::Pending
            .transition_to_label("completed")
            .expect_err("completed is not an offer state");
        assert_eq!(
            err,
            ModelError::InvalidField {
                field: "status",
                reason: "unknown_offer_status",
            }
        );
        assert_eq!(
            OfferStatus::Pending.transition_to_label("accepted"),
            Ok(OfferStatus::Accepted)
        );
    }

    #[test]
    fn timestamps_follow_forward_progress() {
        assert_eq!(
            TransactionStatus::Shipped.timestamp_column(),
            Some("shipped_at")
        );
        assert_eq!(TransactionStatus::Cancelled.timestamp_column(), None);
    }

    #[test]
    fn wire_labels_round_trip_through_serde() -> anyhow::Result<()> {
        let json = serde_json::to_string(&TransactionStatus::PendingPayment)?;
        assert_eq!(json, "\"pending_payment\"");
        assert_eq!("disputed".parse::<TransactionStatus>()?, TransactionStatus::Disputed);
        Ok(())
    }
}
