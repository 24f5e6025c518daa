#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Typed records mirroring the Agora backend rows.
//!
//! Layout: `community.rs`, `post.rs`, `transaction.rs` (records and payloads),
//! `status.rs` (transaction/offer state machines), `filter.rs` (read filters),
//! `money.rs` (non-negative amounts), `format.rs` (presentation helpers).

pub mod community;
pub mod error;
pub mod filter;
pub mod format;
pub mod money;
pub mod post;
pub mod status;
pub mod transaction;

pub use community::{
    Community, CommunityMembership, CreateCommunityData, NewCommunityRow, UpdateCommunityData,
    validate_slug,
};
pub use error::{ModelError, ModelResult, TransitionError};
pub use filter::{
    CommunityFilter, OfferFilter, PartyRole, PostFilter, QueryParams, TransactionFilter,
};
pub use format::{compact_count, format_money, slugify};
pub use money::Money;
pub use post::{
    Actor, ActorType, CreatePostData, MediaType, NewPostMedia, NewPostRow, Post, PostMedia,
    PostReaction, ReactionKind, validate_content,
};
pub use status::{OfferStatus, TransactionStatus};
pub use transaction::{
    CreateOfferData, CreateTransactionData, Offer, PaymentMethod, RatingSide, ShippingMethod,
    Transaction, validate_rating,
};
