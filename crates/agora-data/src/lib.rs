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

//! Cache-backed entity hooks for the Agora backend.
//!
//! Reads go through [`QueryCache`] keyed by resource and filter; writes hit
//! the backend first and only then invalidate or refresh cached reads.
//! Paged reads are exposed as restartable [`Feed`]s.

pub mod cache;
pub mod communities;
pub mod context;
pub mod offers;
pub mod pagination;
pub mod posts;
pub mod transactions;

pub use cache::{
    CacheEntry, CacheEvent, CacheEvents, Invalidation, QueryCache, QueryKey, ReadTicket, Resource,
};
pub use communities::Communities;
pub use context::{DEFAULT_PAGE_SIZE, HookContext};
pub use offers::Offers;
pub use pagination::{Feed, Page, PageSource, QueryPages};
pub use posts::Posts;
pub use transactions::Transactions;
