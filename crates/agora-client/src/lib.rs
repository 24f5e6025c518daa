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

//! Transport layer for the Agora backend.
//!
//! `query.rs` describes reads and filters, `backend.rs` is the seam hooks
//! depend on, `rest.rs` implements it over HTTP, and `session.rs`/`store.rs`/
//! `refresh.rs` keep the signed-in session alive.

pub mod backend;
pub mod error;
mod problem;
pub mod query;
pub mod refresh;
pub mod rest;
pub mod session;
pub mod store;

pub use backend::Backend;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use query::{Filter, Order, Range, SelectQuery, Table};
pub use refresh::{RestTokenRefresher, TokenRefresher};
pub use rest::{HEADER_API_KEY, RestBackend, build_http_client};
pub use session::{Session, SessionManager};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
