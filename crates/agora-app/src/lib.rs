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

//! Agora client bootstrap.
//!
//! Layout: `bootstrap.rs` (context wiring and background tasks), `error.rs`
//! (application errors). The data crates are re-exported so callers depend on
//! this crate alone.

/// Context wiring and lifecycle.
pub mod bootstrap;
/// Application-level errors.
pub mod error;

pub use agora_client as client;
pub use agora_config as config;
pub use agora_data as data;
pub use agora_models as models;
pub use agora_telemetry as telemetry;
pub use bootstrap::{AgoraContext, HookScope};
pub use error::{AppError, AppResult};
