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

//! Client-side configuration for the Agora data-access layer.
//!
//! Layout: `model.rs` (typed settings and validation), `loader.rs`
//! (environment parsing), `defaults.rs` (default values), `error.rs`.

mod defaults;
pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::ClientConfig;
