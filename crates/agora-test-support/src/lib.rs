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

//! Shared test helpers.
//! Layout: memory.rs (in-memory backend), fixtures.rs (payload builders and seeds).

pub mod fixtures;
pub mod memory;

pub use memory::InMemoryBackend;
