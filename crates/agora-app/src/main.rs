#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Smoke-check entrypoint: boots the context from the environment, reads the
//! public community directory once, and shuts down.

use agora_app::models::CommunityFilter;
use agora_app::{AgoraContext, AppError, AppResult};
use tracing::info;

/// Boot, read once, and stop.
#[tokio::main]
async fn main() -> AppResult<()> {
    let context = AgoraContext::from_env().await?;
    let filter = CommunityFilter {
        only_public: true,
        limit: Some(context.config().default_page_size),
        ..CommunityFilter::default()
    };
    let result = context.communities().list(&filter).await;
    let shutdown = context.shutdown().await;
    let communities = result.map_err(|err| AppError::Client {
        operation: "communities.list",
        source: err,
    })?;
    info!(count = communities.len(), "public communities loaded");
    shutdown
}
