//! Post feeds, authoring, and reactions.

use std::collections::HashMap;
use std::sync::Arc;

use agora_client::{ClientError, ClientResult, Filter, Order, SelectQuery, Table};
use agora_models::{CreatePostData, Post, PostFilter, PostReaction, ReactionKind, validate_content};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{Invalidation, QueryKey, Resource};
use crate::context::{HookContext, decode_row, encode, single_row};
use crate::pagination::{Feed, PageSource};

/// Hook for the `posts`, `post_media`, and `post_reactions` tables.
#[derive(Clone)]
pub struct Posts {
    ctx: HookContext,
}

impl Posts {
    /// Hook over `ctx`.
    #[must_use]
    pub const fn new(ctx: HookContext) -> Self {
        Self { ctx }
    }

    /// Newest-first feed of posts matching `filter`.
    ///
    /// Media is attached to every post; the viewer's reaction is attached
    /// when `filter.viewer_id` is set.
    #[must_use]
    pub fn feed(&self, filter: &PostFilter) -> Feed<Post> {
        let page_size = filter.page_size.unwrap_or_else(|| self.ctx.page_size());
        let source = PostPages {
            ctx: self.ctx.clone(),
            filter: filter.clone(),
        };
        Feed::new(
            self.ctx.clone(),
            "posts.feed",
            QueryKey::new(Resource::Posts, filter.params()),
            Arc::new(source),
            page_size,
        )
    }

    /// Publish a post and attach its media.
    ///
    /// When the media rows cannot be stored the post row is removed again
    /// and the media error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for a bad payload; backend errors
    /// propagate.
    pub async fn create(&self, data: CreatePostData) -> ClientResult<Post> {
        const OP: &str = "posts.create";
        let actor = data.actor;
        let (row, media) = data
            .into_parts()
            .map_err(|err| ClientError::invalid(OP, err))?;
        let payload = encode(OP, &row)?;
        let backend = self.ctx.backend();
        let mut stored = self
            .ctx
            .guard(OP, backend.insert(Table::Posts, payload))
            .await?;
        let post_id = stored
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ClientError::Unexpected {
                operation: OP,
                reason: "inserted post has no id",
            })?;

        let media_rows = if media.is_empty() {
            Vec::new()
        } else {
            let rows = media
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    json!({
                        "post_id": post_id,
                        "url": item.url,
                        "media_type": item.media_type,
                        "position": position,
                    })
                })
                .collect();
            match backend.insert_many(Table::PostMedia, rows).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%post_id, error = %err, "media insert failed; removing post");
                    if let Err(cleanup) = backend
                        .delete(Table::Posts, &[Filter::equals("id", &post_id)])
                        .await
                    {
                        warn!(%post_id, error = %cleanup, "post cleanup failed");
                    }
                    return Err(err);
                }
            }
        };
        stored["media"] = Value::Array(media_rows);
        let post: Post = decode_row(OP, stored)?;

        self.ctx
            .invalidate(&[Invalidation::Matching {
                resource: Resource::Posts,
                fields: vec![
                    ("community_id", post.community_id.map(|id| id.to_string())),
                    ("topic_id", post.topic_id.map(|id| id.to_string())),
                    ("region", post.region.clone()),
                    ("author", Some(actor.id().to_string())),
                ],
            }])
            .await;
        info!(post_id = %post.id, media = post.media.len(), "post created");
        Ok(post)
    }

    /// Replace the body of post `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for blank content and
    /// [`ClientError::NotFound`] for an unknown post.
    pub async fn update_content(&self, id: Uuid, content: &str) -> ClientResult<Post> {
        const OP: &str = "posts.update_content";
        let content = validate_content(content).map_err(|err| ClientError::invalid(OP, err))?;
        let rows = self
            .ctx
            .guard(
                OP,
                self.ctx.backend().update(
                    Table::Posts,
                    &[Filter::equals("id", id)],
                    json!({ "content": content }),
                ),
            )
            .await?;
        let row = single_row(OP, "post", rows)?;
        let rows = self.ctx.guard(OP, attach_media(&self.ctx, vec![row])).await?;
        let post: Post = decode_row(OP, single_row(OP, "post", rows)?)?;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Posts)])
            .await;
        debug!(post_id = %id, "post edited");
        Ok(post)
    }

    /// Delete post `id` together with its media and reactions.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] for an unknown post.
    pub async fn delete(&self, id: Uuid) -> ClientResult<()> {
        const OP: &str = "posts.delete";
        self.ctx
            .guard(
                OP,
                self.ctx
                    .backend()
                    .delete(Table::Posts, &[Filter::equals("id", id)]),
            )
            .await?;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Posts)])
            .await;
        info!(post_id = %id, "post deleted");
        Ok(())
    }

    /// Set `user_id`'s reaction on `post_id`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] when the post does not exist.
    pub async fn react(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
    ) -> ClientResult<PostReaction> {
        const OP: &str = "posts.react";
        let payload = json!({ "post_id": post_id, "user_id": user_id, "reaction_type": kind });
        let stored = self
            .ctx
            .guard(
                OP,
                self.ctx
                    .backend()
                    .upsert(Table::PostReactions, payload, &["post_id", "user_id"]),
            )
            .await?;
        let reaction: PostReaction = decode_row(OP, stored)?;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Posts)])
            .await;
        debug!(%post_id, %user_id, reaction = %kind, "reaction set");
        Ok(reaction)
    }

    /// Remove `user_id`'s reaction from `post_id`.
    ///
    /// Returns whether a reaction existed.
    ///
    /// # Errors
    ///
    /// Propagates backend and cancellation errors.
    pub async fn unreact(&self, post_id: Uuid, user_id: Uuid) -> ClientResult<bool> {
        const OP: &str = "posts.unreact";
        let filters = [
            Filter::equals("post_id", post_id),
            Filter::equals("user_id", user_id),
        ];
        match self
            .ctx
            .guard(OP, self.ctx.backend().delete(Table::PostReactions, &filters))
            .await
        {
            Ok(_) => {
                self.ctx
                    .invalidate(&[Invalidation::Resource(Resource::Posts)])
                    .await;
                Ok(true)
            }
            Err(ClientError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

struct PostPages {
    ctx: HookContext,
    filter: PostFilter,
}

#[async_trait]
impl PageSource for PostPages {
    async fn fetch(&self, offset: u64, limit: u32) -> ClientResult<Vec<Value>> {
        let filter = &self.filter;
        let query = SelectQuery::new(Table::Posts)
            .filter_opt(filter.community_id.map(|id| Filter::equals("community_id", id)))
            .filter_opt(filter.topic_id.map(|id| Filter::equals("topic_id", id)))
            .filter_opt(filter.region.as_deref().map(|region| Filter::equals("region", region)))
            .filter_opt(
                filter
                    .author
                    .map(|actor| Filter::equals(actor.column(), actor.id())),
            )
            .order(Order::desc("created_at"))
            .order(Order::desc("id"))
            .range(offset, limit);
        let rows = self.ctx.backend().select(&query).await?;
        if rows.is_empty() {
            return Ok(rows);
        }
        let rows = attach_media(&self.ctx, rows).await?;
        match filter.viewer_id {
            Some(viewer) => attach_reactions(&self.ctx, rows, viewer).await,
            None => Ok(rows),
        }
    }
}

fn post_ids(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

async fn attach_media(ctx: &HookContext, mut rows: Vec<Value>) -> ClientResult<Vec<Value>> {
    let query = SelectQuery::new(Table::PostMedia)
        .filter(Filter::is_in("post_id", post_ids(&rows)))
        .order(Order::asc("position"));
    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for media in ctx.backend().select(&query).await? {
        if let Some(post_id) = media.get("post_id").and_then(Value::as_str) {
            grouped.entry(post_id.to_string()).or_default().push(media);
        }
    }
    for row in &mut rows {
        let media = row
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| grouped.remove(id))
            .unwrap_or_default();
        row["media"] = Value::Array(media);
    }
    Ok(rows)
}

async fn attach_reactions(
    ctx: &HookContext,
    mut rows: Vec<Value>,
    viewer: Uuid,
) -> ClientResult<Vec<Value>> {
    let query = SelectQuery::new(Table::PostReactions)
        .filter(Filter::is_in("post_id", post_ids(&rows)))
        .filter(Filter::equals("user_id", viewer));
    let reactions: HashMap<String, Value> = ctx
        .backend()
        .select(&query)
        .await?
        .into_iter()
        .filter_map(|reaction| {
            let post_id = reaction.get("post_id").and_then(Value::as_str)?.to_string();
            Some((post_id, reaction.get("reaction_type")?.clone()))
        })
        .collect();
    for row in &mut rows {
        if let Some(kind) = row
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| reactions.get(id))
        {
            row["viewer_reaction"] = kind.clone();
        }
    }
    Ok(rows)
}
