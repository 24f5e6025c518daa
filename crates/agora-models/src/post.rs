//! Post records, media attachments, reactions, and payloads.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Longest post body accepted by the backend.
pub const MAX_POST_LEN: usize = 10_000;

/// Discriminator stored in `actor_type`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// Individual profile.
    User,
    /// Organization account.
    Org,
}

impl ActorType {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Org => "org",
        }
    }
}

/// Author of a post: a user or an organization, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    /// Authored by an individual profile.
    User(Uuid),
    /// Authored by an organization.
    Org(Uuid),
}

impl Actor {
    /// Discriminator for this actor.
    #[must_use]
    pub const fn actor_type(self) -> ActorType {
        match self {
            Self::User(_) => ActorType::User,
            Self::Org(_) => ActorType::Org,
        }
    }

    /// Identifier of the user or organization.
    #[must_use]
    pub const fn id(self) -> Uuid {
        match self {
            Self::User(id) | Self::Org(id) => id,
        }
    }

    /// Backend column holding this actor's id.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::User(_) => "actor_user_id",
            Self::Org(_) => "actor_org_id",
        }
    }

    /// Rebuild an actor from the three wire columns.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidRecord`] unless exactly the column named
    /// by `actor_type` is populated.
    pub fn from_columns(
        actor_type: ActorType,
        user_id: Option<Uuid>,
        org_id: Option<Uuid>,
    ) -> ModelResult<Self> {
        match (actor_type, user_id, org_id) {
            (ActorType::User, Some(id), None) => Ok(Self::User(id)),
            (ActorType::Org, None, Some(id)) => Ok(Self::Org(id)),
            _ => Err(ModelError::InvalidRecord {
                record: "post",
                reason: "actor_columns_must_match_actor_type",
            }),
        }
    }
}

/// Reaction a viewer can leave on a post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    /// Thumbs up.
    Like,
    /// Heart.
    Love,
    /// Laughing face.
    Laugh,
    /// Surprised face.
    Wow,
    /// Sad face.
    Sad,
    /// Angry face.
    Angry,
}

impl Display for ReactionKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
        };
        formatter.write_str(label)
    }
}

/// Reaction row keyed by `(post_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostReaction {
    /// Post reacted to.
    pub post_id: Uuid,
    /// Reacting profile.
    pub user_id: Uuid,
    /// Chosen reaction.
    pub reaction_type: ReactionKind,
}

/// Kind of media attached to a post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Still image.
    Image,
    /// Video clip.
    Video,
}

/// Media row embedded into post reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostMedia {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning post.
    pub post_id: Uuid,
    /// Storage URL.
    pub url: String,
    /// Media kind.
    pub media_type: MediaType,
    /// Display order within the post.
    #[serde(default)]
    pub position: u32,
}

/// Media to attach while creating a post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPostMedia {
    /// Storage URL of an already uploaded object.
    pub url: String,
    /// Media kind.
    pub media_type: MediaType,
}

/// Post as seen by the client.
///
/// Decoding enforces that `actor_type` names exactly one populated actor
/// column, so every `Post` value carries a well-formed [`Actor`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "PostRow", into = "PostRow")]
pub struct Post {
    /// Stable identifier.
    pub id: Uuid,
    /// Body text.
    pub content: String,
    /// Author.
    pub actor: Actor,
    /// Community the post belongs to, if any.
    pub community_id: Option<Uuid>,
    /// Topic tag.
    pub topic_id: Option<Uuid>,
    /// Region tag.
    pub region: Option<String>,
    /// Like counter maintained by the backend.
    pub likes_count: u64,
    /// Comment counter maintained by the backend.
    pub comments_count: u64,
    /// Share counter maintained by the backend.
    pub shares_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last edit timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Attached media ordered by position.
    pub media: Vec<PostMedia>,
    /// The current viewer's reaction, when requested.
    pub viewer_reaction: Option<ReactionKind>,
}

/// Flat wire representation of a post row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PostRow {
    id: Uuid,
    content: String,
    actor_type: ActorType,
    #[serde(default)]
    actor_user_id: Option<Uuid>,
    #[serde(default)]
    actor_org_id: Option<Uuid>,
    #[serde(default)]
    community_id: Option<Uuid>,
    #[serde(default)]
    topic_id: Option<Uuid>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    likes_count: u64,
    #[serde(default)]
    comments_count: u64,
    #[serde(default)]
    shares_count: u64,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    media: Vec<PostMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    viewer_reaction: Option<ReactionKind>,
}

impl TryFrom<PostRow> for Post {
    type Error = ModelError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let actor = Actor::from_columns(row.actor_type, row.actor_user_id, row.actor_org_id)?;
        let mut media = row.media;
        media.sort_by_key(|item| item.position);
        Ok(Self {
            id: row.id,
            content: row.content,
            actor,
            community_id: row.community_id,
            topic_id: row.topic_id,
            region: row.region,
            likes_count: row.likes_count,
            comments_count: row.comments_count,
            shares_count: row.shares_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            media,
            viewer_reaction: row.viewer_reaction,
        })
    }
}

impl From<Post> for PostRow {
    fn from(post: Post) -> Self {
        let (actor_user_id, actor_org_id) = match post.actor {
            Actor::User(id) => (Some(id), None),
            Actor::Org(id) => (None, Some(id)),
        };
        Self {
            id: post.id,
            content: post.content,
            actor_type: post.actor.actor_type(),
            actor_user_id,
            actor_org_id,
            community_id: post.community_id,
            topic_id: post.topic_id,
            region: post.region,
            likes_count: post.likes_count,
            comments_count: post.comments_count,
            shares_count: post.shares_count,
            created_at: post.created_at,
            updated_at: post.updated_at,
            media: post.media,
            viewer_reaction: post.viewer_reaction,
        }
    }
}

/// Payload for creating a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePostData {
    /// Body text.
    pub content: String,
    /// Author.
    pub actor: Actor,
    /// Target community.
    pub community_id: Option<Uuid>,
    /// Topic tag.
    pub topic_id: Option<Uuid>,
    /// Region tag.
    pub region: Option<String>,
    /// Media to attach after the post row exists.
    pub media: Vec<NewPostMedia>,
}

/// Wire form of a post insert.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewPostRow {
    /// Trimmed body text.
    pub content: String,
    /// Author discriminator.
    pub actor_type: ActorType,
    /// Set for user authors.
    pub actor_user_id: Option<Uuid>,
    /// Set for organization authors.
    pub actor_org_id: Option<Uuid>,
    /// Target community.
    pub community_id: Option<Uuid>,
    /// Topic tag.
    pub topic_id: Option<Uuid>,
    /// Region tag.
    pub region: Option<String>,
}

impl CreatePostData {
    /// Validate the payload and split it into the post row and media list.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] for blank or oversized content,
    /// blank regions, or media without a URL.
    pub fn into_parts(self) -> ModelResult<(NewPostRow, Vec<NewPostMedia>)> {
        let content = self.content.trim().to_string();
        if content.is_empty() {
            return Err(ModelError::field("content", "must_not_be_empty"));
        }
        if content.chars().count() > MAX_POST_LEN {
            return Err(ModelError::field("content", "too_long"));
        }
        if self.region.as_deref().is_some_and(|region| region.trim().is_empty()) {
            return Err(ModelError::field("region", "must_not_be_blank"));
        }
        if self.media.iter().any(|item| item.url.trim().is_empty()) {
            return Err(ModelError::field("media.url", "must_not_be_empty"));
        }
        let (actor_user_id, actor_org_id) = match self.actor {
            Actor::User(id) => (Some(id), None),
            Actor::Org(id) => (None, Some(id)),
        };
        Ok((
            NewPostRow {
                content,
                actor_type: self.actor.actor_type(),
                actor_user_id,
                actor_org_id,
                community_id: self.community_id,
                topic_id: self.topic_id,
                region: self.region,
            },
            self.media,
        ))
    }
}

/// Validate edited post content.
///
/// # Errors
///
/// Returns [`ModelError::InvalidField`] for blank or oversized content.
pub fn validate_content(content: &str) -> ModelResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ModelError::field("content", "must_not_be_empty"));
    }
    if trimmed.chars().count() > MAX_POST_LEN {
        return Err(ModelError::field("content", "too_long"));
    }
    Ok(trimmed.to_string())
}
