//! Community records and payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::format::{MAX_SLUG_LEN, slugify};

/// Community row, optionally enriched with the viewer's membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    /// Stable identifier.
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    /// Globally unique URL slug; never changes after creation.
    pub slug: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Whether non-members can see the community.
    pub is_public: bool,
    /// Member counter maintained by the backend.
    #[serde(default)]
    pub member_count: u64,
    /// Creator profile.
    #[serde(default)]
    pub created_by: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the viewer joined; only set by membership reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

/// Membership row linking a profile to a community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityMembership {
    /// Community joined.
    pub community_id: Uuid,
    /// Member profile.
    pub user_id: Uuid,
    /// Join timestamp.
    pub joined_at: DateTime<Utc>,
}

/// Payload for creating a community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCommunityData {
    /// Display name.
    pub name: String,
    /// Explicit slug; derived from `name` when absent.
    pub slug: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Visibility flag.
    pub is_public: bool,
    /// Creator profile.
    pub created_by: Uuid,
}

/// Wire form of [`CreateCommunityData`] after validation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewCommunityRow {
    /// Trimmed display name.
    pub name: String,
    /// Validated slug.
    pub slug: String,
    /// Trimmed description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Visibility flag.
    pub is_public: bool,
    /// Creator profile.
    pub created_by: Uuid,
}

impl CreateCommunityData {
    /// Validate the payload and produce the row to insert.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] when the name is blank or the slug
    /// (given or derived) is not a valid slug.
    pub fn into_row(self) -> ModelResult<NewCommunityRow> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ModelError::field("name", "must_not_be_empty"));
        }
        let slug = match self.slug {
            Some(slug) => slug.trim().to_string(),
            None => slugify(&name),
        };
        validate_slug(&slug)?;
        let description = self
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        Ok(NewCommunityRow {
            name,
            slug,
            description,
            is_public: self.is_public,
            created_by: self.created_by,
        })
    }
}

/// Partial update for a community. The slug is intentionally absent.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UpdateCommunityData {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    /// New avatar URL; `Some(None)` clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
    /// New visibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl UpdateCommunityData {
    /// Whether the patch carries no changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.avatar_url.is_none()
            && self.is_public.is_none()
    }

    /// Validate the patch.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidField`] for an empty patch or a blank name.
    pub fn validate(&self) -> ModelResult<()> {
        if self.is_empty() {
            return Err(ModelError::field("patch", "must_not_be_empty"));
        }
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ModelError::field("name", "must_not_be_empty"));
        }
        Ok(())
    }
}

/// Check that `slug` is lowercase ASCII words joined by single dashes.
///
/// # Errors
///
/// Returns [`ModelError::InvalidField`] describing the first violation.
pub fn validate_slug(slug: &str) -> ModelResult<()> {
    if slug.is_empty() {
        return Err(ModelError::field("slug", "must_not_be_empty"));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(ModelError::field("slug", "too_long"));
    }
    if !slug
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Err(ModelError::field("slug", "invalid_characters"));
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        return Err(ModelError::field("slug", "malformed_separators"));
    }
    Ok(())
}
