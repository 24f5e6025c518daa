//! Community reads, writes, and membership.

use std::collections::HashMap;

use agora_client::{ClientError, ClientResult, Filter, Order, SelectQuery, Table};
use agora_models::{
    Community, CommunityFilter, CommunityMembership, CreateCommunityData, QueryParams,
    UpdateCommunityData,
};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{Invalidation, QueryKey, Resource};
use crate::context::{HookContext, decode_row, decode_rows, encode, single_row};

/// Hook for the `communities` and `community_members` tables.
#[derive(Clone)]
pub struct Communities {
    ctx: HookContext,
}

impl Communities {
    /// Hook over `ctx`.
    #[must_use]
    pub const fn new(ctx: HookContext) -> Self {
        Self { ctx }
    }

    /// Communities matching `filter`, ordered by name.
    ///
    /// # Errors
    ///
    /// Propagates backend, decode, and cancellation errors.
    pub async fn list(&self, filter: &CommunityFilter) -> ClientResult<Vec<Community>> {
        const OP: &str = "communities.list";
        let key = QueryKey::new(Resource::Communities, filter.params());
        let mut query = SelectQuery::new(Table::Communities)
            .filter_opt(
                filter
                    .search
                    .as_deref()
                    .map(str::trim)
                    .filter(|term| !term.is_empty())
                    .map(|term| Filter::contains("name", term)),
            )
            .filter_opt(filter.only_public.then(|| Filter::equals("is_public", true)))
            .order(Order::asc("name"));
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let rows = self
            .ctx
            .read_through(OP, key, self.ctx.backend().select(&query))
            .await?;
        decode_rows(OP, rows)
    }

    /// Communities `user_id` belongs to, most recently joined first.
    ///
    /// Each record carries `joined_at`.
    ///
    /// # Errors
    ///
    /// Propagates backend, decode, and cancellation errors.
    pub async fn mine(&self, user_id: Uuid) -> ClientResult<Vec<Community>> {
        const OP: &str = "communities.mine";
        let key = QueryKey::bare(Resource::MyCommunities).with_param("user_id", user_id);
        let rows = self
            .ctx
            .read_through(OP, key, self.fetch_memberships(OP, user_id))
            .await?;
        decode_rows(OP, rows)
    }

    async fn fetch_memberships(
        &self,
        operation: &'static str,
        user_id: Uuid,
    ) -> ClientResult<Vec<Value>> {
        let backend = self.ctx.backend();
        let memberships = backend
            .select(
                &SelectQuery::new(Table::CommunityMembers)
                    .filter(Filter::equals("user_id", user_id))
                    .order(Order::desc("joined_at")),
            )
            .await?;
        let memberships: Vec<CommunityMembership> = decode_rows(operation, memberships)?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let communities = backend
            .select(&SelectQuery::new(Table::Communities).filter(Filter::is_in(
                "id",
                memberships.iter().map(|membership| membership.community_id),
            )))
            .await?;
        let mut by_id: HashMap<String, Value> = communities
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(Value::as_str)?.to_string();
                Some((id, row))
            })
            .collect();

        let mut rows = Vec::with_capacity(memberships.len());
        for membership in memberships {
            if let Some(mut row) = by_id.remove(&membership.community_id.to_string()) {
                row["joined_at"] = json!(membership.joined_at);
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Community with `slug`.
    ///
    /// Misses are not cached, so a community created later is found.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when no community has the slug.
    pub async fn by_slug(&self, slug: &str) -> ClientResult<Community> {
        const OP: &str = "communities.by_slug";
        let key = QueryKey::bare(Resource::Community).with_param("slug", slug);
        let query = SelectQuery::new(Table::Communities)
            .filter(Filter::equals("slug", slug))
            .limit(1);
        let row = self
            .ctx
            .read_one(OP, "community", key, self.ctx.backend().select(&query))
            .await?;
        decode_row(OP, row)
    }

    /// Create a community; the slug is derived from the name when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for a bad payload and
    /// [`ClientError::Rejected`] when the name or slug is taken.
    pub async fn create(&self, data: CreateCommunityData) -> ClientResult<Community> {
        const OP: &str = "communities.create";
        let row = data.into_row().map_err(|err| ClientError::invalid(OP, err))?;
        let payload = encode(OP, &row)?;
        let stored = self
            .ctx
            .guard(OP, self.ctx.backend().insert(Table::Communities, payload))
            .await?;
        let community: Community = decode_row(OP, stored)?;
        self.ctx
            .invalidate(&[Invalidation::Resource(Resource::Communities)])
            .await;
        info!(community_id = %community.id, slug = %community.slug, "community created");
        Ok(community)
    }

    /// Apply `patch` to community `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invalid`] for an empty patch and
    /// [`ClientError::NotFound`] for an unknown id.
    pub async fn update(&self, id: Uuid, patch: &UpdateCommunityData) -> ClientResult<Community> {
        const OP: &str = "communities.update";
        patch.validate().map_err(|err| ClientError::invalid(OP, err))?;
        let payload = encode(OP, patch)?;
        let rows = self
            .ctx
            .guard(
                OP,
                self.ctx
                    .backend()
                    .update(Table::Communities, &[Filter::equals("id", id)], payload),
            )
            .await?;
        let community: Community = decode_row(OP, single_row(OP, "community", rows)?)?;
        self.ctx
            .invalidate(&[
                Invalidation::Resource(Resource::Communities),
                Invalidation::Resource(Resource::Community),
                Invalidation::Resource(Resource::MyCommunities),
            ])
            .await;
        debug!(community_id = %id, "community updated");
        Ok(community)
    }

    /// Add `user_id` to community `community_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] when already a member or the
    /// community does not exist.
    pub async fn join(&self, community_id: Uuid, user_id: Uuid) -> ClientResult<CommunityMembership> {
        const OP: &str = "communities.join";
        let payload = json!({ "community_id": community_id, "user_id": user_id });
        let stored = self
            .ctx
            .guard(OP, self.ctx.backend().insert(Table::CommunityMembers, payload))
            .await?;
        let membership: CommunityMembership = decode_row(OP, stored)?;
        self.ctx.invalidate(&membership_invalidations(user_id)).await;
        info!(%community_id, %user_id, "joined community");
        Ok(membership)
    }

    /// Remove `user_id` from community `community_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the user is not a member.
    pub async fn leave(&self, community_id: Uuid, user_id: Uuid) -> ClientResult<()> {
        const OP: &str = "communities.leave";
        let filters = [
            Filter::equals("community_id", community_id),
            Filter::equals("user_id", user_id),
        ];
        self.ctx
            .guard(
                OP,
                self.ctx.backend().delete(Table::CommunityMembers, &filters),
            )
            .await?;
        self.ctx.invalidate(&membership_invalidations(user_id)).await;
        info!(%community_id, %user_id, "left community");
        Ok(())
    }
}

fn membership_invalidations(user_id: Uuid) -> [Invalidation; 3] {
    let mut params = QueryParams::new();
    params.insert("user_id".into(), user_id.to_string());
    [
        Invalidation::Key(QueryKey::new(Resource::MyCommunities, params)),
        Invalidation::Resource(Resource::Communities),
        Invalidation::Resource(Resource::Community),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use agora_client::ErrorKind;
    use agora_test_support::{InMemoryBackend, fixtures};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn hook(backend: &Arc<InMemoryBackend>) -> Communities {
        Communities::new(HookContext::new(
            backend.clone(),
            QueryCache::new(Duration::from_secs(300)),
        ))
    }

    #[tokio::test]
    async fn create_applies_backend_defaults() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let mut payload = fixtures::community("Night Owls", Uuid::new_v4());
        payload.is_public = false;

        let created = communities.create(payload).await?;
        assert_eq!(created.slug, "night-owls");
        assert_eq!(created.member_count, 0);
        assert!(!created.is_public);
        assert!(created.joined_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let owner = Uuid::new_v4();
        communities.create(fixtures::community("Gardeners", owner)).await?;

        let mut again = fixtures::community("Gardeners Two", owner);
        again.slug = Some("gardeners".into());
        let err = communities.create(again).await.expect_err("slug is taken");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(err.code(), Some("23505"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_the_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let err = communities
            .create(fixtures::community("   ", Uuid::new_v4()))
            .await
            .expect_err("blank name");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn list_reflects_a_create_on_the_next_read() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let owner = Uuid::new_v4();
        communities.create(fixtures::community("Bakers", owner)).await?;

        let filter = CommunityFilter::default();
        assert_eq!(communities.list(&filter).await?.len(), 1);
        assert_eq!(communities.list(&filter).await?.len(), 1);
        assert_eq!(backend.calls(Table::Communities, "select"), 1);

        communities.create(fixtures::community("Anglers", owner)).await?;
        let names: Vec<_> = communities
            .list(&filter)
            .await?
            .into_iter()
            .map(|community| community.name)
            .collect();
        assert_eq!(names, vec!["Anglers", "Bakers"]);
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_search_and_visibility() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let owner = Uuid::new_v4();
        communities.create(fixtures::community("Rust Learners", owner)).await?;
        let mut hidden = fixtures::community("Rusty Tools", owner);
        hidden.is_public = false;
        communities.create(hidden).await?;
        communities.create(fixtures::community("Chess", owner)).await?;

        let search = CommunityFilter {
            search: Some("rust".into()),
            ..CommunityFilter::default()
        };
        assert_eq!(communities.list(&search).await?.len(), 2);

        let public = CommunityFilter {
            only_public: true,
            ..search
        };
        let found = communities.list(&public).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Rust Learners");
        Ok(())
    }

    #[tokio::test]
    async fn join_and_leave_keep_membership_views_current() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let user = Uuid::new_v4();
        let first = communities.create(fixtures::community("Hikers", user)).await?;
        let second = communities.create(fixtures::community("Climbers", user)).await?;

        assert!(communities.mine(user).await?.is_empty());
        communities.join(first.id, user).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        communities.join(second.id, user).await?;

        let mine = communities.mine(user).await?;
        assert_eq!(
            mine.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert!(mine.iter().all(|c| c.joined_at.is_some()));
        assert_eq!(communities.by_slug("hikers").await?.member_count, 1);

        let err = communities
            .join(first.id, user)
            .await
            .expect_err("already a member");
        assert_eq!(err.kind(), ErrorKind::Rejected);

        communities.leave(first.id, user).await?;
        assert_eq!(communities.mine(user).await?.len(), 1);
        assert_eq!(communities.by_slug("hikers").await?.member_count, 0);

        let err = communities
            .leave(first.id, user)
            .await
            .expect_err("no longer a member");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn missing_slug_is_not_cached() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let err = communities.by_slug("later").await.expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        communities
            .create(fixtures::community("Later", Uuid::new_v4()))
            .await?;
        assert_eq!(communities.by_slug("later").await?.name, "Later");
        Ok(())
    }

    #[tokio::test]
    async fn update_changes_fields_but_not_slug() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let created = communities
            .create(fixtures::community("Painters", Uuid::new_v4()))
            .await?;
        let _ = communities.by_slug("painters").await?;

        let patch = UpdateCommunityData {
            name: Some("Oil Painters".into()),
            ..UpdateCommunityData::default()
        };
        let updated = communities.update(created.id, &patch).await?;
        assert_eq!(updated.slug, "painters");
        assert_eq!(communities.by_slug("painters").await?.name, "Oil Painters");

        let err = communities
            .update(Uuid::new_v4(), &patch)
            .await
            .expect_err("unknown id");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = communities
            .update(created.id, &UpdateCommunityData::default())
            .await
            .expect_err("empty patch");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        Ok(())
    }

    #[tokio::test]
    async fn update_can_clear_the_description() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let communities = hook(&backend);
        let mut payload = fixtures::community("Potters", Uuid::new_v4());
        payload.description = Some("Wheel and kiln".into());
        let created = communities.create(payload).await?;
        assert_eq!(created.description.as_deref(), Some("Wheel and kiln"));

        let cleared = communities
            .update(
                created.id,
                &UpdateCommunityData {
                    description: Some(None),
                    ..UpdateCommunityData::default()
                },
            )
            .await?;
        assert!(cleared.description.is_none());
        assert!(communities.by_slug("potters").await?.description.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_hook_reports_cancelled_without_caching() {
        let backend = Arc::new(InMemoryBackend::new());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = HookContext::new(backend.clone(), QueryCache::new(Duration::from_secs(60)))
            .with_cancellation(token);
        let communities = Communities::new(ctx.clone());

        let err = communities
            .list(&CommunityFilter::default())
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(ctx.cache().is_empty().await);
        assert_eq!(backend.total_calls(), 0);
    }
}
