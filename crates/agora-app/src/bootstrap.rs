//! Process-wide client context.
//!
//! # Design
//! - Built once at startup and passed to whatever needs data access; nothing
//!   here is a global.
//! - Owns the background tasks (token refresher, session watcher) and stops
//!   them on [`AgoraContext::shutdown`].
//! - Hook calls made through the context are bound to its shutdown token;
//!   [`HookScope`] narrows that to one view.

use std::sync::Arc;

use agora_client::{
    Backend, FileSessionStore, MemorySessionStore, RestBackend, RestTokenRefresher, Session,
    SessionManager, SessionStore, TokenRefresher, build_http_client,
};
use agora_config::ClientConfig;
use agora_data::{Communities, HookContext, Offers, Posts, QueryCache, Transactions};
use agora_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// Long-lived handle bundling the session, backend, cache, and hooks.
pub struct AgoraContext {
    config: Arc<ClientConfig>,
    session: SessionManager,
    cache: QueryCache,
    metrics: Option<Metrics>,
    hooks: HookContext,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl AgoraContext {
    /// Load configuration from the environment, initialise logging and
    /// metrics, and start the context.
    ///
    /// # Errors
    ///
    /// Returns an error when configuration is invalid or telemetry cannot be
    /// installed.
    pub async fn from_env() -> AppResult<Self> {
        let config = ClientConfig::from_env().map_err(|err| AppError::config("config.load", err))?;
        init_logging(&LoggingConfig {
            level: &config.log_level,
            format: LogFormat::parse(config.log_format.as_deref()),
            build_sha: build_sha(),
        })
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Self::start(config, Some(metrics)).await
    }

    /// Wire the REST backend, session, cache, and hooks for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the HTTP client
    /// cannot be built.
    pub async fn start(config: ClientConfig, metrics: Option<Metrics>) -> AppResult<Self> {
        config
            .validate()
            .map_err(|err| AppError::config("config.validate", err))?;
        let config = Arc::new(config);
        let http = build_http_client(&config).map_err(|err| AppError::client("client.build", err))?;

        let store: Arc<dyn SessionStore> = match &config.session_path {
            Some(path) => Arc::new(FileSessionStore::new(path.clone())),
            None => Arc::new(MemorySessionStore::default()),
        };
        let refresher: Arc<dyn TokenRefresher> =
            Arc::new(RestTokenRefresher::new(http.clone(), config.clone()));
        let session =
            SessionManager::start(store, refresher, config.refresh_margin, metrics.clone()).await;

        let mut backend = RestBackend::new(http, config.clone(), Some(session.clone()));
        if let Some(metrics) = &metrics {
            backend = backend.with_metrics(metrics.clone());
        }
        Ok(Self::assemble(config, Arc::new(backend), session, metrics))
    }

    /// Context over an injected backend and session.
    ///
    /// Background tasks are started exactly as in [`Self::start`], so this
    /// must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_backend(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        session: SessionManager,
        metrics: Option<Metrics>,
    ) -> Self {
        Self::assemble(Arc::new(config), backend, session, metrics)
    }

    fn assemble(
        config: Arc<ClientConfig>,
        backend: Arc<dyn Backend>,
        session: SessionManager,
        metrics: Option<Metrics>,
    ) -> Self {
        let cache = match &metrics {
            Some(metrics) => QueryCache::with_metrics(config.cache_stale_after, metrics.clone()),
            None => QueryCache::new(config.cache_stale_after),
        };
        let shutdown = CancellationToken::new();
        let hooks = HookContext::new(backend, cache.clone())
            .with_page_size(config.default_page_size)
            .with_cancellation(shutdown.child_token());

        let refresher = {
            let session = session.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { session.run_refresher(token).await })
        };
        let watcher = tokio::spawn(watch_sign_out(
            session.subscribe(),
            cache.clone(),
            shutdown.clone(),
        ));
        info!(endpoint = %config.endpoint, "agora context started");

        Self {
            config,
            session,
            cache,
            metrics,
            hooks,
            shutdown,
            tasks: vec![("session.refresher", refresher), ("session.watcher", watcher)],
        }
    }

    /// Configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session owner.
    #[must_use]
    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Shared query cache.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Metrics registry, when one was supplied.
    #[must_use]
    pub const fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Communities hook bound to the context lifetime.
    #[must_use]
    pub fn communities(&self) -> Communities {
        Communities::new(self.hooks.clone())
    }

    /// Posts hook bound to the context lifetime.
    #[must_use]
    pub fn posts(&self) -> Posts {
        Posts::new(self.hooks.clone())
    }

    /// Transactions hook bound to the context lifetime.
    #[must_use]
    pub fn transactions(&self) -> Transactions {
        Transactions::new(self.hooks.clone())
    }

    /// Offers hook bound to the context lifetime.
    #[must_use]
    pub fn offers(&self) -> Offers {
        Offers::new(self.hooks.clone())
    }

    /// Hooks whose calls are cancelled when the scope is dropped or the
    /// context shuts down.
    #[must_use]
    pub fn scope(&self) -> HookScope {
        let token = self.shutdown.child_token();
        HookScope {
            hooks: self.hooks.with_cancellation(token.clone()),
            token,
        }
    }

    /// Adopt `session` as the signed-in session and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error when the session store cannot be written.
    pub async fn sign_in(&self, session: Session) -> AppResult<()> {
        self.session
            .set_session(session)
            .await
            .map_err(|err| AppError::client("session.sign_in", err))
    }

    /// Forget the session; cached reads are dropped by the session watcher.
    ///
    /// # Errors
    ///
    /// Returns an error when the session store cannot be cleared.
    pub async fn sign_out(&self) -> AppResult<()> {
        self.session
            .clear()
            .await
            .map_err(|err| AppError::client("session.sign_out", err))?;
        self.cache.clear().await;
        Ok(())
    }

    /// Cancel in-flight hook calls and stop background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error when a background task panicked.
    pub async fn shutdown(self) -> AppResult<()> {
        self.shutdown.cancel();
        for (task, handle) in self.tasks {
            handle
                .await
                .map_err(|source| AppError::Task { task, source })?;
        }
        info!("agora context stopped");
        Ok(())
    }
}

/// Cancellable view onto the hooks, typically one per screen.
pub struct HookScope {
    hooks: HookContext,
    token: CancellationToken,
}

impl HookScope {
    /// Communities hook bound to this scope.
    #[must_use]
    pub fn communities(&self) -> Communities {
        Communities::new(self.hooks.clone())
    }

    /// Posts hook bound to this scope.
    #[must_use]
    pub fn posts(&self) -> Posts {
        Posts::new(self.hooks.clone())
    }

    /// Transactions hook bound to this scope.
    #[must_use]
    pub fn transactions(&self) -> Transactions {
        Transactions::new(self.hooks.clone())
    }

    /// Offers hook bound to this scope.
    #[must_use]
    pub fn offers(&self) -> Offers {
        Offers::new(self.hooks.clone())
    }

    /// Cancel every call made through this scope.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Drop cached reads whenever the signed-in user changes.
///
/// `updates` must be subscribed before the task is spawned; its current
/// value is the baseline user.
async fn watch_sign_out(
    mut updates: watch::Receiver<Option<Session>>,
    cache: QueryCache,
    shutdown: CancellationToken,
) {
    let mut user = updates.borrow().as_ref().map(|session| session.user_id);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = updates.borrow_and_update().as_ref().map(|session| session.user_id);
                if next != user {
                    debug!(signed_in = next.is_some(), "session user changed; clearing cache");
                    user = next;
                    cache.clear().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_client::{ClientError, ClientResult, ErrorKind, Table};
    use agora_data::CacheEvent;
    use agora_models::{CommunityFilter, PostFilter};
    use agora_test_support::{InMemoryBackend, fixtures};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use url::Url;
    use uuid::Uuid;

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _refresh_token: &str) -> ClientResult<Session> {
            Err(ClientError::MissingSession {
                operation: "session.refresh",
            })
        }
    }

    fn config() -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig::new(
            Url::parse("http://localhost:54321")?,
            "anon-key",
        ))
    }

    fn session_for(user_id: Uuid) -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            user_id,
        }
    }

    async fn in_memory() -> anyhow::Result<(Arc<InMemoryBackend>, AgoraContext)> {
        let backend = Arc::new(InMemoryBackend::new());
        let session = SessionManager::start(
            Arc::new(MemorySessionStore::default()),
            Arc::new(NoRefresh),
            Duration::from_secs(60),
            None,
        )
        .await;
        let context = AgoraContext::with_backend(config()?, backend.clone(), session, None);
        Ok((backend, context))
    }

    #[tokio::test]
    async fn hooks_share_one_cache() -> anyhow::Result<()> {
        let (backend, context) = in_memory().await?;
        context
            .communities()
            .create(fixtures::community("Tinkerers", Uuid::new_v4()))
            .await?;

        let scope = context.scope();
        assert_eq!(context.communities().list(&CommunityFilter::default()).await?.len(), 1);
        assert_eq!(scope.communities().list(&CommunityFilter::default()).await?.len(), 1);
        assert_eq!(backend.calls(Table::Communities, "select"), 1);
        context.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn dropped_scope_cancels_its_calls() -> anyhow::Result<()> {
        let (backend, context) = in_memory().await?;
        let scope = context.scope();
        let communities = scope.communities();
        drop(scope);

        let err = communities
            .list(&CommunityFilter::default())
            .await
            .expect_err("scope is gone");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(backend.total_calls(), 0);

        assert!(context.communities().list(&CommunityFilter::default()).await.is_ok());
        context.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_cancels_outstanding_hooks() -> anyhow::Result<()> {
        let (_backend, context) = in_memory().await?;
        let posts = context.posts();
        context.shutdown().await?;

        let err = posts
            .feed(&PostFilter::default())
            .next_page()
            .await
            .expect_err("context stopped");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        Ok(())
    }

    async fn wait_for_clear(events: &mut agora_data::CacheEvents) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(event) = events.next().await {
                if event == CacheEvent::Cleared {
                    return;
                }
            }
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn switching_users_drops_cached_reads() -> anyhow::Result<()> {
        let (_backend, context) = in_memory().await?;
        let mut events = context.cache().subscribe();
        context.sign_in(session_for(Uuid::new_v4())).await?;
        wait_for_clear(&mut events).await?;

        context.communities().list(&CommunityFilter::default()).await?;
        assert!(!context.cache().is_empty().await);

        context.sign_in(session_for(Uuid::new_v4())).await?;
        wait_for_clear(&mut events).await?;
        assert!(context.cache().is_empty().await);

        context.communities().list(&CommunityFilter::default()).await?;
        context.sign_out().await?;
        assert!(context.cache().is_empty().await);
        assert!(context.session().current().is_none());
        context.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn first_sign_in_clears_reads_cached_while_signed_out() -> anyhow::Result<()> {
        let (_backend, context) = in_memory().await?;
        context.communities().list(&CommunityFilter::default()).await?;
        assert!(!context.cache().is_empty().await);

        let mut events = context.cache().subscribe();
        context.sign_in(session_for(Uuid::new_v4())).await?;
        wait_for_clear(&mut events).await?;
        assert!(context.cache().is_empty().await);
        context.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn file_backed_session_survives_restart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        let user = Uuid::new_v4();

        let first = AgoraContext::start(config()?.with_session_path(&path), None).await?;
        assert!(first.session().current().is_none());
        first.sign_in(session_for(user)).await?;
        first.shutdown().await?;

        let second = AgoraContext::start(config()?.with_session_path(&path), None).await?;
        assert_eq!(second.session().user_id(), Some(user));
        assert_eq!(second.config().default_page_size, 20);
        second.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_invalid_configuration() -> anyhow::Result<()> {
        let bad = config()?.with_default_page_size(0);
        let Err(err) = AgoraContext::start(bad, None).await else {
            anyhow::bail!("page size zero must be rejected");
        };
        assert_eq!(err.operation(), "config.validate");
        Ok(())
    }

    #[tokio::test]
    async fn metrics_follow_cache_activity() -> anyhow::Result<()> {
        let backend = Arc::new(InMemoryBackend::new());
        let metrics = Metrics::new()?;
        let session = SessionManager::start(
            Arc::new(MemorySessionStore::default()),
            Arc::new(NoRefresh),
            Duration::from_secs(60),
            Some(metrics.clone()),
        )
        .await;
        let context =
            AgoraContext::with_backend(config()?, backend, session, Some(metrics.clone()));
        let filter = CommunityFilter::default();
        context.communities().list(&filter).await?;
        context.communities().list(&filter).await?;
        let snapshot = context.metrics().expect("metrics supplied").snapshot();
        assert_eq!(snapshot.cache_misses_total, 1);
        assert_eq!(snapshot.cache_hits_total, 1);
        context.shutdown().await?;
        Ok(())
    }
}
