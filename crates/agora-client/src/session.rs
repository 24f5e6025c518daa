//! Signed-in session state shared by every request.
//!
//! # Design
//! - One `SessionManager` per process; clones share state.
//! - State lives in a `watch` channel so the background refresher wakes up
//!   whenever the session is replaced or cleared.
//! - Refreshes are single-flight: callers that arrive while a refresh is in
//!   progress wait for it and reuse its result.
//! - Writes to the session bump a generation under `write_gate`; a refresh
//!   whose session was replaced or cleared mid-exchange discards its result.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use agora_telemetry::Metrics;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult, ErrorKind};
use crate::refresh::TokenRefresher;
use crate::store::SessionStore;

/// Tokens for the signed-in user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token sent with each request.
    pub access_token: String,
    /// Token exchanged for a new session.
    pub refresh_token: String,
    /// When `access_token` stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Signed-in profile.
    pub user_id: Uuid,
}

impl Session {
    /// Whether the access token expires within `margin` of `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - now <= margin
    }

    /// Whether the access token has already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl Debug for Session {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Owner of the current session and its persistence.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    state: watch::Sender<Option<Session>>,
    refresh_gate: Mutex<()>,
    write_gate: Mutex<u64>,
    store: Arc<dyn SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
    metrics: Option<Metrics>,
}

impl SessionManager {
    /// Restore the stored session and return a manager around it.
    ///
    /// A store that cannot be read is logged and treated as signed out.
    pub async fn start(
        store: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        margin: std::time::Duration,
        metrics: Option<Metrics>,
    ) -> Self {
        let restored = match store.load().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "stored session unreadable; starting signed out");
                None
            }
        };
        if let Some(session) = &restored {
            info!(user_id = %session.user_id, "session restored");
        }
        let (state, _) = watch::channel(restored);
        Self {
            inner: Arc::new(SessionInner {
                state,
                refresh_gate: Mutex::new(()),
                write_gate: Mutex::new(0),
                store,
                refresher,
                margin: Duration::from_std(margin).unwrap_or(Duration::MAX),
                metrics,
            }),
        }
    }

    /// Session currently in effect.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.inner.state.borrow().clone()
    }

    /// Signed-in profile, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.inner.state.borrow().as_ref().map(|session| session.user_id)
    }

    /// Observe session replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.state.subscribe()
    }

    /// Persist `session` and make it current.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the session cannot be persisted; the
    /// in-memory session is left unchanged in that case.
    pub async fn set_session(&self, session: Session) -> ClientResult<()> {
        let mut generation = self.inner.write_gate.lock().await;
        self.write(&mut generation, session).await
    }

    async fn write(&self, generation: &mut u64, session: Session) -> ClientResult<()> {
        self.inner.store.save(&session).await?;
        *generation += 1;
        debug!(user_id = %session.user_id, expires_at = %session.expires_at, "session updated");
        self.inner.state.send_replace(Some(session));
        Ok(())
    }

    /// Sign out locally and forget the stored session.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the stored session cannot be removed; the
    /// in-memory session is cleared regardless.
    pub async fn clear(&self) -> ClientResult<()> {
        let mut generation = self.inner.write_gate.lock().await;
        self.forget(&mut generation).await
    }

    async fn forget(&self, generation: &mut u64) -> ClientResult<()> {
        *generation += 1;
        self.inner.state.send_replace(None);
        self.inner.store.clear().await
    }

    /// Access token to send, refreshing first when it is about to expire.
    ///
    /// Returns `None` while signed out. A transient refresh failure falls back
    /// to the current token as long as it has not expired yet.
    ///
    /// # Errors
    ///
    /// Returns the refresh error when the token cannot be used.
    pub async fn access_token(&self) -> ClientResult<Option<String>> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        let now = Utc::now();
        if !session.needs_refresh(now, self.inner.margin) {
            return Ok(Some(session.access_token));
        }
        match self.refresh().await {
            Ok(fresh) => Ok(Some(fresh.access_token)),
            Err(err) if err.is_transient() && !session.is_expired(Utc::now()) => {
                warn!(error = %err, "token refresh failed; using current token until expiry");
                Ok(Some(session.access_token))
            }
            Err(err) => Err(err),
        }
    }

    /// Exchange the refresh token for a new session.
    ///
    /// Concurrent callers share a single exchange. An auth-class failure
    /// signs the user out; transient failures keep the session. When the
    /// session is cleared or replaced while the exchange is in flight, the
    /// exchanged tokens are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingSession`] while signed out or when the
    /// user signed out mid-exchange, otherwise the refresher's error.
    pub async fn refresh(&self) -> ClientResult<Session> {
        const OPERATION: &str = "session.refresh";
        let missing = || ClientError::MissingSession {
            operation: OPERATION,
        };
        let seen = self.current().map(|session| session.access_token);
        let _gate = self.inner.refresh_gate.lock().await;

        let (started, current) = {
            let generation = self.inner.write_gate.lock().await;
            (*generation, self.current().ok_or_else(missing)?)
        };
        if seen.as_deref().is_some_and(|token| token != current.access_token) {
            debug!("session refreshed by a concurrent caller");
            return Ok(current);
        }

        let outcome = self.inner.refresher.refresh(&current.refresh_token).await;
        self.record_refresh(outcome.is_ok());
        let mut generation = self.inner.write_gate.lock().await;
        if *generation != started {
            debug!("session changed during refresh; discarding exchanged tokens");
            return self.current().ok_or_else(missing);
        }
        match outcome {
            Ok(session) => {
                self.write(&mut generation, session.clone()).await?;
                info!(user_id = %session.user_id, expires_at = %session.expires_at, "session refreshed");
                Ok(session)
            }
            Err(err) => {
                if err.kind() == ErrorKind::Auth {
                    warn!(error = %err, "refresh token rejected; signing out");
                    if let Err(clear_err) = self.forget(&mut generation).await {
                        warn!(error = %clear_err, "failed to clear stored session");
                    }
                } else {
                    warn!(error = %err, "token refresh failed");
                }
                Err(err)
            }
        }
    }

    /// Refresh the session shortly before each expiry until `cancel` fires.
    pub async fn run_refresher(&self, cancel: CancellationToken) {
        let mut changes = self.subscribe();
        loop {
            let wait = self.current().map(|session| {
                session
                    .expires_at
                    .checked_sub_signed(self.inner.margin)
                    .and_then(|due| (due - Utc::now()).to_std().ok())
                    .unwrap_or_default()
            });
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = sleep_for(wait) => {
                    if self.refresh().await.is_err() {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(RETRY_AFTER) => {}
                        }
                    }
                }
            }
        }
        debug!("session refresher stopped");
    }

    fn record_refresh(&self, ok: bool) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_session_refresh(ok);
        }
    }
}

const RETRY_AFTER: std::time::Duration = std::time::Duration::from_secs(5);

async fn sleep_for(wait: Option<std::time::Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        outcome: fn(usize) -> ClientResult<Session>,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> ClientResult<Session> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            (self.outcome)(call)
        }
    }

    fn session_expiring_in(seconds: i64, token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: format!("{token}-refresh"),
            expires_at: Utc::now() + Duration::seconds(seconds),
            user_id: Uuid::nil(),
        }
    }

    fn fresh(call: usize) -> ClientResult<Session> {
        Ok(session_expiring_in(3600, &format!("token-{call}")))
    }

    fn revoked(_call: usize) -> ClientResult<Session> {
        Err(ClientError::Unauthorized {
            operation: "session.refresh",
            code: None,
            message: Some("revoked".into()),
        })
    }

    fn outage(_call: usize) -> ClientResult<Session> {
        Err(ClientError::Unavailable {
            operation: "session.refresh",
            status: 503,
            message: None,
        })
    }

    #[derive(Default)]
    struct HeldRefresher {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl TokenRefresher for HeldRefresher {
        async fn refresh(&self, _refresh_token: &str) -> ClientResult<Session> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(session_expiring_in(3600, "exchanged"))
        }
    }

    async fn manager(
        seed: Option<Session>,
        outcome: fn(usize) -> ClientResult<Session>,
    ) -> (SessionManager, Arc<CountingRefresher>, Arc<MemorySessionStore>) {
        let store = Arc::new(seed.map_or_else(MemorySessionStore::default, MemorySessionStore::with_session));
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            outcome,
        });
        let manager = SessionManager::start(
            store.clone(),
            refresher.clone(),
            std::time::Duration::from_secs(60),
            None,
        )
        .await;
        (manager, refresher, store)
    }

    #[tokio::test]
    async fn restores_and_serves_valid_token() -> anyhow::Result<()> {
        let (manager, refresher, _) = manager(Some(session_expiring_in(3600, "a")), fresh).await;
        assert_eq!(manager.access_token().await?, Some("a".to_string()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.user_id(), Some(Uuid::nil()));
        Ok(())
    }

    #[tokio::test]
    async fn signed_out_has_no_token() -> anyhow::Result<()> {
        let (manager, _, _) = manager(None, fresh).await;
        assert_eq!(manager.access_token().await?, None);
        let err = manager.refresh().await.expect_err("nothing to refresh");
        assert_eq!(err.kind(), ErrorKind::Auth);
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_inside_the_margin_once_for_concurrent_callers() -> anyhow::Result<()> {
        let (manager, refresher, store) = manager(Some(session_expiring_in(30, "old")), fresh).await;
        let (first, second, third) = tokio::join!(
            manager.access_token(),
            manager.access_token(),
            manager.access_token()
        );
        assert_eq!(first?, Some("token-1".to_string()));
        assert_eq!(second?, Some("token-1".to_string()));
        assert_eq!(third?, Some("token-1".to_string()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.load().await?.map(|session| session.access_token),
            Some("token-1".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn auth_failure_signs_out() -> anyhow::Result<()> {
        let (manager, _, store) = manager(Some(session_expiring_in(10, "old")), revoked).await;
        let err = manager.access_token().await.expect_err("revoked");
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(manager.current().is_none());
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_keeps_unexpired_session() -> anyhow::Result<()> {
        let (manager, _, store) = manager(Some(session_expiring_in(10, "old")), outage).await;
        assert_eq!(manager.access_token().await?, Some("old".to_string()));
        assert!(manager.current().is_some());
        assert!(store.load().await?.is_some());

        manager.set_session(session_expiring_in(-5, "expired")).await?;
        let err = manager.access_token().await.expect_err("expired and no refresh");
        assert!(err.is_transient());
        Ok(())
    }

    #[tokio::test]
    async fn refresher_task_refreshes_and_stops_on_cancel() -> anyhow::Result<()> {
        let (manager, refresher, _) = manager(Some(session_expiring_in(61, "old")), fresh).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = manager.clone();
            let cancel = cancel.clone();
            async move { manager.run_refresher(cancel).await }
        });

        let mut changes = manager.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(5), changes.changed()).await??;
        assert_eq!(
            manager.current().map(|session| session.access_token),
            Some("token-1".to_string())
        );

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task).await??;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn sign_out_during_refresh_stays_signed_out() -> anyhow::Result<()> {
        let store = Arc::new(MemorySessionStore::with_session(session_expiring_in(30, "old")));
        let refresher = Arc::new(HeldRefresher::default());
        let manager = SessionManager::start(
            store.clone(),
            refresher.clone(),
            std::time::Duration::from_secs(60),
            None,
        )
        .await;

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        refresher.entered.notified().await;
        manager.clear().await?;
        refresher.release.notify_one();

        let err = pending.await?.expect_err("signed out mid-exchange");
        assert!(matches!(err, ClientError::MissingSession { .. }));
        assert!(manager.current().is_none());
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_during_refresh_keeps_the_new_session() -> anyhow::Result<()> {
        let store = Arc::new(MemorySessionStore::with_session(session_expiring_in(30, "old")));
        let refresher = Arc::new(HeldRefresher::default());
        let manager = SessionManager::start(
            store.clone(),
            refresher.clone(),
            std::time::Duration::from_secs(60),
            None,
        )
        .await;

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        refresher.entered.notified().await;
        manager.set_session(session_expiring_in(3600, "signed-in")).await?;
        refresher.release.notify_one();

        let kept = pending.await??;
        assert_eq!(kept.access_token, "signed-in");
        assert_eq!(
            store.load().await?.map(|session| session.access_token),
            Some("signed-in".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn oversized_margin_refreshes_immediately_without_panicking() -> anyhow::Result<()> {
        let store = Arc::new(MemorySessionStore::with_session(session_expiring_in(3600, "old")));
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            outcome: fresh,
        });
        let manager = SessionManager::start(
            store,
            refresher,
            std::time::Duration::from_secs(1_000_000_000_000_000),
            None,
        )
        .await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let manager = manager.clone();
            let cancel = cancel.clone();
            async move { manager.run_refresher(cancel).await }
        });

        let mut changes = manager.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(5), changes.changed()).await??;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task).await??;
        assert_ne!(
            manager.current().map(|session| session.access_token),
            Some("old".to_string())
        );
        Ok(())
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", session_expiring_in(1, "secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
