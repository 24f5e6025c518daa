//! Access-token refresh against the auth service.

use std::sync::Arc;

use agora_config::ClientConfig;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::problem::classify_response;
use crate::rest::HEADER_API_KEY;
use crate::session::Session;

/// Exchanges a refresh token for a new session.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a fresh session for `refresh_token`.
    async fn refresh(&self, refresh_token: &str) -> ClientResult<Session>;
}

/// Refresher that posts to `/auth/v1/token?grant_type=refresh_token`.
#[derive(Clone)]
pub struct RestTokenRefresher {
    client: Client,
    config: Arc<ClientConfig>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: Uuid,
}

impl RestTokenRefresher {
    /// Refresher sharing `client` with the REST backend.
    #[must_use]
    pub const fn new(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TokenRefresher for RestTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> ClientResult<Session> {
        const OPERATION: &str = "session.refresh";
        let mut url = self.config.auth_url("token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let response = self
            .client
            .post(url)
            .header(HEADER_API_KEY, &self.config.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                operation: OPERATION,
                source,
            })?;

        if !response.status().is_success() {
            // The auth service answers 400 for a revoked or unknown refresh token.
            return Err(match classify_response(OPERATION, "token", response).await {
                ClientError::Rejected {
                    status: 400,
                    code,
                    message,
                    ..
                } => ClientError::Unauthorized {
                    operation: OPERATION,
                    code,
                    message,
                },
                other => other,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                operation: OPERATION,
                source,
            })?;
        let token: TokenResponse =
            serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
                operation: OPERATION,
                source,
            })?;
        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            user_id: token.user.id,
        })
    }
}
