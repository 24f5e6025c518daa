//! PostgREST-style HTTP backend.

use std::sync::Arc;
use std::time::Instant;

use agora_config::ClientConfig;
use agora_telemetry::Metrics;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{ClientError, ClientResult};
use crate::problem::classify_response;
use crate::query::{Filter, SelectQuery, Table};
use crate::session::SessionManager;

/// Header carrying the public API key.
pub const HEADER_API_KEY: &str = "apikey";
const HEADER_PREFER: &str = "Prefer";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "return=representation,resolution=merge-duplicates";

/// Build the shared HTTP client with the API key and timeout applied.
///
/// # Errors
///
/// Returns an error when the key is not a valid header value or the client
/// cannot be constructed.
pub fn build_http_client(config: &ClientConfig) -> ClientResult<Client> {
    let mut default_headers = HeaderMap::new();
    let key = HeaderValue::from_str(&config.anon_key).map_err(|_| ClientError::Header {
        operation: "client.build",
        name: HEADER_API_KEY,
    })?;
    default_headers.insert(HEADER_API_KEY, key);
    Client::builder()
        .timeout(config.request_timeout)
        .default_headers(default_headers)
        .build()
        .map_err(|source| ClientError::HttpClient { source })
}

/// Backend speaking the hosted REST dialect.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    config: Arc<ClientConfig>,
    session: Option<SessionManager>,
    metrics: Option<Metrics>,
}

impl RestBackend {
    /// Backend over `client`; requests carry the session's token when signed in.
    #[must_use]
    pub const fn new(
        client: Client,
        config: Arc<ClientConfig>,
        session: Option<SessionManager>,
    ) -> Self {
        Self {
            client,
            config,
            session,
            metrics: None,
        }
    }

    /// Record per-request metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn request(
        &self,
        method: Method,
        table: Table,
        operation: &'static str,
    ) -> ClientResult<RequestBuilder> {
        let url = self.config.rest_url(table.as_str())?;
        let token = match &self.session {
            Some(session) => session.access_token().await?,
            None => None,
        };
        let bearer = token.unwrap_or_else(|| self.config.anon_key.clone());
        let authorization = HeaderValue::from_str(&format!("Bearer {bearer}")).map_err(|_| {
            ClientError::Header {
                operation,
                name: "Authorization",
            }
        })?;
        Ok(self
            .client
            .request(method, url)
            .header(AUTHORIZATION, authorization))
    }

    async fn execute(
        &self,
        table: Table,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> ClientResult<Vec<Value>> {
        let started = Instant::now();
        let result = self.execute_inner(table, operation, builder).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_request(table.as_str(), operation, result.is_ok(), started.elapsed());
        }
        match &result {
            Ok(rows) => debug!(table = %table, op = operation, rows = rows.len(), "backend call completed"),
            Err(err) => warn!(table = %table, op = operation, kind = %err.kind(), error = %err, "backend call failed"),
        }
        result
    }

    async fn execute_inner(
        &self,
        table: Table,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> ClientResult<Vec<Value>> {
        let response = builder
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;
        if !response.status().is_success() {
            return Err(classify_response(operation, table.as_str(), response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_slice::<Value>(&bytes)
            .map_err(|source| ClientError::Decode { operation, source })?
        {
            Value::Array(rows) => Ok(rows),
            object @ Value::Object(_) => Ok(vec![object]),
            _ => Err(ClientError::Unexpected {
                operation,
                reason: "expected_rows",
            }),
        }
    }
}

fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_pair).collect()
}

fn first_row(operation: &'static str, rows: Vec<Value>) -> ClientResult<Value> {
    rows.into_iter().next().ok_or(ClientError::Unexpected {
        operation,
        reason: "write_returned_no_rows",
    })
}

fn require_match(
    operation: &'static str,
    table: Table,
    rows: Vec<Value>,
) -> ClientResult<Vec<Value>> {
    if rows.is_empty() {
        Err(ClientError::NotFound {
            operation,
            resource: table.as_str(),
        })
    } else {
        Ok(rows)
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &SelectQuery) -> ClientResult<Vec<Value>> {
        let builder = self
            .request(Method::GET, query.table, "select")
            .await?
            .query(&query.to_pairs());
        self.execute(query.table, "select", builder).await
    }

    async fn insert(&self, table: Table, row: Value) -> ClientResult<Value> {
        let builder = self
            .request(Method::POST, table, "insert")
            .await?
            .header(HEADER_PREFER, RETURN_REPRESENTATION)
            .json(&row);
        first_row("insert", self.execute(table, "insert", builder).await?)
    }

    async fn insert_many(&self, table: Table, rows: Vec<Value>) -> ClientResult<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let builder = self
            .request(Method::POST, table, "insert_many")
            .await?
            .header(HEADER_PREFER, RETURN_REPRESENTATION)
            .json(&rows);
        self.execute(table, "insert_many", builder).await
    }

    async fn upsert(&self, table: Table, row: Value, on_conflict: &[&str]) -> ClientResult<Value> {
        let builder = self
            .request(Method::POST, table, "upsert")
            .await?
            .header(HEADER_PREFER, MERGE_DUPLICATES)
            .query(&[("on_conflict", on_conflict.join(","))])
            .json(&row);
        first_row("upsert", self.execute(table, "upsert", builder).await?)
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Value,
    ) -> ClientResult<Vec<Value>> {
        let builder = self
            .request(Method::PATCH, table, "update")
            .await?
            .header(HEADER_PREFER, RETURN_REPRESENTATION)
            .query(&filter_pairs(filters))
            .json(&patch);
        require_match("update", table, self.execute(table, "update", builder).await?)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> ClientResult<Vec<Value>> {
        let builder = self
            .request(Method::DELETE, table, "delete")
            .await?
            .header(HEADER_PREFER, RETURN_REPRESENTATION)
            .query(&filter_pairs(filters));
        require_match("delete", table, self.execute(table, "delete", builder).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::Order;
    use crate::refresh::TokenRefresher;
    use crate::session::Session;
    use crate::store::MemorySessionStore;
    use chrono::{Duration, Utc};
    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;
    use uuid::Uuid;

    fn config(server: &MockServer) -> anyhow::Result<Arc<ClientConfig>> {
        Ok(Arc::new(ClientConfig::new(
            Url::parse(&server.base_url())?,
            "anon-key",
        )))
    }

    fn anonymous(server: &MockServer) -> anyhow::Result<RestBackend> {
        let config = config(server)?;
        Ok(RestBackend::new(build_http_client(&config)?, config, None))
    }

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _refresh_token: &str) -> ClientResult<Session> {
            Err(ClientError::Unavailable {
                operation: "session.refresh",
                status: 503,
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn select_renders_query_and_sends_anon_credentials() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let community = Uuid::new_v4();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/posts")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer anon-key")
                .query_param("select", "*")
                .query_param("community_id", format!("eq.{community}"))
                .query_param("order", "created_at.desc,id.desc")
                .query_param("offset", "20")
                .query_param("limit", "20");
            then.status(200).json_body(json!([{ "id": 1 }, { "id": 2 }]));
        });

        let query = SelectQuery::new(Table::Posts)
            .filter(Filter::equals("community_id", community))
            .order(Order::desc("created_at"))
            .order(Order::desc("id"))
            .range(20, 20);
        let rows = anonymous(&server)?.select(&query).await?;
        mock.assert();
        assert_eq!(rows.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn signed_in_requests_use_the_session_token() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/offers")
                .header("authorization", "Bearer user-token");
            then.status(200).json_body(json!([]));
        });

        let config = config(&server)?;
        let session = Session {
            access_token: "user-token".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::hours(1),
            user_id: Uuid::new_v4(),
        };
        let manager = SessionManager::start(
            Arc::new(MemorySessionStore::with_session(session)),
            Arc::new(NoRefresh),
            std::time::Duration::from_secs(60),
            None,
        )
        .await;
        let backend = RestBackend::new(build_http_client(&config)?, config, Some(manager));
        let rows = backend.select(&SelectQuery::new(Table::Offers)).await?;
        mock.assert();
        assert!(rows.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn writes_ask_for_representation() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let insert = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/communities")
                .header("prefer", "return=representation")
                .json_body(json!({ "name": "Rustaceans" }));
            then.status(201)
                .json_body(json!([{ "id": "c1", "name": "Rustaceans" }]));
        });
        let upsert = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/post_reactions")
                .query_param("on_conflict", "post_id,user_id")
                .header("prefer", "return=representation,resolution=merge-duplicates");
            then.status(201).json_body(json!([{ "reaction_type": "love" }]));
        });

        let backend = anonymous(&server)?;
        let row = backend
            .insert(Table::Communities, json!({ "name": "Rustaceans" }))
            .await?;
        assert_eq!(row["id"], "c1");
        let reaction = backend
            .upsert(
                Table::PostReactions,
                json!({ "reaction_type": "love" }),
                &["post_id", "user_id"],
            )
            .await?;
        assert_eq!(reaction["reaction_type"], "love");
        insert.assert();
        upsert.assert();
        Ok(())
    }

    #[tokio::test]
    async fn guarded_update_that_matches_nothing_is_not_found() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/offers")
                .query_param("id", "eq.o1")
                .query_param("status", "eq.pending");
            then.status(200).json_body(json!([]));
        });

        let err = anonymous(&server)?
            .update(
                Table::Offers,
                &[
                    Filter::equals("id", "o1"),
                    Filter::equals("status", "pending"),
                ],
                json!({ "status": "accepted" }),
            )
            .await
            .expect_err("nothing matched");
        mock.assert();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn constraint_violations_are_rejections() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/rest/v1/communities");
            then.status(409).json_body(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"communities_slug_key\"",
                "details": null,
                "hint": null,
            }));
        });

        let err = anonymous(&server)?
            .insert(Table::Communities, json!({ "slug": "rust" }))
            .await
            .expect_err("duplicate slug");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(err.code(), Some("23505"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/rest/v1/topics");
            then.status(200).body("<html>");
        });

        let err = anonymous(&server)?
            .select(&SelectQuery::new(Table::Topics))
            .await
            .expect_err("not json");
        assert_eq!(err.kind(), ErrorKind::Decode);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_backend_is_transient() -> anyhow::Result<()> {
        let config = Arc::new(ClientConfig::new(Url::parse("http://127.0.0.1:9")?, "k"));
        let backend = RestBackend::new(build_http_client(&config)?, config, None)
            .with_metrics(Metrics::new()?);
        let err = backend
            .select(&SelectQuery::new(Table::Listings))
            .await
            .expect_err("nothing listens on the discard port");
        assert!(err.is_transient());
        assert_eq!(
            backend
                .metrics
                .as_ref()
                .map(|metrics| metrics.snapshot().request_failures_total),
            Some(1)
        );
        Ok(())
    }
}
