//! Classification of non-success backend responses.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::ClientError;

/// Error body returned by PostgREST and the auth service.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProblemBody {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) details: Option<String>,
    #[serde(default)]
    pub(crate) hint: Option<String>,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

impl ProblemBody {
    fn summary(&self) -> Option<String> {
        let primary = self
            .message
            .clone()
            .or_else(|| self.error_description.clone())?;
        Some(match (&self.details, &self.hint) {
            (Some(details), _) => format!("{primary} ({details})"),
            (None, Some(hint)) => format!("{primary} (hint: {hint})"),
            (None, None) => primary,
        })
    }
}

/// Postgres error codes surfaced as rejections.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
/// PostgREST code for an expired or invalid JWT.
const JWT_INVALID: &str = "PGRST301";
/// PostgREST code for a single-row read that matched nothing.
const NO_ROWS: &str = "PGRST116";

/// Map a status code and raw body onto the error taxonomy.
pub(crate) fn classify(
    operation: &'static str,
    resource: &'static str,
    status: StatusCode,
    body: &[u8],
) -> ClientError {
    let problem = serde_json::from_slice::<ProblemBody>(body).unwrap_or_default();
    let message = problem.summary().or_else(|| {
        let text = String::from_utf8_lossy(body).trim().to_string();
        (!text.is_empty()).then_some(text)
    });
    let code = problem.code;

    if code.as_deref() == Some(JWT_INVALID)
        || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    {
        return ClientError::Unauthorized {
            operation,
            code,
            message,
        };
    }
    if status == StatusCode::NOT_FOUND || code.as_deref() == Some(NO_ROWS) {
        return ClientError::NotFound {
            operation,
            resource,
        };
    }
    if matches!(
        code.as_deref(),
        Some(UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION | CHECK_VIOLATION)
    ) {
        return ClientError::Rejected {
            operation,
            status: status.as_u16(),
            code,
            message,
        };
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return ClientError::Unavailable {
            operation,
            status: status.as_u16(),
            message,
        };
    }
    ClientError::Rejected {
        operation,
        status: status.as_u16(),
        code,
        message,
    }
}

/// Read the body of a failed response and classify it.
pub(crate) async fn classify_response(
    operation: &'static str,
    resource: &'static str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    classify(operation, resource, status, &bytes)
}
