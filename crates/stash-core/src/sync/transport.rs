//! Transport to the sync endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use super::{SyncError, SyncResult};
use crate::error::ErrorCode;
use crate::protocol::{
    ErrorBody, PullRequest, PullResponse, PushRequest, PushResponse, PULL_PATH, PUSH_PATH,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Request/response channel to the sync server.
///
/// The scheduler bounds every call with its own timeout, so implementations
/// may block for as long as their transport allows.
pub trait SyncTransport: Send + Sync {
    fn pull(&self, request: &PullRequest) -> impl Future<Output = SyncResult<PullResponse>> + Send;

    fn push(&self, request: &PushRequest) -> impl Future<Output = SyncResult<PushResponse>> + Send;
}

impl<T: SyncTransport> SyncTransport for Arc<T> {
    fn pull(&self, request: &PullRequest) -> impl Future<Output = SyncResult<PullResponse>> + Send {
        (**self).pull(request)
    }

    fn push(&self, request: &PushRequest) -> impl Future<Output = SyncResult<PushResponse>> + Send {
        (**self).push(request)
    }
}

/// JSON-over-HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SyncError::InvalidConfiguration(error.to_string()))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> SyncResult<Resp>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_api_error(status, &body));
        }

        Ok(response.json::<Resp>().await?)
    }
}

impl SyncTransport for HttpTransport {
    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post(PULL_PATH, request).await
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let response: PushResponse = self.post(PUSH_PATH, request).await?;
        if !response.success {
            return Err(SyncError::Server(
                "push was not acknowledged by the server".to_string(),
            ));
        }
        Ok(response)
    }
}

fn map_send_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Network(format!("request timed out: {error}"))
    } else {
        SyncError::Network(error.to_string())
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> SyncError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|payload| payload.message.clone())
        .map_or_else(
            || {
                let trimmed = compact_text(body);
                if trimmed.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    format!("{trimmed} ({})", status.as_u16())
                }
            },
            |message| format!("{} ({})", message.trim(), status.as_u16()),
        );

    if status.is_client_error() {
        let code = parsed.map_or(ErrorCode::InvalidPayload, |payload| payload.error);
        SyncError::Rejected { code, message }
    } else {
        SyncError::Server(message)
    }
}

fn normalize_base_url(raw: String) -> SyncResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        SyncError::InvalidConfiguration("sync endpoint must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(SyncError::InvalidConfiguration(
            "sync endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("sync.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_base_url_trims_trailing_slash() {
        let transport =
            HttpTransport::new("https://sync.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "https://sync.example.com");
    }

    #[test]
    fn client_errors_become_rejections_with_server_code() {
        let error = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"INVALID_PAYLOAD","message":"userId must be a non-empty string"}"#,
        );
        match error {
            SyncError::Rejected { code, message } => {
                assert_eq!(code, ErrorCode::InvalidPayload);
                assert!(message.contains("userId"));
                assert!(message.contains("400"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn server_errors_keep_plain_bodies() {
        let error = parse_api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(error, SyncError::Server(ref message) if message == "upstream down (502)"));
        assert_eq!(error.code(), ErrorCode::StorageFailure);
    }
}
