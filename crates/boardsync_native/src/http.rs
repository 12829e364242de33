//! HTTP endpoints: credential fetches and the normal persist path.

use async_trait::async_trait;
use boardsync_core::{PersistRequest, PersistenceEndpoint, Result, SyncError, TokenEndpoint};
use serde::Deserialize;
use url::Url;

/// Path of the connection-token endpoint, relative to the API base URL.
pub const CONNECTION_TOKEN_PATH: &[&str] = &["realtime", "connection-token"];

/// Body returned by both token endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Join path segments onto `base`, percent-encoding each segment.
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::Transport(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// URL of the subscription-token endpoint for `board_id`.
pub fn subscription_token_url(base: &Url, board_id: &str) -> Result<Url> {
    endpoint_url(base, &["realtime", "subscription-token", board_id])
}

/// URL of the snapshot endpoint for `board_id`.
pub fn snapshot_url(base: &Url, board_id: &str) -> Result<Url> {
    endpoint_url(base, &["whiteboards", board_id, "snapshot"])
}

/// Parse an API base URL.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| SyncError::Transport(format!("invalid URL {raw}: {e}")))
}

/// Client for the application's REST API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpApi {
    /// Create a client for the API at `base_url`.
    pub fn new(base_url: Url, auth_token: Option<String>) -> Self {
        Self {
            base_url,
            auth_token,
            client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_token(&self, kind: &'static str, url: Url) -> Result<String> {
        let credentials = |message: String| SyncError::Credentials { kind, message };

        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| credentials(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            log::warn!("[HttpApi] {} token request failed: {} {}", kind, status, body);
            return Err(credentials(format!("HTTP {status}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| credentials(format!("invalid response: {e}")))?;
        Ok(body.token)
    }
}

#[async_trait]
impl TokenEndpoint for HttpApi {
    async fn connection_token(&self) -> Result<String> {
        let url = endpoint_url(&self.base_url, CONNECTION_TOKEN_PATH)?;
        self.fetch_token("connection", url).await
    }

    async fn subscription_token(&self, board_id: &str) -> Result<String> {
        let url = subscription_token_url(&self.base_url, board_id)?;
        self.fetch_token("subscription", url).await
    }
}

#[async_trait]
impl PersistenceEndpoint for HttpApi {
    async fn persist(&self, request: &PersistRequest) -> Result<()> {
        let url = snapshot_url(&self.base_url, &request.id)?;
        let resp = self
            .authorized(self.client.put(url))
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("persist request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            log::warn!("[HttpApi] Persist of {} failed: {} {}", request.id, status, body);
            return Err(SyncError::Http {
                endpoint: "persist",
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.example.com/v1/").unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(
            endpoint_url(&base(), CONNECTION_TOKEN_PATH).unwrap().as_str(),
            "https://api.example.com/v1/realtime/connection-token"
        );
        assert_eq!(
            subscription_token_url(&base(), "b-1").unwrap().as_str(),
            "https://api.example.com/v1/realtime/subscription-token/b-1"
        );
        assert_eq!(
            snapshot_url(&base(), "b-1").unwrap().as_str(),
            "https://api.example.com/v1/whiteboards/b-1/snapshot"
        );
    }

    #[test]
    fn test_board_id_is_percent_encoded() {
        assert_eq!(
            snapshot_url(&base(), "a/b c").unwrap().as_str(),
            "https://api.example.com/v1/whiteboards/a%2Fb%20c/snapshot"
        );
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let base = Url::parse("https://api.example.com").unwrap();
        assert_eq!(
            snapshot_url(&base, "b").unwrap().as_str(),
            "https://api.example.com/whiteboards/b/snapshot"
        );
    }

    #[test]
    fn test_cannot_be_base_url_is_rejected() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        assert!(endpoint_url(&base, &["x"]).is_err());
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        assert!(parse_base_url("not a url").is_err());
    }
}
