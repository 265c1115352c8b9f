// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Token acquisition for the change feed.
//!
//! Two HTTP calls precede every transport connect:
//!
//! 1. `POST {server}{token_path}` with a client-credentials form, returning
//!    `{access_token, expires_in}`.
//! 2. `GET {server}{handshake_path}` with `Authorization: Bearer`, returning
//!    `{token}`, a one-time token carried on the socket URL.

use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::error::StreamError;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 172_800;

/// Bearer token from the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: u64,
}

impl AccessToken {
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    token: Option<String>,
}

/// HTTP client for the token and handshake endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    base: Url,
    token_path: String,
    handshake_path: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl OAuthClient {
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| StreamError::Auth(format!("invalid server url '{}': {}", config.server_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base,
            token_path: config.token_path.clone(),
            handshake_path: config.handshake_path.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope().to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StreamError> {
        self.base
            .join(path)
            .map_err(|e| StreamError::Auth(format!("invalid endpoint path '{}': {}", path, e)))
    }

    /// Client-credentials grant.
    pub async fn fetch_access_token(&self) -> Result<AccessToken, StreamError> {
        let url = self.endpoint(&self.token_path)?;
        debug!(url = %url, client_id = %self.client_id, "Requesting access token");

        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Auth(format!("{}: {}", status, body)));
        }

        let parsed: TokenResponse = response.json().await?;
        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StreamError::Auth("response has no access_token".into()))?;
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        info!(expires_in, "Access token acquired");
        Ok(AccessToken { token, expires_in })
    }

    /// One-time token for the socket URL.
    pub async fn fetch_handshake_token(&self, access: &AccessToken) -> Result<String, StreamError> {
        let url = self.endpoint(&self.handshake_path)?;
        debug!(url = %url, "Requesting handshake token");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, access.bearer())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Handshake(format!("{}: {}", status, body)));
        }

        let parsed: HandshakeResponse = response.json().await?;
        let token = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StreamError::Handshake("response has no token".into()))?;

        debug!("Handshake token acquired");
        Ok(token)
    }
}

/// `{ws|wss}://<host>{socket_path}?{param}=<token>`, scheme following http/https.
pub fn transport_url(config: &StreamConfig, handshake_token: &str) -> Result<Url, StreamError> {
    let mut url = Url::parse(&config.server_url)
        .map_err(|e| StreamError::Transport(format!("invalid server url: {}", e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(StreamError::Transport(format!(
                "unsupported server scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| StreamError::Transport(format!("cannot switch scheme to {}", scheme)))?;
    url.set_path(&config.socket_path);
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut()
        .append_pair(&config.handshake_param, handshake_token);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn config(server: &str) -> StreamConfig {
        StreamConfig {
            server_url: server.into(),
            client_id: "svc".into(),
            client_secret: "pw".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_url_https() {
        let url = transport_url(&config("https://itsm.example.com"), "abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://itsm.example.com/api/public/mtdtsocket/websocket?mtdt=abc123"
        );
    }

    #[test]
    fn test_transport_url_http_keeps_port_and_drops_path() {
        let url = transport_url(&config("http://localhost:8080/ignored?x=1"), "t").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/api/public/mtdtsocket/websocket?mtdt=t"
        );
    }

    #[test]
    fn test_transport_url_encodes_token() {
        let url = transport_url(&config("https://h"), "a b&c").unwrap();
        assert_eq!(url.query(), Some("mtdt=a+b%26c"));
    }

    #[test]
    fn test_transport_url_rejects_other_schemes() {
        assert!(matches!(
            transport_url(&config("ftp://h"), "t"),
            Err(StreamError::Transport(_))
        ));
    }

    #[test]
    fn test_endpoints_resolve_against_server() {
        let client = OAuthClient::new(&config("https://h:9443")).unwrap();
        assert_eq!(
            client.endpoint(&client.token_path).unwrap().as_str(),
            "https://h:9443/api/oauth/token"
        );
        assert_eq!(
            client.endpoint(&client.handshake_path).unwrap().as_str(),
            "https://h:9443/api/socket/handshake-token"
        );
        assert_eq!(client.scope, "svc");
    }

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken {
            token: "very-secret".into(),
            expires_in: DEFAULT_EXPIRES_IN_SECS,
        };
        assert!(!format!("{:?}", token).contains("very-secret"));
        assert_eq!(token.bearer(), "Bearer very-secret");
    }

    #[test]
    fn test_token_response_expiry_defaults() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"access_token": "x"}"#).unwrap();
        assert_eq!(parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS), 172_800);
    }

    // =========================================================================
    // Against a local HTTP endpoint
    // =========================================================================

    /// Read one HTTP/1.1 request: head plus `content-length` bytes of body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answer a single request with `status` and a JSON `body`. The task
    /// yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (base, task)
    }

    #[tokio::test]
    async fn test_access_token_posts_client_credentials_form() {
        let (base, server) = serve_once("200 OK", r#"{"access_token": "abc", "expires_in": 60}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        let token = client.fetch_access_token().await.unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_in, 60);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/oauth/token HTTP/1.1\r\n"));
        assert!(request
            .to_ascii_lowercase()
            .contains("content-type: application/x-www-form-urlencoded"));
        assert!(request.ends_with(
            "\r\n\r\ngrant_type=client_credentials&client_id=svc&client_secret=pw&scope=svc"
        ));
    }

    #[tokio::test]
    async fn test_access_token_expiry_defaults_when_absent() {
        let (base, server) = serve_once("200 OK", r#"{"access_token": "abc"}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        let token = client.fetch_access_token().await.unwrap();
        assert_eq!(token.expires_in, DEFAULT_EXPIRES_IN_SECS);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_access_token_rejected_status() {
        let (base, server) = serve_once("401 Unauthorized", r#"{"error": "invalid_client"}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        match client.fetch_access_token().await {
            Err(StreamError::Auth(message)) => {
                assert!(message.contains("401"));
                assert!(message.contains("invalid_client"));
            }
            other => panic!("expected auth error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_access_token_missing_from_response() {
        let (base, server) = serve_once("200 OK", r#"{"expires_in": 60}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        assert!(matches!(
            client.fetch_access_token().await,
            Err(StreamError::Auth(_))
        ));
        server.await.unwrap();
    }

    fn access() -> AccessToken {
        AccessToken {
            token: "access".into(),
            expires_in: 60,
        }
    }

    #[tokio::test]
    async fn test_handshake_sends_bearer() {
        let (base, server) = serve_once("200 OK", r#"{"token": "one-time"}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        let token = client.fetch_handshake_token(&access()).await.unwrap();
        assert_eq!(token, "one-time");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/socket/handshake-token HTTP/1.1\r\n"));
        assert!(request
            .to_ascii_lowercase()
            .contains("\r\nauthorization: bearer access\r\n"));
    }

    #[tokio::test]
    async fn test_handshake_rejected_status() {
        let (base, server) = serve_once("503 Service Unavailable", r#"{"error": "busy"}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        match client.fetch_handshake_token(&access()).await {
            Err(StreamError::Handshake(message)) => assert!(message.contains("503")),
            other => panic!("expected handshake error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_token_missing_from_response() {
        let (base, server) = serve_once("200 OK", r#"{"token": ""}"#).await;
        let client = OAuthClient::new(&config(&base)).unwrap();

        assert!(matches!(
            client.fetch_handshake_token(&access()).await,
            Err(StreamError::Handshake(_))
        ));
        server.await.unwrap();
    }
}
