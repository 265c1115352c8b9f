// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client for the upstream change feed.
//!
//! # Connection Sequence
//!
//! ```text
//! authenticate ──▶ handshake token ──▶ transport ──▶ CONNECT/CONNECTED ──▶ SUBSCRIBE
//!  (OAuth POST)     (GET, Bearer)     (WebSocket)       (StompSession)
//! ```
//!
//! The first three stages go through a [`SessionConnector`] so the
//! reconnection controller can be driven without a network. The STOMP part
//! always runs in [`StompSession`].

pub mod auth;
pub mod event;
pub mod frame;
pub mod session;
pub mod transport;

pub use auth::{AccessToken, OAuthClient};
pub use event::{ChangeEvent, DispatchOutcome, EventRouter, SkipReason};
pub use session::{Inbound, StompSession};
pub use transport::{Transport, WebSocketTransport};

use async_trait::async_trait;

use crate::config::StreamConfig;
use crate::error::StreamError;

/// Pre-session connection stages.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Obtain a bearer token.
    async fn authenticate(&self) -> Result<AccessToken, StreamError>;

    /// Exchange the bearer token for a one-time handshake token.
    async fn handshake_token(&self, access: &AccessToken) -> Result<String, StreamError>;

    /// Open the transport carrying the handshake token.
    async fn open_transport(
        &self,
        access: &AccessToken,
        handshake_token: &str,
    ) -> Result<Box<dyn Transport>, StreamError>;
}

/// OAuth over HTTP, then a WebSocket.
#[derive(Debug, Clone)]
pub struct HttpSessionConnector {
    oauth: OAuthClient,
    config: StreamConfig,
}

impl HttpSessionConnector {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        Ok(Self {
            oauth: OAuthClient::new(&config)?,
            config,
        })
    }
}

#[async_trait]
impl SessionConnector for HttpSessionConnector {
    async fn authenticate(&self) -> Result<AccessToken, StreamError> {
        self.oauth.fetch_access_token().await
    }

    async fn handshake_token(&self, access: &AccessToken) -> Result<String, StreamError> {
        self.oauth.fetch_handshake_token(access).await
    }

    async fn open_transport(
        &self,
        access: &AccessToken,
        handshake_token: &str,
    ) -> Result<Box<dyn Transport>, StreamError> {
        let url = auth::transport_url(&self.config, handshake_token)?;
        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "Connecting WebSocket"
        );
        let transport =
            WebSocketTransport::connect(&url, &access.bearer(), self.config.transport_timeout()).await?;
        Ok(Box::new(transport))
    }
}
