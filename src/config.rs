// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the caches and the change feed.
//!
//! # Example
//!
//! ```
//! use hierarchy_sync::{HierarchySyncConfig, StreamConfig};
//!
//! // Minimal config (uses defaults)
//! let config = HierarchySyncConfig::default();
//! assert_eq!(config.stream.heartbeat_ms, 10_000);
//! assert_eq!(config.stream.max_reconnect_attempts, 10);
//!
//! // Full config
//! let config = HierarchySyncConfig {
//!     tenant_id: "acme".into(),
//!     stream: StreamConfig {
//!         server_url: "https://itsm.example.com".into(),
//!         client_id: "cache-sync".into(),
//!         client_secret: "s3cret".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.stream.destination(), "/users/execute-task/cache-sync");
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::SyncError;
use crate::loader::EntityKind;
use crate::resilience::retry::RetryConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchySyncConfig {
    /// Tenant whose snapshot indices are loaded
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Change-feed connection settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Cache that receives upserts for events with no `model` and no known id.
    /// `None` skips such events.
    #[serde(default)]
    pub unrouted_kind: Option<EntityKind>,
}

/// Change-feed connection settings.
#[derive(Clone, Deserialize)]
pub struct StreamConfig {
    /// Base URL of the upstream server (http or https)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// OAuth scope (defaults to the client id)
    #[serde(default)]
    pub scope: Option<String>,

    /// Identifies this process to the upstream server (SUBSCRIBE `model` header)
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// SUBSCRIBE `refid` header
    #[serde(default = "default_instance_ref")]
    pub instance_ref: String,

    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_handshake_path")]
    pub handshake_path: String,
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Query parameter carrying the handshake token on the socket URL
    #[serde(default = "default_handshake_param")]
    pub handshake_param: String,

    /// SUBSCRIBE destination (defaults to `/users/execute-task/{client_id}`)
    #[serde(default)]
    pub subscribe_destination: Option<String>,
    #[serde(default = "default_subscription_id")]
    pub subscription_id: String,

    /// Extra SUBSCRIBE headers, replacing the instance headers on a name clash
    #[serde(default)]
    pub subscribe_metadata: BTreeMap<String, String>,

    /// Heart-beat interval requested in CONNECT (0 disables)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Timeout for token and handshake HTTP calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Bound on the WebSocket upgrade and on closing the socket
    #[serde(default = "default_transport_timeout_secs")]
    pub transport_timeout_secs: u64,

    /// Time allowed between sending CONNECT and receiving CONNECTED
    #[serde(default = "default_protocol_timeout_secs")]
    pub protocol_timeout_secs: u64,

    /// Startup wait for the first established connection
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Reconnects allowed after the first attempt fails
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: usize,
}

fn default_tenant_id() -> String { "default".to_string() }
fn default_server_url() -> String { "http://127.0.0.1:8080".to_string() }
fn default_instance_id() -> String { "hierarchy_sync".to_string() }
fn default_instance_ref() -> String { "1".to_string() }
fn default_token_path() -> String { "/api/oauth/token".to_string() }
fn default_handshake_path() -> String { "/api/socket/handshake-token".to_string() }
fn default_socket_path() -> String { "/api/public/mtdtsocket/websocket".to_string() }
fn default_handshake_param() -> String { "mtdt".to_string() }
fn default_subscription_id() -> String { "sub-0".to_string() }
fn default_heartbeat_ms() -> u64 { 10_000 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_transport_timeout_secs() -> u64 { 10 }
fn default_protocol_timeout_secs() -> u64 { 10 }
fn default_connection_timeout_secs() -> u64 { 30 }
fn default_reconnect_delay_secs() -> u64 { 5 }
fn default_max_reconnect_attempts() -> usize { 10 }

impl Default for HierarchySyncConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            stream: StreamConfig::default(),
            unrouted_kind: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            instance_id: default_instance_id(),
            instance_ref: default_instance_ref(),
            token_path: default_token_path(),
            handshake_path: default_handshake_path(),
            socket_path: default_socket_path(),
            handshake_param: default_handshake_param(),
            subscribe_destination: None,
            subscription_id: default_subscription_id(),
            subscribe_metadata: BTreeMap::new(),
            heartbeat_ms: default_heartbeat_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            transport_timeout_secs: default_transport_timeout_secs(),
            protocol_timeout_secs: default_protocol_timeout_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

// Keeps the secret out of logs
impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("server_url", &self.server_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("instance_id", &self.instance_id)
            .field("destination", &self.destination())
            .field("heartbeat_ms", &self.heartbeat_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}

impl StreamConfig {
    #[must_use]
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(&self.client_id)
    }

    #[must_use]
    pub fn destination(&self) -> String {
        self.subscribe_destination
            .clone()
            .unwrap_or_else(|| format!("/users/execute-task/{}", self.client_id))
    }

    /// SUBSCRIBE headers besides `id` and `destination`.
    ///
    /// `model` and `refid` identify this instance; `subscribe_metadata`
    /// adds to them and wins on a clash.
    #[must_use]
    pub fn subscribe_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::from([
            ("model".to_string(), self.instance_id.clone()),
            ("refid".to_string(), self.instance_ref.clone()),
        ]);
        headers.extend(self.subscribe_metadata.clone());
        headers
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    #[must_use]
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_secs)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Fixed-delay, bounded reconnection policy.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(
            Duration::from_secs(self.reconnect_delay_secs),
            self.max_reconnect_attempts,
        )
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.server_url.trim().is_empty() {
            return Err(SyncError::Config("server_url is required".into()));
        }
        let url = reqwest::Url::parse(&self.server_url)
            .map_err(|e| SyncError::Config(format!("server_url '{}': {}", self.server_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!(
                "server_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(SyncError::Config(
                "client_id and client_secret are required".into(),
            ));
        }
        if self.instance_id.is_empty() {
            return Err(SyncError::Config("instance_id must not be empty".into()));
        }
        if self.handshake_param.is_empty() {
            return Err(SyncError::Config("handshake_param must not be empty".into()));
        }
        Ok(())
    }
}

impl HierarchySyncConfig {
    /// Build from `HSYNC_*` environment variables, falling back to defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `HSYNC_TENANT_ID` | `tenant_id` |
    /// | `HSYNC_SERVER_URL` | `stream.server_url` |
    /// | `HSYNC_CLIENT_ID` | `stream.client_id` |
    /// | `HSYNC_CLIENT_SECRET` | `stream.client_secret` |
    /// | `HSYNC_INSTANCE_ID` | `stream.instance_id` |
    /// | `HSYNC_CONNECTION_TIMEOUT_SECS` | `stream.connection_timeout_secs` |
    /// | `HSYNC_UNROUTED_KIND` | `unrouted_kind` |
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let mut config = Self::default();

        if let Some(v) = lookup("HSYNC_TENANT_ID") {
            config.tenant_id = v;
        }
        if let Some(v) = lookup("HSYNC_SERVER_URL") {
            config.stream.server_url = v;
        }
        if let Some(v) = lookup("HSYNC_CLIENT_ID") {
            config.stream.client_id = v;
        }
        if let Some(v) = lookup("HSYNC_CLIENT_SECRET") {
            config.stream.client_secret = v;
        }
        if let Some(v) = lookup("HSYNC_INSTANCE_ID") {
            config.stream.instance_id = v;
        }
        if let Some(v) = lookup("HSYNC_CONNECTION_TIMEOUT_SECS") {
            config.stream.connection_timeout_secs = v.parse().map_err(|_| {
                SyncError::Config(format!("HSYNC_CONNECTION_TIMEOUT_SECS: not a number: '{}'", v))
            })?;
        }
        if let Some(v) = lookup("HSYNC_UNROUTED_KIND") {
            config.unrouted_kind = Some(v.parse().map_err(SyncError::Config)?);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.tenant_id.is_empty() {
            return Err(SyncError::Config("tenant_id is required".into()));
        }
        self.stream.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> HierarchySyncConfig {
        HierarchySyncConfig {
            stream: StreamConfig {
                client_id: "svc".into(),
                client_secret: "secret".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = HierarchySyncConfig::default();
        assert_eq!(config.stream.socket_path, "/api/public/mtdtsocket/websocket");
        assert_eq!(config.stream.handshake_param, "mtdt");
        assert_eq!(config.stream.connection_timeout(), Duration::from_secs(30));
        assert_eq!(config.stream.transport_timeout(), Duration::from_secs(10));
        assert_eq!(config.stream.instance_id, "hierarchy_sync");
        assert_eq!(config.unrouted_kind, None);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.stream.client_secret.clear();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = valid();
        config.stream.server_url = "ftp://host".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.stream.server_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.tenant_id.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scope_and_destination_default_to_client_id() {
        let mut config = valid();
        assert_eq!(config.stream.scope(), "svc");
        assert_eq!(config.stream.destination(), "/users/execute-task/svc");

        config.stream.scope = Some("custom".into());
        config.stream.subscribe_destination = Some("/topic/x".into());
        assert_eq!(config.stream.scope(), "custom");
        assert_eq!(config.stream.destination(), "/topic/x");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: HierarchySyncConfig = serde_json::from_str(
            r#"{"tenant_id": "acme", "stream": {"client_id": "a", "client_secret": "b"}, "unrouted_kind": "department"}"#,
        )
        .unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.stream.heartbeat_ms, 10_000);
        assert_eq!(config.unrouted_kind, Some(EntityKind::Department));
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("HSYNC_TENANT_ID", "acme"),
            ("HSYNC_SERVER_URL", "https://up.example.com"),
            ("HSYNC_CLIENT_ID", "svc"),
            ("HSYNC_CLIENT_SECRET", "pw"),
            ("HSYNC_CONNECTION_TIMEOUT_SECS", "5"),
            ("HSYNC_UNROUTED_KIND", "location"),
        ]
        .into_iter()
        .collect();

        let config =
            HierarchySyncConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.stream.server_url, "https://up.example.com");
        assert_eq!(config.stream.connection_timeout_secs, 5);
        assert_eq!(config.unrouted_kind, Some(EntityKind::Location));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let result = HierarchySyncConfig::from_lookup(|k| {
            (k == "HSYNC_CONNECTION_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", valid().stream);
        assert!(!rendered.contains("secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_subscribe_headers_carry_instance() {
        let mut config = valid();
        config.stream.instance_id = "cache-eu-2".into();

        let headers = config.stream.subscribe_headers();
        assert_eq!(headers.get("model").map(String::as_str), Some("cache-eu-2"));
        assert_eq!(headers.get("refid").map(String::as_str), Some("1"));

        config.stream.subscribe_metadata = BTreeMap::from([
            ("refid".to_string(), "7".to_string()),
            ("x-region".to_string(), "eu".to_string()),
        ]);
        let headers = config.stream.subscribe_headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("refid").map(String::as_str), Some("7"));
        assert_eq!(headers.get("x-region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn test_retry_config_is_fixed_and_bounded() {
        let retry = valid().stream.retry_config();
        assert_eq!(retry.max_retries, Some(10));
        assert_eq!(retry.initial_delay, Duration::from_secs(5));
        // Ten reconnects after the first failure, the eleventh failure gives up
        assert!(!retry.is_exhausted(10));
        assert!(retry.is_exhausted(11));
        assert_eq!(retry.delay_for(7), Duration::from_secs(5));
    }
}
