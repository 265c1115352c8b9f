// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types.
//!
//! Only [`SyncError`] is meant to reach the embedding process. Stream and
//! loader errors are handled locally: stream errors end the current
//! connection attempt and feed the retry policy, loader errors leave one
//! entity kind unavailable.

use std::time::Duration;
use thiserror::Error;

use crate::loader::EntityKind;

/// Malformed sub-protocol frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no command line")]
    MissingCommand,
    #[error("frame is missing the blank line after its headers")]
    UnterminatedHeaders,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Failure of one connection attempt to the change feed.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("handshake token request failed: {0}")]
    Handshake(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server sent ERROR frame: {message}")]
    ServerError { message: String, body: String },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection closed by peer")]
    Closed,
}

impl StreamError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Handshake(_) => "handshake",
            Self::Http(_) => "http",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::ServerError { .. } => "server_error",
            Self::Frame(_) => "frame",
            Self::Json(_) => "json",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// Failure to bulk-load one entity kind.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to connect to snapshot store: {0}")]
    Connect(String),

    #[error("loader for {0} used before connect")]
    NotConnected(EntityKind),

    #[error("failed to load index '{index}': {message}")]
    Load { index: String, message: String },
}

/// Startup-fatal errors surfaced to the embedding process.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no hierarchy cache could be loaded")]
    NoCachesLoaded,

    #[error("change feed gave up after {attempts} failed connection attempts")]
    GaveUp { attempts: usize },

    #[error("change feed not established within {0:?}")]
    StartupTimeout(Duration),

    #[error("change feed stopped before it was established")]
    Stopped,
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formats() {
        let err = StreamError::ServerError {
            message: "Bad destination".into(),
            body: String::new(),
        };
        assert_eq!(err.to_string(), "server sent ERROR frame: Bad destination");

        let err = SyncError::GaveUp { attempts: 10 };
        assert_eq!(
            err.to_string(),
            "change feed gave up after 10 failed connection attempts"
        );

        let err = StreamError::from(FrameError::MissingCommand);
        assert_eq!(err.to_string(), "frame has no command line");
        assert_eq!(err.kind(), "frame");
    }

    #[test]
    fn test_load_error_mentions_kind() {
        let err = LoadError::NotConnected(EntityKind::Location);
        assert_eq!(err.to_string(), "loader for location used before connect");
    }
}
