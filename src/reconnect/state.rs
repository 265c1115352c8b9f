// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

/// Change-feed connection state.
///
/// ```text
/// Disconnected → Authenticating → HandshakeRequested → TransportConnecting
///              → ProtocolConnecting → Streaming
///
/// any ──▶ Failed ──(delay)──▶ Disconnected     while attempts remain
///         Failed ───────────▶ GaveUp           terminal
/// ```
///
/// Use [`super::ControllerHandle::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Idle, between attempts or stopped
    Disconnected,
    /// Requesting the bearer token
    Authenticating,
    /// Requesting the one-time handshake token
    HandshakeRequested,
    /// Opening the WebSocket
    TransportConnecting,
    /// CONNECT sent, waiting for CONNECTED and subscribing
    ProtocolConnecting,
    /// Subscribed and receiving change events
    Streaming,
    /// Current attempt failed, waiting before the next one
    Failed,
    /// Retry budget exhausted
    GaveUp,
}

impl ConnectionState {
    /// True for the stages of an attempt in progress.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Authenticating
                | Self::HandshakeRequested
                | Self::TransportConnecting
                | Self::ProtocolConnecting
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GaveUp)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::HandshakeRequested => write!(f, "HandshakeRequested"),
            Self::TransportConnecting => write!(f, "TransportConnecting"),
            Self::ProtocolConnecting => write!(f, "ProtocolConnecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Failed => write!(f, "Failed"),
            Self::GaveUp => write!(f, "GaveUp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
        assert_eq!(format!("{}", ConnectionState::HandshakeRequested), "HandshakeRequested");
        assert_eq!(format!("{}", ConnectionState::GaveUp), "GaveUp");
    }

    #[test]
    fn test_connection_state_classes() {
        assert!(ConnectionState::Authenticating.is_connecting());
        assert!(ConnectionState::ProtocolConnecting.is_connecting());
        assert!(!ConnectionState::Streaming.is_connecting());
        assert!(!ConnectionState::Failed.is_connecting());

        assert!(ConnectionState::GaveUp.is_terminal());
        assert!(!ConnectionState::Failed.is_terminal());
    }
}
