// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! STOMP session over an open transport.
//!
//! ```text
//! client                         server
//!   │── CONNECT (1.2, heart-beat) ──▶│
//!   │◀─────────── CONNECTED ─────────│   within protocol_timeout
//!   │── SUBSCRIBE (id, dest, model) ▶│
//!   │◀──── MESSAGE / \n / ERROR ─────│   streaming
//!   │── \n (negotiated interval) ───▶│
//! ```

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::frame::{
    connect_frame, disconnect_frame, negotiate_heart_beat, parse_heart_beat, subscribe_frame,
    Command, Decoded, FrameDecoder, StompFrame,
};
use super::transport::Transport;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::metrics;

/// Heartbeat sent by the client.
pub const HEARTBEAT: &str = "\n";

/// Multiplier on the negotiated incoming interval before the peer counts as gone.
const INCOMING_GRACE: u32 = 2;

/// One unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// MESSAGE body
    Message(String),
    Heartbeat,
    /// Any other frame the server may send (RECEIPT, ...)
    Other(Command),
    Closed,
}

pub struct StompSession {
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    outgoing: Option<Duration>,
    incoming: Option<Duration>,
    destination: String,
    close_timeout: Duration,
}

impl StompSession {
    /// Run CONNECT/CONNECTED and SUBSCRIBE on `transport`.
    ///
    /// The transport is closed if any step fails.
    pub async fn establish(
        transport: Box<dyn Transport>,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        let mut session = Self {
            transport,
            decoder: FrameDecoder::new(),
            outgoing: None,
            incoming: None,
            destination: config.destination(),
            close_timeout: config.transport_timeout(),
        };

        match session.handshake(config).await {
            Ok(()) => Ok(session),
            Err(e) => {
                match tokio::time::timeout(session.close_timeout, session.transport.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(close_err)) => debug!(error = %close_err, "Transport close after failed handshake"),
                    Err(_) => debug!("Transport close after failed handshake timed out"),
                }
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, config: &StreamConfig) -> Result<(), StreamError> {
        self.transport
            .send(connect_frame(config.heartbeat_ms).encode())
            .await?;
        debug!("CONNECT frame sent");

        let connected = tokio::time::timeout(config.protocol_timeout(), self.await_connected())
            .await
            .map_err(|_| StreamError::Timeout("CONNECTED frame"))??;

        let server = connected
            .get_header("heart-beat")
            .and_then(parse_heart_beat)
            .unwrap_or((0, 0));
        let (outgoing, incoming) =
            negotiate_heart_beat((config.heartbeat_ms, config.heartbeat_ms), server);
        self.outgoing = (outgoing > 0).then(|| Duration::from_millis(outgoing));
        self.incoming = (incoming > 0).then(|| Duration::from_millis(incoming));
        info!(
            version = connected.get_header("version").unwrap_or("unknown"),
            outgoing_ms = outgoing,
            incoming_ms = incoming,
            "STOMP session connected"
        );

        let subscribe = subscribe_frame(
            &config.subscription_id,
            &self.destination,
            &config.subscribe_headers(),
        );
        self.transport.send(subscribe.encode()).await?;
        info!(destination = %self.destination, id = %config.subscription_id, "Subscribed");
        Ok(())
    }

    async fn await_connected(&mut self) -> Result<StompFrame, StreamError> {
        loop {
            match self.read().await? {
                None => return Err(StreamError::Closed),
                Some(Decoded::Heartbeat) => continue,
                Some(Decoded::Frame(frame)) => match frame.command {
                    Command::Connected => return Ok(frame),
                    Command::Error => return Err(server_error(frame)),
                    other => {
                        return Err(StreamError::Protocol(format!(
                            "expected CONNECTED, got {}",
                            other
                        )))
                    }
                },
            }
        }
    }

    /// Next decoded unit off the wire, reading the transport as needed.
    async fn read(&mut self) -> Result<Option<Decoded>, StreamError> {
        loop {
            if let Some(decoded) = self.decoder.next_frame() {
                let decoded = decoded?;
                match &decoded {
                    Decoded::Heartbeat => metrics::record_frame("HEARTBEAT"),
                    Decoded::Frame(frame) => metrics::record_frame(frame.command.as_str()),
                }
                return Ok(Some(decoded));
            }
            match self.transport.recv().await? {
                Some(text) => self.decoder.push(&text),
                None => return Ok(None),
            }
        }
    }

    /// Wait for the next inbound unit.
    ///
    /// ERROR frames and malformed frames end the session with an error.
    /// Cancel-safe: partial frames stay buffered.
    pub async fn next_inbound(&mut self) -> Result<Inbound, StreamError> {
        match self.read().await? {
            None => Ok(Inbound::Closed),
            Some(Decoded::Heartbeat) => {
                debug!("Heartbeat received");
                Ok(Inbound::Heartbeat)
            }
            Some(Decoded::Frame(frame)) => match frame.command {
                Command::Message => {
                    if let Some(subscription) = frame.get_header("subscription") {
                        debug!(subscription, "MESSAGE received");
                    }
                    Ok(Inbound::Message(frame.body))
                }
                Command::Error => Err(server_error(frame)),
                other => {
                    debug!(command = %other, "Ignoring frame");
                    Ok(Inbound::Other(other))
                }
            },
        }
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), StreamError> {
        self.transport.send(HEARTBEAT.to_string()).await
    }

    /// Interval at which we must send heartbeats, if any.
    #[must_use]
    pub fn outgoing_heartbeat(&self) -> Option<Duration> {
        self.outgoing
    }

    /// Longest silence tolerated from the server, if it promised heartbeats.
    #[must_use]
    pub fn read_deadline(&self) -> Option<Duration> {
        self.incoming.map(|d| d * INCOMING_GRACE)
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Send DISCONNECT and close the transport, giving up after the
    /// transport timeout. The socket is dropped either way.
    pub async fn close(mut self) {
        let limit = self.close_timeout;
        let transport = &mut self.transport;
        let closing = async move {
            if let Err(e) = transport.send(disconnect_frame().encode()).await {
                debug!(error = %e, "DISCONNECT not sent");
            }
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Transport close failed");
            }
        };
        if tokio::time::timeout(limit, closing).await.is_err() {
            warn!(timeout = ?limit, "Transport close timed out, dropping connection");
        }
    }
}

fn server_error(frame: StompFrame) -> StreamError {
    let message = frame.get_header("message").unwrap_or("unspecified").to_string();
    error!(reason = %message, body = %frame.body, headers = ?frame.headers, "STOMP ERROR frame received");
    StreamError::ServerError {
        message,
        body: frame.body,
    }
}
