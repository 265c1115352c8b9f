// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Duplex text transport under the STOMP session.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{FrameError, StreamError};

/// Message-oriented text transport.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), StreamError>;

    /// Next text message, or `None` once the peer closed.
    async fn recv(&mut self) -> Result<Option<String>, StreamError>;

    async fn close(&mut self) -> Result<(), StreamError>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Open `url` with `Authorization: Bearer <token>` on the upgrade request.
    ///
    /// TCP connect, TLS and the upgrade together must finish within `timeout`.
    pub async fn connect(url: &Url, bearer: &str, timeout: Duration) -> Result<Self, StreamError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        let auth = HeaderValue::from_str(bearer)
            .map_err(|e| StreamError::Transport(format!("invalid authorization header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (stream, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| StreamError::Timeout("websocket upgrade"))?
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        debug!(status = %response.status(), host = url.host_str().unwrap_or_default(), "WebSocket upgraded");

        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map(Some)
                        .map_err(|_| FrameError::InvalidUtf8.into());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "WebSocket closed by peer");
                    return Ok(None);
                }
                // Pings are answered by tungstenite on the next read or write
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(StreamError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn listener() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/socket?mtdt=abc", listener.local_addr().unwrap())).unwrap();
        (listener, url)
    }

    #[tokio::test]
    async fn test_connect_times_out_when_upgrade_never_answered() {
        let (listener, url) = listener().await;
        // Accept the TCP connection, read nothing, answer nothing
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            WebSocketTransport::connect(&url, "Bearer access", Duration::from_millis(200)),
        )
        .await
        .expect("connect must honour its own timeout");
        assert!(matches!(result, Err(StreamError::Timeout("websocket upgrade"))));
        server.abort();
    }

    #[tokio::test]
    async fn test_upgrade_carries_bearer_and_exchanges_text() {
        let (listener, url) = listener().await;
        let (seen_tx, seen_rx) = oneshot::channel::<(String, Option<String>)>();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let target = req.uri().to_string();
                let _ = seen_tx.send((target, auth));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text("CONNECTED\nversion:1.2\n\n\0".into())).await.unwrap();
            ws.close(None).await.unwrap();
            // Drain until the client acknowledges the close
            while let Some(Ok(_)) = ws.next().await {}
            first
        });

        let mut transport = WebSocketTransport::connect(&url, "Bearer access", Duration::from_secs(5))
            .await
            .unwrap();
        let (target, auth) = seen_rx.await.unwrap();
        assert_eq!(target, "/socket?mtdt=abc");
        assert_eq!(auth.as_deref(), Some("Bearer access"));

        transport.send("CONNECT\naccept-version:1.2\n\n\0".into()).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().as_deref(),
            Some("CONNECTED\nversion:1.2\n\n\0")
        );
        // Close frame from the server reads as end of stream
        assert_eq!(transport.recv().await.unwrap(), None);
        transport.close().await.unwrap();

        let first = server.await.unwrap();
        assert_eq!(first, Message::Text("CONNECT\naccept-version:1.2\n\n\0".into()));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let (listener, url) = listener().await;
        drop(listener);
        let result = WebSocketTransport::connect(&url, "Bearer access", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(StreamError::Transport(_))));
    }
}
