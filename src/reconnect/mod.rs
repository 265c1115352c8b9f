// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Supervised reconnection loop for the change feed.
//!
//! A [`ReconnectionController`] runs on one spawned task. It drives the
//! connection stages, pumps frames into the [`EventRouter`] while streaming,
//! and retries failed attempts under a bounded [`RetryConfig`]. The returned
//! [`ControllerHandle`] watches its state, waits for startup, and stops it.
//!
//! # Startup Contract
//!
//! The first entry into `Streaming` signals "established"; entering `GaveUp`
//! first signals "failed". [`ControllerHandle::wait_until_established`] turns
//! either outcome, or a timeout, into a `SyncResult`.

mod state;

pub use state::ConnectionState;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{StreamError, SyncError, SyncResult};
use crate::metrics;
use crate::resilience::retry::RetryConfig;
use crate::stream::{EventRouter, Inbound, SessionConnector, StompSession};

/// One-shot startup outcome, latched on first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartupSignal {
    Pending,
    Established,
    Failed { attempts: usize },
    Stopped,
}

/// Why streaming ended.
enum StreamEnd {
    Shutdown,
    Lost(StreamError),
}

pub struct ReconnectionController {
    connector: Arc<dyn SessionConnector>,
    router: EventRouter,
    config: StreamConfig,
    retry: RetryConfig,
    state: watch::Sender<ConnectionState>,
    startup: watch::Sender<StartupSignal>,
    shutdown: watch::Receiver<bool>,
}

impl ReconnectionController {
    /// Spawn the controller on the current runtime.
    ///
    /// Retry behavior comes from `config` unless `retry` overrides it.
    pub fn spawn(
        connector: Arc<dyn SessionConnector>,
        router: EventRouter,
        config: StreamConfig,
        retry: Option<RetryConfig>,
    ) -> ControllerHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (startup_tx, startup_rx) = watch::channel(StartupSignal::Pending);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Self {
            connector,
            router,
            retry: retry.unwrap_or_else(|| config.retry_config()),
            config,
            state: state_tx,
            startup: startup_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(controller.run());

        ControllerHandle {
            state: state_rx,
            startup: startup_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(&state.to_string());
        }
    }

    fn signal_startup(&self, signal: StartupSignal) {
        self.startup.send_if_modified(|current| {
            if *current == StartupSignal::Pending {
                *current = signal;
                true
            } else {
                false
            }
        });
    }

    #[tracing::instrument(skip(self), fields(instance = %self.config.instance_id, destination = %self.config.destination()))]
    async fn run(self) -> ConnectionState {
        let mut shutdown = self.shutdown.clone();
        let mut failures = 0usize;
        let mut first_attempt = Some(Instant::now());

        info!(
            max_retries = ?self.retry.max_retries,
            delay = ?self.retry.initial_delay,
            "Starting change feed"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let attempt = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.connect() => result,
            };

            let error = match attempt {
                Ok(mut session) => {
                    failures = 0;
                    self.set_state(ConnectionState::Streaming);
                    metrics::set_streaming(true);
                    if let Some(started) = first_attempt.take() {
                        metrics::record_establish_duration(started.elapsed());
                    }
                    self.signal_startup(StartupSignal::Established);
                    info!(destination = %session.destination(), "Change feed streaming");

                    let end = self.stream(&mut session, &mut shutdown).await;
                    metrics::set_streaming(false);
                    session.close().await;
                    match end {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Lost(e) => {
                            warn!(error = %e, "Change feed connection lost");
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            failures += 1;
            self.set_state(ConnectionState::Failed);
            metrics::record_connection_error(error.kind());

            if self.retry.is_exhausted(failures) {
                error!(attempts = failures, error = %error, "Change feed giving up");
                self.set_state(ConnectionState::GaveUp);
                self.signal_startup(StartupSignal::Failed { attempts: failures });
                return ConnectionState::GaveUp;
            }

            let delay = self.retry.delay_for(failures);
            warn!(
                attempt = failures,
                max_retries = ?self.retry.max_retries,
                error = %error,
                "Change feed attempt failed. Retrying in {:?}...",
                delay
            );

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(ConnectionState::Disconnected);
            metrics::record_reconnect_attempt();
        }

        self.set_state(ConnectionState::Disconnected);
        self.signal_startup(StartupSignal::Stopped);
        info!("Change feed stopped");
        ConnectionState::Disconnected
    }

    /// One full connection attempt, up to a subscribed session.
    async fn connect(&self) -> Result<StompSession, StreamError> {
        self.set_state(ConnectionState::Authenticating);
        let access = self.connector.authenticate().await?;

        self.set_state(ConnectionState::HandshakeRequested);
        let handshake = self.connector.handshake_token(&access).await?;

        self.set_state(ConnectionState::TransportConnecting);
        let transport = self.connector.open_transport(&access, &handshake).await?;

        self.set_state(ConnectionState::ProtocolConnecting);
        StompSession::establish(transport, &self.config).await
    }

    /// Pump inbound traffic into the router until shutdown or failure.
    async fn stream(&self, session: &mut StompSession, shutdown: &mut watch::Receiver<bool>) -> StreamEnd {
        let mut heartbeat = session.outgoing_heartbeat().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let read_deadline = session.read_deadline();
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return StreamEnd::Shutdown,
                _ = silence(read_deadline, last_inbound) => {
                    return StreamEnd::Lost(StreamError::Timeout("server heartbeat"));
                }
                _ = tick(&mut heartbeat) => {
                    if let Err(e) = session.send_heartbeat().await {
                        return StreamEnd::Lost(e);
                    }
                }
                inbound = session.next_inbound() => {
                    last_inbound = Instant::now();
                    match inbound {
                        Ok(Inbound::Message(body)) => match self.router.dispatch_body(&body) {
                            Ok(outcome) => debug!(?outcome, "Change event dispatched"),
                            Err(e) => return StreamEnd::Lost(e),
                        },
                        Ok(Inbound::Heartbeat | Inbound::Other(_)) => {}
                        Ok(Inbound::Closed) => return StreamEnd::Lost(StreamError::Closed),
                        Err(e) => return StreamEnd::Lost(e),
                    }
                }
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn silence(deadline: Option<Duration>, since: Instant) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(since + deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Control surface for a spawned [`ReconnectionController`].
pub struct ControllerHandle {
    state: watch::Receiver<ConnectionState>,
    startup: watch::Receiver<StartupSignal>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<ConnectionState>,
}

impl ControllerHandle {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Block until the feed first reaches `Streaming`.
    ///
    /// Gives `GaveUp` if retries ran out first, `StartupTimeout` if neither
    /// happened within `timeout`, `Stopped` if the controller was shut down.
    pub async fn wait_until_established(&self, timeout: Duration) -> SyncResult<()> {
        let mut startup = self.startup.clone();
        let waited = tokio::time::timeout(
            timeout,
            startup.wait_for(|s| *s != StartupSignal::Pending),
        )
        .await;

        let signal = match waited {
            Err(_) => {
                error!(?timeout, state = %self.state(), "Change feed not established in time");
                return Err(SyncError::StartupTimeout(timeout));
            }
            Ok(Err(_)) => return Err(SyncError::Stopped),
            Ok(Ok(signal)) => *signal,
        };

        match signal {
            StartupSignal::Established => Ok(()),
            StartupSignal::Failed { attempts } => Err(SyncError::GaveUp { attempts }),
            StartupSignal::Pending | StartupSignal::Stopped => Err(SyncError::Stopped),
        }
    }

    /// Request shutdown and wait for the task to exit. Returns its final state.
    pub async fn shutdown(self) -> ConnectionState {
        // The task may already be gone
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Change feed task panicked");
                ConnectionState::Failed
            }
        }
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}
