use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::subscriptions::SubscriptionSet;
use super::transport::{Connector, Transport};
use super::ChannelError;
use crate::config::Config;
use crate::protocol::{ClientMessage, ServerMessage, ServerMessageKind, StatusUpdate, Topic};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Floor applied to the reconnect delay so a zero delay cannot spin.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Fixed wait between a closed or failed connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Keepalive ping period; `None` disables pings.
    pub ping_interval: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
        }
    }
}

impl ChannelOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            ping_interval: config.ping_interval(),
        }
    }
}

/// Subscription intent and connection state, guarded together so a change
/// is either sent on the open connection or left for the next connect.
struct Intent {
    subscriptions: SubscriptionSet,
    state: ConnectionState,
}

/// Cloneable handle for declaring interest and observing connectivity.
#[derive(Clone)]
pub struct LiveHandle {
    intent: Arc<Mutex<Intent>>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl LiveHandle {
    pub fn subscribe_to_service(&self, service_id: &str) {
        self.update(Topic::Service, service_id, true);
    }

    pub fn unsubscribe_from_service(&self, service_id: &str) {
        self.update(Topic::Service, service_id, false);
    }

    pub fn subscribe_to_environment(&self, environment_id: &str) {
        self.update(Topic::Environment, environment_id, true);
    }

    pub fn unsubscribe_from_environment(&self, environment_id: &str) {
        self.update(Topic::Environment, environment_id, false);
    }

    fn update(&self, topic: Topic, id: &str, subscribe: bool) {
        let mut guard = self.intent.lock();
        let intent = &mut *guard;
        let changed = if subscribe {
            intent.subscriptions.insert(topic, id)
        } else {
            intent.subscriptions.remove(topic, id)
        };
        if !changed {
            return;
        }

        if intent.state == ConnectionState::Connected {
            let msg = if subscribe {
                ClientMessage::subscribe(topic, id)
            } else {
                ClientMessage::unsubscribe(topic, id)
            };
            let _ = self.outbound_tx.send(msg);
        } else {
            tracing::debug!(?topic, id, subscribe, "subscription change deferred until connected");
        }
    }

    /// Current subscription intent.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.intent.lock().subscriptions.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver notified on every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// A persistent, self-reconnecting push connection.
///
/// Spawns a tokio task that owns the transport and the reconnect timer:
/// - Connects through the [`Connector`]; on success re-announces every
///   subscription, then forwards subscription changes and keepalive pings
///   while relaying status updates to the receiver returned by [`spawn`].
/// - On close, transport error or failed connect: marks the channel
///   disconnected and retries after the fixed reconnect delay, forever.
/// - Stops on [`shutdown`] or when the `LiveChannel` is dropped.
///
/// [`spawn`]: LiveChannel::spawn
/// [`shutdown`]: LiveChannel::shutdown
pub struct LiveChannel {
    handle: LiveHandle,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LiveChannel {
    pub fn spawn<C: Connector>(
        connector: C,
        options: ChannelOptions,
    ) -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let intent = Arc::new(Mutex::new(Intent {
            subscriptions: SubscriptionSet::new(),
            state: ConnectionState::Disconnected,
        }));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            connector,
            intent: intent.clone(),
            outbound_rx,
            events_tx,
            state_tx,
            options,
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        let channel = Self {
            handle: LiveHandle {
                intent,
                outbound_tx,
                state_rx,
            },
            shutdown_tx,
            task,
        };
        (channel, events_rx)
    }

    pub fn handle(&self) -> LiveHandle {
        self.handle.clone()
    }

    /// Signal the channel task to close the connection and stop retrying.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the channel task to complete. Consumes the channel.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl std::ops::Deref for LiveChannel {
    type Target = LiveHandle;

    fn deref(&self) -> &LiveHandle {
        &self.handle
    }
}

enum ConnectionEnd {
    Closed,
    Failed(ChannelError),
    Shutdown,
}

struct Worker<C> {
    connector: C,
    intent: Arc<Mutex<Intent>>,
    outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events_tx: mpsc::UnboundedSender<StatusUpdate>,
    state_tx: watch::Sender<ConnectionState>,
    options: ChannelOptions,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                _ = self.shutdown_rx.changed() => break,
            };

            match attempt {
                Ok(transport) => {
                    let end = self.serve(transport).await;
                    self.mark_disconnected();
                    match end {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Closed => tracing::warn!("live channel closed by server"),
                        ConnectionEnd::Failed(e) => {
                            tracing::warn!(error = %e, "live channel connection lost")
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "live channel connect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            let delay = self.options.reconnect_delay.max(MIN_RECONNECT_DELAY);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("live channel stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let mut intent = self.intent.lock();
        intent.state = state;
        self.state_tx.send_replace(state);
    }

    fn mark_disconnected(&mut self) {
        self.set_state(ConnectionState::Disconnected);
        // Leftovers were meant for the closed connection; the next connect
        // announces the full set instead.
        while self.outbound_rx.try_recv().is_ok() {}
    }

    async fn serve(&mut self, transport: Transport) -> ConnectionEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        let announcements = {
            let mut intent = self.intent.lock();
            intent.state = ConnectionState::Connected;
            self.state_tx.send_replace(ConnectionState::Connected);
            intent.subscriptions.announcements()
        };
        tracing::info!(subscriptions = announcements.len(), "live channel connected");

        for msg in announcements {
            if let Err(e) = sink.send(msg.to_json()).await {
                return ConnectionEnd::Failed(e);
            }
        }

        let mut ping = self.options.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => handle_inbound(&self.events_tx, &text),
                    Some(Err(e)) => {
                        let _ = sink.close().await;
                        return ConnectionEnd::Failed(e);
                    }
                    None => return ConnectionEnd::Closed,
                },
                Some(msg) = self.outbound_rx.recv() => {
                    if let Err(e) = sink.send(msg.to_json()).await {
                        return ConnectionEnd::Failed(e);
                    }
                }
                _ = next_tick(&mut ping) => {
                    if let Err(e) = sink.send(ClientMessage::Ping.to_json()).await {
                        return ConnectionEnd::Failed(e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            }
        }
    }
}

/// Next tick of `interval`, or never when there is none.
pub(crate) async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn handle_inbound(events_tx: &mpsc::UnboundedSender<StatusUpdate>, text: &str) {
    let msg = match ServerMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed live message");
            return;
        }
    };

    match msg.kind {
        ServerMessageKind::StatusUpdate => match msg.status_update() {
            Some(update) => {
                let _ = events_tx.send(update);
            }
            None => tracing::debug!("dropping status update with missing fields"),
        },
        ServerMessageKind::Subscribed => tracing::debug!(
            service = ?msg.service_id,
            environment = ?msg.environment_id,
            "subscription confirmed"
        ),
        ServerMessageKind::Pong => tracing::trace!("pong"),
    }
}
