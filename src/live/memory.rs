//! In-process transport for driving a live channel without a network.
//!
//! Every connect attempt is recorded. When the connector is accepting, the
//! attempt succeeds and the server end of the new connection is handed out
//! through the receiver returned by [`MemoryConnector::new`].

use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Connector, Transport};
use super::ChannelError;

struct MemoryState {
    accepting: bool,
    attempts: Vec<Instant>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    servers_tx: mpsc::UnboundedSender<MemoryServer>,
}

impl MemoryConnector {
    /// A connector that refuses connections until [`set_accepting`] is called.
    ///
    /// [`set_accepting`]: MemoryConnector::set_accepting
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryServer>) {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MemoryState {
                accepting: false,
                attempts: Vec::new(),
            })),
            servers_tx,
        };
        (connector, servers_rx)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    /// Instants of every connect attempt so far.
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Transport, ChannelError> {
        let accepting = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            state.accepting
        };
        if !accepting {
            return Err(ChannelError::Refused);
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, ChannelError>>();
        let server = MemoryServer {
            to_client: server_tx,
            from_client: server_rx,
        };
        if self.servers_tx.send(server).is_err() {
            return Err(ChannelError::Refused);
        }

        Ok(Transport {
            sink: Box::pin(client_tx.sink_map_err(|_| ChannelError::Closed)),
            stream: client_rx.boxed(),
        })
    }
}

/// Server end of one in-memory connection. Dropping it closes the
/// connection.
pub struct MemoryServer {
    to_client: fmpsc::UnboundedSender<Result<String, ChannelError>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl MemoryServer {
    /// Send a text frame to the client. Returns false once the client is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.unbounded_send(Ok(text.into())).is_ok()
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self) -> bool {
        self.to_client.unbounded_send(Err(ChannelError::Closed)).is_ok()
    }

    /// Next text frame sent by the client, or `None` once it disconnects.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    pub fn close(self) {}
}
