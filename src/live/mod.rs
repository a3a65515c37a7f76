//! Live status channel: one reconnecting push connection plus the client's
//! subscription intent.

mod channel;
#[cfg(test)]
pub(crate) mod memory;
pub mod subscriptions;
pub mod transport;

pub use channel::{ChannelOptions, ConnectionState, LiveChannel, LiveHandle};
pub(crate) use channel::next_tick;
pub use subscriptions::SubscriptionSet;
pub use transport::{ws_url, Connector, Transport, WsConnector};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid connection request: {0}")]
    InvalidRequest(String),

    #[error("connection refused")]
    Refused,

    #[error("connection closed")]
    Closed,
}
