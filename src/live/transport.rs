//! Transports the live channel can run over.
//!
//! A [`Connector`] opens one connection per call. The channel only sees text
//! frames; control frames (ping/pong/close) stay inside the transport.

use futures::future;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use super::ChannelError;

pub type TextSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type TextStream = BoxStream<'static, Result<String, ChannelError>>;

/// One open connection: outbound text sink and inbound text stream. The
/// stream ends when the peer closes.
pub struct Transport {
    pub sink: TextSink,
    pub stream: TextStream,
}

/// Opens connections to the push endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Transport, ChannelError>> + Send;
}

/// Derive the push-channel URL from the HTTP base URL: `http` becomes `ws`,
/// `https` becomes `wss`.
pub fn ws_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}{}", rest, path)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}{}", rest, path)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        format!("{}{}", base, path)
    } else {
        format!("ws://{}{}", base, path)
    }
}

/// WebSocket connector with an optional bearer token.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    token: Option<String>,
}

impl WsConnector {
    pub fn new(base_url: &str, path: &str, token: Option<String>) -> Self {
        Self {
            url: ws_url(base_url, path),
            token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, ChannelError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (sink, stream) = ws.split();

        let sink = sink.with(|text: String| {
            future::ready(Ok::<_, ChannelError>(Message::Text(text.into())))
        });
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(Ok(String::from_utf8_lossy(&data).into_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}
