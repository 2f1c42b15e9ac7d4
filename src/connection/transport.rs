use super::endpoint::Endpoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

/// Outbound half of a live link: text frames in call order
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Inbound half of a live link. The stream ending means the peer closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One established transport connection
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Something that can open a text-frame connection to an endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link> {
        let (ws_stream, response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(endpoint.as_str()),
        )
        .await
        .with_context(|| {
            format!("Connection to {} timed out after {:?}", endpoint, self.connect_timeout)
        })?
        .with_context(|| format!("Failed to connect to {}", endpoint))?;

        debug!(endpoint = %endpoint, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| {
                future::ready(Ok::<Message, tungstenite::Error>(Message::Text(text.into())))
            })
            .sink_map_err(anyhow::Error::from);

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(Ok(String::from_utf8_lossy(&data).into_owned())),
                // Ping/pong are answered by tungstenite; close is followed by end of stream
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
