use super::Hub;
use crate::subscription::protocol::{ControlFrame, DataFrame};
use axum::extract::ws::{Message, WebSocket};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Server side of a single client connection and its topic subscriptions
pub struct Session {
    /// Topics this connection is subscribed to
    topics: HashSet<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            topics: HashSet::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(mut self, mut socket: WebSocket, hub: Arc<Hub>) {
        let mut publications = hub.subscribe();
        let _connection = hub.track_connection();
        info!(connections = hub.connection_count(), "WebSocket connection established");

        loop {
            tokio::select! {
                // Control frames from the client
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.apply_control_frame(&text) {
                                warn!(error = %e, "Ignoring malformed control frame");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                // Publications fanned out by the hub
                result = publications.recv() => {
                    match result {
                        Ok(frame) => {
                            if self.wants(&frame) {
                                if let Err(e) = forward(&mut socket, &frame).await {
                                    error!(error = %e, "Failed to forward publication");
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "WebSocket lagged, skipped publications");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            error!("Hub publication channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(topics = self.topics.len(), "WebSocket connection closed");
    }

    /// Apply a subscribe/unsubscribe frame to this connection's topic set
    fn apply_control_frame(&mut self, text: &str) -> anyhow::Result<()> {
        let frame: ControlFrame = serde_json::from_str(text)?;

        match frame {
            ControlFrame::Subscribe(topic) => {
                debug!(topic = %topic, "Client subscribed to topic");
                self.topics.insert(topic);
            }
            ControlFrame::Unsubscribe(topic) => {
                debug!(topic = %topic, "Client unsubscribed from topic");
                self.topics.remove(&topic);
            }
        }

        Ok(())
    }

    /// Forward only publications labelled with a subscribed topic
    fn wants(&self, frame: &DataFrame) -> bool {
        frame.labels.iter().any(|label| self.topics.contains(label))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward(socket: &mut WebSocket, frame: &DataFrame) -> anyhow::Result<()> {
    let json = serde_json::to_string(frame)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn frame(labels: &[&str]) -> DataFrame {
        DataFrame::new(labels.iter().map(|l| l.to_string()).collect(), Map::new())
    }

    #[test]
    fn test_new_session_wants_nothing() {
        let session = Session::new();
        assert!(!session.wants(&frame(&["jobs"])));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut session = Session::new();
        session.apply_control_frame(r#"{"subscribe":"jobs"}"#).unwrap();
        assert!(session.wants(&frame(&["other", "jobs"])));
        assert!(!session.wants(&frame(&["other"])));

        session.apply_control_frame(r#"{"unsubscribe":"jobs"}"#).unwrap();
        assert!(!session.wants(&frame(&["jobs"])));
    }

    #[test]
    fn test_malformed_control_frame_is_rejected() {
        let mut session = Session::new();
        assert!(session.apply_control_frame("not json").is_err());
        assert!(session.apply_control_frame(r#"{"type":"subscribe"}"#).is_err());
        assert!(session.topics.is_empty());
    }
}
