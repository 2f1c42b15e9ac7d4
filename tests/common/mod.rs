// Shared helpers: in-memory transport and handler recorders

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc as link_channel;
use futures::{SinkExt, StreamExt};
use livewire::connection::{Endpoint, Link, Transport};
use livewire::subscription::{handler, Handler, Payload};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub const WAIT: Duration = Duration::from_secs(5);

/// Server side of one in-memory link
pub struct ServerEnd {
    from_client: link_channel::UnboundedReceiver<String>,
    to_client: link_channel::UnboundedSender<Result<String>>,
}

impl ServerEnd {
    /// Deliver an inbound text frame to the client
    pub fn push(&self, text: &str) {
        self.to_client
            .unbounded_send(Ok(text.to_string()))
            .expect("client side of link is gone");
    }

    /// Fail the link with a transport error
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.unbounded_send(Err(anyhow!(reason.to_string())));
    }

    /// Next frame written by the client, parsed as JSON
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the link");
        serde_json::from_str(&text).expect("client frame is not JSON")
    }

    /// Frames already written by the client and not yet read
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(text)) = self.from_client.try_next() {
            frames.push(serde_json::from_str(&text).expect("client frame is not JSON"));
        }
        frames
    }
}

struct MockState {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    connect_delay_ms: AtomicU64,
    links: mpsc::UnboundedSender<ServerEnd>,
}

/// Transport whose links are channel pairs handed to the test
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (links, links_rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(MockState {
                attempts: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                connect_delay_ms: AtomicU64::new(0),
                links,
            }),
        };
        (transport, links_rx)
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let (client_tx, from_client) = link_channel::unbounded::<String>();
        let (to_client, client_rx) = link_channel::unbounded::<Result<String>>();
        let _ = self.state.links.send(ServerEnd {
            from_client,
            to_client,
        });

        Ok(Link {
            sink: Box::pin(client_tx.sink_map_err(anyhow::Error::from)),
            stream: Box::pin(client_rx),
        })
    }
}

pub async fn next_link(links: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, links.recv())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("transport dropped")
}

/// Handler that forwards every payload it sees to a channel
pub fn recorder() -> (Handler, mpsc::UnboundedReceiver<Payload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let h = handler(move |payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });
    (h, rx)
}

/// Recorder that parks each invocation until a permit is released
pub fn gated_recorder(gate: Arc<Semaphore>) -> (Handler, mpsc::UnboundedReceiver<Payload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let h = handler(move |payload| {
        let tx = tx.clone();
        let gate = Arc::clone(&gate);
        async move {
            let _ = tx.send(payload);
            gate.acquire().await?.forget();
            Ok::<(), anyhow::Error>(())
        }
    });
    (h, rx)
}

pub async fn next_payload(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for handler call")
        .expect("handler dropped")
}

/// Let spawned tasks and timers run for `ms` milliseconds
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
