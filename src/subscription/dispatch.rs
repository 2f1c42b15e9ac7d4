use super::protocol::Payload;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Future returned by a subscription handler
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Callback invoked with the payload of every matching inbound frame
pub type Handler = Arc<dyn Fn(Payload) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Holds the `running` flag for the lifetime of one invocation.
///
/// Released on drop, so completion, error return and panic all clear it.
struct RunningGuard {
    running: Arc<AtomicBool>,
}

impl RunningGuard {
    fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                running: Arc::clone(running),
            })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Per-subscription handler invocation with optional non-overlap guarantee
pub(crate) struct Dispatcher {
    topic: String,
    handler: Handler,
    serialized: bool,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub(crate) fn new(topic: String, handler: Handler, serialized: bool) -> Self {
        Self {
            topic,
            handler,
            serialized,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invoke the handler and drive the returned future on its own task.
    ///
    /// Returns false if the payload was dropped because a serialized
    /// invocation is still in flight.
    pub(crate) fn dispatch(&self, payload: Payload) -> bool {
        let guard = if self.serialized {
            match RunningGuard::acquire(&self.running) {
                Some(guard) => Some(guard),
                None => {
                    debug!(topic = %self.topic, "Handler still running, dropping message");
                    return false;
                }
            }
        } else {
            None
        };

        // Entered on the caller's task: invocations start in arrival order
        let invocation = match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(payload))) {
            Ok(invocation) => invocation,
            Err(_) => {
                warn!(topic = %self.topic, "Subscription handler panicked");
                return true;
            }
        };

        let topic = self.topic.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = invocation.await {
                warn!(topic = %topic, error = %e, "Subscription handler failed");
            }
        });

        true
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests;
