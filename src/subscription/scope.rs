use super::registry::SubscriptionHandle;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct ScopeState {
    handles: Vec<SubscriptionHandle>,
    torn_down: bool,
}

/// Teardown signal for subscriptions owned by some enclosing lifetime
///
/// Handles adopted by the scope are closed when [`Scope::teardown`] runs or
/// when the scope is dropped, whichever happens first.
#[derive(Default)]
pub struct Scope {
    state: Mutex<ScopeState>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close `handle` at teardown. A scope that is already torn down closes
    /// it immediately.
    pub fn adopt(&self, handle: SubscriptionHandle) {
        let mut state = self.state.lock();
        if state.torn_down {
            drop(state);
            handle.close();
            return;
        }

        state.handles.retain(|h| !h.is_closed());
        state.handles.push(handle);
    }

    pub fn teardown(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.torn_down = true;
            std::mem::take(&mut state.handles)
        };

        if !handles.is_empty() {
            debug!(count = handles.len(), "Scope torn down, closing subscriptions");
        }
        for handle in handles {
            handle.close();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    /// Number of adopted handles still open
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .handles
            .iter()
            .filter(|h| !h.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.teardown();
    }
}
