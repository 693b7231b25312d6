/// Listener registry for session transitions
///
/// Listeners are invoked synchronously, in registration order, after a
/// transition has been stored. The registry lock is never held while a
/// listener runs, so listeners may subscribe or unsubscribe (themselves
/// included) from inside a callback:
///
/// - a listener removed mid-notification is not called again, not even for
///   the event currently being delivered
/// - a listener added mid-notification first hears the next event
///
/// A panicking listener is logged and skipped; the remaining listeners still
/// receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::SessionEvent;

/// Callback invoked on every session transition
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(ListenerRegistry::default())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners().push((id, listener));

        Subscription {
            id,
            registry: Arc::downgrade(self),
            active: true,
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() < before
    }

    fn contains(&self, id: u64) -> bool {
        self.listeners().iter().any(|(listener_id, _)| *listener_id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners().len()
    }

    /// Delivers `event` to every registered listener
    pub(crate) fn notify(&self, event: &SessionEvent) {
        let snapshot: Vec<(u64, Listener)> = self.listeners().clone();

        for (id, listener) in snapshot {
            if !self.contains(id) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)));
            if outcome.is_err() {
                tracing::error!(
                    listener_id = id,
                    event = %event.kind,
                    "Session listener panicked"
                );
            }
        }
    }
}

/// Handle for a registered session listener
///
/// The listener is removed exactly once: by [`Subscription::unsubscribe`],
/// or when the handle is dropped.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
    active: bool,
}

impl Subscription {
    /// Listener ID, unique per session manager
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
