use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::AuthError;

/// Outcome of an authorization attempt, delivered to subscribers
#[derive(Debug)]
pub enum AuthEvent {
    /// Tokens were obtained and the session store is authenticated
    Authenticated,
    /// The attempt ended without tokens (timeout or failed exchange)
    Failed(AuthError),
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<E>)>>,
}

/// Observer set with unsubscribe handles.
///
/// Callbacks run outside the internal lock, so a callback may subscribe or
/// unsubscribe (itself included) without deadlocking.
pub struct Subscribers<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<E: 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.callbacks.lock().push((id, Arc::new(callback)));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Mutex::new(Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.callbacks.lock().retain(|(other, _)| *other != id);
                }
            }))),
        }
    }

    /// Deliver `event` to every subscriber registered at the time of the call
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .registry
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by a subscribe call.
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing twice is a no-op.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.lock().is_some())
            .finish()
    }
}
