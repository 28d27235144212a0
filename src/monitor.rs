//! Connection-health state shared by every request issued through a client.
//!
//! [`ConnectionMonitor`] is a cheap, cloneable handle. All clones observe and
//! publish the same [`ConnectionState`]. Only the client's retry engine and
//! [`ConnectionMonitor::reset`] write to it; everyone else reads snapshots or
//! subscribes.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// Snapshot of connection health.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_retrying: bool,
    /// Attempts made for the current failing call sequence.
    pub retry_count: u32,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
}

impl ConnectionState {
    pub fn healthy() -> Self {
        Self {
            is_connected: true,
            is_retrying: false,
            retry_count: 0,
            last_error: None,
            last_error_message: None,
        }
    }

    /// Terminal failure of the last call sequence: not connected, not retrying.
    pub fn is_failed(&self) -> bool {
        !self.is_connected && !self.is_retrying
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::healthy()
    }
}

type Callback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

struct Inner {
    state: ConnectionState,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

/// Shared owner of the [`ConnectionState`] and its subscriber list.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionMonitor")
            .field("state", &inner.state)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    /// Creates a monitor in the healthy state with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::healthy(),
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Registers `callback` to receive a snapshot after every state mutation.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Forces the healthy state without touching the network.
    pub fn reset(&self) {
        self.mutate(|state| *state = ConnectionState::healthy());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub(crate) fn record_success(&self) {
        self.mutate(|state| *state = ConnectionState::healthy());
    }

    /// A retryable failure; another attempt follows after the backoff.
    pub(crate) fn record_retry(&self, retry_count: u32, kind: ErrorKind, message: String) {
        self.mutate(|state| {
            *state = ConnectionState {
                is_connected: false,
                is_retrying: true,
                retry_count,
                last_error: Some(kind),
                last_error_message: Some(message),
            };
        });
    }

    /// Terminal failure of a call sequence; `retry_count` stays at the last
    /// attempted value.
    pub(crate) fn record_failure(&self, retry_count: u32, kind: ErrorKind, message: String) {
        self.mutate(|state| {
            *state = ConnectionState {
                is_connected: false,
                is_retrying: false,
                retry_count,
                last_error: Some(kind),
                last_error_message: Some(message),
            };
        });
    }

    /// Outcome of a health check. Leaves the retry bookkeeping alone.
    pub(crate) fn record_health_check(&self, failure: Option<ErrorKind>) {
        self.mutate(|state| match failure {
            None => {
                state.is_connected = true;
                state.last_error = None;
                state.last_error_message = None;
            }
            Some(kind) => {
                state.is_connected = false;
                state.last_error = Some(kind);
                state.last_error_message = Some(kind.user_message().to_owned());
            }
        });
    }

    fn mutate(&self, apply: impl FnOnce(&mut ConnectionState)) {
        let (snapshot, callbacks) = {
            let mut inner = self.lock();
            apply(&mut inner.state);
            let callbacks: Vec<Callback> = inner
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            (inner.state.clone(), callbacks)
        };
        // Callbacks run outside the lock so they may read state or unsubscribe.
        for callback in callbacks {
            callback(&snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panicking subscriber never holds the lock, so poisoning carries no
    // torn state.
    inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`ConnectionMonitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    monitor: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Deregisters the callback. Calling it more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.monitor.upgrade() {
            lock_inner(&inner)
                .subscribers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
