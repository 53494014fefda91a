//! Deduplication of concurrent loads of the same key.
//!
//! The first caller for a key becomes the leader and holds a [`FlightGuard`]
//! while it loads. Later callers wait until the guard is dropped, then look
//! the key up again. The guard clears the entry on drop, so a leader whose
//! task is aborted mid-load releases its followers instead of stranding them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Keys currently being loaded, each with the notifier of its leader.
pub(crate) struct SingleFlight<K> {
    in_flight: Mutex<HashMap<K, Arc<Notify>>>,
}

/// Outcome of [`SingleFlight::join`].
pub(crate) enum Flight<'a, K: Hash + Eq + Copy> {
    /// The caller loads the key; followers are released when this drops.
    Leader(FlightGuard<'a, K>),
    /// Another caller is loading the key.
    Follower(Arc<Notify>),
}

/// Held by the leader of a key for the duration of its load.
pub(crate) struct FlightGuard<'a, K: Hash + Eq + Copy> {
    flight: &'a SingleFlight<K>,
    key: K,
    notify: Arc<Notify>,
}

impl<K: Hash + Eq + Copy> SingleFlight<K> {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    // The map is only touched in short synchronous sections, never across an
    // await, so a poisoned lock still holds a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<Notify>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the leader for `key`, or learn who is.
    pub(crate) fn join(&self, key: K) -> Flight<'_, K> {
        let mut in_flight = self.lock();
        if let Some(notify) = in_flight.get(&key) {
            return Flight::Follower(notify.clone());
        }

        let notify = Arc::new(Notify::new());
        in_flight.insert(key, notify.clone());
        Flight::Leader(FlightGuard {
            flight: self,
            key,
            notify,
        })
    }

    /// Wait until the leader holding `notify` for `key` has finished.
    ///
    /// Returns immediately if that leader is already gone.
    pub(crate) async fn wait(&self, key: K, notify: Arc<Notify>) {
        // A `Notified` sees every `notify_waiters` issued after its creation,
        // so checking the map once it exists cannot miss the wakeup.
        let waiter = notify.notified();
        let still_loading = self
            .lock()
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &notify));
        if still_loading {
            waiter.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

impl<K: Hash + Eq + Copy> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Copy> Drop for FlightGuard<'_, K> {
    fn drop(&mut self) {
        self.flight.lock().remove(&self.key);
        self.notify.notify_waiters();
    }
}
