//! Rate-limited work queue of reconciliation keys.
//!
//! Guarantees the reconciler relies on:
//!
//! - a key added while already pending is delivered once;
//! - a key added while in flight is delivered again after [`WorkQueue::done`],
//!   never to two workers at once;
//! - failed keys come back after a per-key exponential backoff, reset by
//!   [`WorkQueue::forget`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use polsync_events::KeySink;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Calculate exponential backoff duration.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Per-key exponential backoff.
#[derive(Debug)]
pub struct ItemBackoff {
    base: Duration,
    max: Duration,
    failures: DashMap<String, u32>,
}

impl ItemBackoff {
    /// Backoff starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying.
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        let delay = calculate_backoff(*failures, self.base, self.max);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |f| *f)
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &str) {
        self.failures.remove(key);
    }
}

impl Default for ItemBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Deduplicating, rate-limited queue of keys.
pub struct WorkQueue {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    backoff: ItemBackoff,
    waiting: AtomicUsize,
}

impl WorkQueue {
    /// Create a named queue with the given backoff.
    pub fn new(name: impl Into<String>, backoff: ItemBackoff) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            backoff,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `key` as needing reconciliation.
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            // Redelivered by `done`.
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);

        trace!(queue = %self.name, key, "Key added");
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
            queue.waiting.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Requeue a failed key after its backoff.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.backoff.when(key);
        debug!(queue = %self.name, key, delay = ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key returned by [`WorkQueue::get`].
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the backoff of `key` after a success.
    pub fn forget(&self, key: &str) {
        self.backoff.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.backoff.num_requeues(key)
    }

    /// Keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is waiting for a worker.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Whether nothing is queued, in flight or waiting out a backoff.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty()
            && state.processing.is_empty()
            && self.waiting.load(Ordering::SeqCst) == 0
    }

    /// Stop handing out keys. Workers blocked in [`WorkQueue::get`] return
    /// `None`; keys already handed out are unaffected.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        debug!(queue = %self.name, "Queue shutting down");
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

impl KeySink for WorkQueue {
    fn enqueue(&self, key: &str) {
        self.add(key);
    }
}
