//! The command/result bus between external callers and the engine loop.
//!
//! Many threads submit; exactly one loop drains. A submission is paired
//! with a monotonically increasing call id, and its eventual result is
//! polled by that id: fetching never blocks, it answers
//! [`FetchOutcome::NotYetAvailable`] until the loop has written a value.
//! One mutex around the queue and the result map is the only shared
//! mutable state in the whole engine.
//!
//! A result, once written, is immutable. After its first observed read it
//! retires into the retention cache, so memory is reclaimed only for
//! values some caller has actually seen.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::conf::Retention;
use crate::error::bus::{BusError, Result};
use crate::CallId;

/// A submitted command waiting for the loop.
#[derive(Debug)]
pub struct PendingCommand<T> {
    pub call_id: CallId,
    pub payload: T,
}

/// What a poll for a result observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Work is incomplete (or the value has been reclaimed); poll again.
    /// A sentinel, not an error.
    NotYetAvailable,
    Ready(String),
}

struct Inner<T> {
    next_call_id: CallId,
    queue: VecDeque<PendingCommand<T>>,
    /// Completed results no fetch has observed yet. Never evicted.
    unread: HashMap<CallId, String>,
    /// Results at least one fetch has observed, kept per the retention
    /// policy. `None` means keep-all and values simply stay in `unread`.
    read: Option<LruCache<CallId, String>>,
    stopped: bool,
}

pub struct CommandBus<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> CommandBus<T> {
    pub fn new(retention: Retention) -> Self {
        let read = match retention {
            Retention::KeepAll => None,
            Retention::Recent(cap) => Some(LruCache::new(cap)),
        };
        CommandBus {
            inner: Mutex::new(Inner {
                next_call_id: 1,
                queue: VecDeque::new(),
                unread: HashMap::new(),
                read,
                stopped: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // a panic mid-update cannot leave the queue or map half-written,
        // every mutation is a single container op, so poison is harmless
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a command and returns its call id. Never blocks beyond
    /// the queue lock. Fails once the engine loop has terminated.
    pub fn submit(&self, payload: T) -> Result<CallId> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(BusError::EngineStopped);
        }
        let call_id = inner.next_call_id;
        inner.next_call_id += 1;
        inner.queue.push_back(PendingCommand { call_id, payload });
        Ok(call_id)
    }

    /// Polls for a result. Safe to call concurrently and repeatedly for
    /// the same id.
    pub fn fetch_result(&self, call_id: CallId) -> FetchOutcome {
        let mut inner = self.lock();
        if let Some(value) = inner.read.as_mut().and_then(|lru| lru.get(&call_id)) {
            return FetchOutcome::Ready(value.clone());
        }
        if inner.read.is_some() {
            // first observed read retires the value into the cache
            match inner.unread.remove(&call_id) {
                Some(value) => {
                    if let Some(lru) = inner.read.as_mut() {
                        lru.put(call_id, value.clone());
                    }
                    FetchOutcome::Ready(value)
                }
                None => FetchOutcome::NotYetAvailable,
            }
        } else {
            // keep-all: values stay where they are
            match inner.unread.get(&call_id) {
                Some(value) => FetchOutcome::Ready(value.clone()),
                None => FetchOutcome::NotYetAvailable,
            }
        }
    }

    /// Takes every queued command, in submission order. Loop side.
    pub fn drain(&self) -> Vec<PendingCommand<T>> {
        let mut inner = self.lock();
        inner.queue.drain(..).collect()
    }

    /// Writes a command's result. Loop side; a result is written exactly
    /// once per call id.
    pub fn complete(&self, call_id: CallId, result: impl Into<String>) {
        let mut inner = self.lock();
        inner.unread.insert(call_id, result.into());
    }

    /// Marks the bus stopped and returns whatever was still queued, so
    /// the loop can answer those commands on its way out. Results stay
    /// fetchable; only submission is refused from here on.
    pub fn close(&self) -> Vec<PendingCommand<T>> {
        let mut inner = self.lock();
        inner.stopped = true;
        inner.queue.drain(..).collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    fn bus() -> CommandBus<&'static str> {
        CommandBus::new(Retention::KeepAll)
    }

    #[test]
    fn test_call_ids_are_monotonic() {
        let bus = bus();
        let a = bus.submit("a").unwrap();
        let b = bus.submit("b").unwrap();
        let c = bus.submit("c").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_fetch_before_completion_is_not_yet_available() {
        let bus = bus();
        let id = bus.submit("work").unwrap();
        assert_eq!(bus.fetch_result(id), FetchOutcome::NotYetAvailable);
        assert_eq!(bus.fetch_result(id), FetchOutcome::NotYetAvailable);
    }

    #[test]
    fn test_result_is_stable_across_fetches() {
        let bus = bus();
        let id = bus.submit("work").unwrap();
        bus.complete(id, "done");
        for _ in 0..3 {
            assert_eq!(bus.fetch_result(id), FetchOutcome::Ready("done".into()));
        }
    }

    #[test]
    fn test_drain_preserves_submission_order() {
        let bus = bus();
        bus.submit("first").unwrap();
        bus.submit("second").unwrap();
        let drained = bus.drain();
        let payloads: Vec<_> = drained.iter().map(|c| c.payload).collect();
        assert_eq!(payloads, vec!["first", "second"]);
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn test_submit_after_close_fails() {
        let bus = bus();
        bus.submit("late").unwrap();
        let leftovers = bus.close();
        assert_eq!(leftovers.len(), 1);
        assert!(matches!(bus.submit("nope"), Err(BusError::EngineStopped)));
    }

    #[test]
    fn test_results_stay_fetchable_after_close() {
        let bus = bus();
        let id = bus.submit("work").unwrap();
        bus.complete(id, "done");
        bus.close();
        assert_eq!(bus.fetch_result(id), FetchOutcome::Ready("done".into()));
    }

    #[test]
    fn test_retention_evicts_only_observed_results() {
        let bus: CommandBus<&str> =
            CommandBus::new(Retention::Recent(NonZeroUsize::new(1).unwrap()));
        let a = bus.submit("a").unwrap();
        let b = bus.submit("b").unwrap();
        bus.complete(a, "ra");
        bus.complete(b, "rb");

        // neither has been read; both must still be there
        assert_eq!(bus.fetch_result(a), FetchOutcome::Ready("ra".into()));
        assert_eq!(bus.fetch_result(b), FetchOutcome::Ready("rb".into()));
        // reading `b` evicted the already-observed `a`
        assert_eq!(bus.fetch_result(a), FetchOutcome::NotYetAvailable);
        assert_eq!(bus.fetch_result(b), FetchOutcome::Ready("rb".into()));
    }

    #[test]
    fn test_concurrent_fetches_do_not_lose_the_value() {
        let bus = Arc::new(CommandBus::<&'static str>::new(Retention::Recent(
            NonZeroUsize::new(4).unwrap(),
        )));
        let id = bus.submit("work").unwrap();
        bus.complete(id, "done");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bus = Arc::clone(&bus);
                std::thread::spawn(move || bus.fetch_result(id))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), FetchOutcome::Ready("done".into()));
        }
    }
}
