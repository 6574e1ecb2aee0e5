//! Background resolution with mutual exclusion and no lost wakeups.
//!
//! `signal_change` either hands the change to the running resolver (by
//! setting the pending flag) or spawns a resolver, and both decisions are
//! made under the same lock the resolver takes to decide whether to exit.
//! Whichever side gets the lock first, a signal is never dropped: either
//! the resolver sees the flag and loops again, or the signaller sees the
//! resolver gone and spawns a new one.

use crate::error::{lock, shield, CallbackOrigin, ErrorSink};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// One resolution attempt. Returns `true` once no immediate further work is
/// available ("stable").
pub trait Resolve: Send + Sync + 'static {
    fn try_solve(&self) -> bool;
}

impl<F> Resolve for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn try_solve(&self) -> bool {
        self()
    }
}

/// Whether a resolver is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Resolving,
}

struct RunState {
    resolving: bool,
    pending: bool,
    dead: bool,
    /// Thread of the running resolver, if any.
    thread: Option<ThreadId>,
    episodes: u64,
}

struct Shared {
    label: String,
    sink: Option<ErrorSink>,
    resolver: Box<dyn Resolve>,
    run: Mutex<RunState>,
    settled: Condvar,
}

/// Runs at most one background resolver at a time for its owner.
///
/// # Example
///
/// ```rust
/// use convergent::worker::ConvergenceWorker;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let remaining = Arc::new(AtomicU32::new(3));
/// let work = Arc::clone(&remaining);
/// let worker = ConvergenceWorker::new("countdown", move || {
///     // Unstable until the counter reaches zero.
///     work.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
///         .is_err()
/// });
///
/// worker.signal_change();
/// assert!(worker.block_until_resolved(None));
/// assert_eq!(remaining.load(Ordering::SeqCst), 0);
/// ```
pub struct ConvergenceWorker {
    shared: Arc<Shared>,
}

impl ConvergenceWorker {
    pub fn new<R: Resolve>(label: impl Into<String>, resolver: R) -> Self {
        Self::with_error_sink(label, resolver, None)
    }

    pub fn with_error_sink<R: Resolve>(
        label: impl Into<String>,
        resolver: R,
        sink: Option<ErrorSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                sink,
                resolver: Box::new(resolver),
                run: Mutex::new(RunState {
                    resolving: false,
                    pending: false,
                    dead: false,
                    thread: None,
                    episodes: 0,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Record a change and make sure a resolver will observe it.
    pub fn signal_change(&self) {
        let mut run = lock(&self.shared.run);
        if run.dead {
            return;
        }
        run.pending = true;
        if run.resolving {
            return;
        }

        run.pending = false;
        run.resolving = true;
        run.episodes += 1;
        let episode = run.episodes;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("resolve:{}", self.shared.label))
            .spawn(move || shared.resolve(episode));
        match spawned {
            Ok(handle) => run.thread = Some(handle.thread().id()),
            Err(error) => {
                run.resolving = false;
                self.shared.settled.notify_all();
                tracing::warn!(
                    label = %self.shared.label,
                    error = %error,
                    "failed to spawn resolver"
                );
            }
        }
    }

    /// Block until no resolver runs, or until `timeout` elapses.
    ///
    /// Returns whether the worker is resolved. Timing out abandons only the
    /// caller's wait. Called from the resolver itself it returns `false`
    /// immediately instead of waiting on its own exit.
    pub fn block_until_resolved(&self, timeout: Option<Duration>) -> bool {
        let run = lock(&self.shared.run);
        if run.resolving && run.thread == Some(thread::current().id()) {
            tracing::warn!(
                label = %self.shared.label,
                "block_until_resolved called from the resolver thread"
            );
            return false;
        }
        match timeout {
            None => {
                let _run = self
                    .shared
                    .settled
                    .wait_while(run, |r| r.resolving)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (run, _) = self
                    .shared
                    .settled
                    .wait_timeout_while(run, timeout, |r| r.resolving)
                    .unwrap_or_else(PoisonError::into_inner);
                !run.resolving
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        !lock(&self.shared.run).resolving
    }

    pub fn phase(&self) -> RunPhase {
        if self.is_resolved() {
            RunPhase::Idle
        } else {
            RunPhase::Resolving
        }
    }

    /// Number of resolution episodes started so far.
    pub fn episodes(&self) -> u64 {
        lock(&self.shared.run).episodes
    }

    /// The running episode, if the calling thread is its resolver.
    pub fn current_episode(&self) -> Option<u64> {
        let run = lock(&self.shared.run);
        (run.resolving && run.thread == Some(thread::current().id())).then_some(run.episodes)
    }

    /// Refuse further signals and wait for an in-flight resolution to end.
    ///
    /// The resolver finishes its current attempt; later attempts report
    /// stable without calling the owner. Irreversible.
    pub fn stop(&self) {
        let mut run = lock(&self.shared.run);
        run.dead = true;
        run.pending = false;
        if run.thread == Some(thread::current().id()) {
            return;
        }
        let _run = self
            .shared
            .settled
            .wait_while(run, |r| r.resolving)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.shared.run).dead
    }
}

impl Shared {
    fn resolve(&self, episode: u64) {
        tracing::debug!(label = %self.label, episode, "resolution started");
        let mut attempts = 0u64;
        loop {
            loop {
                attempts += 1;
                if self.attempt() {
                    break;
                }
            }

            let mut run = lock(&self.run);
            if run.pending {
                run.pending = false;
                continue;
            }
            run.resolving = false;
            run.thread = None;
            self.settled.notify_all();
            break;
        }
        tracing::debug!(label = %self.label, episode, attempts, "resolution settled");
    }

    fn attempt(&self) -> bool {
        if lock(&self.run).dead {
            return true;
        }
        // A panicking resolver counts as stable so the episode can end.
        shield(
            CallbackOrigin::Transition,
            &self.label,
            self.sink.as_ref(),
            || self.resolver.try_solve(),
        )
        .unwrap_or(true)
    }
}
