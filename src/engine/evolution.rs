//! The state evolution engine.

use super::strategy::{Goal, TransitionStrategy};
use crate::builder::EngineConfig;
use crate::core::{Condition, State, StateHistory, StateTransition};
use crate::error::{lock, ErrorSink, TimerError};
use crate::hooks::HookDispatcher;
use crate::timer::ConditionTimerSet;
use crate::worker::ConvergenceWorker;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Core<S: State, G> {
    state: S,
    goal: G,
    history: StateHistory<S>,
}

struct EngineInner<S: State + 'static, G: Goal> {
    id: Uuid,
    config: EngineConfig,
    strategy: Arc<dyn TransitionStrategy<S, G>>,
    core: Mutex<Core<S, G>>,
    timers: ConditionTimerSet<S>,
    hooks: HookDispatcher<S>,
    worker: ConvergenceWorker,
    dead: AtomicBool,
}

/// Drives a state toward a goal on a background worker.
///
/// `Engine` is a cheap handle; clones share one engine. The worker invokes
/// the strategy's `run_transition` until it reports stable, and every
/// `set_state` made along the way re-arms condition timers and dispatches
/// enter/exit hooks before the next attempt runs.
///
/// Dropping the last handle tears the engine down like [`Engine::stop`],
/// except that nothing blocks.
pub struct Engine<S: State + 'static, G: Goal> {
    inner: Arc<EngineInner<S, G>>,
}

impl<S: State + 'static, G: Goal> Clone for Engine<S, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A non-owning engine handle for use inside callbacks.
pub struct WeakEngine<S: State + 'static, G: Goal> {
    inner: Weak<EngineInner<S, G>>,
}

impl<S: State + 'static, G: Goal> Clone for WeakEngine<S, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S: State + 'static, G: Goal> WeakEngine<S, G> {
    pub fn upgrade(&self) -> Option<Engine<S, G>> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl<S: State + 'static, G: Goal> Engine<S, G> {
    pub(crate) fn assemble(
        initial: S,
        goal: G,
        strategy: Arc<dyn TransitionStrategy<S, G>>,
        config: EngineConfig,
        sink: Option<ErrorSink>,
    ) -> Self {
        let id = Uuid::new_v4();
        let label = config.label.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner<S, G>>| {
            let resolver = weak.clone();
            EngineInner {
                id,
                strategy,
                core: Mutex::new(Core {
                    state: initial.clone(),
                    goal,
                    history: StateHistory::with_limit(config.history_limit),
                }),
                timers: ConditionTimerSet::with_error_sink(
                    format!("{label}:timers"),
                    initial.clone(),
                    sink.clone(),
                ),
                hooks: HookDispatcher::with_error_sink(
                    format!("{label}:hooks"),
                    initial,
                    config.hook_dispatch,
                    sink.clone(),
                ),
                worker: ConvergenceWorker::with_error_sink(
                    label.clone(),
                    move || match resolver.upgrade() {
                        Some(inner) => Engine { inner }.try_solve(),
                        None => true,
                    },
                    sink,
                ),
                dead: AtomicBool::new(false),
                config,
            }
        });

        tracing::info!(engine = %id, label = %label, "engine started");
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakEngine<S, G> {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        lock(&self.inner.core).state.clone()
    }

    /// Snapshot of the current goal.
    pub fn goal(&self) -> G {
        lock(&self.inner.core).goal.clone()
    }

    /// Snapshot of the recorded transitions.
    pub fn history(&self) -> StateHistory<S> {
        lock(&self.inner.core).history.clone()
    }

    /// Replace the goal if it differs from the current one, and optionally
    /// start evolving toward it. An equal goal changes nothing.
    pub fn set_goal(&self, goal: G, auto_evolve: bool) {
        if self.is_stopped() {
            return;
        }
        let changed = {
            let mut core = lock(&self.inner.core);
            if core.goal == goal {
                false
            } else {
                tracing::debug!(engine = %self.inner.id, goal = ?goal, "goal changed");
                core.goal = goal;
                true
            }
        };
        if changed && auto_evolve {
            self.inner.worker.signal_change();
        }
    }

    /// Replace the state and feed it to the timers, then the hooks.
    ///
    /// A value-equal state changes nothing. The timer re-arm and hook
    /// diff complete under the state lock, so any resolution attempt that
    /// follows observes them.
    pub fn set_state(&self, state: S) {
        if self.is_stopped() {
            return;
        }
        let attempt = self.inner.worker.current_episode().unwrap_or(0);
        let batch = {
            let mut core = lock(&self.inner.core);
            if core.state == state {
                return;
            }
            let from = std::mem::replace(&mut core.state, state.clone());
            tracing::debug!(
                engine = %self.inner.id,
                from = from.name(),
                to = state.name(),
                attempt,
                "state changed"
            );
            core.history.record(StateTransition {
                from,
                to: state.clone(),
                timestamp: Utc::now(),
                attempt,
            });
            self.note_terminal(&state);
            self.inner.timers.set_state(state.clone());
            self.inner.hooks.evaluate(Some(state))
        };
        batch.deliver();
    }

    /// Mutate the state in place, then re-evaluate timers and hooks
    /// unconditionally.
    pub fn modify_state<F>(&self, mutate: F)
    where
        F: FnOnce(&mut S),
    {
        if self.is_stopped() {
            return;
        }
        let batch = {
            let mut core = lock(&self.inner.core);
            mutate(&mut core.state);
            let state = core.state.clone();
            self.note_terminal(&state);
            self.inner.timers.set_state(state.clone());
            self.inner.hooks.evaluate(Some(state))
        };
        batch.deliver();
    }

    /// Force timers and hooks to re-check the current state.
    ///
    /// For predicate conditions that read data outside the state value.
    /// Unlike `set_state`, this never compares or replaces the state.
    pub fn state_has_changed(&self) {
        if self.is_stopped() {
            return;
        }
        let batch = {
            let _core = lock(&self.inner.core);
            self.inner.timers.state_has_changed();
            self.inner.hooks.evaluate(None)
        };
        batch.deliver();
    }

    /// Signal the worker to run the strategy again.
    pub fn evolve(&self) {
        if !self.is_stopped() {
            self.inner.worker.signal_change();
        }
    }

    pub fn has_reached_goal(&self) -> bool {
        let (state, goal) = self.snapshot();
        self.inner.strategy.has_reached_goal(&state, &goal)
    }

    pub fn set_timer<F>(
        &self,
        condition: Condition<S>,
        duration: Duration,
        action: F,
    ) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.timers.set_timer(condition, duration, action)
    }

    /// Register a condition timer whose action is [`Engine::evolve`].
    pub fn set_evolve_timer(
        &self,
        condition: Condition<S>,
        duration: Duration,
    ) -> Result<(), TimerError> {
        let engine = self.downgrade();
        self.set_timer(condition, duration, move || {
            if let Some(engine) = engine.upgrade() {
                engine.evolve();
            }
        })
    }

    pub fn remove_timer(&self, condition: &Condition<S>) -> bool {
        self.inner.timers.remove_timer(condition)
    }

    /// Condition of the currently armed timer.
    pub fn armed_timer(&self) -> Option<Condition<S>> {
        self.inner.timers.armed()
    }

    pub fn set_enter_hook<F>(&self, condition: Condition<S>, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.set_enter_hook(condition, action);
    }

    pub fn set_exit_hook<F>(&self, condition: Condition<S>, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.set_exit_hook(condition, action);
    }

    pub fn remove_enter_hook(&self, condition: &Condition<S>) -> bool {
        self.inner.hooks.remove_enter_hook(condition)
    }

    pub fn remove_exit_hook(&self, condition: &Condition<S>) -> bool {
        self.inner.hooks.remove_exit_hook(condition)
    }

    /// Block until every hook dispatched so far has run.
    pub fn flush_hooks(&self) {
        self.inner.hooks.flush();
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.worker.is_resolved()
    }

    /// See [`ConvergenceWorker::block_until_resolved`].
    pub fn block_until_resolved(&self, timeout: Option<Duration>) -> bool {
        self.inner.worker.block_until_resolved(timeout)
    }

    /// Block until the worker is stable *and* the goal is reached.
    ///
    /// Stable only means no immediate transition is available; the goal may
    /// still be waiting on a timer or an external event, so after each
    /// stable point that misses the goal this sleeps `recheck` and waits
    /// again. Returns `false` if the engine stops first or if called from
    /// the engine's own worker.
    pub fn block_until_goal_reached(&self, recheck: Duration) -> bool {
        loop {
            if self.is_stopped() || !self.inner.worker.block_until_resolved(None) {
                return false;
            }
            if self.has_reached_goal() {
                return true;
            }
            thread::sleep(recheck);
        }
    }

    /// [`Engine::block_until_goal_reached`] with the configured recheck
    /// interval, giving up after `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without bound.
    pub fn wait_for_goal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let time_left = || deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let recheck = self.inner.config.recheck_interval();
        loop {
            if self.is_stopped() {
                return false;
            }
            if !self.inner.worker.block_until_resolved(time_left()) {
                return false;
            }
            if self.has_reached_goal() {
                return true;
            }
            let pause = match time_left() {
                Some(left) if left.is_zero() => return false,
                Some(left) => recheck.min(left),
                None => recheck,
            };
            thread::sleep(pause);
        }
    }

    /// Tear the engine down: timers, then hooks, then the worker (waiting
    /// for an in-flight resolution to finish). Afterwards every operation
    /// is a no-op. Irreversible.
    pub fn stop(&self) {
        if !self.is_stopped() {
            tracing::info!(engine = %self.inner.id, label = %self.label(), "stopping engine");
        }
        self.inner.timers.stop();
        self.inner.hooks.stop();
        self.inner.worker.stop();
        self.inner.dead.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.dead.load(Ordering::SeqCst)
    }

    fn note_terminal(&self, state: &S) {
        if state.is_error() {
            tracing::warn!(engine = %self.inner.id, state = state.name(), "entered error state");
        } else if state.is_final() {
            tracing::info!(engine = %self.inner.id, state = state.name(), "entered final state");
        }
    }

    fn snapshot(&self) -> (S, G) {
        let core = lock(&self.inner.core);
        (core.state.clone(), core.goal.clone())
    }

    /// One resolution attempt, called on the worker thread.
    fn try_solve(&self) -> bool {
        if self.is_stopped() {
            return true;
        }
        let (state, goal) = self.snapshot();
        self.inner.strategy.run_transition(&state, &goal, self)
    }
}

impl<S: State + 'static, G: Goal> Drop for EngineInner<S, G> {
    fn drop(&mut self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(engine = %self.id, "engine dropped without stop");
        self.timers.stop();
        self.hooks.stop();
        self.worker.stop();
    }
}
