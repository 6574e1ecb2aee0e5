//! Enter/exit hooks diffed on every state change.

use crate::core::Condition;
use crate::error::{lock, shield, CallbackOrigin, ErrorSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Zero-argument action run when a condition is entered or exited.
pub type HookAction = Arc<dyn Fn() + Send + Sync>;

/// Where hook actions execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On a thread that changed the state, in the order the changes were
    /// applied. A batch produced while another thread is delivering joins
    /// that delivery and runs on its thread; a change made from inside a
    /// hook is delivered after the hook returns.
    Inline,
    /// On one dedicated sequential thread per dispatcher.
    #[default]
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Enter,
    Exit,
}

struct Hook<S> {
    condition: Condition<S>,
    kind: HookKind,
    action: HookAction,
    /// Whether the condition matched at the last evaluation.
    active: bool,
}

enum Message {
    Batch(Vec<HookAction>),
    Flush(Sender<()>),
}

struct Registry<S> {
    state: S,
    hooks: Vec<Hook<S>>,
    queue: Option<Sender<Message>>,
    stopped: bool,
}

struct Inner<S> {
    label: Arc<str>,
    sink: Option<ErrorSink>,
    worker: Option<ThreadId>,
    registry: Mutex<Registry<S>>,
    line: Arc<Mutex<DeliveryLine>>,
}

/// Inline batches keyed by the order in which their diffs ran.
#[derive(Default)]
struct DeliveryLine {
    next_ticket: u64,
    serving: u64,
    draining: bool,
    ready: BTreeMap<u64, Vec<HookAction>>,
}

/// Actions computed by one evaluation, exits first.
///
/// Dropping a batch delivers it, so a ticket can never stall the line.
#[must_use]
pub(crate) struct HookBatch {
    label: Arc<str>,
    sink: Option<ErrorSink>,
    line: Arc<Mutex<DeliveryLine>>,
    ticket: Option<(u64, Vec<HookAction>)>,
}

impl HookBatch {
    /// Run the actions once every inline batch diffed before this one has
    /// run. Empty when the dispatcher already queued them on its worker.
    pub(crate) fn deliver(mut self) {
        self.run();
    }

    fn run(&mut self) {
        let Some((ticket, actions)) = self.ticket.take() else {
            return;
        };
        let mut line = lock(&self.line);
        line.ready.insert(ticket, actions);
        if line.draining {
            return;
        }
        line.draining = true;
        loop {
            let serving = line.serving;
            let Some(actions) = line.ready.remove(&serving) else {
                line.draining = false;
                return;
            };
            line.serving += 1;
            drop(line);
            run_actions(&self.label, self.sink.as_ref(), actions);
            line = lock(&self.line);
        }
    }
}

impl Drop for HookBatch {
    fn drop(&mut self) {
        self.run();
    }
}

fn run_actions(label: &str, sink: Option<&ErrorSink>, actions: Vec<HookAction>) {
    for action in actions {
        // A failing hook skips only itself.
        let _ = shield(CallbackOrigin::Hook, label, sink, || action());
    }
}

/// Registry of enter and exit hooks over a current state.
///
/// On every change it computes which conditions stopped and started
/// matching, runs the exit hooks of the former, then the enter hooks of the
/// latter. Each edge fires its hook exactly once.
///
/// A hook registered while its condition already matches takes the current
/// state as its baseline: an enter hook does not fire retroactively, and an
/// exit hook fires when the state leaves the condition.
///
/// # Example
///
/// ```rust
/// use convergent::core::Condition;
/// use convergent::hooks::{DispatchMode, HookDispatcher};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let entered = Arc::new(AtomicUsize::new(0));
/// let hooks = HookDispatcher::new("valve", 0u8, DispatchMode::Inline);
///
/// let counter = Arc::clone(&entered);
/// hooks.set_enter_hook(Condition::exact(1), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// hooks.set_state(1);
/// hooks.set_state(1);
/// hooks.set_state(2);
/// hooks.set_state(1);
/// assert_eq!(entered.load(Ordering::SeqCst), 2);
/// ```
pub struct HookDispatcher<S> {
    inner: Arc<Inner<S>>,
}

impl<S> HookDispatcher<S>
where
    S: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, initial: S, mode: DispatchMode) -> Self {
        Self::with_error_sink(label, initial, mode, None)
    }

    pub fn with_error_sink(
        label: impl Into<String>,
        initial: S,
        mode: DispatchMode,
        sink: Option<ErrorSink>,
    ) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (queue, worker) = match mode {
            DispatchMode::Inline => (None, None),
            DispatchMode::Worker => match spawn_worker(Arc::clone(&label), sink.clone()) {
                Ok((queue, id)) => (Some(queue), Some(id)),
                Err(error) => {
                    tracing::warn!(
                        label = %label,
                        error = %error,
                        "hook worker unavailable, dispatching inline"
                    );
                    (None, None)
                }
            },
        };

        Self {
            inner: Arc::new(Inner {
                label,
                sink,
                worker,
                registry: Mutex::new(Registry {
                    state: initial,
                    hooks: Vec::new(),
                    queue,
                    stopped: false,
                }),
                line: Arc::new(Mutex::new(DeliveryLine::default())),
            }),
        }
    }

    pub fn set_enter_hook<F>(&self, condition: Condition<S>, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(condition, HookKind::Enter, Arc::new(action));
    }

    pub fn set_exit_hook<F>(&self, condition: Condition<S>, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(condition, HookKind::Exit, Arc::new(action));
    }

    pub fn remove_enter_hook(&self, condition: &Condition<S>) -> bool {
        self.unregister(condition, HookKind::Enter)
    }

    pub fn remove_exit_hook(&self, condition: &Condition<S>) -> bool {
        self.unregister(condition, HookKind::Exit)
    }

    /// Replace the current state and dispatch the resulting hooks.
    pub fn set_state(&self, state: S) {
        self.evaluate(Some(state)).deliver();
    }

    /// Re-diff against the held state without replacing it.
    pub fn state_has_changed(&self) {
        self.evaluate(None).deliver();
    }

    /// Block until every action dispatched so far has run.
    ///
    /// Returns immediately in inline mode, after `stop`, or when called from
    /// the dispatch worker itself.
    pub fn flush(&self) {
        if self.inner.worker == Some(thread::current().id()) {
            return;
        }
        let (done, wait) = mpsc::channel();
        let queued = match &lock(&self.inner.registry).queue {
            Some(queue) => queue.send(Message::Flush(done)).is_ok(),
            None => false,
        };
        if queued {
            let _ = wait.recv();
        }
    }

    /// Conditions of enter hooks that match the held state.
    pub fn active_enter(&self) -> Vec<Condition<S>> {
        self.active(HookKind::Enter)
    }

    /// Conditions of exit hooks that match the held state.
    pub fn active_exit(&self) -> Vec<Condition<S>> {
        self.active(HookKind::Exit)
    }

    /// Drop all hooks and stop dispatching. Already queued actions still run.
    pub fn stop(&self) {
        let (hooks, queue) = {
            let mut registry = lock(&self.inner.registry);
            registry.stopped = true;
            (
                std::mem::take(&mut registry.hooks),
                registry.queue.take(),
            )
        };
        drop(hooks);
        drop(queue);
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner.registry).stopped
    }

    /// Diff the hooks against `state` (or the held state) and either queue
    /// the actions on the worker or return them for inline delivery.
    ///
    /// The diff and the enqueue (or the inline ticket) happen under one
    /// lock, so concurrent changes dispatch in the order they were applied.
    pub(crate) fn evaluate(&self, state: Option<S>) -> HookBatch {
        let mut batch = HookBatch {
            label: Arc::clone(&self.inner.label),
            sink: self.inner.sink.clone(),
            line: Arc::clone(&self.inner.line),
            ticket: None,
        };

        let mut registry = lock(&self.inner.registry);
        if registry.stopped {
            return batch;
        }
        if let Some(state) = state {
            registry.state = state;
        }

        let Registry { state, hooks, .. } = &mut *registry;
        let mut exits = Vec::new();
        let mut enters = Vec::new();
        for hook in hooks.iter_mut() {
            let now = hook.condition.matches_shielded(
                state,
                &self.inner.label,
                self.inner.sink.as_ref(),
            );
            match (hook.kind, hook.active, now) {
                (HookKind::Exit, true, false) => exits.push(Arc::clone(&hook.action)),
                (HookKind::Enter, false, true) => enters.push(Arc::clone(&hook.action)),
                _ => {}
            }
            hook.active = now;
        }

        if exits.is_empty() && enters.is_empty() {
            return batch;
        }
        tracing::debug!(
            label = %self.inner.label,
            exits = exits.len(),
            enters = enters.len(),
            "dispatching hooks"
        );
        exits.append(&mut enters);

        let actions = match &registry.queue {
            Some(queue) => match queue.send(Message::Batch(exits)) {
                Ok(()) => return batch,
                Err(mpsc::SendError(Message::Batch(actions))) => actions,
                Err(_) => return batch,
            },
            None => exits,
        };
        let mut line = lock(&self.inner.line);
        let ticket = line.next_ticket;
        line.next_ticket += 1;
        drop(line);
        batch.ticket = Some((ticket, actions));
        batch
    }

    fn register(&self, condition: Condition<S>, kind: HookKind, action: HookAction) {
        let mut registry = lock(&self.inner.registry);
        if registry.stopped {
            return;
        }
        let active =
            condition.matches_shielded(&registry.state, &self.inner.label, self.inner.sink.as_ref());
        let hook = Hook {
            condition,
            kind,
            action,
            active,
        };
        match registry
            .hooks
            .iter_mut()
            .find(|h| h.kind == kind && h.condition == hook.condition)
        {
            Some(existing) => *existing = hook,
            None => registry.hooks.push(hook),
        }
    }

    fn unregister(&self, condition: &Condition<S>, kind: HookKind) -> bool {
        let mut registry = lock(&self.inner.registry);
        let before = registry.hooks.len();
        registry
            .hooks
            .retain(|h| !(h.kind == kind && &h.condition == condition));
        registry.hooks.len() != before
    }

    fn active(&self, kind: HookKind) -> Vec<Condition<S>> {
        lock(&self.inner.registry)
            .hooks
            .iter()
            .filter(|h| h.kind == kind && h.active)
            .map(|h| h.condition.clone())
            .collect()
    }
}

fn spawn_worker(
    label: Arc<str>,
    sink: Option<ErrorSink>,
) -> std::io::Result<(Sender<Message>, ThreadId)> {
    let (queue, inbox) = mpsc::channel::<Message>();
    let handle = thread::Builder::new()
        .name(format!("hooks:{label}"))
        .spawn(move || {
            for message in inbox {
                match message {
                    Message::Batch(actions) => run_actions(&label, sink.as_ref(), actions),
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        })?;
    Ok((queue, handle.thread().id()))
}
