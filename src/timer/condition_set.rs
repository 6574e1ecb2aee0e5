//! Conditional timers over a shared current state.
//!
//! Any number of `(condition, duration, action)` registrations may exist,
//! but at most one is armed at any instant: the matching registration with
//! the smallest effective duration. The registration that was armed before
//! a re-evaluation keeps its elapsed time; every other candidate competes
//! with its full duration.
//!
//! Ties go to the already-armed registration, then to the earliest
//! registered one. A registration whose action panicked is parked until its
//! condition stops matching.
//!
//! The whole set shares one [`ResettableTimer`], created with the first
//! registration, so it holds at most one waiting thread.

use super::resettable::{check_duration, Rearm, ResettableTimer, TimerConfig};
use crate::core::Condition;
use crate::error::{lock, shield, CallbackOrigin, ErrorSink, TimerError};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Zero-argument action run when a condition timer fires.
pub type TimerAction = Arc<dyn Fn() + Send + Sync>;

struct Entry<S> {
    id: u64,
    condition: Condition<S>,
    duration: Duration,
    action: TimerAction,
    parked: bool,
}

/// The registration the shared timer is counting down for.
#[derive(Clone, Copy)]
struct Armed {
    id: u64,
    deadline: Instant,
}

struct Registry<S> {
    state: S,
    entries: Vec<Entry<S>>,
    armed: Option<Armed>,
    timer: Option<ResettableTimer>,
    stopped: bool,
}

struct SetInner<S> {
    label: String,
    sink: Option<ErrorSink>,
    next_id: AtomicU64,
    registry: Mutex<Registry<S>>,
}

/// Registry of condition timers that arms at most one timer at a time.
///
/// # Example
///
/// ```rust
/// use convergent::core::Condition;
/// use convergent::timer::ConditionTimerSet;
/// use std::time::Duration;
///
/// let timers = ConditionTimerSet::new("doors", "closed");
/// timers
///     .set_timer(Condition::exact("open"), Duration::from_secs(30), || {
///         println!("door left open");
///     })
///     .unwrap();
///
/// assert!(timers.armed().is_none());
/// timers.set_state("open");
/// assert_eq!(timers.armed(), Some(Condition::exact("open")));
/// ```
pub struct ConditionTimerSet<S> {
    inner: Arc<SetInner<S>>,
}

impl<S> ConditionTimerSet<S>
where
    S: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, initial: S) -> Self {
        Self::with_error_sink(label, initial, None)
    }

    pub fn with_error_sink(
        label: impl Into<String>,
        initial: S,
        sink: Option<ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SetInner {
                label: label.into(),
                sink,
                next_id: AtomicU64::new(0),
                registry: Mutex::new(Registry {
                    state: initial,
                    entries: Vec::new(),
                    armed: None,
                    timer: None,
                    stopped: false,
                }),
            }),
        }
    }

    /// Register `action` to run after `duration` spent continuously in
    /// `condition`. Replaces the registration with an equal condition.
    ///
    /// After firing, the registration competes again with its full duration,
    /// so it fires periodically for as long as its condition keeps matching.
    pub fn set_timer<F>(
        &self,
        condition: Condition<S>,
        duration: Duration,
        action: F,
    ) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        check_duration(duration)?;
        let entry = Entry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            condition,
            duration,
            action: Arc::new(action),
            parked: false,
        };

        let replaced = {
            let mut registry = lock(&self.inner.registry);
            if registry.stopped {
                return Ok(());
            }
            if registry.timer.is_none() {
                registry.timer = Some(self.spawn_timer(duration)?);
            }
            let replaced = match registry
                .entries
                .iter()
                .position(|e| e.condition == entry.condition)
            {
                Some(index) => {
                    let old = std::mem::replace(&mut registry.entries[index], entry);
                    if registry.armed.is_some_and(|armed| armed.id == old.id) {
                        registry.armed = None;
                    }
                    Some(old)
                }
                None => {
                    registry.entries.push(entry);
                    None
                }
            };
            self.inner.rearm(&mut registry);
            replaced
        };
        drop(replaced);
        Ok(())
    }

    fn spawn_timer(&self, duration: Duration) -> Result<ResettableTimer, TimerError> {
        let weak: Weak<SetInner<S>> = Arc::downgrade(&self.inner);
        let config = TimerConfig {
            label: self.inner.label.clone(),
            error_sink: self.inner.sink.clone(),
            autostart: false,
        };
        ResettableTimer::with_config(duration, config, move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire();
            }
            Rearm::Stop
        })
    }

    /// Remove the registration keyed by `condition`. Returns whether one existed.
    pub fn remove_timer(&self, condition: &Condition<S>) -> bool {
        let removed = {
            let mut registry = lock(&self.inner.registry);
            let Some(index) = registry
                .entries
                .iter()
                .position(|e| &e.condition == condition)
            else {
                return false;
            };
            let removed = registry.entries.remove(index);
            if registry.armed.is_some_and(|armed| armed.id == removed.id) {
                registry.armed = None;
                self.inner.rearm(&mut registry);
            }
            removed
        };
        drop(removed);
        true
    }

    /// Replace the current state and re-select the armed timer.
    pub fn set_state(&self, state: S) {
        let mut registry = lock(&self.inner.registry);
        registry.state = state;
        self.inner.rearm(&mut registry);
    }

    /// Re-select the armed timer against the held state without replacing it.
    ///
    /// For predicate conditions whose outcome depends on data that changed
    /// in place.
    pub fn state_has_changed(&self) {
        let mut registry = lock(&self.inner.registry);
        self.inner.rearm(&mut registry);
    }

    /// Cancel every timer and drop all registrations. Later calls are no-ops.
    pub fn stop(&self) {
        let (entries, timer) = {
            let mut registry = lock(&self.inner.registry);
            registry.stopped = true;
            registry.armed = None;
            if let Some(timer) = &registry.timer {
                timer.stop();
            }
            (std::mem::take(&mut registry.entries), registry.timer.take())
        };
        drop(entries);
        drop(timer);
    }

    /// Condition of the currently armed registration.
    pub fn armed(&self) -> Option<Condition<S>> {
        let registry = lock(&self.inner.registry);
        let armed = registry.armed?;
        registry
            .entries
            .iter()
            .find(|e| e.id == armed.id)
            .map(|e| e.condition.clone())
    }

    /// Time left on the armed registration.
    pub fn armed_remaining(&self) -> Option<Duration> {
        let registry = lock(&self.inner.registry);
        registry
            .armed
            .map(|armed| armed.deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of countdowns in progress: zero or one.
    pub fn running_count(&self) -> usize {
        let registry = lock(&self.inner.registry);
        let running = registry.armed.is_some()
            && registry.timer.as_ref().is_some_and(ResettableTimer::is_running);
        usize::from(running)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner.registry).stopped
    }
}

impl<S> SetInner<S>
where
    S: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    /// Called on the shared timer thread when its deadline passes.
    fn fire(&self) {
        let (id, action) = {
            let mut registry = lock(&self.registry);
            if registry.stopped {
                return;
            }
            let Some(armed) = registry.armed else {
                return;
            };
            if Instant::now() < armed.deadline {
                // Re-armed for a later deadline between the wakeup and this call.
                return;
            }
            registry.armed = None;
            match registry.entries.iter().find(|e| e.id == armed.id) {
                Some(entry) => (armed.id, Arc::clone(&entry.action)),
                None => return,
            }
        };

        tracing::debug!(label = %self.label, timer = id, "condition timer fired");
        let completed = shield(CallbackOrigin::Timer, &self.label, self.sink.as_ref(), || {
            action()
        });

        let mut registry = lock(&self.registry);
        if completed.is_none() {
            if let Some(entry) = registry.entries.iter_mut().find(|e| e.id == id) {
                entry.parked = true;
            }
        }
        self.rearm(&mut registry);
    }

    fn rearm(&self, registry: &mut Registry<S>) {
        if registry.stopped {
            return;
        }
        let Some(timer) = registry.timer.as_ref() else {
            return;
        };
        timer.stop();

        let now = Instant::now();
        let previous = registry.armed.take();
        let carried = previous.map_or(Duration::ZERO, |armed| {
            armed.deadline.saturating_duration_since(now)
        });

        let mut best: Option<(usize, Duration)> = None;
        let Registry { state, entries, .. } = &mut *registry;
        for (index, entry) in entries.iter_mut().enumerate() {
            if !entry
                .condition
                .matches_shielded(state, &self.label, self.sink.as_ref())
            {
                entry.parked = false;
                continue;
            }
            if entry.parked {
                continue;
            }
            let is_previous = previous.is_some_and(|armed| armed.id == entry.id);
            let effective = if is_previous && !carried.is_zero() {
                carried
            } else {
                entry.duration
            };
            let better = match best {
                None => true,
                Some((_, shortest)) => effective < shortest || (effective == shortest && is_previous),
            };
            if better {
                best = Some((index, effective));
            }
        }

        let Some((index, effective)) = best else {
            if previous.is_some() {
                tracing::debug!(label = %self.label, "condition timers disarmed");
            }
            return;
        };

        // Durations were checked on registration, so the deadline fits.
        let Some(deadline) = now.checked_add(effective) else {
            return;
        };
        let entry = &registry.entries[index];
        let armed = Armed {
            id: entry.id,
            deadline,
        };
        if let Some(timer) = registry.timer.as_ref() {
            if let Err(error) = timer.reset_with(effective) {
                tracing::warn!(label = %self.label, error = %error, "condition timer not armed");
                return;
            }
        }
        tracing::debug!(
            label = %self.label,
            timer = entry.id,
            condition = ?entry.condition,
            remaining_ms = u64::try_from(effective.as_millis()).unwrap_or(u64::MAX),
            "condition timer armed"
        );
        registry.armed = Some(armed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Light {
        Red,
        Amber,
        Green,
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        (hits, move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn nothing_armed_without_matching_registration() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let (_hits, action) = counter();
        timers
            .set_timer(Condition::exact(Light::Green), Duration::from_secs(5), action)
            .unwrap();

        assert!(timers.armed().is_none());
        assert_eq!(timers.running_count(), 0);
    }

    #[test]
    fn matching_registration_is_armed_and_fires() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let (hits, action) = counter();
        timers
            .set_timer(Condition::exact(Light::Green), Duration::from_millis(20), action)
            .unwrap();

        timers.set_state(Light::Green);
        assert_eq!(timers.armed(), Some(Condition::exact(Light::Green)));

        thread::sleep(Duration::from_millis(70));
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn shortest_matching_registration_wins() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let long = Condition::predicate(|l: &Light| *l != Light::Green);
        let short = Condition::exact(Light::Amber);

        timers
            .set_timer(long.clone(), Duration::from_secs(10), || {})
            .unwrap();
        timers
            .set_timer(short.clone(), Duration::from_secs(2), || {})
            .unwrap();

        assert_eq!(timers.armed(), Some(long.clone()));

        timers.set_state(Light::Amber);
        assert_eq!(timers.armed(), Some(short));
        assert_eq!(timers.running_count(), 1);

        timers.set_state(Light::Red);
        assert_eq!(timers.armed(), Some(long));
        assert_eq!(timers.running_count(), 1);
    }

    #[test]
    fn armed_registration_keeps_elapsed_time_across_changes() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let not_green = Condition::predicate(|l: &Light| *l != Light::Green);
        timers
            .set_timer(not_green, Duration::from_millis(300), || {})
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        timers.set_state(Light::Amber);

        let left = timers.armed_remaining().unwrap();
        assert!(left <= Duration::from_millis(200));
    }

    #[test]
    fn tie_prefers_already_armed_registration() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let first = Condition::predicate(|_: &Light| true);
        timers
            .set_timer(first.clone(), Duration::from_secs(5), || {})
            .unwrap();
        assert_eq!(timers.armed(), Some(first.clone()));

        // Same duration, registered later: the armed one is kept.
        let second = Condition::predicate(|_: &Light| true);
        timers.set_timer(second, Duration::from_secs(5), || {}).unwrap();
        assert_eq!(timers.armed(), Some(first));
    }

    #[test]
    fn tie_without_armed_prefers_earliest_registration() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let first = Condition::predicate(|l: &Light| *l == Light::Green);
        let second = Condition::exact(Light::Green);
        timers
            .set_timer(first.clone(), Duration::from_secs(5), || {})
            .unwrap();
        timers.set_timer(second, Duration::from_secs(5), || {}).unwrap();

        timers.set_state(Light::Green);
        assert_eq!(timers.armed(), Some(first));
    }

    #[test]
    fn leaving_condition_prevents_firing() {
        let timers = ConditionTimerSet::new("lights", Light::Green);
        let (hits, action) = counter();
        timers
            .set_timer(Condition::exact(Light::Green), Duration::from_millis(60), action)
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        timers.set_state(Light::Red);
        thread::sleep(Duration::from_millis(100));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(timers.armed().is_none());
    }

    #[test]
    fn replacing_registration_keeps_single_entry() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_secs(10), || {})
            .unwrap();
        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_secs(1), || {})
            .unwrap();

        assert_eq!(timers.len(), 1);
        assert!(timers.armed_remaining().unwrap() <= Duration::from_secs(1));
    }

    #[test]
    fn removing_armed_registration_falls_back() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let short = Condition::exact(Light::Red);
        let long = Condition::predicate(|_: &Light| true);
        timers.set_timer(long.clone(), Duration::from_secs(9), || {}).unwrap();
        timers.set_timer(short.clone(), Duration::from_secs(1), || {}).unwrap();
        assert_eq!(timers.armed(), Some(short.clone()));

        assert!(timers.remove_timer(&short));
        assert!(!timers.remove_timer(&short));
        assert_eq!(timers.armed(), Some(long));
    }

    #[test]
    fn firing_action_runs_periodically_while_matching() {
        let timers = ConditionTimerSet::new("lights", Light::Amber);
        let (hits, action) = counter();
        timers
            .set_timer(Condition::exact(Light::Amber), Duration::from_millis(20), action)
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn panicking_action_is_reported_and_parked() {
        let reports = Arc::new(AtomicUsize::new(0));
        let reports2 = Arc::clone(&reports);
        let sink: ErrorSink = Arc::new(move |_| {
            reports2.fetch_add(1, Ordering::SeqCst);
        });
        let timers = ConditionTimerSet::with_error_sink("lights", Light::Red, Some(sink));
        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_millis(40), || {
                panic!("bad action")
            })
            .unwrap();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(reports.load(Ordering::SeqCst), 1);
        assert_eq!(timers.armed(), None);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(reports.load(Ordering::SeqCst), 1);

        // Leaving and re-entering the condition un-parks it.
        timers.set_state(Light::Green);
        timers.set_state(Light::Red);
        assert_eq!(timers.armed(), Some(Condition::exact(Light::Red)));
    }

    #[test]
    fn state_has_changed_reevaluates_predicates() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let flagged = Condition::predicate(move |_: &Light| flag2.load(Ordering::SeqCst));
        timers
            .set_timer(flagged.clone(), Duration::from_secs(5), || {})
            .unwrap();
        assert!(timers.armed().is_none());

        flag.store(true, Ordering::SeqCst);
        timers.state_has_changed();
        assert_eq!(timers.armed(), Some(flagged));
    }

    #[test]
    fn panicking_predicate_is_reported_and_does_not_match() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports2 = Arc::clone(&reports);
        let sink: ErrorSink = Arc::new(move |e: &crate::error::CallbackError| {
            reports2.lock().unwrap().push(e.origin);
        });
        let timers = ConditionTimerSet::with_error_sink("lights", Light::Red, Some(sink));
        let fragile = Condition::predicate(|l: &Light| match l {
            Light::Amber => panic!("amber is undecidable"),
            _ => true,
        });
        timers.set_timer(fragile, Duration::from_secs(1), || {}).unwrap();
        timers
            .set_timer(Condition::exact(Light::Amber), Duration::from_secs(5), || {})
            .unwrap();

        timers.set_state(Light::Amber);

        assert_eq!(timers.armed(), Some(Condition::exact(Light::Amber)));
        assert_eq!(timers.running_count(), 1);
        assert!(reports
            .lock()
            .unwrap()
            .iter()
            .all(|origin| *origin == CallbackOrigin::Condition));
        assert!(!reports.lock().unwrap().is_empty());
    }

    #[test]
    fn unrepresentable_duration_is_rejected_at_registration() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let result = timers.set_timer(Condition::exact(Light::Red), Duration::MAX, || {});

        assert!(matches!(result, Err(TimerError::TooLong(_))));
        assert!(timers.is_empty());

        timers.set_state(Light::Green);
        timers.set_state(Light::Red);
        assert!(timers.armed().is_none());
    }

    #[test]
    fn registrations_share_one_countdown() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let (short_hits, short) = counter();
        let (long_hits, long) = counter();
        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_millis(30), short)
            .unwrap();
        for secs in 1..20 {
            timers
                .set_timer(Condition::predicate(|_: &Light| true), Duration::from_secs(secs), || {})
                .unwrap();
        }
        timers
            .set_timer(Condition::predicate(|_: &Light| true), Duration::from_secs(30), long)
            .unwrap();

        assert_eq!(timers.len(), 21);
        assert_eq!(timers.running_count(), 1);
        assert_eq!(timers.armed(), Some(Condition::exact(Light::Red)));

        thread::sleep(Duration::from_millis(80));
        assert!(short_hits.load(Ordering::SeqCst) >= 1);
        assert_eq!(long_hits.load(Ordering::SeqCst), 0);
        assert_eq!(timers.running_count(), 1);
    }

    #[test]
    fn stop_cancels_everything() {
        let timers = ConditionTimerSet::new("lights", Light::Red);
        let (hits, action) = counter();
        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_millis(30), action)
            .unwrap();

        timers.stop();
        thread::sleep(Duration::from_millis(80));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(timers.is_stopped());
        assert!(timers.is_empty());

        timers
            .set_timer(Condition::exact(Light::Red), Duration::from_millis(10), || {})
            .unwrap();
        assert!(timers.is_empty());
    }
}
