//! A delayed callback that can be stopped, resumed and reset.

use crate::error::{lock, shield, CallbackOrigin, ErrorSink, TimerError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// What a timer does after its callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Rearm with this duration, which becomes the new default.
    /// A zero duration stops the timer.
    After(Duration),
    /// Rearm with the previous duration.
    Same,
    /// Become stopped with nothing remembered.
    Stop,
}

/// Construction options for a [`ResettableTimer`].
#[derive(Clone)]
pub struct TimerConfig {
    /// Diagnostic label; names the timer thread and log fields
    pub label: String,
    pub error_sink: Option<ErrorSink>,
    /// Start counting down immediately
    pub autostart: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            label: "timer".to_string(),
            error_sink: None,
            autostart: false,
        }
    }
}

struct Clock {
    duration: Duration,
    deadline: Option<Instant>,
    /// Time left when stopped mid-wait
    remaining: Option<Duration>,
    /// Bumped by every start and stop; a firing whose generation is stale
    /// must not rearm.
    generation: u64,
    shutdown: bool,
}

impl Clock {
    /// A deadline past what `Instant` can hold leaves the clock stopped.
    fn start(&mut self, duration: Duration) {
        self.deadline = Instant::now().checked_add(duration);
        self.remaining = None;
        self.generation += 1;
    }
}

/// Reject durations a timer cannot count down.
pub(crate) fn check_duration(duration: Duration) -> Result<(), TimerError> {
    if duration.is_zero() {
        return Err(TimerError::ZeroDuration(duration));
    }
    if Instant::now().checked_add(duration).is_none() {
        return Err(TimerError::TooLong(duration));
    }
    Ok(())
}

struct Shared {
    clock: Mutex<Clock>,
    wakeup: Condvar,
}

/// A delayed callback backed by one dedicated waiting thread.
///
/// Only one wait is ever live: starting while running replaces the pending
/// deadline instead of racing a second firing. Dropping the timer cancels
/// any pending firing and lets the thread exit.
///
/// # Example
///
/// ```rust
/// use convergent::timer::{Rearm, ResettableTimer};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&fired);
/// let timer = ResettableTimer::new(Duration::from_millis(10), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Rearm::Stop
/// })
/// .unwrap();
///
/// timer.reset();
/// std::thread::sleep(Duration::from_millis(100));
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// assert!(!timer.is_running());
/// ```
pub struct ResettableTimer {
    shared: Arc<Shared>,
}

impl ResettableTimer {
    /// Create a stopped timer.
    pub fn new<F>(duration: Duration, callback: F) -> Result<Self, TimerError>
    where
        F: FnMut() -> Rearm + Send + 'static,
    {
        Self::with_config(duration, TimerConfig::default(), callback)
    }

    /// Create a timer with a label, error sink and optional autostart.
    pub fn with_config<F>(
        duration: Duration,
        config: TimerConfig,
        callback: F,
    ) -> Result<Self, TimerError>
    where
        F: FnMut() -> Rearm + Send + 'static,
    {
        check_duration(duration)?;

        let shared = Arc::new(Shared {
            clock: Mutex::new(Clock {
                duration,
                deadline: None,
                remaining: None,
                generation: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let TimerConfig {
            label,
            error_sink,
            autostart,
        } = config;
        thread::Builder::new()
            .name(format!("timer:{label}"))
            .spawn(move || run(worker, label, error_sink, callback))?;

        let timer = Self { shared };
        if autostart {
            timer.reset();
        }
        Ok(timer)
    }

    /// Restart the countdown with the current default duration.
    pub fn reset(&self) {
        let mut clock = lock(&self.shared.clock);
        if clock.shutdown {
            return;
        }
        let duration = clock.duration;
        clock.start(duration);
        self.shared.wakeup.notify_all();
    }

    /// Restart the countdown with `duration`, which becomes the new default.
    pub fn reset_with(&self, duration: Duration) -> Result<(), TimerError> {
        check_duration(duration)?;
        let mut clock = lock(&self.shared.clock);
        if clock.shutdown {
            return Ok(());
        }
        clock.duration = duration;
        clock.start(duration);
        self.shared.wakeup.notify_all();
        Ok(())
    }

    /// Cancel the pending firing and remember the time left.
    ///
    /// Also suppresses the rearm of a callback that is currently executing.
    pub fn stop(&self) {
        let mut clock = lock(&self.shared.clock);
        if let Some(deadline) = clock.deadline.take() {
            let left = deadline.saturating_duration_since(Instant::now());
            clock.remaining = (!left.is_zero()).then_some(left);
        }
        clock.generation += 1;
        self.shared.wakeup.notify_all();
    }

    /// Restart with the remembered time left.
    ///
    /// No-op unless the timer was stopped mid-wait with time remaining.
    pub fn resume(&self) {
        let mut clock = lock(&self.shared.clock);
        if clock.shutdown || clock.deadline.is_some() {
            return;
        }
        if let Some(left) = clock.remaining.take() {
            clock.start(left);
            self.shared.wakeup.notify_all();
        }
    }

    /// Time until the next firing, or the remembered time left when stopped.
    pub fn remaining_time(&self) -> Duration {
        let clock = lock(&self.shared.clock);
        match (clock.deadline, clock.remaining) {
            (Some(deadline), _) => deadline.saturating_duration_since(Instant::now()),
            (None, Some(left)) => left,
            (None, None) => Duration::ZERO,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.clock).deadline.is_some()
    }

    /// Current default duration.
    pub fn duration(&self) -> Duration {
        lock(&self.shared.clock).duration
    }
}

impl Drop for ResettableTimer {
    fn drop(&mut self) {
        let mut clock = lock(&self.shared.clock);
        clock.shutdown = true;
        clock.deadline = None;
        clock.generation += 1;
        self.shared.wakeup.notify_all();
    }
}

fn run<F>(shared: Arc<Shared>, label: String, sink: Option<ErrorSink>, mut callback: F)
where
    F: FnMut() -> Rearm,
{
    let mut clock = lock(&shared.clock);
    loop {
        if clock.shutdown {
            return;
        }
        let Some(deadline) = clock.deadline else {
            clock = shared
                .wakeup
                .wait(clock)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            continue;
        };
        let now = Instant::now();
        if now < deadline {
            clock = shared
                .wakeup
                .wait_timeout(clock, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
            continue;
        }

        let generation = clock.generation;
        clock.deadline = None;
        drop(clock);

        tracing::trace!(label = %label, "timer fired");
        let outcome = shield(CallbackOrigin::Timer, &label, sink.as_ref(), &mut callback)
            .unwrap_or(Rearm::Stop);

        clock = lock(&shared.clock);
        if clock.shutdown || clock.generation != generation {
            // Stopped, reset or dropped while the callback ran.
            continue;
        }
        match outcome {
            Rearm::After(next) if !next.is_zero() => {
                clock.duration = next;
                clock.start(next);
            }
            Rearm::Same => {
                let duration = clock.duration;
                clock.start(duration);
            }
            Rearm::After(_) | Rearm::Stop => {
                clock.remaining = None;
            }
        }
    }
}
