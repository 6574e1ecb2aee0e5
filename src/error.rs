//! Failure taxonomy and the callback boundary.
//!
//! User callbacks (transitions, timer actions, hook actions) never unwind
//! into the subsystem that invoked them. A panic is caught at the boundary,
//! logged, forwarded to the optional [`ErrorSink`], and replaced by the
//! caller's safe outcome.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Which kind of user callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOrigin {
    Transition,
    Timer,
    Hook,
    Condition,
}

impl fmt::Display for CallbackOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transition => "transition",
            Self::Timer => "timer",
            Self::Hook => "hook",
            Self::Condition => "condition",
        };
        f.write_str(name)
    }
}

/// A failure that escaped a user callback.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{origin} callback in '{label}' panicked: {message}")]
pub struct CallbackError {
    pub origin: CallbackOrigin,
    /// Diagnostic label of the owning component
    pub label: String,
    pub message: String,
}

/// Receives every [`CallbackError`] for observability.
pub type ErrorSink = Arc<dyn Fn(&CallbackError) + Send + Sync>;

/// Errors returned when creating or re-arming a timer.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("Timer duration must be positive, got {0:?}")]
    ZeroDuration(Duration),

    #[error("Timer duration {0:?} exceeds what the clock can represent")]
    TooLong(Duration),

    #[error("Failed to spawn timer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Run `f`, converting a panic into a reported [`CallbackError`].
///
/// Returns `None` when `f` panicked.
pub(crate) fn shield<R>(
    origin: CallbackOrigin,
    label: &str,
    sink: Option<&ErrorSink>,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let error = CallbackError {
                origin,
                label: label.to_string(),
                message: panic_message(payload.as_ref()),
            };
            tracing::warn!(
                origin = %error.origin,
                label = %error.label,
                message = %error.message,
                "callback panicked"
            );
            if let Some(sink) = sink {
                // A panicking sink must not take the subsystem down with it.
                let _ = panic::catch_unwind(AssertUnwindSafe(|| sink(&error)));
            }
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lock a mutex, recovering from poisoning.
///
/// The only user code run under an internal lock is condition predicates,
/// and those are evaluated through [`shield`], so a poisoned guard still
/// protects consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn shield_passes_through_results() {
        let value = shield(CallbackOrigin::Timer, "t", None, || 41 + 1);
        assert_eq!(value, Some(42));
    }

    #[test]
    fn shield_reports_panics_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |e: &CallbackError| {
            seen2.lock().unwrap().push(e.clone());
        });

        let value: Option<()> = shield(CallbackOrigin::Hook, "doors", Some(&sink), || {
            panic!("hinge broke")
        });

        assert!(value.is_none());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].origin, CallbackOrigin::Hook);
        assert_eq!(seen[0].label, "doors");
        assert_eq!(seen[0].message, "hinge broke");
    }

    #[test]
    fn formatted_panics_keep_their_message() {
        let seen = Arc::new(Mutex::new(String::new()));
        let seen2 = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |e: &CallbackError| {
            *seen2.lock().unwrap() = e.to_string();
        });

        let _: Option<()> = shield(CallbackOrigin::Transition, "engine", Some(&sink), || {
            panic!("step {} failed", 3)
        });

        assert_eq!(
            *seen.lock().unwrap(),
            "transition callback in 'engine' panicked: step 3 failed"
        );
    }

    #[test]
    fn panicking_sink_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let sink: ErrorSink = Arc::new(move |_: &CallbackError| {
            calls2.fetch_add(1, Ordering::SeqCst);
            panic!("sink is broken too");
        });

        let value: Option<()> = shield(CallbackOrigin::Timer, "t", Some(&sink), || panic!("boom"));

        assert!(value.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(5));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 5);
    }
}
