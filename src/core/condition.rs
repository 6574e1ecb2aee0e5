//! Conditions over state, used as registration keys for timers and hooks.
//!
//! A condition either names one exact state value or wraps an arbitrary
//! predicate. Two conditions are the same key iff they are equal: exact
//! conditions compare by the wrapped value, predicate conditions by the
//! identity they were given at construction (closures cannot be compared
//! structurally, so clones of one predicate are equal and two separately
//! built predicates never are).

use crate::error::{shield, CallbackOrigin, ErrorSink};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

type PredicateFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// A registration key matched against the current state.
///
/// # Example
///
/// ```rust
/// use convergent::core::Condition;
///
/// let exactly_three = Condition::exact(3u32);
/// let even = Condition::predicate(|n: &u32| n % 2 == 0);
///
/// assert!(exactly_three.matches(&3));
/// assert!(!exactly_three.matches(&4));
/// assert!(even.matches(&4));
///
/// assert_eq!(exactly_three, Condition::exact(3));
/// assert_eq!(even, even.clone());
/// assert_ne!(even, Condition::predicate(|n: &u32| n % 2 == 0));
/// ```
pub enum Condition<S> {
    /// Matches exactly one state value.
    Exact(S),
    /// Matches whenever the predicate holds.
    Predicate(Predicate<S>),
}

/// A predicate condition with a stable identity.
pub struct Predicate<S> {
    id: Uuid,
    check: PredicateFn<S>,
}

impl<S> Predicate<S> {
    /// Identity used for key equality.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<S> Clone for Predicate<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            check: Arc::clone(&self.check),
        }
    }
}

impl<S> Condition<S> {
    /// Condition matching exactly `state`.
    pub fn exact(state: S) -> Self {
        Condition::Exact(state)
    }

    /// Condition matching whenever `check` returns true.
    ///
    /// The predicate must be pure and cheap: it is evaluated on every state
    /// change while internal registry locks are held. A predicate that
    /// panics there is reported to the error sink and counts as not
    /// matching.
    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Predicate {
            id: Uuid::new_v4(),
            check: Arc::new(check),
        })
    }
}

impl<S: PartialEq> Condition<S> {
    /// Check whether `state` satisfies this condition.
    pub fn matches(&self, state: &S) -> bool {
        match self {
            Condition::Exact(expected) => expected == state,
            Condition::Predicate(predicate) => (predicate.check)(state),
        }
    }

    /// [`Condition::matches`] with a panicking predicate reported and
    /// treated as not matching.
    pub(crate) fn matches_shielded(&self, state: &S, label: &str, sink: Option<&ErrorSink>) -> bool {
        match self {
            Condition::Exact(expected) => expected == state,
            Condition::Predicate(predicate) => {
                shield(CallbackOrigin::Condition, label, sink, || (predicate.check)(state))
                    .unwrap_or(false)
            }
        }
    }
}

impl<S: Clone> Clone for Condition<S> {
    fn clone(&self) -> Self {
        match self {
            Condition::Exact(state) => Condition::Exact(state.clone()),
            Condition::Predicate(predicate) => Condition::Predicate(predicate.clone()),
        }
    }
}

impl<S: PartialEq> PartialEq for Condition<S> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Condition::Exact(a), Condition::Exact(b)) => a == b,
            (Condition::Predicate(a), Condition::Predicate(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Condition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Exact(state) => f.debug_tuple("Exact").field(state).finish(),
            Condition::Predicate(predicate) => {
                f.debug_tuple("Predicate").field(&predicate.id).finish()
            }
        }
    }
}

impl<S> From<S> for Condition<S> {
    fn from(state: S) -> Self {
        Condition::Exact(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    enum Phase {
        Idle,
        Running,
        Done,
    }

    #[test]
    fn exact_condition_matches_only_its_value() {
        let condition = Condition::exact(Phase::Running);

        assert!(condition.matches(&Phase::Running));
        assert!(!condition.matches(&Phase::Idle));
        assert!(!condition.matches(&Phase::Done));
    }

    #[test]
    fn predicate_condition_evaluates_closure() {
        let condition = Condition::predicate(|p: &Phase| matches!(p, Phase::Idle | Phase::Done));

        assert!(condition.matches(&Phase::Idle));
        assert!(!condition.matches(&Phase::Running));
        assert!(condition.matches(&Phase::Done));
    }

    #[test]
    fn exact_conditions_compare_by_value() {
        assert_eq!(Condition::exact(Phase::Idle), Condition::exact(Phase::Idle));
        assert_ne!(Condition::exact(Phase::Idle), Condition::exact(Phase::Done));
    }

    #[test]
    fn predicate_conditions_compare_by_identity() {
        let a = Condition::predicate(|_: &Phase| true);
        let b = Condition::predicate(|_: &Phase| true);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn exact_never_equals_predicate() {
        let exact = Condition::exact(Phase::Idle);
        let predicate = Condition::predicate(|p: &Phase| *p == Phase::Idle);

        assert_ne!(exact, predicate);
        assert_ne!(predicate, exact);
    }

    #[test]
    fn panicking_predicate_counts_as_not_matching() {
        let reports = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reports2 = Arc::clone(&reports);
        let sink: ErrorSink = Arc::new(move |e: &crate::error::CallbackError| {
            reports2.lock().unwrap().push(e.origin);
        });
        let fragile = Condition::predicate(|p: &Phase| match p {
            Phase::Done => panic!("no verdict for Done"),
            _ => true,
        });

        assert!(fragile.matches_shielded(&Phase::Idle, "phases", Some(&sink)));
        assert!(!fragile.matches_shielded(&Phase::Done, "phases", Some(&sink)));
        assert_eq!(*reports.lock().unwrap(), vec![CallbackOrigin::Condition]);
    }

    #[test]
    fn from_state_builds_exact_condition() {
        let condition: Condition<Phase> = Phase::Done.into();
        assert_eq!(condition, Condition::Exact(Phase::Done));
    }
}
