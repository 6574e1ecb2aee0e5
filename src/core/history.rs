//! Bounded record of the state changes an engine performed.

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Record of a single effective state change.
///
/// # Example
///
/// ```rust
/// use convergent::core::{State, StateTransition};
/// use serde::{Deserialize, Serialize};
/// use chrono::Utc;
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum Door {
///     Closed,
///     Open,
/// }
///
/// impl State for Door {
///     fn name(&self) -> &str {
///         match self {
///             Self::Closed => "Closed",
///             Self::Open => "Open",
///         }
///     }
/// }
///
/// let transition = StateTransition {
///     from: Door::Closed,
///     to: Door::Open,
///     timestamp: Utc::now(),
///     attempt: 1,
/// };
/// assert_eq!(transition.to.name(), "Open");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateTransition<S: State> {
    /// The state being replaced
    pub from: S,
    /// The replacing state
    pub to: S,
    /// When the change was applied
    pub timestamp: DateTime<Utc>,
    /// The resolution episode during which the change happened
    /// (0 when applied outside any episode)
    pub attempt: u64,
}

/// Ordered, bounded history of state transitions.
///
/// Once `limit` records are held, recording a new one evicts the oldest.
/// A limit of zero disables recording.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateHistory<S: State> {
    transitions: VecDeque<StateTransition<S>>,
    limit: usize,
}

impl<S: State> StateHistory<S> {
    /// Create an empty history holding at most `limit` transitions.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Append a transition, evicting the oldest one past the limit.
    pub fn record(&mut self, transition: StateTransition<S>) {
        if self.limit == 0 {
            return;
        }
        while self.transitions.len() >= self.limit {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }

    /// States traversed in order: the `from` of the oldest retained
    /// transition, then the `to` of each transition.
    ///
    /// # Example
    ///
    /// ```rust
    /// use convergent::core::{State, StateHistory, StateTransition};
    /// use serde::{Deserialize, Serialize};
    /// use chrono::Utc;
    ///
    /// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    /// enum Step { A, B, C }
    ///
    /// impl State for Step {
    ///     fn name(&self) -> &str {
    ///         match self {
    ///             Self::A => "A",
    ///             Self::B => "B",
    ///             Self::C => "C",
    ///         }
    ///     }
    /// }
    ///
    /// let mut history = StateHistory::with_limit(8);
    /// history.record(StateTransition { from: Step::A, to: Step::B, timestamp: Utc::now(), attempt: 1 });
    /// history.record(StateTransition { from: Step::B, to: Step::C, timestamp: Utc::now(), attempt: 1 });
    ///
    /// assert_eq!(history.get_path(), vec![&Step::A, &Step::B, &Step::C]);
    /// ```
    pub fn get_path(&self) -> Vec<&S> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(first) = self.transitions.front() {
            path.push(&first.from);
        }
        path.extend(self.transitions.iter().map(|t| &t.to));
        path
    }

    /// Time between the oldest and newest retained transitions.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.transitions.front()?, self.transitions.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    /// Retained transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &StateTransition<S>> {
        self.transitions.iter()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
