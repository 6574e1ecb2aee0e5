//! The caller-supplied transition logic.

use super::Engine;
use crate::core::State;
use std::fmt::Debug;

/// Values an engine drives its state toward.
pub trait Goal: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<G> Goal for G where G: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Decides how state evolves toward a goal.
///
/// `run_transition` is called repeatedly by the engine's worker. It applies
/// changes through the engine handle (`set_state`, `set_goal`) and returns
/// `false` when a change it made may immediately enable another
/// transition, or `true` when nothing more can happen right now (for
/// example while a timer or an external event is awaited).
///
/// Both methods run on shared worker threads and must not block
/// indefinitely.
pub trait TransitionStrategy<S: State + 'static, G: Goal>: Send + Sync + 'static {
    fn run_transition(&self, state: &S, goal: &G, engine: &Engine<S, G>) -> bool;

    fn has_reached_goal(&self, state: &S, goal: &G) -> bool;
}

/// A strategy assembled from two closures.
pub struct FnStrategy<R, H> {
    run: R,
    reached: H,
}

/// Build a [`TransitionStrategy`] from a transition closure and a goal test.
///
/// # Example
///
/// ```rust
/// use convergent::core::State;
/// use convergent::engine::{from_fns, Engine};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// struct Level(u32);
///
/// impl State for Level {
///     fn name(&self) -> &str {
///         "Level"
///     }
/// }
///
/// let strategy = from_fns(
///     |state: &Level, goal: &u32, engine: &Engine<Level, u32>| {
///         if state.0 < *goal {
///             engine.set_state(Level(state.0 + 1));
///             false
///         } else {
///             true
///         }
///     },
///     |state: &Level, goal: &u32| state.0 >= *goal,
/// );
/// # let _ = strategy;
/// ```
pub fn from_fns<S, G, R, H>(run: R, reached: H) -> FnStrategy<R, H>
where
    S: State + 'static,
    G: Goal,
    R: Fn(&S, &G, &Engine<S, G>) -> bool + Send + Sync + 'static,
    H: Fn(&S, &G) -> bool + Send + Sync + 'static,
{
    FnStrategy { run, reached }
}

impl<S, G, R, H> TransitionStrategy<S, G> for FnStrategy<R, H>
where
    S: State + 'static,
    G: Goal,
    R: Fn(&S, &G, &Engine<S, G>) -> bool + Send + Sync + 'static,
    H: Fn(&S, &G) -> bool + Send + Sync + 'static,
{
    fn run_transition(&self, state: &S, goal: &G, engine: &Engine<S, G>) -> bool {
        (self.run)(state, goal, engine)
    }

    fn has_reached_goal(&self, state: &S, goal: &G) -> bool {
        (self.reached)(state, goal)
    }
}
