//! The state evolution engine.
//!
//! An [`Engine`] owns a `(state, goal)` pair, a [`TransitionStrategy`], a
//! condition timer set, a hook dispatcher and a convergence worker:
//!
//! - `set_goal` / `evolve` signal the worker
//! - the worker calls `run_transition` until it reports stable
//! - every `set_state` re-arms timers and dispatches hooks, which may in
//!   turn call `evolve` again

mod evolution;
mod strategy;

pub use evolution::{Engine, WeakEngine};
pub use strategy::{from_fns, FnStrategy, Goal, TransitionStrategy};
