//! Convergent: drive shared state toward a goal under concurrency
//!
//! Convergent is a generic "evolve a state until it meets a goal" engine.
//! Callers supply the transition logic; the crate supplies the concurrency
//! plumbing around it.
//!
//! # Core Concepts
//!
//! - **Convergence worker**: at most one background resolver per engine,
//!   and no change signal is ever lost
//! - **Condition timers**: `(condition, duration, action)` registrations of
//!   which only the shortest matching one is armed
//! - **Hooks**: enter/exit actions fired once per edge as conditions start
//!   or stop matching
//! - **Engine**: composes the above around a `TransitionStrategy`
//!
//! User callbacks that panic are caught at the subsystem boundary and
//! reported to an optional error sink; they never take down a worker.
//!
//! # Example
//!
//! ```rust
//! use convergent::builder::EngineBuilder;
//! use convergent::core::Condition;
//! use convergent::engine::{from_fns, Engine};
//! use convergent::state_enum;
//! use std::time::Duration;
//!
//! state_enum! {
//!     enum Valve {
//!         Closed,
//!         Opening,
//!         Open,
//!     }
//!     final: [Open]
//! }
//!
//! let engine = EngineBuilder::new()
//!     .initial(Valve::Closed)
//!     .goal(Valve::Open)
//!     .strategy(from_fns(
//!         |state: &Valve, _goal: &Valve, engine: &Engine<Valve, Valve>| match state {
//!             Valve::Closed => {
//!                 engine.set_state(Valve::Opening);
//!                 // Stable: the timer below finishes the job.
//!                 true
//!             }
//!             Valve::Opening => {
//!                 engine.set_state(Valve::Open);
//!                 false
//!             }
//!             Valve::Open => true,
//!         },
//!         |state: &Valve, goal: &Valve| state == goal,
//!     ))
//!     .build()
//!     .unwrap();
//!
//! engine
//!     .set_evolve_timer(Condition::exact(Valve::Opening), Duration::from_millis(20))
//!     .unwrap();
//!
//! engine.evolve();
//! assert!(engine.wait_for_goal(Duration::from_secs(5)));
//! assert_eq!(engine.state(), Valve::Open);
//! engine.stop();
//! ```

pub mod builder;
pub mod core;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod timer;
pub mod worker;

// Re-export commonly used types
pub use crate::builder::{EngineBuilder, EngineConfig};
pub use crate::core::{Condition, State, StateHistory, StateTransition};
pub use crate::engine::{Engine, TransitionStrategy};
pub use crate::error::{CallbackError, ErrorSink};
