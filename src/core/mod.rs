//! Core value types shared by every subsystem.
//!
//! - `State`: the trait implemented by evolved values
//! - `Condition`: exact-value or predicate keys for timers and hooks
//! - `StateHistory`: bounded record of applied transitions

mod condition;
mod history;
mod state;

pub use condition::{Condition, Predicate};
pub use history::{StateHistory, StateTransition};
pub use state::State;
