//! Timers: a single resettable delayed callback, and a set of condition
//! timers that keeps at most one of them armed.

mod condition_set;
mod resettable;

pub use condition_set::{ConditionTimerSet, TimerAction};
pub use resettable::{Rearm, ResettableTimer, TimerConfig};
