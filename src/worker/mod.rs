//! The convergence worker: at most one background resolver per owner.

mod convergence;

pub use convergence::{ConvergenceWorker, Resolve, RunPhase};
