//! Build errors for the engine builder.

use super::config::ConfigError;
use thiserror::Error;

/// Errors that can occur when building an engine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("Goal not specified. Call .goal(goal) before .build()")]
    MissingGoal,

    #[error("Transition strategy not specified. Call .strategy(strategy)")]
    MissingStrategy,

    #[error("Invalid engine configuration: {}", describe(.0))]
    InvalidConfig(Vec<ConfigError>),
}

fn describe(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
