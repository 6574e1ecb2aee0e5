//! Builder for constructing engines.

use super::config::EngineConfig;
use super::error::BuildError;
use crate::core::State;
use crate::engine::{Engine, Goal, TransitionStrategy};
use crate::error::{CallbackError, ErrorSink};
use crate::hooks::DispatchMode;
use std::sync::Arc;
use stillwater::validation::Validation;

/// Builder for constructing engines with a fluent API.
///
/// # Example
///
/// ```rust
/// use convergent::builder::EngineBuilder;
/// use convergent::engine::{from_fns, Engine};
/// use convergent::state_enum;
/// use std::time::Duration;
///
/// state_enum! {
///     enum Link {
///         Down,
///         Up,
///     }
///     final: [Up]
/// }
///
/// let engine = EngineBuilder::new()
///     .initial(Link::Down)
///     .goal(Link::Up)
///     .label("uplink")
///     .strategy(from_fns(
///         |state: &Link, goal: &Link, engine: &Engine<Link, Link>| {
///             if state != goal {
///                 engine.set_state(goal.clone());
///             }
///             true
///         },
///         |state: &Link, goal: &Link| state == goal,
///     ))
///     .build()
///     .unwrap();
///
/// engine.evolve();
/// assert!(engine.wait_for_goal(Duration::from_secs(5)));
/// engine.stop();
/// ```
pub struct EngineBuilder<S: State + 'static, G: Goal> {
    initial: Option<S>,
    goal: Option<G>,
    strategy: Option<Arc<dyn TransitionStrategy<S, G>>>,
    config: EngineConfig,
    error_sink: Option<ErrorSink>,
}

impl<S: State + 'static, G: Goal> EngineBuilder<S, G> {
    pub fn new() -> Self {
        Self {
            initial: None,
            goal: None,
            strategy: None,
            config: EngineConfig::default(),
            error_sink: None,
        }
    }

    /// Set the initial state (required).
    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Set the initial goal (required).
    pub fn goal(mut self, goal: G) -> Self {
        self.goal = Some(goal);
        self
    }

    /// Set the transition strategy (required).
    pub fn strategy<T>(mut self, strategy: T) -> Self
    where
        T: TransitionStrategy<S, G>,
    {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Use an already shared strategy.
    pub fn shared_strategy(mut self, strategy: Arc<dyn TransitionStrategy<S, G>>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the diagnostic label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    pub fn hook_dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.hook_dispatch = mode;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Receive every failure escaping a transition, timer or hook callback.
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&CallbackError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Build the engine.
    /// Returns an error if required fields are missing or the configuration
    /// is invalid.
    pub fn build(self) -> Result<Engine<S, G>, BuildError> {
        let initial = self.initial.ok_or(BuildError::MissingInitialState)?;
        let goal = self.goal.ok_or(BuildError::MissingGoal)?;
        let strategy = self.strategy.ok_or(BuildError::MissingStrategy)?;

        if let Validation::Failure(errors) = self.config.validate() {
            return Err(BuildError::InvalidConfig(errors.iter().cloned().collect()));
        }

        Ok(Engine::assemble(
            initial,
            goal,
            strategy,
            self.config,
            self.error_sink,
        ))
    }
}

impl<S: State + 'static, G: Goal> Default for EngineBuilder<S, G> {
    fn default() -> Self {
        Self::new()
    }
}
