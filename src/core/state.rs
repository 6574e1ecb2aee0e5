//! The `State` trait implemented by every value an engine evolves.
//!
//! The engine treats state as opaque beyond equality and condition matching.
//! A state value is replaced wholesale on every change, never patched
//! in place, so the trait asks for `Clone + PartialEq` and thread safety.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for values owned and evolved by an engine.
///
/// # Required Traits
///
/// - `Clone`: the engine hands snapshots to transitions, timers and hooks
/// - `PartialEq`: change detection and exact-state conditions compare by value
/// - `Debug`: states appear in log fields
/// - `Serialize` + `Deserialize`: transition history can be exported
/// - `Send + Sync`: state crosses into worker and timer threads
///
/// # Example
///
/// ```rust
/// use convergent::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum Link {
///     Down,
///     Negotiating,
///     Up,
///     Faulted,
/// }
///
/// impl State for Link {
///     fn name(&self) -> &str {
///         match self {
///             Self::Down => "Down",
///             Self::Negotiating => "Negotiating",
///             Self::Up => "Up",
///             Self::Faulted => "Faulted",
///         }
///     }
///
///     fn is_error(&self) -> bool {
///         matches!(self, Self::Faulted)
///     }
/// }
///
/// assert!(Link::Faulted.is_error());
/// assert!(!Link::Up.is_final());
/// ```
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Whether no further evolution is expected from this state.
    ///
    /// The engine logs entering a final state but still asks its strategy
    /// whether the goal is reached. Default implementation returns `false`.
    fn is_final(&self) -> bool {
        false
    }

    /// Whether this state represents a failure.
    ///
    /// The engine logs entering an error state at warn level. Default
    /// implementation returns `false`.
    fn is_error(&self) -> bool {
        false
    }
}
