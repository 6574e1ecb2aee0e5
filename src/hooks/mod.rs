//! Enter/exit hooks keyed by conditions over state.

mod dispatcher;

pub use dispatcher::{DispatchMode, HookAction, HookDispatcher, HookKind};
