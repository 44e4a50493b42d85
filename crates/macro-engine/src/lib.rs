//! Macro rule engine
//!
//! A macro combines an ordered list of conditions with two ordered action
//! lists, one run when the conditions match and one (the else branch) run
//! when they do not. The [`Engine`] checks every macro once per tick while
//! holding its shared lock, then runs the selected actions with the lock
//! released.
//!
//! # Architecture
//!
//! - Segments: conditions and actions are pluggable implementations of
//!   [`Condition`] / [`Action`] wrapped in a [`ConditionSegment`] /
//!   [`ActionSegment`] that carries the shared [`SegmentBase`] state.
//! - Registries: [`ConditionRegistry`] and [`ActionRegistry`] map segment ids
//!   to constructors. Unknown ids load as a [`Placeholder`] that keeps the
//!   persisted payload.
//! - Loading is two phase: every macro is constructed first, then
//!   [`MacroRef`]s are resolved against the complete collection.
//! - Cancellation: blocking actions wait on a [`CancelToken`] combining the
//!   engine-wide abort signal with the macro's stop flag.
//!
//! # Key Types
//!
//! - [`Engine`] - Collection, shared lock, registries and scheduler tick
//! - [`Macro`] - Evaluation, execution and thread bookkeeping of one macro
//! - [`TempVariable`] - Value a segment publishes for later segments

mod action;
pub mod builtin;
mod condition;
mod config;
mod engine;
mod error;
mod group;
mod macro_ref;
mod macros;
mod placeholder;
mod registry;
mod segment;
mod sync;
mod temp_var;

#[cfg(test)]
mod test_support;

pub use action::{Action, ActionSegment};
pub use builtin::register_builtins;
pub use condition::{Condition, ConditionSegment};
pub use config::{EngineConfig, OnChangePolicy};
pub use engine::{Engine, MacroList};
pub use error::{EngineError, EngineResult};
pub use macro_ref::{MacroLookup, MacroRef};
pub use macros::{ActionList, GroupData, Macro, MacroSettings, PauseSaveBehavior};
pub use placeholder::Placeholder;
pub use registry::{ActionRegistry, ConditionRegistry, CreateFn, SegmentInfo, SegmentRegistry};
pub use segment::{
    Segment, SegmentBase, SegmentContext, SegmentPosition, SegmentRef, VariableSlot,
    VariableValueRef,
};
pub use temp_var::{TempVarRef, TempVarSpec, TempVariable, TEMP_VAR_HISTORY};

pub use macro_core::{
    CancelToken, Duration, DurationMode, DurationModifier, DurationUnit, Logic, SegmentSettings,
    WaitOutcome, WaitSignal,
};
