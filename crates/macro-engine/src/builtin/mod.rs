//! Built-in segments
//!
//! Segment kinds that only need the engine itself: a cancellable wait and
//! the macro action and condition, which control and observe other macros.

mod macro_action;
mod macro_condition;
mod wait;

pub use macro_action::{MacroAction, MacroActionKind, MacroActionSettings};
pub use macro_condition::{
    CounterCondition, MacroCondition, MacroConditionKind, MacroConditionSettings,
};
pub use wait::{WaitAction, WaitSettings};

use crate::action::ActionSegment;
use crate::engine::Engine;
use crate::macros::Macro;
use std::sync::Arc;
use tracing::debug;

/// Register the built-in segments with `engine`'s registries
pub fn register_builtins(engine: &Engine) {
    let actions = engine.actions();
    actions.register(WaitAction::ID, "Wait", || Box::new(WaitAction::default()));
    actions.register(MacroAction::ID, "Macro", || Box::new(MacroAction::default()));

    let conditions = engine.conditions();
    conditions.register(MacroCondition::ID, "Macro", || {
        Box::new(MacroCondition::default())
    });

    debug!(
        actions = actions.len(),
        conditions = conditions.len(),
        "registered built-in segments"
    );
}

/// Action at 1-based `index` of `target`'s match list
fn action_at(target: &Macro, index: usize) -> Option<Arc<ActionSegment>> {
    let actions = target.actions();
    index.checked_sub(1).and_then(|i| actions.get(i).cloned())
}
