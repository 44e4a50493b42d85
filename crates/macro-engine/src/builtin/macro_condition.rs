//! Condition observing another macro

use super::action_at;
use crate::condition::Condition;
use crate::error::EngineError;
use crate::macro_ref::{MacroLookup, MacroRef};
use crate::macros::Macro;
use crate::segment::{Segment, SegmentContext};
use crate::temp_var::TempVarSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Which property of the target is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MacroConditionKind {
    /// Compare the run count against a value
    #[default]
    Count,
    /// The target's conditions matched
    State,
    Paused,
    /// The target ran actions since this condition's macro last checked
    ActionsPerformed,
    ActionDisabled,
    ActionEnabled,
}

impl TryFrom<i64> for MacroConditionKind {
    type Error = EngineError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MacroConditionKind::Count),
            1 => Ok(MacroConditionKind::State),
            2 => Ok(MacroConditionKind::Paused),
            3 => Ok(MacroConditionKind::ActionsPerformed),
            4 => Ok(MacroConditionKind::ActionDisabled),
            5 => Ok(MacroConditionKind::ActionEnabled),
            other => Err(EngineError::InvalidDocument(format!(
                "unknown macro condition type {}",
                other
            ))),
        }
    }
}

impl From<MacroConditionKind> for i64 {
    fn from(kind: MacroConditionKind) -> Self {
        kind as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CounterCondition {
    #[default]
    Below,
    Above,
    Equal,
}

impl CounterCondition {
    pub fn compare(self, value: u32, reference: u32) -> bool {
        match self {
            CounterCondition::Below => value < reference,
            CounterCondition::Above => value > reference,
            CounterCondition::Equal => value == reference,
        }
    }
}

impl TryFrom<i64> for CounterCondition {
    type Error = EngineError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CounterCondition::Below),
            1 => Ok(CounterCondition::Above),
            2 => Ok(CounterCondition::Equal),
            other => Err(EngineError::InvalidDocument(format!(
                "unknown counter condition {}",
                other
            ))),
        }
    }
}

impl From<CounterCondition> for i64 {
    fn from(condition: CounterCondition) -> Self {
        condition as i64
    }
}

fn default_action_index() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroConditionSettings {
    #[serde(rename = "type", default)]
    pub kind: MacroConditionKind,

    #[serde(rename = "macro", default)]
    pub target: MacroRef,

    #[serde(rename = "condition", default)]
    pub counter_condition: CounterCondition,

    #[serde(default)]
    pub count: u32,

    /// 1-based index into the target's action list
    #[serde(default = "default_action_index")]
    pub action_index: usize,
}

impl Default for MacroConditionSettings {
    fn default() -> Self {
        Self {
            kind: MacroConditionKind::default(),
            target: MacroRef::default(),
            counter_condition: CounterCondition::default(),
            count: 0,
            action_index: default_action_index(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MacroCondition {
    pub settings: MacroConditionSettings,
}

impl MacroCondition {
    pub const ID: &'static str = "macro";

    pub fn new(kind: MacroConditionKind, target: MacroRef) -> Self {
        Self {
            settings: MacroConditionSettings {
                kind,
                target,
                ..MacroConditionSettings::default()
            },
        }
    }

    fn check_count(&self, target: &Macro, ctx: &SegmentContext<'_>) -> bool {
        let count = target.run_count();
        ctx.set_temp_var("run_count", count.to_string());
        if ctx.wants_variable_value() {
            ctx.set_variable_value(count.to_string());
        }
        self.settings
            .counter_condition
            .compare(count, self.settings.count)
    }

    fn check_actions_performed(&self, target: &Macro, ctx: &SegmentContext<'_>) -> bool {
        match ctx.owner().and_then(|owner| owner.last_check_time()) {
            Some(last_check) => target.was_executed_since(last_check),
            None => target.last_execution_time().is_some(),
        }
    }
}

impl Segment for MacroCondition {
    fn save(&self, obj: &mut Map<String, Value>) {
        match serde_json::to_value(&self.settings) {
            Ok(Value::Object(settings)) => obj.extend(settings),
            Ok(_) => {}
            Err(e) => warn!("failed to save macro condition settings: {}", e),
        }
    }

    fn load(&mut self, obj: &Map<String, Value>) {
        self.settings = serde_json::from_value(Value::Object(obj.clone())).unwrap_or_else(|e| {
            warn!("invalid macro condition settings: {}", e);
            MacroConditionSettings::default()
        });
    }

    fn post_load(&mut self, macros: &MacroLookup<'_>) {
        let target = &mut self.settings.target;
        if target.is_set() && !target.resolve(macros) {
            warn!(target_macro = %target.name(), "macro condition refers to unknown macro");
        }
    }

    fn temp_vars(&self) -> Vec<TempVarSpec> {
        match self.settings.kind {
            MacroConditionKind::Count => vec![TempVarSpec::new(
                "run_count",
                "Run count",
                "Number of times the macro has run",
            )],
            _ => Vec::new(),
        }
    }

    fn short_desc(&self) -> String {
        self.settings.target.name()
    }

    fn supports_variable_value(&self) -> bool {
        true
    }
}

impl Condition for MacroCondition {
    fn check(&mut self, ctx: &SegmentContext<'_>) -> bool {
        let Some(target) = self.settings.target.get() else {
            return false;
        };

        match self.settings.kind {
            MacroConditionKind::Count => self.check_count(&target, ctx),
            MacroConditionKind::State => target.matched(),
            MacroConditionKind::Paused => target.is_paused(),
            MacroConditionKind::ActionsPerformed => self.check_actions_performed(&target, ctx),
            MacroConditionKind::ActionDisabled => {
                action_at(&target, self.settings.action_index).is_some_and(|a| !a.is_enabled())
            }
            MacroConditionKind::ActionEnabled => {
                action_at(&target, self.settings.action_index).is_some_and(|a| a.is_enabled())
            }
        }
    }
}
