//! Action controlling another macro

use super::action_at;
use crate::action::Action;
use crate::error::EngineError;
use crate::macro_ref::{MacroLookup, MacroRef};
use crate::segment::{Segment, SegmentContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// What the action does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MacroActionKind {
    #[default]
    Pause,
    Unpause,
    ResetCounter,
    Run,
    Stop,
    DisableAction,
    EnableAction,
    ToggleAction,
}

impl TryFrom<i64> for MacroActionKind {
    type Error = EngineError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MacroActionKind::Pause),
            1 => Ok(MacroActionKind::Unpause),
            2 => Ok(MacroActionKind::ResetCounter),
            3 => Ok(MacroActionKind::Run),
            4 => Ok(MacroActionKind::Stop),
            5 => Ok(MacroActionKind::DisableAction),
            6 => Ok(MacroActionKind::EnableAction),
            7 => Ok(MacroActionKind::ToggleAction),
            other => Err(EngineError::InvalidDocument(format!(
                "unknown macro action type {}",
                other
            ))),
        }
    }
}

impl From<MacroActionKind> for i64 {
    fn from(kind: MacroActionKind) -> Self {
        kind as i64
    }
}

fn default_action_index() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroActionSettings {
    #[serde(rename = "action", default)]
    pub kind: MacroActionKind,

    #[serde(rename = "macro", default)]
    pub target: MacroRef,

    /// 1-based index into the target's action list
    #[serde(default = "default_action_index")]
    pub action_index: usize,

    /// Run the else branch instead of the match branch
    #[serde(default)]
    pub run_else_actions: bool,

    #[serde(default)]
    pub skip_when_paused: bool,
}

impl Default for MacroActionSettings {
    fn default() -> Self {
        Self {
            kind: MacroActionKind::default(),
            target: MacroRef::default(),
            action_index: default_action_index(),
            run_else_actions: false,
            skip_when_paused: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MacroAction {
    pub settings: MacroActionSettings,
}

impl MacroAction {
    pub const ID: &'static str = "macro";

    pub fn new(kind: MacroActionKind, target: MacroRef) -> Self {
        Self {
            settings: MacroActionSettings {
                kind,
                target,
                ..MacroActionSettings::default()
            },
        }
    }
}

impl Segment for MacroAction {
    fn save(&self, obj: &mut Map<String, Value>) {
        match serde_json::to_value(&self.settings) {
            Ok(Value::Object(settings)) => obj.extend(settings),
            Ok(_) => {}
            Err(e) => warn!("failed to save macro action settings: {}", e),
        }
    }

    fn load(&mut self, obj: &Map<String, Value>) {
        self.settings = serde_json::from_value(Value::Object(obj.clone())).unwrap_or_else(|e| {
            warn!("invalid macro action settings: {}", e);
            MacroActionSettings::default()
        });
    }

    fn post_load(&mut self, macros: &MacroLookup<'_>) {
        let target = &mut self.settings.target;
        if target.is_set() && !target.resolve(macros) {
            warn!(target_macro = %target.name(), "macro action refers to unknown macro");
        }
    }

    fn short_desc(&self) -> String {
        self.settings.target.name()
    }
}

impl Action for MacroAction {
    fn perform(&mut self, _ctx: &SegmentContext<'_>) -> bool {
        let Some(target) = self.settings.target.get() else {
            debug!(target_macro = %self.settings.target.name(), "macro action target not available");
            return true;
        };
        let name = target.name();

        match self.settings.kind {
            MacroActionKind::Pause => {
                target.set_paused(true);
                info!(target_macro = %name, "paused macro");
            }
            MacroActionKind::Unpause => {
                target.set_paused(false);
                info!(target_macro = %name, "unpaused macro");
            }
            MacroActionKind::ResetCounter => {
                target.reset_run_count();
                info!(target_macro = %name, "reset counter");
            }
            MacroActionKind::Run => {
                if self.settings.skip_when_paused && target.is_paused() {
                    debug!(target_macro = %name, "not running paused macro");
                } else {
                    info!(target_macro = %name, "run nested macro");
                    target.perform_actions(!self.settings.run_else_actions, true, true);
                }
            }
            MacroActionKind::Stop => {
                target.stop();
                info!(target_macro = %name, "stopped macro");
            }
            MacroActionKind::DisableAction
            | MacroActionKind::EnableAction
            | MacroActionKind::ToggleAction => {
                let Some(action) = action_at(&target, self.settings.action_index) else {
                    warn!(
                        target_macro = %name,
                        index = self.settings.action_index,
                        "macro has no action at index"
                    );
                    return true;
                };
                let enabled = match self.settings.kind {
                    MacroActionKind::DisableAction => false,
                    MacroActionKind::EnableAction => true,
                    _ => !action.is_enabled(),
                };
                action.set_enabled(enabled);
                info!(target_macro = %name, index = self.settings.action_index, enabled, "changed action state");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{ActionList, Macro};
    use crate::test_support::{add_action, CountingAction};
    use macro_core::CancelToken;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn perform(action: &mut MacroAction) -> bool {
        let owner = Macro::new("owner");
        let segment = crate::segment::SegmentBase::new("macro", Arc::downgrade(&owner), false);
        let cancel = CancelToken::engine_only(Arc::new(macro_core::WaitSignal::new()));
        action.perform(&SegmentContext::new(&segment, &cancel))
    }

    #[test]
    fn test_pause_and_counter() {
        let target = Macro::new("target");
        add_action(&target, ActionList::Actions, CountingAction::new(true));
        target.perform_actions(true, false, false);
        assert_eq!(target.run_count(), 1);

        let mut action = MacroAction::new(MacroActionKind::Pause, MacroRef::to(&target));
        assert!(perform(&mut action));
        assert!(target.is_paused());

        action.settings.kind = MacroActionKind::Unpause;
        perform(&mut action);
        assert!(!target.is_paused());

        action.settings.kind = MacroActionKind::ResetCounter;
        perform(&mut action);
        assert_eq!(target.run_count(), 0);
    }

    fn wait_done(target: &Macro) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !target.is_done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_run_uses_background_thread() {
        let target = Macro::new("target");
        let matched = add_action(&target, ActionList::Actions, CountingAction::new(true));
        let otherwise = add_action(&target, ActionList::ElseActions, CountingAction::new(true));

        let mut action = MacroAction::new(MacroActionKind::Run, MacroRef::to(&target));
        assert!(perform(&mut action));
        wait_done(&target);
        action.settings.run_else_actions = true;
        assert!(perform(&mut action));
        wait_done(&target);

        assert_eq!(matched.count(), 1);
        assert_eq!(otherwise.count(), 1);
    }

    #[test]
    fn test_toggle_action_state() {
        let target = Macro::new("target");
        add_action(&target, ActionList::Actions, CountingAction::new(true));

        let mut action = MacroAction::new(MacroActionKind::DisableAction, MacroRef::to(&target));
        perform(&mut action);
        assert!(!target.actions()[0].is_enabled());

        action.settings.kind = MacroActionKind::ToggleAction;
        perform(&mut action);
        assert!(target.actions()[0].is_enabled());

        action.settings.action_index = 2;
        assert!(perform(&mut action));
        assert!(target.actions()[0].is_enabled());
    }

    #[test]
    fn test_missing_target_is_a_no_op() {
        let mut action = MacroAction::new(MacroActionKind::Stop, MacroRef::new("gone"));
        assert!(perform(&mut action));
    }

    #[test]
    fn test_load_resolves_forward_reference() {
        let mut action = MacroAction::default();
        let obj = json!({ "id": "macro", "action": 4, "macro": "later" });
        action.load(obj.as_object().unwrap());
        assert_eq!(action.settings.kind, MacroActionKind::Stop);
        assert!(!action.settings.target.is_live());

        let macros = vec![Macro::new("later")];
        action.post_load(&MacroLookup::new(&macros));
        assert!(action.settings.target.is_live());

        let mut saved = Map::new();
        action.save(&mut saved);
        assert_eq!(saved["macro"], json!("later"));
        assert_eq!(saved["action"], json!(4));
        assert_eq!(saved["actionIndex"], json!(1));
    }
}
