//! Macros
//!
//! A [`Macro`] owns an ordered condition list and two ordered action lists
//! (run when the conditions match, and the else branch). Each tick the
//! scheduler evaluates the conditions ([`Macro::check_conditions`]) and, with
//! the shared lock released, runs the selected branch
//! ([`Macro::perform_actions`]), either on the calling thread or on a
//! background thread.
//!
//! # Locking
//!
//! Flags read from other threads while actions run are atomics. Everything
//! else sits behind one `data` mutex, which is never held while a segment
//! executes: lists are cloned out first, since segments may call back into
//! this or another macro.

mod eval;
mod persist;
mod run;

use crate::action::ActionSegment;
use crate::condition::ConditionSegment;
use crate::config::OnChangePolicy;
use crate::error::{EngineError, EngineResult};
use crate::segment::SegmentPosition;
use crate::sync::lock;
use crate::temp_var::TempVariable;
use macro_core::{CancelToken, Duration, Logic, WaitSignal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

/// What happens to the paused flag when macros are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PauseSaveBehavior {
    /// Restore the saved paused flag
    #[default]
    Persist,
    /// Always load paused
    Pause,
    /// Always load unpaused
    Unpause,
}

impl TryFrom<i64> for PauseSaveBehavior {
    type Error = EngineError;

    fn try_from(code: i64) -> EngineResult<Self> {
        match code {
            0 => Ok(PauseSaveBehavior::Persist),
            1 => Ok(PauseSaveBehavior::Pause),
            2 => Ok(PauseSaveBehavior::Unpause),
            other => Err(EngineError::InvalidPauseSaveBehavior(other)),
        }
    }
}

impl From<PauseSaveBehavior> for i64 {
    fn from(behavior: PauseSaveBehavior) -> Self {
        match behavior {
            PauseSaveBehavior::Persist => 0,
            PauseSaveBehavior::Pause => 1,
            PauseSaveBehavior::Unpause => 2,
        }
    }
}

/// Persisted per-macro options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroSettings {
    #[serde(default)]
    pub pause_save_behavior: PauseSaveBehavior,

    /// Run actions on a background thread
    #[serde(rename = "parallel", default)]
    pub run_in_parallel: bool,

    /// Only run actions on the tick the match state changed
    #[serde(rename = "onChange", default)]
    pub on_change: bool,

    /// Skip execution on the first tick after startup
    #[serde(default)]
    pub skip_exec_on_start: bool,

    /// Stop a still running previous run instead of refusing to start
    #[serde(default)]
    pub stop_actions_if_not_done: bool,

    /// Skip evaluating conditions that cannot change the outcome
    #[serde(default)]
    pub use_short_circuit_evaluation: bool,

    #[serde(default)]
    pub use_custom_condition_check_interval: bool,

    /// Minimum time between condition checks when enabled
    #[serde(default)]
    pub custom_condition_check_interval: Duration,
}

/// Group marker state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    #[serde(default)]
    pub collapsed: bool,
    /// Number of macros directly following the group that belong to it
    #[serde(default)]
    pub size: usize,
}

/// Which action list an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionList {
    Actions,
    ElseActions,
}

struct MacroData {
    name: String,
    settings: MacroSettings,
    on_change_policy: OnChangePolicy,
    conditions: Vec<Arc<ConditionSegment>>,
    actions: Vec<Arc<ActionSegment>>,
    else_actions: Vec<Arc<ActionSegment>>,
    group: Option<GroupData>,
    parent: Weak<Macro>,
    last_check: Option<Instant>,
    last_execution: Option<Instant>,
    last_unpause: Option<Instant>,
}

impl MacroData {
    fn new(name: &str, group: Option<GroupData>) -> Self {
        Self {
            name: name.to_string(),
            settings: MacroSettings::default(),
            on_change_policy: OnChangePolicy::default(),
            conditions: Vec::new(),
            actions: Vec::new(),
            else_actions: Vec::new(),
            group,
            parent: Weak::new(),
            last_check: None,
            last_execution: None,
            last_unpause: None,
        }
    }

    fn action_list(&self, list: ActionList) -> &Vec<Arc<ActionSegment>> {
        match list {
            ActionList::Actions => &self.actions,
            ActionList::ElseActions => &self.else_actions,
        }
    }

    fn action_list_mut(&mut self, list: ActionList) -> &mut Vec<Arc<ActionSegment>> {
        match list {
            ActionList::Actions => &mut self.actions,
            ActionList::ElseActions => &mut self.else_actions,
        }
    }

    fn update_condition_indices(&self) {
        for (index, condition) in self.conditions.iter().enumerate() {
            condition.base().set_index(index);
            condition.validate_logic(&self.name);
        }
    }

    fn update_action_indices(&self, list: ActionList) {
        for (index, action) in self.action_list(list).iter().enumerate() {
            action.base().set_index(index);
        }
    }
}

/// A named automation unit
pub struct Macro {
    data: Mutex<MacroData>,
    signal: Arc<WaitSignal>,
    stop: Arc<AtomicBool>,
    paused: AtomicBool,
    matched: AtomicBool,
    last_matched: AtomicBool,
    state_changed: AtomicBool,
    on_change_prevented: AtomicBool,
    done: AtomicBool,
    run_count: AtomicU32,
    runner: Mutex<Option<JoinHandle<()>>>,
    helpers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name())
            .field("group", &self.is_group())
            .field("paused", &self.is_paused())
            .field("matched", &self.matched())
            .finish()
    }
}

impl Macro {
    /// Create a standalone macro with its own wait signal
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_signal(name, Arc::new(WaitSignal::new()))
    }

    /// Create a macro whose blocking actions wait on `signal`
    pub fn with_signal(name: &str, signal: Arc<WaitSignal>) -> Arc<Self> {
        Arc::new(Self::build(MacroData::new(name, None), signal))
    }

    /// Create an empty group marker
    pub fn new_group(name: &str, signal: Arc<WaitSignal>) -> Arc<Self> {
        Arc::new(Self::build(
            MacroData::new(name, Some(GroupData::default())),
            signal,
        ))
    }

    fn build(data: MacroData, signal: Arc<WaitSignal>) -> Self {
        Self {
            data: Mutex::new(data),
            signal,
            stop: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            matched: AtomicBool::new(false),
            last_matched: AtomicBool::new(false),
            state_changed: AtomicBool::new(false),
            on_change_prevented: AtomicBool::new(false),
            done: AtomicBool::new(true),
            run_count: AtomicU32::new(0),
            runner: Mutex::new(None),
            helpers: Mutex::new(Vec::new()),
        }
    }

    fn data(&self) -> MutexGuard<'_, MacroData> {
        lock(&self.data)
    }

    pub fn name(&self) -> String {
        self.data().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.data().name = name.to_string();
    }

    pub fn settings(&self) -> MacroSettings {
        self.data().settings.clone()
    }

    pub fn set_settings(&self, settings: MacroSettings) {
        self.data().settings = settings;
    }

    /// Modify settings in place
    pub fn update_settings(&self, f: impl FnOnce(&mut MacroSettings)) {
        f(&mut self.data().settings);
    }

    pub fn on_change_policy(&self) -> OnChangePolicy {
        self.data().on_change_policy
    }

    pub fn set_on_change_policy(&self, policy: OnChangePolicy) {
        self.data().on_change_policy = policy;
    }

    /// Token that fires when this macro is stopped or waits are aborted
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(self.signal.clone(), self.stop.clone())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause or unpause; unpausing resets all timers
    pub fn set_paused(&self, pause: bool) {
        let was_paused = self.paused.swap(pause, Ordering::SeqCst);
        if was_paused && !pause {
            self.data().last_unpause = Some(Instant::now());
            self.reset_timers();
        }
    }

    /// Reset condition duration modifiers and check/execution timestamps
    pub fn reset_timers(&self) {
        let conditions = {
            let mut data = self.data();
            data.last_check = None;
            data.last_execution = None;
            data.conditions.clone()
        };
        for condition in conditions {
            condition.reset_duration();
        }
    }

    /// Result of the last condition check
    pub fn matched(&self) -> bool {
        self.matched.load(Ordering::SeqCst)
    }

    /// Whether the last check changed the match state
    pub fn state_changed(&self) -> bool {
        self.state_changed.load(Ordering::SeqCst)
    }

    /// Read and clear the "on change suppressed execution" mark
    pub fn take_on_change_prevented(&self) -> bool {
        self.on_change_prevented.swap(false, Ordering::SeqCst)
    }

    pub fn run_count(&self) -> u32 {
        self.run_count.load(Ordering::SeqCst)
    }

    pub fn reset_run_count(&self) {
        self.run_count.store(0, Ordering::SeqCst);
    }

    pub fn last_check_time(&self) -> Option<Instant> {
        self.data().last_check
    }

    pub fn last_execution_time(&self) -> Option<Instant> {
        self.data().last_execution
    }

    pub fn last_unpause_time(&self) -> Option<Instant> {
        self.data().last_unpause
    }

    /// Whether actions ran after `time`
    pub fn was_executed_since(&self, time: Instant) -> bool {
        self.last_execution_time().is_some_and(|t| t > time)
    }

    /// Whether the macro was unpaused after `time`
    pub fn was_paused_since(&self, time: Instant) -> bool {
        self.last_unpause_time().is_some_and(|t| t > time)
    }

    pub fn is_group(&self) -> bool {
        self.data().group.is_some()
    }

    /// Group marker state; `None` for regular macros
    pub fn group_data(&self) -> Option<GroupData> {
        self.data().group
    }

    /// Number of macros belonging to this group; 0 for regular macros
    pub fn group_size(&self) -> usize {
        self.data().group.map(|g| g.size).unwrap_or(0)
    }

    pub fn set_group_collapsed(&self, collapsed: bool) {
        if let Some(group) = self.data().group.as_mut() {
            group.collapsed = collapsed;
        }
    }

    pub(crate) fn set_group_size(&self, size: usize) {
        if let Some(group) = self.data().group.as_mut() {
            group.size = size;
        }
    }

    pub(crate) fn adjust_group_size(&self, grow: bool) {
        if let Some(group) = self.data().group.as_mut() {
            group.size = if grow {
                group.size + 1
            } else {
                group.size.saturating_sub(1)
            };
        }
    }

    /// Group this macro belongs to, if any
    pub fn parent(&self) -> Option<Arc<Macro>> {
        self.data().parent.upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<Macro>>) {
        self.data().parent = parent.map(Arc::downgrade).unwrap_or_default();
    }

    /// Snapshot of the condition list
    pub fn conditions(&self) -> Vec<Arc<ConditionSegment>> {
        self.data().conditions.clone()
    }

    /// Snapshot of the match action list
    pub fn actions(&self) -> Vec<Arc<ActionSegment>> {
        self.data().actions.clone()
    }

    /// Snapshot of the else action list
    pub fn else_actions(&self) -> Vec<Arc<ActionSegment>> {
        self.data().else_actions.clone()
    }

    pub fn has_else_actions(&self) -> bool {
        !self.data().else_actions.is_empty()
    }

    /// Append a condition using `logic`, coerced to fit its position
    pub fn push_condition(&self, condition: Arc<ConditionSegment>, logic: Logic) {
        let mut data = self.data();
        condition.base().set_index(data.conditions.len());
        condition.set_logic(logic, &data.name);
        data.conditions.push(condition);
    }

    /// Insert a condition at `index` using `logic`, coerced to fit
    pub fn insert_condition(
        &self,
        index: usize,
        condition: Arc<ConditionSegment>,
        logic: Logic,
    ) -> EngineResult<()> {
        let mut data = self.data();
        let len = data.conditions.len();
        if index > len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        condition.base().set_index(index);
        condition.set_logic(logic, &data.name);
        data.conditions.insert(index, condition);
        data.update_condition_indices();
        Ok(())
    }

    /// Remove and return the condition at `index`
    pub fn remove_condition(&self, index: usize) -> EngineResult<Arc<ConditionSegment>> {
        let mut data = self.data();
        let len = data.conditions.len();
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        let removed = data.conditions.remove(index);
        data.update_condition_indices();
        Ok(removed)
    }

    /// Move the condition at `from` to `to`
    pub fn move_condition(&self, from: usize, to: usize) -> EngineResult<()> {
        let mut data = self.data();
        let len = data.conditions.len();
        if from >= len || to >= len {
            return Err(EngineError::IndexOutOfRange {
                index: from.max(to),
                len,
            });
        }
        let condition = data.conditions.remove(from);
        data.conditions.insert(to, condition);
        data.update_condition_indices();
        Ok(())
    }

    /// Append an action to `list`
    pub fn push_action(&self, list: ActionList, action: Arc<ActionSegment>) {
        let mut data = self.data();
        data.action_list_mut(list).push(action);
        data.update_action_indices(list);
    }

    /// Insert an action into `list` at `index`
    pub fn insert_action(
        &self,
        list: ActionList,
        index: usize,
        action: Arc<ActionSegment>,
    ) -> EngineResult<()> {
        let mut data = self.data();
        let actions = data.action_list_mut(list);
        let len = actions.len();
        if index > len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        actions.insert(index, action);
        data.update_action_indices(list);
        Ok(())
    }

    /// Remove and return the action of `list` at `index`
    pub fn remove_action(&self, list: ActionList, index: usize) -> EngineResult<Arc<ActionSegment>> {
        let mut data = self.data();
        let actions = data.action_list_mut(list);
        let len = actions.len();
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        let removed = actions.remove(index);
        data.update_action_indices(list);
        Ok(removed)
    }

    /// Move the action of `list` at `from` to `to`
    pub fn move_action(&self, list: ActionList, from: usize, to: usize) -> EngineResult<()> {
        let mut data = self.data();
        let actions = data.action_list_mut(list);
        let len = actions.len();
        if from >= len || to >= len {
            return Err(EngineError::IndexOutOfRange {
                index: from.max(to),
                len,
            });
        }
        let action = actions.remove(from);
        actions.insert(to, action);
        data.update_action_indices(list);
        Ok(())
    }

    /// Temp variables readable by the segment at `requester`
    ///
    /// Only segments that run before the requester in one evaluation are
    /// visible: earlier conditions for a condition, all conditions plus
    /// earlier entries of the same branch for an action.
    pub fn temp_vars_for(&self, requester: SegmentPosition) -> Vec<TempVariable> {
        let (conditions, actions, else_actions) = {
            let data = self.data();
            (
                data.conditions.clone(),
                data.actions.clone(),
                data.else_actions.clone(),
            )
        };

        let (condition_limit, branch, branch_limit) = match requester {
            SegmentPosition::Condition(index) => (index, &actions, 0),
            SegmentPosition::Action(index) => (conditions.len(), &actions, index),
            SegmentPosition::ElseAction(index) => (conditions.len(), &else_actions, index),
        };

        let from_conditions = conditions
            .iter()
            .filter(|c| c.base().index() < condition_limit)
            .flat_map(|c| c.base().temp_vars());
        let from_branch = branch
            .iter()
            .filter(|a| a.base().index() < branch_limit)
            .flat_map(|a| a.base().temp_vars());
        from_conditions.chain(from_branch).collect()
    }

    /// Every temp variable of every segment
    pub fn all_temp_vars(&self) -> Vec<TempVariable> {
        let data = self.data();
        let conditions = data.conditions.iter().map(|c| c.base());
        let actions = data
            .actions
            .iter()
            .chain(data.else_actions.iter())
            .map(|a| a.base());
        conditions
            .chain(actions)
            .flat_map(|base| base.temp_vars())
            .collect()
    }

    /// Mark every temp variable value of this macro as stale
    pub fn invalidate_temp_vars(&self) {
        let data = self.data();
        for condition in &data.conditions {
            condition.base().invalidate_temp_vars();
        }
        for action in data.actions.iter().chain(data.else_actions.iter()) {
            action.base().invalidate_temp_vars();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::condition::Condition;
    use crate::segment::{Segment, SegmentContext};
    use crate::temp_var::TempVarSpec;
    use crate::test_support::{add_action, add_condition, CountingAction};

    /// Segment publishing one temp variable named after itself
    struct Tagged(&'static str);

    impl Segment for Tagged {
        fn temp_vars(&self) -> Vec<TempVarSpec> {
            vec![TempVarSpec::new(self.0, self.0, "")]
        }
    }

    impl Condition for Tagged {
        fn check(&mut self, _ctx: &SegmentContext<'_>) -> bool {
            true
        }
    }

    impl Action for Tagged {
        fn perform(&mut self, _ctx: &SegmentContext<'_>) -> bool {
            true
        }
    }

    fn visible(m: &Macro, requester: SegmentPosition) -> Vec<String> {
        m.temp_vars_for(requester)
            .iter()
            .map(|var| var.id().to_string())
            .collect()
    }

    fn assert_positions(m: &Macro) {
        for (index, condition) in m.conditions().iter().enumerate() {
            assert_eq!(condition.base().index(), index);
        }
        for (index, action) in m.actions().iter().enumerate() {
            assert_eq!(action.base().index(), index);
        }
        for (index, action) in m.else_actions().iter().enumerate() {
            assert_eq!(action.base().index(), index);
        }
    }

    #[test]
    fn test_temp_vars_follow_evaluation_order() {
        let m = Macro::new("m");
        for (tag, logic) in [("c0", Logic::RootNone), ("c1", Logic::And), ("c2", Logic::Or)] {
            let segment = ConditionSegment::new(tag, Arc::downgrade(&m), Box::new(Tagged(tag)));
            m.push_condition(segment, logic);
        }
        for (tag, list) in [
            ("a0", ActionList::Actions),
            ("a1", ActionList::Actions),
            ("e0", ActionList::ElseActions),
        ] {
            let segment = ActionSegment::new(tag, Arc::downgrade(&m), Box::new(Tagged(tag)));
            m.push_action(list, segment);
        }

        assert!(visible(&m, SegmentPosition::Condition(0)).is_empty());
        assert_eq!(visible(&m, SegmentPosition::Condition(1)), ["c0"]);
        assert_eq!(visible(&m, SegmentPosition::Action(0)), ["c0", "c1", "c2"]);
        assert_eq!(
            visible(&m, SegmentPosition::Action(1)),
            ["c0", "c1", "c2", "a0"]
        );
        assert_eq!(
            visible(&m, SegmentPosition::ElseAction(0)),
            ["c0", "c1", "c2"]
        );
        assert_eq!(m.all_temp_vars().len(), 6);
    }

    #[test]
    fn test_move_condition_reindexes_and_coerces_logic() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNot, true);
        add_condition(&m, Logic::And, true);
        add_condition(&m, Logic::Or, true);
        let before = m.conditions();

        m.move_condition(0, 2).unwrap();
        let after = m.conditions();
        assert_positions(&m);
        assert!(Arc::ptr_eq(&after[0], &before[1]));
        assert!(Arc::ptr_eq(&after[2], &before[0]));
        assert_eq!(after[0].logic(), Logic::RootNone);
        assert_eq!(after[1].logic(), Logic::Or);
        assert_eq!(after[2].logic(), Logic::None);

        assert!(matches!(
            m.move_condition(0, 3),
            Err(EngineError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_insert_and_remove_condition_keep_positions() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, true);
        add_condition(&m, Logic::And, true);

        let first = ConditionSegment::new("x", Arc::downgrade(&m), Box::new(Tagged("x")));
        m.insert_condition(0, first.clone(), Logic::RootNot).unwrap();
        assert_positions(&m);
        let conditions = m.conditions();
        assert!(Arc::ptr_eq(&conditions[0], &first));
        assert_eq!(conditions[0].logic(), Logic::RootNot);
        assert_eq!(conditions[1].logic(), Logic::None);

        m.remove_condition(0).unwrap();
        assert_positions(&m);
        assert_eq!(m.conditions()[0].logic(), Logic::RootNone);
        assert!(m.remove_condition(5).is_err());
    }

    #[test]
    fn test_action_edits_keep_positions() {
        let m = Macro::new("m");
        add_action(&m, ActionList::Actions, CountingAction::new(true));
        add_action(&m, ActionList::Actions, CountingAction::new(true));
        add_action(&m, ActionList::ElseActions, CountingAction::new(true));

        let inserted = ActionSegment::new("x", Arc::downgrade(&m), Box::new(Tagged("x")));
        m.insert_action(ActionList::Actions, 1, inserted.clone())
            .unwrap();
        assert_positions(&m);
        assert!(Arc::ptr_eq(&m.actions()[1], &inserted));
        assert_eq!(m.else_actions()[0].base().index(), 0);

        let removed = m.remove_action(ActionList::Actions, 0).unwrap();
        assert_positions(&m);
        assert_eq!(m.actions().len(), 2);
        assert!(Arc::ptr_eq(&m.actions()[0], &inserted));
        assert!(!m.actions().iter().any(|a| Arc::ptr_eq(a, &removed)));

        m.move_action(ActionList::Actions, 0, 1).unwrap();
        assert_positions(&m);
        assert!(Arc::ptr_eq(&m.actions()[1], &inserted));
        assert!(m
            .insert_action(ActionList::ElseActions, 3, inserted)
            .is_err());
    }
}
