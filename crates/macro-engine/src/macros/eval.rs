//! Condition evaluation

use super::Macro;
use crate::condition::ConditionSegment;
use macro_core::{CancelToken, Logic};
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

impl Macro {
    /// Evaluate the conditions, honoring the paused flag
    pub fn check_match(&self) -> bool {
        self.check_conditions(false)
    }

    /// Evaluate every condition in order and record the match state
    ///
    /// A paused macro (unless `ignore_pause`) stops evaluating and records
    /// no match. Groups never match.
    pub fn check_conditions(&self, ignore_pause: bool) -> bool {
        let (name, conditions, short_circuit, on_change) = {
            let data = self.data();
            if data.group.is_some() {
                return false;
            }
            (
                data.name.clone(),
                data.conditions.clone(),
                data.settings.use_short_circuit_evaluation,
                data.settings.on_change,
            )
        };

        let cancel = self.cancel_token();
        let mut matched = false;
        for condition in &conditions {
            if self.is_paused() && !ignore_pause {
                debug!(macro_name = %name, "macro is paused");
                matched = false;
                break;
            }
            matched = fold_condition(condition, matched, short_circuit, &cancel, &name);
        }

        debug!(macro_name = %name, matched, "conditions checked");

        let changed = self.last_matched.load(Ordering::SeqCst) != matched;
        self.state_changed.store(changed, Ordering::SeqCst);
        if !changed && on_change {
            self.on_change_prevented.store(true, Ordering::SeqCst);
        }
        self.matched.store(matched, Ordering::SeqCst);
        self.last_matched.store(matched, Ordering::SeqCst);
        self.data().last_check = Some(Instant::now());
        matched
    }

    /// Whether a custom check interval allows checking at `now`
    pub fn conditions_should_be_checked(&self, now: Instant) -> bool {
        let data = self.data();
        if !data.settings.use_custom_condition_check_interval {
            return true;
        }
        match data.last_check {
            None => true,
            Some(last) => {
                now.saturating_duration_since(last)
                    >= data.settings.custom_condition_check_interval.as_std()
            }
        }
    }

    /// Whether the last check calls for running a branch now
    pub fn should_run_actions(&self) -> bool {
        let (name, has_actions, has_else, on_change) = {
            let data = self.data();
            (
                data.name.clone(),
                !data.actions.is_empty(),
                !data.else_actions.is_empty(),
                data.settings.on_change,
            )
        };
        let matched = self.matched();
        let changed = self.state_changed();

        if on_change && !changed {
            if matched && has_actions {
                debug!(macro_name = %name, "skip actions (on change)");
            }
            if !matched && has_else {
                debug!(macro_name = %name, "skip else actions (on change)");
            }
        }

        !self.is_paused() && (matched || has_else) && (!on_change || changed)
    }
}

fn fold_condition(
    condition: &Arc<ConditionSegment>,
    running: bool,
    short_circuit: bool,
    cancel: &CancelToken,
    macro_name: &str,
) -> bool {
    let outcome = Cell::new(None);
    let evaluate = || {
        let result = condition.evaluate(cancel, macro_name);
        outcome.set(Some(result));
        result
    };

    let logic = condition.logic();
    if logic == Logic::None {
        debug!(macro_name = %macro_name, segment_id = %condition.id(), "ignoring condition");
        if !short_circuit {
            evaluate();
        }
        return running;
    }

    let result = if short_circuit {
        logic.apply_with(running, evaluate)
    } else {
        logic.apply(running, evaluate())
    };

    match outcome.get() {
        Some(raw) => {
            if raw != logic.is_negation() {
                condition.base().enable_highlight();
            }
            debug!(macro_name = %macro_name, segment_id = %condition.id(), raw, "condition evaluated");
        }
        None => {
            debug!(
                macro_name = %macro_name,
                segment_id = %condition.id(),
                "condition evaluation skipped (short circuit)"
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::ActionList;
    use crate::test_support::{add_action, add_condition, CountingAction};
    use std::time::Duration;

    #[test]
    fn test_and_or_combination() {
        let m = Macro::new("m");
        let a = add_condition(&m, Logic::RootNone, true);
        let b = add_condition(&m, Logic::And, false);
        let c = add_condition(&m, Logic::Or, true);

        assert!(m.check_match());
        c.set(false);
        assert!(!m.check_match());
        b.set(true);
        assert!(m.check_match());
        a.set(false);
        assert!(!m.check_match());
    }

    #[test]
    fn test_empty_condition_list_does_not_match() {
        let m = Macro::new("m");
        assert!(!m.check_match());
        assert!(m.last_check_time().is_some());
    }

    #[test]
    fn test_short_circuit_skips_evaluation() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, false);
        let skipped = add_condition(&m, Logic::And, true);

        m.check_match();
        assert_eq!(skipped.checks(), 1);

        m.update_settings(|s| s.use_short_circuit_evaluation = true);
        m.check_match();
        assert_eq!(skipped.checks(), 1);
    }

    #[test]
    fn test_none_logic_still_evaluates_without_short_circuit() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, true);
        let ignored = add_condition(&m, Logic::None, false);

        assert!(m.check_match());
        assert_eq!(ignored.checks(), 1);

        m.update_settings(|s| s.use_short_circuit_evaluation = true);
        assert!(m.check_match());
        assert_eq!(ignored.checks(), 1);
    }

    #[test]
    fn test_highlight_follows_raw_result() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, true);
        add_condition(&m, Logic::AndNot, false);
        add_condition(&m, Logic::Or, false);

        m.check_match();
        let conditions = m.conditions();
        assert!(conditions[0].base().take_highlight());
        assert!(conditions[1].base().take_highlight());
        assert!(!conditions[2].base().take_highlight());
    }

    #[test]
    fn test_paused_macro_does_not_match() {
        let m = Macro::new("m");
        let flag = add_condition(&m, Logic::RootNone, true);
        m.set_paused(true);

        assert!(!m.check_match());
        assert_eq!(flag.checks(), 0);
        assert!(m.check_conditions(true));
        assert_eq!(flag.checks(), 1);
    }

    #[test]
    fn test_group_never_matches() {
        let group = Macro::new_group("g", Arc::new(macro_core::WaitSignal::new()));
        assert!(!group.check_match());
        assert!(group.last_check_time().is_none());
    }

    #[test]
    fn test_on_change_runs_only_on_transition() {
        let m = Macro::new("m");
        m.update_settings(|s| s.on_change = true);
        let flag = add_condition(&m, Logic::RootNone, true);
        add_action(&m, ActionList::Actions, CountingAction::new(true));

        m.check_match();
        assert!(m.should_run_actions());

        m.check_match();
        assert!(!m.should_run_actions());
        assert!(m.take_on_change_prevented());
        assert!(!m.take_on_change_prevented());

        flag.set(false);
        m.check_match();
        assert!(m.state_changed());
        assert!(!m.should_run_actions());
    }

    #[test]
    fn test_else_actions_run_when_unmatched() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, false);
        m.check_match();
        assert!(!m.should_run_actions());

        add_action(&m, ActionList::ElseActions, CountingAction::new(true));
        assert!(m.should_run_actions());

        m.set_paused(true);
        assert!(!m.should_run_actions());
    }

    #[test]
    fn test_custom_check_interval() {
        let m = Macro::new("m");
        let now = Instant::now();
        assert!(m.conditions_should_be_checked(now));

        m.update_settings(|s| {
            s.use_custom_condition_check_interval = true;
            s.custom_condition_check_interval = macro_core::Duration::new(10.0);
        });
        assert!(m.conditions_should_be_checked(now));

        m.check_match();
        let checked = m.last_check_time().unwrap_or(now);
        assert!(!m.conditions_should_be_checked(checked + Duration::from_secs(5)));
        assert!(m.conditions_should_be_checked(checked + Duration::from_secs(11)));
    }

    #[test]
    fn test_condition_sets_temp_var() {
        let m = Macro::new("m");
        add_condition(&m, Logic::RootNone, true);
        m.check_match();

        let vars = m.all_temp_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].value().as_deref(), Some("true"));

        m.invalidate_temp_vars();
        assert_eq!(m.all_temp_vars()[0].value(), None);
    }
}
