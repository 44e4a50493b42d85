//! Action execution and thread bookkeeping

use super::Macro;
use crate::config::OnChangePolicy;
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Marks a run as finished when dropped, also on panic
struct DoneGuard<'a>(&'a AtomicBool);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Macro {
    /// Run the action branch selected by `matched`
    ///
    /// Returns false if the run failed or was refused. A run is refused
    /// while a previous one is still active unless the macro is configured
    /// to stop it; forced parallel requests report refusal as success.
    pub fn perform_actions(
        self: &Arc<Self>,
        matched: bool,
        force_parallel: bool,
        ignore_pause: bool,
    ) -> bool {
        let (name, settings, policy) = {
            let data = self.data();
            (
                data.name.clone(),
                data.settings.clone(),
                data.on_change_policy,
            )
        };

        if self
            .done
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if !settings.stop_actions_if_not_done {
                debug!(macro_name = %name, "previous run not done");
                return !force_parallel;
            }
            self.stop();
            info!(macro_name = %name, "stopped previous run to rerun actions");
            self.done.store(false, Ordering::SeqCst);
        }

        if force_parallel && policy == OnChangePolicy::Consume {
            self.last_matched.store(matched, Ordering::SeqCst);
        }

        self.stop.store(false, Ordering::SeqCst);
        let ret = if settings.run_in_parallel || force_parallel {
            self.spawn_runner(matched, ignore_pause, &name)
        } else {
            let _done = DoneGuard(&self.done);
            self.run_actions(matched, ignore_pause, &name)
        };
        self.record_execution();
        ret
    }

    fn spawn_runner(self: &Arc<Self>, matched: bool, ignore_pause: bool, name: &str) -> bool {
        let mac = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("macro-{}", name))
            .spawn(move || {
                let _done = DoneGuard(&mac.done);
                let name = mac.name();
                if !mac.run_actions(matched, ignore_pause, &name) {
                    debug!(macro_name = %name, "background run ended early");
                }
            });

        match spawned {
            Ok(handle) => {
                let previous = lock(&self.runner).replace(handle);
                if let Some(previous) = previous {
                    self.retire_thread(previous);
                }
                true
            }
            Err(e) => {
                error!(macro_name = %name, "failed to spawn action thread: {}", e);
                self.done.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn run_actions(&self, matched: bool, ignore_pause: bool, name: &str) -> bool {
        let actions = if matched {
            info!(macro_name = %name, "running actions");
            self.actions()
        } else {
            info!(macro_name = %name, "running else actions");
            self.else_actions()
        };

        let cancel = self.cancel_token();
        let mut ok = true;
        for action in &actions {
            let enabled = action.is_enabled();
            if enabled {
                ok = action.perform(&cancel, name);
            } else {
                debug!(macro_name = %name, segment_id = %action.id(), "skipping disabled action");
            }

            if !ok || (self.is_paused() && !ignore_pause) || self.stop.load(Ordering::SeqCst) {
                break;
            }
            if enabled {
                action.base().enable_highlight();
            }
        }
        ok
    }

    fn record_execution(&self) {
        let now = Instant::now();
        let parent = {
            let mut data = self.data();
            data.last_execution = Some(now);
            data.parent.upgrade()
        };
        if let Some(group) = parent {
            group.data().last_execution = Some(now);
        }
        let _ = self
            .run_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_add(1)
            });
    }

    /// Whether no run of the action lists is active
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Whether the background action thread is still running
    pub fn is_running_in_background(&self) -> bool {
        lock(&self.runner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether every helper thread has finished
    pub fn helpers_completed(&self) -> bool {
        lock(&self.helpers).iter().all(|handle| handle.is_finished())
    }

    /// Whether background actions and helper threads have all finished
    pub fn parallel_tasks_completed(&self) -> bool {
        !self.is_running_in_background() && self.helpers_completed()
    }

    /// Request all running actions to end and wait for their threads
    ///
    /// Threads are joined unless the caller is that thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.signal.notify_all();

        let current = thread::current().id();
        let helpers = std::mem::take(&mut *lock(&self.helpers));
        for handle in helpers {
            join_thread(handle, current);
        }

        let runner = lock(&self.runner).take();
        if let Some(handle) = runner {
            if handle.thread().id() == current {
                debug!("stop requested from the action thread itself");
                let mut slot = lock(&self.runner);
                if slot.is_none() {
                    *slot = Some(handle);
                }
            } else {
                join_thread(handle, current);
            }
        }
    }

    /// Track a thread started on behalf of an action so stop can join it
    pub fn add_helper_thread(&self, handle: JoinHandle<()>) {
        let mut helpers = lock(&self.helpers);
        match helpers.iter_mut().find(|h| h.is_finished()) {
            Some(slot) => {
                let finished = std::mem::replace(slot, handle);
                if finished.join().is_err() {
                    warn!("helper thread panicked");
                }
            }
            None => helpers.push(handle),
        }
    }

    fn retire_thread(&self, handle: JoinHandle<()>) {
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("action thread panicked");
            }
        } else {
            self.add_helper_thread(handle);
        }
    }
}

impl Drop for Macro {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_thread(handle: JoinHandle<()>, current: ThreadId) {
    if handle.thread().id() == current {
        return;
    }
    if handle.join().is_err() {
        warn!("action thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::ActionList;
    use crate::test_support::{add_action, add_condition, CountingAction, WaitAction};
    use macro_core::Logic;
    use std::time::Duration;

    fn wait_until(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_serial_run_counts_and_highlights() {
        let m = Macro::new("m");
        let first = add_action(&m, ActionList::Actions, CountingAction::new(true));
        let second = add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(m.perform_actions(true, false, false));
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        assert_eq!(m.run_count(), 1);
        assert!(m.is_done());
        assert!(m.last_execution_time().is_some());
        assert!(m.actions()[0].base().take_highlight());
    }

    #[test]
    fn test_failed_action_aborts_run() {
        let m = Macro::new("m");
        let failing = add_action(&m, ActionList::Actions, CountingAction::new(false));
        let after = add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(!m.perform_actions(true, false, false));
        assert_eq!(failing.count(), 1);
        assert_eq!(after.count(), 0);
        assert_eq!(m.run_count(), 1);
    }

    #[test]
    fn test_else_branch_runs_when_unmatched() {
        let m = Macro::new("m");
        let matched = add_action(&m, ActionList::Actions, CountingAction::new(true));
        let otherwise = add_action(&m, ActionList::ElseActions, CountingAction::new(true));

        assert!(m.perform_actions(false, false, false));
        assert_eq!(matched.count(), 0);
        assert_eq!(otherwise.count(), 1);
    }

    #[test]
    fn test_disabled_action_is_skipped() {
        let m = Macro::new("m");
        let disabled = add_action(&m, ActionList::Actions, CountingAction::new(true));
        let enabled = add_action(&m, ActionList::Actions, CountingAction::new(true));
        m.actions()[0].set_enabled(false);

        assert!(m.perform_actions(true, false, false));
        assert_eq!(disabled.count(), 0);
        assert_eq!(enabled.count(), 1);
        assert!(!m.actions()[0].base().take_highlight());
    }

    #[test]
    fn test_pause_ends_run_unless_ignored() {
        let m = Macro::new("m");
        let first = add_action(&m, ActionList::Actions, CountingAction::new(true));
        let second = add_action(&m, ActionList::Actions, CountingAction::new(true));
        m.set_paused(true);

        assert!(m.perform_actions(true, false, false));
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);

        assert!(m.perform_actions(true, false, true));
        assert_eq!(first.count(), 2);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_refuses_rerun_while_not_done() {
        let m = Macro::new("m");
        m.update_settings(|s| s.run_in_parallel = true);
        add_action(&m, ActionList::Actions, WaitAction::new(Duration::from_secs(30)));
        let counter = add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(m.perform_actions(true, false, false));
        assert!(!m.is_done());
        assert!(m.perform_actions(true, false, false));
        assert!(!m.perform_actions(true, true, false));
        assert_eq!(m.run_count(), 1);

        m.stop();
        assert!(m.is_done());
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_stop_if_not_done_restarts_run() {
        let m = Macro::new("m");
        m.update_settings(|s| {
            s.run_in_parallel = true;
            s.stop_actions_if_not_done = true;
        });
        add_action(&m, ActionList::Actions, WaitAction::new(Duration::from_secs(30)));

        assert!(m.perform_actions(true, false, false));
        let start = Instant::now();
        assert!(m.perform_actions(true, false, false));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(m.run_count(), 2);
        assert!(m.is_running_in_background());

        m.stop();
        assert!(m.is_done());
        assert!(!m.is_running_in_background());
    }

    #[test]
    fn test_parallel_run_completes() {
        let m = Macro::new("m");
        m.update_settings(|s| s.run_in_parallel = true);
        let counter = add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(m.perform_actions(true, false, false));
        assert!(wait_until(|| m.is_done()));
        assert_eq!(counter.count(), 1);
        assert!(!m.is_running_in_background());
    }

    #[test]
    fn test_forced_run_consumes_transition() {
        let m = Macro::new("m");
        m.update_settings(|s| s.on_change = true);
        m.set_on_change_policy(OnChangePolicy::Consume);
        let flag = add_condition(&m, Logic::RootNone, true);
        add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(m.perform_actions(true, true, true));
        assert!(wait_until(|| m.is_done()));

        assert!(m.check_match());
        assert!(!m.state_changed());
        assert!(!m.should_run_actions());
        flag.set(false);
        assert!(!m.check_match());
        assert!(m.state_changed());
    }

    #[test]
    fn test_forced_run_independent_of_transition() {
        let m = Macro::new("m");
        m.update_settings(|s| s.on_change = true);
        add_condition(&m, Logic::RootNone, true);
        add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(m.perform_actions(true, true, true));
        assert!(wait_until(|| m.is_done()));

        assert!(m.check_match());
        assert!(m.state_changed());
        assert!(m.should_run_actions());
    }

    #[test]
    fn test_run_updates_parent_execution_time() {
        let group = Macro::new_group("g", Arc::new(macro_core::WaitSignal::new()));
        let m = Macro::new("m");
        m.set_parent(Some(&group));
        add_action(&m, ActionList::Actions, CountingAction::new(true));

        assert!(group.last_execution_time().is_none());
        m.perform_actions(true, false, false);
        assert_eq!(group.last_execution_time(), m.last_execution_time());
    }

    #[test]
    fn test_helper_threads_are_joined_on_stop() {
        let m = Macro::new("m");
        let token = m.cancel_token();
        let handle = thread::spawn(move || {
            token.wait_for(Duration::from_secs(30));
        });
        m.add_helper_thread(handle);
        assert!(!m.helpers_completed());

        m.stop();
        assert!(m.helpers_completed());
    }
}
