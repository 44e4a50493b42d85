//! The engine context
//!
//! [`Engine`] owns the macro collection behind the shared lock, the two
//! segment registries and the engine-wide wait signal. A host drives it by
//! calling [`Engine::tick`] once per interval.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::group;
use crate::macro_ref::MacroLookup;
use crate::macros::Macro;
use crate::registry::{ActionRegistry, ConditionRegistry};
use crate::sync::lock;
use macro_core::WaitSignal;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Guard over the macro collection
pub type MacroList<'a> = MutexGuard<'a, Vec<Arc<Macro>>>;

/// Macro collection, registries and scheduler state
pub struct Engine {
    config: EngineConfig,
    macros: Mutex<Vec<Arc<Macro>>>,
    conditions: ConditionRegistry,
    actions: ActionRegistry,
    signal: Arc<WaitSignal>,
    first_interval: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("macros", &self.lock().len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            macros: Mutex::new(Vec::new()),
            conditions: ConditionRegistry::new(),
            actions: ActionRegistry::new(),
            signal: Arc::new(WaitSignal::new()),
            first_interval: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Signal shared by every blocking wait of this engine's macros
    pub fn signal(&self) -> &Arc<WaitSignal> {
        &self.signal
    }

    /// Acquire the shared lock
    pub fn lock(&self) -> MacroList<'_> {
        lock(&self.macros)
    }

    /// Snapshot of the collection
    pub fn macros(&self) -> Vec<Arc<Macro>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Macro>> {
        MacroLookup::new(&self.lock()).find(name).cloned()
    }

    /// Run `f` with a name lookup over the locked collection
    pub fn with_lookup<R>(&self, f: impl FnOnce(&MacroLookup<'_>) -> R) -> R {
        let macros = self.lock();
        f(&MacroLookup::new(&macros))
    }

    /// Whether the first tick has not completed yet
    pub fn is_first_interval(&self) -> bool {
        self.first_interval.load(Ordering::SeqCst)
    }

    /// One scheduler interval
    ///
    /// Invalidates temp variables, checks every macro with the lock held and,
    /// if anything may run, executes actions with the lock released. Returns
    /// whether any macro matched or has else actions.
    pub fn tick(&self) -> bool {
        let macros = self.lock();
        self.invalidate_temp_vars(&macros);
        let run = self.check_macros(&macros);
        let macros = if run { self.run_macros(macros) } else { macros };
        drop(macros);
        self.first_interval.store(false, Ordering::SeqCst);
        run
    }

    /// Evaluation pass over every macro
    pub fn check_macros(&self, macros: &[Arc<Macro>]) -> bool {
        let now = Instant::now();
        let mut run = false;
        for m in macros {
            if !m.conditions_should_be_checked(now) {
                debug!(macro_name = %m.name(), "skipping condition check (custom check interval)");
                continue;
            }
            if m.check_match() || m.has_else_actions() {
                run = true;
            }
        }
        run
    }

    /// Execution pass; releases the shared lock while actions run
    pub fn run_macros<'a>(&'a self, macros: MacroList<'a>) -> MacroList<'a> {
        let snapshot = macros.clone();
        drop(macros);

        let first_interval = self.is_first_interval();
        for m in &snapshot {
            if !m.should_run_actions() {
                continue;
            }
            if first_interval && m.settings().skip_exec_on_start {
                info!(macro_name = %m.name(), "skip execution of macro at startup");
                continue;
            }
            debug!(macro_name = %m.name(), "running macro");
            if !m.perform_actions(m.matched(), false, false) {
                warn!(macro_name = %m.name(), "abort macro");
            }
        }

        self.lock()
    }

    /// Invalidate temp variables of macros without background work
    pub fn invalidate_temp_vars(&self, macros: &[Arc<Macro>]) {
        for m in macros {
            if m.parallel_tasks_completed() {
                m.invalidate_temp_vars();
            }
        }
    }

    /// Add an empty macro at the end of the collection
    #[instrument(skip(self))]
    pub fn add_macro(&self, name: &str) -> EngineResult<Arc<Macro>> {
        let mut macros = self.lock();
        if MacroLookup::new(&macros).find(name).is_some() {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        let m = Macro::with_signal(name, self.signal.clone());
        m.set_on_change_policy(self.config.on_change_policy);
        macros.push(Arc::clone(&m));
        info!(macro_name = %name, "added macro");
        Ok(m)
    }

    /// Remove a macro, or a group together with its members
    ///
    /// Removed macros are stopped after the lock is released.
    #[instrument(skip(self))]
    pub fn remove_macro(&self, name: &str) -> EngineResult<()> {
        let removed = {
            let mut macros = self.lock();
            let target = MacroLookup::new(&macros)
                .find(name)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

            let mut removed = vec![Arc::clone(&target)];
            if target.is_group() {
                removed.extend(group::members(&macros, &target));
            } else if let Some(parent) = target.parent() {
                parent.adjust_group_size(false);
            }
            macros.retain(|m| !removed.iter().any(|r| Arc::ptr_eq(m, r)));
            removed
        };

        for m in &removed {
            m.stop();
        }
        info!(macro_name = %name, count = removed.len(), "removed macro");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn rename_macro(&self, name: &str, new_name: &str) -> EngineResult<()> {
        let macros = self.lock();
        let lookup = MacroLookup::new(&macros);
        let target = lookup
            .find(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        if name != new_name && lookup.find(new_name).is_some() {
            return Err(EngineError::DuplicateName(new_name.to_string()));
        }
        target.set_name(new_name);
        Ok(())
    }

    /// Create a group named `name` containing `children`
    #[instrument(skip(self))]
    pub fn create_group(&self, name: &str, children: &[&str]) -> EngineResult<Arc<Macro>> {
        let mut macros = self.lock();
        let lookup = MacroLookup::new(&macros);
        if lookup.find(name).is_some() {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        let members = children
            .iter()
            .map(|child| {
                lookup
                    .find(child)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(child.to_string()))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let g = Macro::new_group(name, self.signal.clone());
        group::create(&mut macros, Arc::clone(&g), &members)?;
        info!(macro_name = %name, size = members.len(), "created group");
        Ok(g)
    }

    /// Erase a group marker, keeping its members ungrouped
    #[instrument(skip(self))]
    pub fn remove_group(&self, name: &str) -> EngineResult<()> {
        let mut macros = self.lock();
        let target = MacroLookup::new(&macros)
            .find(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        group::remove(&mut macros, &target)
    }

    /// Move a macro into `group`, or out of its group with `None`
    #[instrument(skip(self))]
    pub fn move_to_group(&self, name: &str, group: Option<&str>) -> EngineResult<()> {
        let mut macros = self.lock();
        let lookup = MacroLookup::new(&macros);
        let item = lookup
            .find(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let target = match group {
            Some(group) => Some(
                lookup
                    .find(group)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(group.to_string()))?,
            ),
            None => None,
        };
        group::move_to(&mut macros, &item, target.as_ref())
    }

    /// Members of the group named `name`
    pub fn group_members(&self, name: &str) -> EngineResult<Vec<Arc<Macro>>> {
        let macros = self.lock();
        let target = MacroLookup::new(&macros)
            .find(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        if !target.is_group() {
            return Err(EngineError::NotAGroup(name.to_string()));
        }
        Ok(group::members(&macros, &target))
    }

    /// Replace the collection with the macros of `doc`
    ///
    /// Every macro is constructed before any reference is resolved, so
    /// macros may refer to macros that follow them.
    #[instrument(skip(self, doc))]
    pub fn load(&self, doc: &Value) -> EngineResult<()> {
        let obj = doc
            .as_object()
            .ok_or_else(|| EngineError::InvalidDocument("document is not an object".into()))?;
        let entries = match obj.get("macros") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(_) => {
                return Err(EngineError::InvalidDocument(
                    "\"macros\" is not an array".into(),
                ))
            }
        };

        let previous = std::mem::take(&mut *self.lock());
        for m in &previous {
            m.stop();
        }
        drop(previous);

        let mut loaded = Vec::with_capacity(entries.len());
        for entry in entries {
            match Macro::from_json(entry, &self.conditions, &self.actions, self.signal.clone()) {
                Ok(m) => {
                    m.set_on_change_policy(self.config.on_change_policy);
                    loaded.push(m);
                }
                Err(e) => warn!("discarding macro entry: {}", e),
            }
        }

        let loaded = group::resolve(loaded);
        {
            let lookup = MacroLookup::new(&loaded);
            for m in &loaded {
                m.post_load(&lookup);
            }
        }

        info!(count = loaded.len(), "loaded macros");
        *self.lock() = loaded;
        Ok(())
    }

    /// Persisted form of the collection
    pub fn save(&self) -> Value {
        let macros = self.lock();
        let mut doc = Map::new();
        doc.insert(
            "macros".to_string(),
            Value::Array(macros.iter().map(|m| m.save()).collect()),
        );
        Value::Object(doc)
    }

    /// Stop every macro and join its threads
    pub fn stop_all(&self) {
        for m in self.macros() {
            m.stop();
        }
    }

    /// Wake every blocking wait of this engine and keep new waits from
    /// blocking until [`Engine::resume_wait`]
    pub fn abort_wait(&self) {
        self.signal.abort();
    }

    pub fn resume_wait(&self) {
        self.signal.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::ActionList;
    use crate::test_support::{add_action, add_condition, CountingAction};
    use macro_core::Logic;
    use serde_json::json;

    #[test]
    fn test_add_rejects_duplicate_names() {
        let engine = Engine::default();
        engine.add_macro("a").unwrap();
        assert!(matches!(
            engine.add_macro("a"),
            Err(EngineError::DuplicateName(_))
        ));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_tick_runs_matching_macros() {
        let engine = Engine::default();
        let a = engine.add_macro("a").unwrap();
        add_condition(&a, Logic::RootNone, true);
        let ran = add_action(&a, ActionList::Actions, CountingAction::new(true));
        let b = engine.add_macro("b").unwrap();
        add_condition(&b, Logic::RootNone, false);
        let skipped = add_action(&b, ActionList::Actions, CountingAction::new(true));

        assert!(engine.tick());
        assert_eq!(ran.count(), 1);
        assert_eq!(skipped.count(), 0);
        assert!(!engine.is_first_interval());
    }

    #[test]
    fn test_skip_exec_on_start() {
        let engine = Engine::default();
        let m = engine.add_macro("m").unwrap();
        m.update_settings(|s| s.skip_exec_on_start = true);
        add_condition(&m, Logic::RootNone, true);
        let counter = add_action(&m, ActionList::Actions, CountingAction::new(true));

        engine.tick();
        assert_eq!(counter.count(), 0);
        engine.tick();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_tick_releases_lock_while_running() {
        let engine = Arc::new(Engine::default());
        let m = engine.add_macro("m").unwrap();
        add_condition(&m, Logic::RootNone, true);

        struct AddsMacro(Arc<Engine>);
        impl crate::segment::Segment for AddsMacro {}
        impl crate::action::Action for AddsMacro {
            fn perform(&mut self, _ctx: &crate::segment::SegmentContext<'_>) -> bool {
                self.0.add_macro("added").is_ok()
            }
        }
        let action = crate::action::ActionSegment::new(
            "adds",
            Arc::downgrade(&m),
            Box::new(AddsMacro(engine.clone())),
        );
        m.push_action(ActionList::Actions, action);

        engine.tick();
        assert!(engine.get("added").is_some());
        m.remove_action(ActionList::Actions, 0).unwrap();
    }

    #[test]
    fn test_remove_group_removes_members() {
        let engine = Engine::default();
        for name in ["a", "b", "c"] {
            engine.add_macro(name).unwrap();
        }
        engine.create_group("g", &["a", "b"]).unwrap();
        engine.remove_macro("g").unwrap();

        let names: Vec<_> = engine.macros().iter().map(|m| m.name()).collect();
        assert_eq!(names, ["c"]);
    }

    #[test]
    fn test_remove_member_shrinks_group() {
        let engine = Engine::default();
        for name in ["a", "b"] {
            engine.add_macro(name).unwrap();
        }
        let g = engine.create_group("g", &["a", "b"]).unwrap();
        engine.remove_macro("a").unwrap();
        assert_eq!(g.group_size(), 1);
        assert_eq!(engine.group_members("g").unwrap().len(), 1);
    }

    #[test]
    fn test_rename() {
        let engine = Engine::default();
        engine.add_macro("a").unwrap();
        engine.add_macro("b").unwrap();
        assert!(matches!(
            engine.rename_macro("a", "b"),
            Err(EngineError::DuplicateName(_))
        ));
        engine.rename_macro("a", "c").unwrap();
        assert!(engine.get("c").is_some());
        assert!(engine.get("a").is_none());
    }

    #[test]
    fn test_load_rejects_malformed_document() {
        let engine = Engine::default();
        assert!(matches!(
            engine.load(&json!([])),
            Err(EngineError::InvalidDocument(_))
        ));
        assert!(matches!(
            engine.load(&json!({ "macros": 1 })),
            Err(EngineError::InvalidDocument(_))
        ));
        engine.load(&json!({})).unwrap();
        assert!(engine.is_empty());
    }
}
