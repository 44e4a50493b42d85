//! Segment base shared by conditions and actions
//!
//! A segment is one entry of a macro's condition, action or else-action list.
//! [`SegmentBase`] holds what every segment has regardless of kind: the
//! factory id, list position, enable and label state, published temp
//! variables and the optional variable value slot. The kind specific part
//! implements [`Segment`] plus either [`Condition`](crate::Condition) or
//! [`Action`](crate::Action).

use crate::action::ActionSegment;
use crate::condition::ConditionSegment;
use crate::error::{EngineError, EngineResult};
use crate::macro_ref::MacroLookup;
use crate::macros::Macro;
use crate::sync::lock;
use crate::temp_var::{TempVarSpec, TempVariable};
use macro_core::{CancelToken, SegmentSettings, WaitOutcome};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Behavior shared by condition and action implementations
pub trait Segment: Send + 'static {
    /// Write implementation settings into the persisted segment object
    fn save(&self, _obj: &mut Map<String, Value>) {}

    /// Read implementation settings from the persisted segment object
    fn load(&mut self, _obj: &Map<String, Value>) {}

    /// Resolve references once the whole macro collection is loaded
    fn post_load(&mut self, _macros: &MacroLookup<'_>) {}

    /// Temp variables this segment publishes with its current settings
    fn temp_vars(&self) -> Vec<TempVarSpec> {
        Vec::new()
    }

    /// One line summary used in logs
    fn short_desc(&self) -> String {
        String::new()
    }

    /// Whether this segment can expose a variable value to consumers
    fn supports_variable_value(&self) -> bool {
        false
    }

    /// Verbatim persisted object for segments that only carry it through
    fn raw_payload(&self) -> Option<&Value> {
        None
    }
}

/// Which list a segment lives in and where
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentPosition {
    Condition(usize),
    Action(usize),
    ElseAction(usize),
}

/// Non-owning reference to a segment
#[derive(Debug, Clone)]
pub enum SegmentRef {
    Condition(Weak<ConditionSegment>),
    Action(Weak<ActionSegment>),
}

impl SegmentRef {
    /// A reference that never resolves
    pub fn detached() -> Self {
        SegmentRef::Condition(Weak::new())
    }

    /// Run `f` on the segment base if the segment still exists
    pub fn with_base<R>(&self, f: impl FnOnce(&SegmentBase) -> R) -> Option<R> {
        match self {
            SegmentRef::Condition(weak) => weak.upgrade().map(|s| f(s.base())),
            SegmentRef::Action(weak) => weak.upgrade().map(|s| f(s.base())),
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            SegmentRef::Condition(weak) => weak.strong_count() > 0,
            SegmentRef::Action(weak) => weak.strong_count() > 0,
        }
    }

    /// Whether both references point at the same segment
    pub fn ptr_eq(&self, other: &SegmentRef) -> bool {
        match (self, other) {
            (SegmentRef::Condition(a), SegmentRef::Condition(b)) => a.ptr_eq(b),
            (SegmentRef::Action(a), SegmentRef::Action(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct VariableState {
    refs: AtomicUsize,
    value: Mutex<String>,
}

/// Reference-counted slot exposing a segment's effective value
///
/// The owning segment only computes and stores its value while at least one
/// consumer holds a [`VariableValueRef`].
#[derive(Debug, Default)]
pub struct VariableSlot {
    supported: bool,
    state: Arc<VariableState>,
}

impl VariableSlot {
    fn new(supported: bool) -> Self {
        Self {
            supported,
            state: Arc::default(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Register a consumer; `None` if the segment has no variable value
    pub fn acquire(&self) -> Option<VariableValueRef> {
        if !self.supported {
            return None;
        }
        self.state.refs.fetch_add(1, Ordering::SeqCst);
        Some(VariableValueRef {
            state: self.state.clone(),
        })
    }

    /// Number of active consumers
    pub fn consumers(&self) -> usize {
        self.state.refs.load(Ordering::SeqCst)
    }

    /// Whether the owning segment should compute its value
    pub fn is_wanted(&self) -> bool {
        self.supported && self.consumers() > 0
    }

    /// Last stored value; empty when unsupported
    pub fn value(&self) -> String {
        if !self.supported {
            return String::new();
        }
        lock(&self.state.value).clone()
    }

    fn set(&self, value: String) -> bool {
        if !self.is_wanted() {
            return false;
        }
        *lock(&self.state.value) = value;
        true
    }
}

/// Consumer handle on a [`VariableSlot`]; releases its reference on drop
#[derive(Debug)]
pub struct VariableValueRef {
    state: Arc<VariableState>,
}

impl VariableValueRef {
    pub fn value(&self) -> String {
        lock(&self.state.value).clone()
    }
}

impl Drop for VariableValueRef {
    fn drop(&mut self) {
        self.state.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State every segment carries
#[derive(Debug)]
pub struct SegmentBase {
    id: String,
    owner: Weak<Macro>,
    index: AtomicUsize,
    highlight: AtomicBool,
    settings: Mutex<SegmentSettings>,
    temp_vars: Mutex<Vec<TempVariable>>,
    variable: VariableSlot,
}

impl SegmentBase {
    pub(crate) fn new(id: &str, owner: Weak<Macro>, supports_variable_value: bool) -> Self {
        Self {
            id: id.to_string(),
            owner,
            index: AtomicUsize::new(0),
            highlight: AtomicBool::new(false),
            settings: Mutex::new(SegmentSettings::default()),
            temp_vars: Mutex::new(Vec::new()),
            variable: VariableSlot::new(supports_variable_value),
        }
    }

    /// Factory id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The macro owning this segment, if it still exists
    pub fn owner(&self) -> Option<Arc<Macro>> {
        self.owner.upgrade()
    }

    /// Position in the owning list
    pub fn index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.settings).enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.settings).enabled = enabled;
    }

    pub fn settings(&self) -> SegmentSettings {
        lock(&self.settings).clone()
    }

    pub fn set_settings(&self, settings: SegmentSettings) {
        *lock(&self.settings) = settings;
    }

    /// Custom label if one is in use
    pub fn label(&self) -> Option<String> {
        let settings = lock(&self.settings);
        settings
            .use_custom_label
            .then(|| settings.custom_label.clone())
    }

    /// Mark this segment as having contributed to the last outcome
    pub fn enable_highlight(&self) {
        self.highlight.store(true, Ordering::SeqCst);
    }

    /// Read and clear the highlight mark
    pub fn take_highlight(&self) -> bool {
        self.highlight.swap(false, Ordering::SeqCst)
    }

    /// Snapshot of the published temp variables
    pub fn temp_vars(&self) -> Vec<TempVariable> {
        lock(&self.temp_vars).clone()
    }

    pub fn temp_var(&self, id: &str) -> Option<TempVariable> {
        lock(&self.temp_vars).iter().find(|v| v.id() == id).cloned()
    }

    /// Mark every published value as stale
    pub fn invalidate_temp_vars(&self) {
        for var in lock(&self.temp_vars).iter_mut() {
            var.invalidate();
        }
    }

    pub fn variable(&self) -> &VariableSlot {
        &self.variable
    }

    fn set_temp_var_value(&self, id: &str, value: String) {
        let mut vars = lock(&self.temp_vars);
        match vars.iter_mut().find(|v| v.id() == id) {
            Some(var) => var.set_value(value),
            None => debug!(segment_id = %self.id, temp_var = %id, "temp variable not declared"),
        }
    }

    /// Replace the declared temp variables, keeping values of kept ids
    pub(crate) fn declare_temp_vars(&self, specs: Vec<TempVarSpec>, owner: SegmentRef) {
        let mut vars = lock(&self.temp_vars);
        let declared = specs
            .into_iter()
            .map(|spec| {
                let mut var = TempVariable::new(spec, owner.clone());
                if let Some(previous) = vars.iter().find(|v| v.id() == var.id()) {
                    var.carry_state_from(previous);
                }
                var
            })
            .collect();
        *vars = declared;
    }

    pub(crate) fn load_settings(&self, obj: &Map<String, Value>) {
        *lock(&self.settings) = SegmentSettings::load(obj);
    }

    pub(crate) fn save_settings(&self, obj: &mut Map<String, Value>) {
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        lock(&self.settings).save(obj);
    }
}

/// What a segment may touch while it runs
///
/// Only the segment's own execution path receives a context, so only it can
/// publish temp variable values for itself.
pub struct SegmentContext<'a> {
    base: &'a SegmentBase,
    cancel: &'a CancelToken,
}

impl<'a> SegmentContext<'a> {
    pub(crate) fn new(base: &'a SegmentBase, cancel: &'a CancelToken) -> Self {
        Self { base, cancel }
    }

    pub fn segment_id(&self) -> &str {
        self.base.id()
    }

    pub fn index(&self) -> usize {
        self.base.index()
    }

    /// The macro this segment belongs to
    pub fn owner(&self) -> Option<Arc<Macro>> {
        self.base.owner()
    }

    pub fn cancel(&self) -> &CancelToken {
        self.cancel
    }

    /// Block for `duration` unless the macro is stopped or waits are aborted
    pub fn wait_for(&self, duration: Duration) -> WaitOutcome {
        self.cancel.wait_for(duration)
    }

    /// Publish a value for one of this segment's declared temp variables
    pub fn set_temp_var(&self, id: &str, value: impl Into<String>) {
        self.base.set_temp_var_value(id, value.into());
    }

    /// Whether any consumer currently wants this segment's variable value
    pub fn wants_variable_value(&self) -> bool {
        self.base.variable.is_wanted()
    }

    /// Store the variable value; ignored while nobody consumes it
    pub fn set_variable_value(&self, value: impl Into<String>) {
        self.base.variable.set(value.into());
    }

    /// Run `f` on a helper thread joined when the owning macro stops
    pub fn spawn_helper<F>(&self, name: &str, f: F) -> EngineResult<()>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let owner = self
            .owner()
            .ok_or_else(|| EngineError::NotFound(format!("owner of segment {}", self.base.id())))?;
        let token = self.cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(token))?;
        owner.add_helper_thread(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_slot_ref_counting() {
        let base = SegmentBase::new("test", Weak::new(), true);
        let token = CancelToken::engine_only(Arc::default());
        let ctx = SegmentContext::new(&base, &token);

        assert!(!ctx.wants_variable_value());
        ctx.set_variable_value("ignored");
        assert_eq!(base.variable().value(), "");

        let consumer = base.variable().acquire().unwrap();
        let second = base.variable().acquire().unwrap();
        assert_eq!(base.variable().consumers(), 2);
        ctx.set_variable_value("42");
        assert_eq!(consumer.value(), "42");

        drop(consumer);
        drop(second);
        assert_eq!(base.variable().consumers(), 0);
        assert!(!ctx.wants_variable_value());
    }

    #[test]
    fn test_unsupported_variable_slot() {
        let base = SegmentBase::new("test", Weak::new(), false);
        assert!(base.variable().acquire().is_none());
        assert!(!base.variable().is_wanted());
    }

    #[test]
    fn test_declare_temp_vars_keeps_values() {
        let base = SegmentBase::new("test", Weak::new(), false);
        let token = CancelToken::engine_only(Arc::default());
        base.declare_temp_vars(
            vec![TempVarSpec::new("a", "A", ""), TempVarSpec::new("b", "B", "")],
            SegmentRef::detached(),
        );
        let ctx = SegmentContext::new(&base, &token);
        ctx.set_temp_var("a", "1");
        ctx.set_temp_var("undeclared", "x");

        base.declare_temp_vars(vec![TempVarSpec::new("a", "A", "")], SegmentRef::detached());
        assert_eq!(base.temp_vars().len(), 1);
        assert_eq!(base.temp_var("a").unwrap().value().as_deref(), Some("1"));

        base.invalidate_temp_vars();
        assert_eq!(base.temp_var("a").unwrap().value(), None);
    }

    #[test]
    fn test_highlight_is_taken_once() {
        let base = SegmentBase::new("test", Weak::new(), false);
        base.enable_highlight();
        assert!(base.take_highlight());
        assert!(!base.take_highlight());
    }
}
