//! Conditions
//!
//! A condition is a pluggable predicate evaluated once per tick. Its raw
//! result passes through the condition's [`DurationModifier`] and is folded
//! into the macro's running match by its [`Logic`] type.

use crate::macro_ref::MacroLookup;
use crate::macros::Macro;
use crate::segment::{Segment, SegmentBase, SegmentContext, SegmentRef};
use crate::sync::lock;
use macro_core::{CancelToken, DurationModifier, Logic, SLOW_CONDITION_THRESHOLD_MS};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::warn;

/// A pluggable boolean predicate
pub trait Condition: Segment {
    /// Evaluate the raw result for this tick
    fn check(&mut self, ctx: &SegmentContext<'_>) -> bool;
}

/// One entry of a macro's condition list
pub struct ConditionSegment {
    base: SegmentBase,
    logic: Mutex<Logic>,
    duration: Mutex<DurationModifier>,
    inner: Mutex<Box<dyn Condition>>,
    placeholder: bool,
}

impl std::fmt::Debug for ConditionSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionSegment")
            .field("id", &self.base.id())
            .field("index", &self.base.index())
            .field("logic", &self.logic())
            .finish()
    }
}

impl ConditionSegment {
    pub(crate) fn new(id: &str, owner: Weak<Macro>, inner: Box<dyn Condition>) -> Arc<Self> {
        let base = SegmentBase::new(id, owner, inner.supports_variable_value());
        let placeholder = inner.raw_payload().is_some();
        let segment = Arc::new(Self {
            base,
            logic: Mutex::new(Logic::RootNone),
            duration: Mutex::new(DurationModifier::default()),
            inner: Mutex::new(inner),
            placeholder,
        });
        segment.setup_temp_vars();
        segment
    }

    pub fn base(&self) -> &SegmentBase {
        &self.base
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn logic(&self) -> Logic {
        *lock(&self.logic)
    }

    /// Set the logic type, coercing it to a valid type for this position
    pub fn set_logic(&self, logic: Logic, macro_name: &str) {
        *lock(&self.logic) = logic.coerce_for(self.base.index(), macro_name);
    }

    pub(crate) fn validate_logic(&self, macro_name: &str) {
        let mut logic = lock(&self.logic);
        *logic = logic.coerce_for(self.base.index(), macro_name);
    }

    pub fn duration_modifier(&self) -> DurationModifier {
        lock(&self.duration).clone()
    }

    pub fn set_duration_modifier(&self, modifier: DurationModifier) {
        *lock(&self.duration) = modifier;
    }

    /// Force the duration modifier timer back to zero
    pub fn reset_duration(&self) {
        lock(&self.duration).reset();
    }

    /// Whether this entry only carries the payload of an unknown id
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Access the implementation, e.g. to change its settings
    pub fn with_inner<R>(&self, f: impl FnOnce(&mut dyn Condition) -> R) -> R {
        let mut inner = lock(&self.inner);
        f(inner.as_mut())
    }

    /// Re-declare temp variables after the implementation's settings changed
    pub fn setup_temp_vars(self: &Arc<Self>) {
        let specs = lock(&self.inner).temp_vars();
        self.base
            .declare_temp_vars(specs, SegmentRef::Condition(Arc::downgrade(self)));
    }

    /// Raw check plus duration modifier, timing the check
    pub(crate) fn evaluate(&self, cancel: &CancelToken, macro_name: &str) -> bool {
        let ctx = SegmentContext::new(&self.base, cancel);
        let start = Instant::now();
        let raw = lock(&self.inner).check(&ctx);
        let spent = start.elapsed();

        if spent >= Duration::from_millis(SLOW_CONDITION_THRESHOLD_MS) {
            warn!(
                macro_name = %macro_name,
                segment_id = %self.base.id(),
                "spent {} ms in condition check",
                spent.as_millis()
            );
        }

        lock(&self.duration).check(raw)
    }

    pub(crate) fn load(&self, obj: &Map<String, Value>, index: usize, macro_name: &str) {
        self.base.set_index(index);
        self.base.load_settings(obj);
        let code = obj.get("logic").and_then(Value::as_i64).unwrap_or(0);
        *lock(&self.logic) = Logic::from_code_for(code, index, macro_name);
        *lock(&self.duration) = DurationModifier::load(obj, self.base.id());
        lock(&self.inner).load(obj);
    }

    /// Persisted segment object
    pub fn save(&self) -> Value {
        let inner = lock(&self.inner);
        if let Some(raw) = inner.raw_payload() {
            return raw.clone();
        }

        let mut obj = Map::new();
        self.base.save_settings(&mut obj);
        obj.insert("logic".to_string(), json!(self.logic().code()));
        obj.insert(
            "durationModifier".to_string(),
            lock(&self.duration).to_json(),
        );
        inner.save(&mut obj);
        Value::Object(obj)
    }

    pub(crate) fn post_load(self: &Arc<Self>, macros: &MacroLookup<'_>) {
        lock(&self.inner).post_load(macros);
        self.setup_temp_vars();
    }
}
