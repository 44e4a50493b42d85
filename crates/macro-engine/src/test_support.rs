//! Segments for unit tests

use crate::action::{Action, ActionSegment};
use crate::condition::{Condition, ConditionSegment};
use crate::macros::{ActionList, Macro};
use crate::segment::{Segment, SegmentContext};
use crate::temp_var::TempVarSpec;
use macro_core::{Logic, WaitOutcome};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Condition returning a shared flag, counting its evaluations
#[derive(Clone, Default)]
pub struct FlagCondition {
    value: Arc<AtomicBool>,
    checks: Arc<AtomicUsize>,
}

impl FlagCondition {
    pub fn new(value: bool) -> Self {
        let flag = Self::default();
        flag.set(value);
        flag
    }

    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl Segment for FlagCondition {
    fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert("value".to_string(), json!(self.value.load(Ordering::SeqCst)));
    }

    fn load(&mut self, obj: &Map<String, Value>) {
        let value = obj.get("value").and_then(Value::as_bool).unwrap_or(false);
        self.set(value);
    }

    fn temp_vars(&self) -> Vec<TempVarSpec> {
        vec![TempVarSpec::new("value", "Value", "Last checked value")]
    }
}

impl Condition for FlagCondition {
    fn check(&mut self, ctx: &SegmentContext<'_>) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let value = self.value.load(Ordering::SeqCst);
        ctx.set_temp_var("value", value.to_string());
        value
    }
}

/// Action counting its invocations and returning a fixed result
#[derive(Clone)]
pub struct CountingAction {
    count: Arc<AtomicUsize>,
    result: bool,
}

impl CountingAction {
    pub fn new(result: bool) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            result,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Segment for CountingAction {}

impl Action for CountingAction {
    fn perform(&mut self, _ctx: &SegmentContext<'_>) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.result
    }
}

/// Action blocking on the macro's cancel token
#[derive(Clone)]
pub struct WaitAction {
    duration: Duration,
}

impl WaitAction {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Segment for WaitAction {}

impl Action for WaitAction {
    fn perform(&mut self, ctx: &SegmentContext<'_>) -> bool {
        ctx.wait_for(self.duration) != WaitOutcome::Aborted
    }
}

/// Append a flag condition to `m`, returning a handle to the flag
pub fn add_condition(m: &Arc<Macro>, logic: Logic, value: bool) -> FlagCondition {
    let flag = FlagCondition::new(value);
    let segment = ConditionSegment::new("flag", Arc::downgrade(m), Box::new(flag.clone()));
    m.push_condition(segment, logic);
    flag
}

/// Append `action` to a list of `m`, returning a clone sharing its state
pub fn add_action<A>(m: &Arc<Macro>, list: ActionList, action: A) -> A
where
    A: Action + Clone,
{
    let segment = ActionSegment::new("test", Arc::downgrade(m), Box::new(action.clone()));
    m.push_action(list, segment);
    action
}
