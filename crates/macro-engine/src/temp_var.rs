//! Temp variables
//!
//! A temp variable is a named value one segment publishes while it executes
//! so later segments of the same macro can read it. Values are invalidated
//! once per tick before conditions run again, so a stale value from a
//! previous tick is never read as current.

use crate::segment::SegmentRef;
use std::collections::VecDeque;

/// Number of previous values kept per temp variable
pub const TEMP_VAR_HISTORY: usize = 3;

/// Declaration of a temp variable a segment publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempVarSpec {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl TempVarSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One published value and its owning segment
#[derive(Debug, Clone)]
pub struct TempVariable {
    id: String,
    name: String,
    description: String,
    segment: SegmentRef,
    value: Option<String>,
    valid: bool,
    last_values: VecDeque<String>,
}

impl TempVariable {
    pub(crate) fn new(spec: TempVarSpec, segment: SegmentRef) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            description: spec.description,
            segment,
            value: None,
            valid: false,
            last_values: VecDeque::with_capacity(TEMP_VAR_HISTORY),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Weak reference to the publishing segment
    pub fn segment(&self) -> &SegmentRef {
        &self.segment
    }

    /// The current value, or `None` if it was invalidated since the last set
    pub fn value(&self) -> Option<String> {
        if self.valid {
            self.value.clone()
        } else {
            None
        }
    }

    /// Previously set values, most recent first
    pub fn last_values(&self) -> impl Iterator<Item = &str> {
        self.last_values.iter().map(String::as_str)
    }

    /// Handle for reading this variable later
    pub fn reference(&self) -> TempVarRef {
        TempVarRef {
            segment: self.segment.clone(),
            id: self.id.clone(),
        }
    }

    pub(crate) fn set_value(&mut self, value: String) {
        if let Some(previous) = self.value.replace(value) {
            if self.last_values.len() == TEMP_VAR_HISTORY {
                self.last_values.pop_back();
            }
            self.last_values.push_front(previous);
        }
        self.valid = true;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Keep value and history when a segment re-declares the same variable
    pub(crate) fn carry_state_from(&mut self, previous: &TempVariable) {
        self.value = previous.value.clone();
        self.valid = previous.valid;
        self.last_values = previous.last_values.clone();
    }
}

/// Reader handle resolving a temp variable through its segment
#[derive(Debug, Clone)]
pub struct TempVarRef {
    segment: SegmentRef,
    id: String,
}

impl TempVarRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current valid value, or `None` if invalid or the segment is gone
    pub fn value(&self) -> Option<String> {
        self.segment
            .with_base(|base| base.temp_var(&self.id))
            .flatten()
            .and_then(|var| var.value())
    }
}
