//! Placeholder segments for unknown ids
//!
//! When a persisted segment names an id no factory is registered for, the
//! registry returns a placeholder instead of dropping the entry. The
//! placeholder keeps the complete persisted object and writes it back
//! unchanged, so settings survive until a build that knows the id loads
//! them again.

use crate::action::Action;
use crate::condition::Condition;
use crate::segment::{Segment, SegmentContext};
use serde_json::{json, Map, Value};

/// Carries the raw payload of a segment with an unknown id
#[derive(Debug, Clone)]
pub struct Placeholder {
    id: String,
    raw: Value,
}

impl Placeholder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            raw: json!({ "id": id }),
        }
    }

    /// The id that could not be resolved
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Segment for Placeholder {
    fn load(&mut self, obj: &Map<String, Value>) {
        self.raw = Value::Object(obj.clone());
    }

    fn short_desc(&self) -> String {
        format!("unknown segment '{}'", self.id)
    }

    fn raw_payload(&self) -> Option<&Value> {
        Some(&self.raw)
    }
}

impl Condition for Placeholder {
    fn check(&mut self, _ctx: &SegmentContext<'_>) -> bool {
        false
    }
}

impl Action for Placeholder {
    fn perform(&mut self, _ctx: &SegmentContext<'_>) -> bool {
        true
    }
}
