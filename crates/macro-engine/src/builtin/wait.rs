//! Fixed length wait

use crate::action::Action;
use crate::segment::{Segment, SegmentContext};
use macro_core::{Duration, WaitOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitSettings {
    #[serde(default)]
    pub duration: Duration,
}

/// Blocks the running action list for a fixed time
///
/// The wait ends early when the macro is stopped or engine waits are
/// aborted. An aborted wait fails the action so the rest of the list is
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct WaitAction {
    pub settings: WaitSettings,
}

impl WaitAction {
    pub const ID: &'static str = "wait";

    pub fn new(duration: Duration) -> Self {
        Self {
            settings: WaitSettings { duration },
        }
    }
}

impl Segment for WaitAction {
    fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert("duration".to_string(), self.settings.duration.to_json());
    }

    fn load(&mut self, obj: &Map<String, Value>) {
        self.settings.duration = match obj.get("duration") {
            Some(Value::Object(duration)) => Duration::from_json(duration).unwrap_or_else(|e| {
                warn!("invalid wait duration: {}", e);
                Duration::default()
            }),
            _ => Duration::default(),
        };
    }

    fn short_desc(&self) -> String {
        format!("{}s", self.settings.duration.seconds())
    }
}

impl Action for WaitAction {
    fn perform(&mut self, ctx: &SegmentContext<'_>) -> bool {
        debug!(
            segment_id = %ctx.segment_id(),
            "perform action wait with duration of {}s",
            self.settings.duration.seconds()
        );
        ctx.wait_for(self.settings.duration.as_std()) != WaitOutcome::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let action = WaitAction::new(Duration::with_unit(2.0, macro_core::DurationUnit::Minutes));
        let mut obj = Map::new();
        action.save(&mut obj);
        assert_eq!(obj["duration"], json!({ "seconds": 120.0, "unit": 1 }));

        let mut loaded = WaitAction::default();
        loaded.load(&obj);
        assert_eq!(loaded.settings.duration.seconds(), 120.0);
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        let mut action = WaitAction::new(Duration::new(5.0));
        let obj = json!({ "duration": { "seconds": -1.0 } });
        action.load(obj.as_object().unwrap());
        assert_eq!(action.settings.duration.seconds(), 0.0);
    }
}
