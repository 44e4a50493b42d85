//! Persisted segment settings
//!
//! Every condition and action stores its enable/collapse/label state in a
//! versioned `segmentSettings` sub-object. Objects written before the
//! sub-object was versioned kept `enabled` at the top level.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current `segmentSettings` schema version
pub const SEGMENT_SETTINGS_VERSION: u32 = 1;

/// Enable/collapse/label state shared by all segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSettings {
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub use_custom_label: bool,
    #[serde(default)]
    pub custom_label: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            collapsed: false,
            use_custom_label: false,
            custom_label: String::new(),
            enabled: true,
            version: Some(SEGMENT_SETTINGS_VERSION),
        }
    }
}

impl SegmentSettings {
    /// Read the settings of a persisted segment object
    ///
    /// Without a `version` the enabled flag is taken from the segment's
    /// top-level `enabled` field, defaulting to enabled.
    pub fn load(segment: &Map<String, Value>) -> Self {
        let mut settings = segment
            .get("segmentSettings")
            .cloned()
            .and_then(|v| serde_json::from_value::<SegmentSettings>(v).ok())
            .unwrap_or(SegmentSettings {
                version: None,
                ..Default::default()
            });

        if settings.version.is_none() {
            settings.enabled = segment
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true);
        }
        settings.version = Some(SEGMENT_SETTINGS_VERSION);
        settings
    }

    /// Write the settings as the `segmentSettings` sub-object
    pub fn save(&self, segment: &mut Map<String, Value>) {
        let settings = SegmentSettings {
            version: Some(SEGMENT_SETTINGS_VERSION),
            ..self.clone()
        };
        if let Ok(value) = serde_json::to_value(settings) {
            segment.insert("segmentSettings".to_string(), value);
        }
    }
}
