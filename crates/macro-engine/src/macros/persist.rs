//! Macro persistence
//!
//! A macro is stored as one JSON object. Group markers only carry their
//! name and `groupData`; regular macros add their settings, the paused flag
//! and the three segment lists.

use super::{GroupData, Macro, MacroData, MacroSettings, PauseSaveBehavior};
use crate::action::ActionSegment;
use crate::error::{EngineError, EngineResult};
use crate::macro_ref::MacroLookup;
use crate::registry::{ActionRegistry, ConditionRegistry};
use macro_core::WaitSignal;
use serde_json::{json, Map, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};

impl Macro {
    /// Persisted form of this macro
    pub fn save(&self) -> Value {
        let (name, settings, group, conditions, actions, else_actions) = {
            let data = self.data();
            (
                data.name.clone(),
                data.settings.clone(),
                data.group,
                data.conditions.clone(),
                data.actions.clone(),
                data.else_actions.clone(),
            )
        };

        let mut obj = Map::new();
        obj.insert("name".to_string(), json!(name));
        obj.insert("group".to_string(), json!(group.is_some()));
        if let Some(group) = group {
            obj.insert(
                "groupData".to_string(),
                json!({ "collapsed": group.collapsed, "size": group.size }),
            );
            return Value::Object(obj);
        }

        match serde_json::to_value(&settings) {
            Ok(Value::Object(settings)) => obj.extend(settings),
            Ok(_) => {}
            Err(e) => error!(macro_name = %name, "failed to save macro settings: {}", e),
        }
        obj.insert("pause".to_string(), json!(self.is_paused()));
        obj.insert(
            "conditions".to_string(),
            Value::Array(conditions.iter().map(|c| c.save()).collect()),
        );
        obj.insert(
            "actions".to_string(),
            Value::Array(actions.iter().map(|a| a.save()).collect()),
        );
        obj.insert(
            "elseActions".to_string(),
            Value::Array(else_actions.iter().map(|a| a.save()).collect()),
        );
        Value::Object(obj)
    }

    /// Construct a macro from its persisted form
    ///
    /// Segment ids without a registered factory are kept as placeholders.
    /// Macro references are resolved later by [`Macro::post_load`].
    pub fn from_json(
        value: &Value,
        conditions: &ConditionRegistry,
        actions: &ActionRegistry,
        signal: Arc<WaitSignal>,
    ) -> EngineResult<Arc<Macro>> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::InvalidDocument("macro entry is not an object".into()))?;
        let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();

        if obj.get("group").and_then(Value::as_bool).unwrap_or(false) {
            let group_data = match obj.get("groupData") {
                Some(value) => serde_json::from_value::<GroupData>(value.clone()).unwrap_or_else(|e| {
                    warn!(macro_name = %name, "invalid group data: {}", e);
                    GroupData::default()
                }),
                None => GroupData::default(),
            };
            return Ok(Arc::new(Macro::build(
                MacroData::new(name, Some(group_data)),
                signal,
            )));
        }

        let settings = load_settings(obj, name);
        let paused = match settings.pause_save_behavior {
            PauseSaveBehavior::Persist => obj.get("pause").and_then(Value::as_bool).unwrap_or(false),
            PauseSaveBehavior::Pause => true,
            PauseSaveBehavior::Unpause => false,
        };

        let mac = Macro::with_signal(name, signal);
        mac.set_settings(settings);
        mac.paused.store(paused, Ordering::SeqCst);

        let loaded_conditions: Vec<_> = entries(obj, "conditions", name)
            .enumerate()
            .map(|(index, entry)| {
                let condition = conditions.create(segment_id(entry), &mac);
                condition.load(entry, index, name);
                condition
            })
            .collect();
        let loaded_actions = load_actions(obj, "actions", name, actions, &mac);
        let loaded_else_actions = load_actions(obj, "elseActions", name, actions, &mac);

        {
            let mut data = mac.data();
            data.conditions = loaded_conditions;
            data.actions = loaded_actions;
            data.else_actions = loaded_else_actions;
            data.update_condition_indices();
        }
        Ok(mac)
    }

    /// Resolve cross-macro references once every macro exists
    pub fn post_load(&self, macros: &MacroLookup<'_>) {
        let (conditions, actions, else_actions) = {
            let data = self.data();
            (
                data.conditions.clone(),
                data.actions.clone(),
                data.else_actions.clone(),
            )
        };
        for condition in &conditions {
            condition.post_load(macros);
        }
        for action in actions.iter().chain(else_actions.iter()) {
            action.post_load(macros);
        }
    }
}

fn load_settings(obj: &Map<String, Value>, name: &str) -> MacroSettings {
    let mut settings = Map::new();
    for (key, value) in obj {
        if !matches!(key.as_str(), "conditions" | "actions" | "elseActions") {
            settings.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(Value::Object(settings)).unwrap_or_else(|e| {
        warn!(macro_name = %name, "invalid macro settings, using defaults: {}", e);
        MacroSettings::default()
    })
}

fn entries<'a>(
    obj: &'a Map<String, Value>,
    key: &'a str,
    name: &'a str,
) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(move |entry| {
            let segment = entry.as_object();
            if segment.is_none() {
                warn!(macro_name = %name, list = key, "discarding segment entry that is not an object");
            }
            segment
        })
}

fn segment_id(entry: &Map<String, Value>) -> &str {
    entry.get("id").and_then(Value::as_str).unwrap_or_default()
}

fn load_actions(
    obj: &Map<String, Value>,
    key: &str,
    name: &str,
    registry: &ActionRegistry,
    mac: &Arc<Macro>,
) -> Vec<Arc<ActionSegment>> {
    entries(obj, key, name)
        .enumerate()
        .map(|(index, entry)| {
            let action = registry.create(segment_id(entry), mac);
            action.load(entry, index);
            action
        })
        .collect()
}
