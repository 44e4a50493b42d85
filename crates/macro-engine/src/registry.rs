//! Condition and action registries
//!
//! A registry maps a segment id to its display name and constructor. The
//! first registration of an id wins; later attempts are rejected rather than
//! overwriting it. Creating an unknown id yields a
//! [`Placeholder`](crate::Placeholder) so persisted settings are never lost.

use crate::action::{Action, ActionSegment};
use crate::condition::{Condition, ConditionSegment};
use crate::macros::Macro;
use crate::placeholder::Placeholder;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Constructor for a segment implementation
pub type CreateFn<S> = Arc<dyn Fn() -> Box<S> + Send + Sync>;

/// Information about a registered segment kind
pub struct SegmentInfo<S: ?Sized> {
    /// Human-readable name
    pub display_name: String,
    /// Constructor for a default configured instance
    pub create: CreateFn<S>,
}

impl<S: ?Sized> Clone for SegmentInfo<S> {
    fn clone(&self) -> Self {
        Self {
            display_name: self.display_name.clone(),
            create: self.create.clone(),
        }
    }
}

/// Registry of segment kinds keyed by id
pub struct SegmentRegistry<S: ?Sized> {
    kind: &'static str,
    entries: DashMap<String, SegmentInfo<S>>,
}

/// Registry of condition kinds
pub type ConditionRegistry = SegmentRegistry<dyn Condition>;

/// Registry of action kinds
pub type ActionRegistry = SegmentRegistry<dyn Action>;

impl<S: ?Sized> SegmentRegistry<S> {
    fn with_kind(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Register `id`; returns `false` if it is already registered
    #[instrument(skip(self, display_name, create), fields(kind = self.kind))]
    pub fn register<F>(&self, id: &str, display_name: impl Into<String>, create: F) -> bool
    where
        F: Fn() -> Box<S> + Send + Sync + 'static,
    {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => {
                warn!(segment_id = %id, "segment id already registered, keeping first registration");
                false
            }
            Entry::Vacant(entry) => {
                debug!(segment_id = %id, "registering segment kind");
                entry.insert(SegmentInfo {
                    display_name: display_name.into(),
                    create: Arc::new(create),
                });
                true
            }
        }
    }

    /// Remove `id`; returns `false` if it was not registered
    pub fn deregister(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Display name for `id`
    pub fn display_name(&self, id: &str) -> Option<String> {
        self.entries.get(id).map(|e| e.display_name.clone())
    }

    /// Id whose display name is `name`
    pub fn id_by_name(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.display_name == name)
            .map(|e| e.key().clone())
    }

    /// Construct the implementation for `id`, if registered
    pub fn create_inner(&self, id: &str) -> Option<Box<S>> {
        // Clone the constructor out so no shard lock is held while it runs
        let create = self.entries.get(id).map(|e| e.create.clone())?;
        Some(create())
    }
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::with_kind("condition")
    }

    /// Create a condition entry for `owner`, falling back to a placeholder
    pub fn create(&self, id: &str, owner: &Arc<Macro>) -> Arc<ConditionSegment> {
        let inner = self.create_inner(id).unwrap_or_else(|| {
            warn!(
                segment_id = %id,
                macro_name = %owner.name(),
                "unknown condition id, keeping settings in placeholder"
            );
            Box::new(Placeholder::new(id))
        });
        ConditionSegment::new(id, Arc::downgrade(owner), inner)
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::with_kind("action")
    }

    /// Create an action entry for `owner`, falling back to a placeholder
    pub fn create(&self, id: &str, owner: &Arc<Macro>) -> Arc<ActionSegment> {
        let inner = self.create_inner(id).unwrap_or_else(|| {
            warn!(
                segment_id = %id,
                macro_name = %owner.name(),
                "unknown action id, keeping settings in placeholder"
            );
            Box::new(Placeholder::new(id))
        });
        ActionSegment::new(id, Arc::downgrade(owner), inner)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
