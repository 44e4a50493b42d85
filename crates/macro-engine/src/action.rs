//! Actions
//!
//! An action is a pluggable, potentially blocking operation. Actions of one
//! list run strictly in order; blocking ones wait through the
//! [`SegmentContext`] so a stop or abort wakes them early.

use crate::macro_ref::MacroLookup;
use crate::macros::Macro;
use crate::segment::{Segment, SegmentBase, SegmentContext, SegmentRef};
use crate::sync::lock;
use macro_core::CancelToken;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// A pluggable operation
pub trait Action: Segment {
    /// Run the action; `false` aborts the rest of the action list
    fn perform(&mut self, ctx: &SegmentContext<'_>) -> bool;
}

/// One entry of a macro's action or else-action list
pub struct ActionSegment {
    base: SegmentBase,
    inner: Mutex<Box<dyn Action>>,
    placeholder: bool,
}

impl std::fmt::Debug for ActionSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSegment")
            .field("id", &self.base.id())
            .field("index", &self.base.index())
            .finish()
    }
}

impl ActionSegment {
    pub(crate) fn new(id: &str, owner: Weak<Macro>, inner: Box<dyn Action>) -> Arc<Self> {
        let base = SegmentBase::new(id, owner, inner.supports_variable_value());
        let placeholder = inner.raw_payload().is_some();
        let segment = Arc::new(Self {
            base,
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

    pub fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    /// Whether this entry only carries the payload of an unknown id
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Access the implementation, e.g. to change its settings
    ///
    /// Blocks while the action is performing.
    pub fn with_inner<R>(&self, f: impl FnOnce(&mut dyn Action) -> R) -> R {
        let mut inner = lock(&self.inner);
        f(inner.as_mut())
    }

    /// Re-declare temp variables after the implementation's settings changed
    pub fn setup_temp_vars(self: &Arc<Self>) {
        let specs = lock(&self.inner).temp_vars();
        self.base
            .declare_temp_vars(specs, SegmentRef::Action(Arc::downgrade(self)));
    }

    pub(crate) fn perform(&self, cancel: &CancelToken, macro_name: &str) -> bool {
        let mut inner = lock(&self.inner);
        debug!(
            macro_name = %macro_name,
            segment_id = %self.base.id(),
            index = self.base.index(),
            "performing action {}",
            inner.short_desc()
        );
        let ctx = SegmentContext::new(&self.base, cancel);
        inner.perform(&ctx)
    }

    pub(crate) fn load(&self, obj: &Map<String, Value>, index: usize) {
        self.base.set_index(index);
        self.base.load_settings(obj);
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
        inner.save(&mut obj);
        Value::Object(obj)
    }

    pub(crate) fn post_load(self: &Arc<Self>, macros: &MacroLookup<'_>) {
        lock(&self.inner).post_load(macros);
        self.setup_temp_vars();
    }
}
