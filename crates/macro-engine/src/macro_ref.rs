//! Name based weak references between macros
//!
//! A [`MacroRef`] records the name of another macro and, once resolved, a
//! weak handle to it. Bulk loading stores only names; the second load phase
//! resolves them against the complete collection so forward references work.

use crate::macros::Macro;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::{Arc, Weak};

/// Read-only view of the macro collection used for resolving names
#[derive(Clone, Copy)]
pub struct MacroLookup<'a> {
    macros: &'a [Arc<Macro>],
}

impl<'a> MacroLookup<'a> {
    pub fn new(macros: &'a [Arc<Macro>]) -> Self {
        Self { macros }
    }

    /// First macro named `name`
    pub fn find(&self, name: &str) -> Option<&'a Arc<Macro>> {
        self.macros.iter().find(|m| m.name() == name)
    }

    pub fn macros(&self) -> &'a [Arc<Macro>] {
        self.macros
    }
}

/// Persisted weak reference to a macro
#[derive(Debug, Clone, Default)]
pub struct MacroRef {
    name: String,
    target: Weak<Macro>,
}

impl MacroRef {
    /// Deferred reference to `name`, resolved later by [`MacroRef::resolve`]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: Weak::new(),
        }
    }

    /// Reference resolved to `target`
    pub fn to(target: &Arc<Macro>) -> Self {
        Self {
            name: target.name(),
            target: Arc::downgrade(target),
        }
    }

    /// Point at `name`, resolving immediately if `macros` contains it
    pub fn assign(&mut self, name: impl Into<String>, macros: &MacroLookup<'_>) {
        self.name = name.into();
        self.target = Weak::new();
        self.resolve(macros);
    }

    /// Resolve the recorded name; returns whether it now points at a macro
    pub fn resolve(&mut self, macros: &MacroLookup<'_>) -> bool {
        match macros.find(&self.name) {
            Some(target) => {
                self.target = Arc::downgrade(target);
                true
            }
            None => false,
        }
    }

    /// Recorded target name, following renames while the target is live
    pub fn name(&self) -> String {
        match self.target.upgrade() {
            Some(target) => target.name(),
            None => self.name.clone(),
        }
    }

    /// Whether a name was recorded
    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }

    /// Whether the reference currently points at a live macro
    pub fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// The target, if it still exists
    pub fn get(&self) -> Option<Arc<Macro>> {
        self.target.upgrade()
    }
}

impl Serialize for MacroRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for MacroRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MacroRef::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_then_resolved() {
        let mut r = MacroRef::new("later");
        assert!(r.is_set());
        assert!(!r.is_live());
        assert!(r.get().is_none());

        let macros = vec![Macro::new("first"), Macro::new("later")];
        assert!(r.resolve(&MacroLookup::new(&macros)));
        assert!(r.is_live());
        assert!(Arc::ptr_eq(&r.get().unwrap(), &macros[1]));
    }

    #[test]
    fn test_dropped_target_is_absent() {
        let target = Macro::new("gone");
        let r = MacroRef::to(&target);
        assert!(r.is_live());
        drop(target);
        assert!(!r.is_live());
        assert!(r.get().is_none());
        assert!(r.is_set());
        assert_eq!(r.name(), "gone");
    }

    #[test]
    fn test_assign_unresolvable_keeps_name() {
        let macros = vec![Macro::new("a")];
        let mut r = MacroRef::to(&macros[0]);
        r.assign("missing", &MacroLookup::new(&macros));
        assert!(!r.is_live());
        assert_eq!(r.name(), "missing");
    }

    #[test]
    fn test_name_follows_rename() {
        let target = Macro::new("old");
        let r = MacroRef::to(&target);
        target.set_name("new");
        assert_eq!(r.name(), "new");
    }

    #[test]
    fn test_serde_as_name() {
        let target = Macro::new("x");
        let r = MacroRef::to(&target);
        assert_eq!(serde_json::to_value(&r).unwrap(), serde_json::json!("x"));
        let back: MacroRef = serde_json::from_value(serde_json::json!("x")).unwrap();
        assert!(!back.is_live());
        assert_eq!(back.name(), "x");
    }
}
