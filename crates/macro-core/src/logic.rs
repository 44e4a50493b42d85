//! Condition logic combinators
//!
//! A macro folds each condition result into a running match value. The first
//! condition must use a root type (which sets the running value), every later
//! condition a non-root type (which combines with it).

use crate::error::{CoreError, CoreResult};
use std::fmt;
use tracing::warn;

/// How a condition result folds into the running match value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    /// Running match = result (first condition only)
    RootNone,
    /// Running match = !result (first condition only)
    RootNot,
    /// Result is ignored; running match is left unchanged
    None,
    /// Running match && result
    And,
    /// Running match || result
    Or,
    /// Running match && !result
    AndNot,
    /// Running match || !result
    OrNot,
}

impl Logic {
    /// Types valid for the first condition of a macro
    pub const ROOT_TYPES: [Logic; 2] = [Logic::RootNone, Logic::RootNot];

    /// Types valid for every condition after the first
    pub const NON_ROOT_TYPES: [Logic; 5] = [
        Logic::None,
        Logic::And,
        Logic::Or,
        Logic::AndNot,
        Logic::OrNot,
    ];

    /// Persisted integer code
    pub fn code(self) -> i64 {
        match self {
            Logic::RootNone => 0,
            Logic::RootNot => 1,
            Logic::None => 100,
            Logic::And => 101,
            Logic::Or => 102,
            Logic::AndNot => 103,
            Logic::OrNot => 104,
        }
    }

    /// Display name used by editor surfaces
    pub fn name(self) -> &'static str {
        match self {
            Logic::RootNone => "if",
            Logic::RootNot => "if not",
            Logic::None => "ignore",
            Logic::And => "and",
            Logic::Or => "or",
            Logic::AndNot => "and not",
            Logic::OrNot => "or not",
        }
    }

    /// Whether this type may only be used by the first condition
    pub fn is_root(self) -> bool {
        matches!(self, Logic::RootNone | Logic::RootNot)
    }

    /// Whether this type negates the condition result before combining
    pub fn is_negation(self) -> bool {
        matches!(self, Logic::RootNot | Logic::AndNot | Logic::OrNot)
    }

    /// Whether this type may be used by the condition at `index`
    pub fn is_valid_at(self, index: usize) -> bool {
        if index == 0 {
            self.is_root()
        } else {
            !self.is_root()
        }
    }

    /// The safe default for the condition at `index`
    pub fn default_at(index: usize) -> Logic {
        if index == 0 {
            Logic::RootNone
        } else {
            Logic::None
        }
    }

    /// Return this type if it is valid at `index`, otherwise the safe default
    pub fn coerce_for(self, index: usize, macro_name: &str) -> Logic {
        if self.is_valid_at(index) {
            return self;
        }
        let coerced = Logic::default_at(index);
        warn!(
            macro_name = %macro_name,
            index,
            logic = %self,
            coerced = %coerced,
            "invalid logic selection for condition position, coercing"
        );
        coerced
    }

    /// Decode a persisted code and coerce it to a valid type for `index`
    pub fn from_code_for(code: i64, index: usize, macro_name: &str) -> Logic {
        match Logic::try_from(code) {
            Ok(logic) => logic.coerce_for(index, macro_name),
            Err(e) => {
                let coerced = Logic::default_at(index);
                warn!(
                    macro_name = %macro_name,
                    index,
                    coerced = %coerced,
                    "{}, coercing",
                    e
                );
                coerced
            }
        }
    }

    /// Fold an already evaluated condition result into `running`
    pub fn apply(self, running: bool, result: bool) -> bool {
        match self {
            Logic::RootNone => result,
            Logic::RootNot => !result,
            Logic::None => running,
            Logic::And => running && result,
            Logic::Or => running || result,
            Logic::AndNot => running && !result,
            Logic::OrNot => running || !result,
        }
    }

    /// Fold a lazily evaluated condition result into `running`
    ///
    /// `eval` is only called if its result can change the outcome.
    pub fn apply_with<F>(self, running: bool, eval: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        match self {
            Logic::RootNone => eval(),
            Logic::RootNot => !eval(),
            Logic::None => running,
            Logic::And => running && eval(),
            Logic::Or => running || eval(),
            Logic::AndNot => running && !eval(),
            Logic::OrNot => running || !eval(),
        }
    }
}

impl TryFrom<i64> for Logic {
    type Error = CoreError;

    fn try_from(code: i64) -> CoreResult<Self> {
        match code {
            0 => Ok(Logic::RootNone),
            1 => Ok(Logic::RootNot),
            100 => Ok(Logic::None),
            101 => Ok(Logic::And),
            102 => Ok(Logic::Or),
            103 => Ok(Logic::AndNot),
            104 => Ok(Logic::OrNot),
            other => Err(CoreError::InvalidLogic(other)),
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
