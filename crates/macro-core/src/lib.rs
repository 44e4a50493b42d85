//! Core types for the macro rule engine
//!
//! This crate provides the leaf types the engine is assembled from. None of
//! them know about macros; they are shared by the engine, its segments and
//! the daemon.
//!
//! # Key Types
//!
//! - [`Logic`] - Folds one condition result into a macro's running match
//! - [`DurationModifier`] - Hysteresis timer applied after a condition result
//! - [`SegmentSettings`] - Versioned enable/collapse/label state of a segment
//! - [`WaitSignal`] / [`CancelToken`] - Engine-wide abort plus per-macro stop

mod cancel;
mod duration;
mod error;
mod logic;
mod settings;

pub use cancel::{CancelToken, WaitOutcome, WaitSignal};
pub use duration::{Duration, DurationMode, DurationModifier, DurationUnit};
pub use error::{CoreError, CoreResult};
pub use logic::Logic;
pub use settings::{SegmentSettings, SEGMENT_SETTINGS_VERSION};

/// Condition checks taking at least this long are reported as slow
pub const SLOW_CONDITION_THRESHOLD_MS: u64 = 300;
