//! Duration measurement and duration modifiers
//!
//! A [`DurationModifier`] is layered on top of a condition's raw result and
//! turns "currently true" into "true for at least / under / exactly N
//! seconds". All time dependent calls take an explicit [`Instant`] so callers
//! and tests control the clock; the convenience wrappers use
//! [`Instant::now`].

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration as StdDuration, Instant};
use tracing::warn;

/// Unit a duration is displayed in; the stored value is always seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    /// Seconds per unit
    pub fn multiplier(self) -> f64 {
        match self {
            DurationUnit::Seconds => 1.0,
            DurationUnit::Minutes => 60.0,
            DurationUnit::Hours => 3600.0,
        }
    }

    /// Persisted integer code
    pub fn code(self) -> i64 {
        match self {
            DurationUnit::Seconds => 0,
            DurationUnit::Minutes => 1,
            DurationUnit::Hours => 2,
        }
    }
}

impl TryFrom<i64> for DurationUnit {
    type Error = CoreError;

    fn try_from(code: i64) -> CoreResult<Self> {
        match code {
            0 => Ok(DurationUnit::Seconds),
            1 => Ok(DurationUnit::Minutes),
            2 => Ok(DurationUnit::Hours),
            other => Err(CoreError::InvalidDurationUnit(other)),
        }
    }
}

/// A configured length of time plus a start mark for measuring against it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "PersistedDuration", into = "PersistedDuration")]
pub struct Duration {
    seconds: f64,
    unit: DurationUnit,
    start: Option<Instant>,
}

impl Duration {
    /// Create a duration of `seconds`
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds: sanitize_seconds(seconds),
            unit: DurationUnit::Seconds,
            start: None,
        }
    }

    /// Create a duration of `value` expressed in `unit`
    pub fn with_unit(value: f64, unit: DurationUnit) -> Self {
        Self {
            seconds: sanitize_seconds(value * unit.multiplier()),
            unit,
            start: None,
        }
    }

    /// Length in seconds
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Display unit
    pub fn unit(&self) -> DurationUnit {
        self.unit
    }

    /// Length as a std duration
    pub fn as_std(&self) -> StdDuration {
        StdDuration::try_from_secs_f64(self.seconds).unwrap_or(StdDuration::MAX)
    }

    /// Whether measurement has not started since the last reset
    pub fn is_reset(&self) -> bool {
        self.start.is_none()
    }

    /// Clear the start mark
    pub fn reset(&mut self) {
        self.start = None;
    }

    /// Start measuring at `now` if not already measuring
    pub fn start_at(&mut self, now: Instant) {
        if self.start.is_none() {
            self.start = Some(now);
        }
    }

    /// Whether the configured length has elapsed since the start mark
    ///
    /// The first call after a reset sets the start mark to `now`.
    pub fn reached_at(&mut self, now: Instant) -> bool {
        let start = *self.start.get_or_insert(now);
        now.saturating_duration_since(start) >= self.as_std()
    }

    /// Seconds left until the configured length is reached
    pub fn time_remaining_at(&self, now: Instant) -> f64 {
        match self.start {
            None => self.seconds,
            Some(start) => {
                let elapsed = now.saturating_duration_since(start).as_secs_f64();
                (self.seconds - elapsed).max(0.0)
            }
        }
    }

    /// Move the start mark so that `remaining` seconds are left at `now`
    pub fn set_time_remaining_at(&mut self, remaining: f64, now: Instant) {
        let passed = Duration::new(self.seconds - remaining).as_std();
        let start = now.checked_sub(passed).unwrap_or(now);
        self.start = Some(start);
    }

    /// Persisted form: `{"seconds": f64, "unit": i64}`
    pub fn to_json(&self) -> Value {
        json!({
            "seconds": self.seconds,
            "unit": self.unit.code(),
        })
    }

    /// Decode the persisted form, rejecting malformed values
    pub fn from_json(obj: &Map<String, Value>) -> CoreResult<Self> {
        let seconds = obj.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
        if !is_valid_seconds(seconds) {
            return Err(CoreError::InvalidDurationValue(seconds));
        }
        let unit = match obj.get("unit").and_then(Value::as_i64) {
            Some(code) => DurationUnit::try_from(code)?,
            None => DurationUnit::Seconds,
        };
        Ok(Self {
            seconds,
            unit,
            start: None,
        })
    }
}

/// Serde form of [`Duration`]
#[derive(Serialize, Deserialize)]
struct PersistedDuration {
    #[serde(default)]
    seconds: f64,
    #[serde(default)]
    unit: i64,
}

impl TryFrom<PersistedDuration> for Duration {
    type Error = CoreError;

    fn try_from(p: PersistedDuration) -> CoreResult<Self> {
        if !is_valid_seconds(p.seconds) {
            return Err(CoreError::InvalidDurationValue(p.seconds));
        }
        Ok(Self {
            seconds: p.seconds,
            unit: DurationUnit::try_from(p.unit)?,
            start: None,
        })
    }
}

impl From<Duration> for PersistedDuration {
    fn from(d: Duration) -> Self {
        Self {
            seconds: d.seconds,
            unit: d.unit.code(),
        }
    }
}

/// Longest accepted length, inside the range of a std duration
const MAX_SECONDS: f64 = 1.0e18;

fn is_valid_seconds(seconds: f64) -> bool {
    (0.0..=MAX_SECONDS).contains(&seconds)
}

fn sanitize_seconds(seconds: f64) -> f64 {
    if is_valid_seconds(seconds) {
        seconds
    } else if seconds > MAX_SECONDS {
        warn!(seconds, "duration out of range, clamping");
        MAX_SECONDS
    } else {
        0.0
    }
}

/// Classification applied by a [`DurationModifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationMode {
    /// Pass the raw value through
    #[default]
    Current,
    /// True once the raw value has been true for at least the duration
    More,
    /// True once, at the check where the duration is first reached
    Equal,
    /// True while the raw value has been true for less than the duration
    Less,
    /// True while a raw true was seen within the last duration
    Within,
}

impl DurationMode {
    /// Persisted integer code
    pub fn code(self) -> i64 {
        match self {
            DurationMode::Current => 0,
            DurationMode::More => 1,
            DurationMode::Equal => 2,
            DurationMode::Less => 3,
            DurationMode::Within => 4,
        }
    }
}

impl TryFrom<i64> for DurationMode {
    type Error = CoreError;

    fn try_from(code: i64) -> CoreResult<Self> {
        match code {
            0 => Ok(DurationMode::Current),
            1 => Ok(DurationMode::More),
            2 => Ok(DurationMode::Equal),
            3 => Ok(DurationMode::Less),
            4 => Ok(DurationMode::Within),
            other => Err(CoreError::InvalidDurationMode(other)),
        }
    }
}

/// Per-condition hysteresis timer
#[derive(Debug, Clone, Default)]
pub struct DurationModifier {
    mode: DurationMode,
    duration: Duration,
    time_reached: bool,
}

impl DurationModifier {
    /// Create a modifier with the given mode and length
    pub fn new(mode: DurationMode, duration: Duration) -> Self {
        Self {
            mode,
            duration,
            time_reached: false,
        }
    }

    pub fn mode(&self) -> DurationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DurationMode) {
        self.mode = mode;
        self.reset();
    }

    pub fn duration(&self) -> &Duration {
        &self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
        self.reset();
    }

    /// Adjust a raw condition result using the wall clock
    pub fn check(&mut self, raw: bool) -> bool {
        self.check_at(raw, Instant::now())
    }

    /// Adjust a raw condition result as of `now`
    ///
    /// A false raw value resets the timer (except for [`DurationMode::Within`],
    /// where a true raw value restarts it).
    pub fn check_at(&mut self, raw: bool, now: Instant) -> bool {
        match self.mode {
            DurationMode::Within => {
                if raw {
                    self.reset();
                    let seconds = self.duration.seconds();
                    self.duration.set_time_remaining_at(seconds, now);
                    return true;
                }
                !self.duration.is_reset() && !self.duration.reached_at(now)
            }
            _ if !raw => {
                self.reset();
                false
            }
            DurationMode::Current => true,
            DurationMode::More => self.duration.reached_at(now),
            DurationMode::Equal => {
                if self.duration.reached_at(now) && !self.time_reached {
                    self.time_reached = true;
                    true
                } else {
                    false
                }
            }
            DurationMode::Less => !self.duration.reached_at(now),
        }
    }

    /// Force the timer back to zero
    pub fn reset(&mut self) {
        self.time_reached = false;
        self.duration.reset();
    }

    /// Seconds until the configured length is reached
    pub fn time_remaining_at(&self, now: Instant) -> f64 {
        self.duration.time_remaining_at(now)
    }

    /// Persisted form: `{"type": i64, "seconds": f64, "unit": i64}`
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), json!(self.mode.code()));
        if let Value::Object(duration) = self.duration.to_json() {
            obj.extend(duration);
        }
        Value::Object(obj)
    }

    /// Decode the persisted form, rejecting malformed values
    pub fn from_json(obj: &Map<String, Value>) -> CoreResult<Self> {
        let mode = match obj.get("type").and_then(Value::as_i64) {
            Some(code) => DurationMode::try_from(code)?,
            None => DurationMode::Current,
        };
        let duration = Duration::from_json(obj)?;
        Ok(Self::new(mode, duration))
    }

    /// Decode the modifier of a persisted condition object
    ///
    /// Reads the `durationModifier` sub-object; objects written before it
    /// existed carry a top-level `seconds` field which implies
    /// [`DurationMode::More`]. Malformed values fall back to a pass-through
    /// modifier and are logged.
    pub fn load(condition: &Map<String, Value>, segment_id: &str) -> Self {
        let decoded = match condition.get("durationModifier") {
            Some(Value::Object(obj)) => Self::from_json(obj),
            Some(_) => Err(CoreError::InvalidDurationMode(-1)),
            None if condition.contains_key("seconds") => {
                Duration::from_json(condition).map(|d| Self::new(DurationMode::More, d))
            }
            None => Ok(Self::default()),
        };
        decoded.unwrap_or_else(|e| {
            warn!(segment_id = %segment_id, "{}, using no duration modifier", e);
            Self::default()
        })
    }
}
