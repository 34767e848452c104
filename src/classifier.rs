// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Value classification module
//!
//! This module assigns a warning level to each new value from the entry's
//! per-level thresholds and detects significant percent changes against the
//! last recorded value. Both the sampler and the event recorder use it.

use crate::config::EntryDescriptor;
use crate::protocol::{TypedValue, WarningLevel};
use crate::store::EntryState;

/// Classification result for a value
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Highest level whose threshold is exceeded
    pub warning: WarningLevel,
    /// Value moved by more than the configured percentage
    pub percent_change: bool,
    /// Threshold that decided `warning`, if any
    pub trigger: Option<ThresholdHit>,
}

impl Classification {
    /// Classification of a value that triggers nothing
    pub fn informational() -> Self {
        Self {
            warning: WarningLevel::Informational,
            percent_change: false,
            trigger: None,
        }
    }
}

/// Which side of the band a value crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Low,
    High,
}

/// A threshold crossing
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdHit {
    pub level: WarningLevel,
    pub bound: Bound,
    pub threshold: f64,
    pub actual: f64,
}

/// Classify a new value against the entry's thresholds and last recorded value
pub fn classify(
    value: &TypedValue,
    state: &EntryState,
    descriptor: &EntryDescriptor,
) -> Classification {
    let (warning, trigger) = evaluate_warning(value, descriptor);

    let percent_change = descriptor.percent_change_enabled
        && state.last_recorded.map_or(false, |last| {
            percent_change(value, &last, descriptor.percent_change_threshold)
        });

    Classification {
        warning,
        percent_change,
        trigger,
    }
}

/// Highest warning level whose enabled threshold is exceeded
///
/// Levels are checked in ascending severity without breaking on a match, so
/// a higher level always wins. Variable-length values are always
/// informational.
pub fn evaluate_warning(
    value: &TypedValue,
    descriptor: &EntryDescriptor,
) -> (WarningLevel, Option<ThresholdHit>) {
    let actual = match value.as_f64() {
        Some(v) => v,
        None => return (WarningLevel::Informational, None),
    };

    let mut warning = WarningLevel::Informational;
    let mut trigger = None;

    for (i, level) in WarningLevel::THRESHOLD_LEVELS.iter().enumerate() {
        let bit = 1u8 << i;
        let low = descriptor.warning_low[i];
        let high = descriptor.warning_high[i];

        let hit = if descriptor.warning_low_enabled_mask & bit != 0 && actual < low {
            Some((Bound::Low, low))
        } else if descriptor.warning_high_enabled_mask & bit != 0 && actual > high {
            Some((Bound::High, high))
        } else {
            None
        };

        if let Some((bound, threshold)) = hit {
            warning = *level;
            trigger = Some(ThresholdHit {
                level: *level,
                bound,
                threshold,
                actual,
            });
        }
    }

    (warning, trigger)
}

/// Whether `current` differs from `last` by more than `pct` percent
///
/// Integer variants compare magnitudes multiplicatively
/// (`|cur|*100` against `|last|*(100±pct)`) in 64-bit arithmetic; floats use
/// the fractional form.
pub fn percent_change(current: &TypedValue, last: &TypedValue, pct: u16) -> bool {
    let pct = pct.min(100) as u64;

    match (current, last) {
        (TypedValue::U32(cur), TypedValue::U32(prev)) => {
            exceeds_band(*cur as u64, *prev as u64, pct)
        }
        (TypedValue::I32(cur), TypedValue::I32(prev)) => {
            exceeds_band(cur.unsigned_abs() as u64, prev.unsigned_abs() as u64, pct)
        }
        (TypedValue::F32(cur), TypedValue::F32(prev)) => {
            exceeds_fraction(cur.abs() as f64, prev.abs() as f64, pct)
        }
        (TypedValue::VarLen(_), _) | (_, TypedValue::VarLen(_)) => false,
        (cur, prev) => match (cur.as_f64(), prev.as_f64()) {
            (Some(c), Some(p)) => exceeds_fraction(c.abs(), p.abs(), pct),
            _ => false,
        },
    }
}

fn exceeds_band(cur: u64, prev: u64, pct: u64) -> bool {
    let scaled = cur * 100;
    scaled > prev * (100 + pct) || scaled < prev * (100 - pct)
}

fn exceeds_fraction(cur: f64, prev: f64, pct: u64) -> bool {
    let ratio = pct as f64 / 100.0;
    cur > prev * (1.0 + ratio) || cur < prev * (1.0 - ratio)
}
