// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Event recorder
//!
//! Push-style entry point for event-driven entries (sample rate 0). Every
//! event is stored as a `(utc_seconds, value)` pair and classified the same
//! way a polled sample is.

use crate::classifier::classify;
use crate::config::CoreConfig;
use crate::error::EntryError;
use crate::pool::VarLenPool;
use crate::protocol::{EntryClass, Timestamp, TypedValue, WarningLevel};
use crate::sampler::store_value;
use crate::store::{error_repeat_period, EntryTable};

/// What recording one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOutcome {
    pub appended: bool,
    pub batch_ready: bool,
    pub warning: WarningLevel,
}

impl EventOutcome {
    fn ignored(warning: WarningLevel) -> Self {
        Self {
            appended: false,
            batch_ready: false,
            warning,
        }
    }
}

fn release_value(pool: &mut VarLenPool, value: &TypedValue) {
    if let Some(handle) = value.handle() {
        pool.release(handle);
    }
}

/// Record a new value for an event-driven entry
///
/// Out-of-range indices, polled entries and values whose type differs from
/// the descriptor are rejected without touching any entry. Disabled entries ignore the event. A variable-length handle passed
/// in is owned by the pipeline whatever the outcome.
#[allow(clippy::too_many_arguments)]
pub fn record_event(
    table: &mut EntryTable,
    pool: &mut VarLenPool,
    class: EntryClass,
    index: usize,
    value: TypedValue,
    now: Timestamp,
    utc_ms: u64,
) -> Result<EventOutcome, EntryError> {
    let (descriptor, state) = match table.entry_mut(class, index) {
        Ok(entry) => entry,
        Err(e) => {
            release_value(pool, &value);
            return Err(e);
        }
    };
    if !descriptor.is_event_driven() {
        release_value(pool, &value);
        return Err(EntryError::NotEventDriven { class, index });
    }
    if value.data_type() != descriptor.data_type {
        release_value(pool, &value);
        return Err(EntryError::TypeMismatch {
            class,
            index,
            expected: descriptor.data_type,
            actual: value.data_type(),
        });
    }
    if !descriptor.enabled {
        release_value(pool, &value);
        return Ok(EventOutcome::ignored(state.warning));
    }

    state.record_success(value);
    let classification = classify(&value, state, descriptor);
    let utc_seconds = (utc_ms / 1000) as u32;
    let stored = store_value(
        class,
        descriptor,
        state,
        pool,
        &[utc_seconds, value.raw()],
        value,
        &classification,
        true,
        now,
        utc_ms,
    );
    log::debug!(
        "{} {} event {} stored={} ready={} warning_changed={} overflow={}",
        class,
        descriptor.id,
        value,
        stored.appended,
        stored.batch_ready,
        stored.warning_changed,
        stored.overflow.is_some()
    );

    Ok(EventOutcome {
        appended: stored.appended,
        batch_ready: stored.batch_ready,
        warning: state.warning,
    })
}

/// Record a producer-side failure for an event-driven entry
///
/// Returns true when the error is flagged for upload.
pub fn record_event_error(
    table: &mut EntryTable,
    config: &CoreConfig,
    class: EntryClass,
    index: usize,
    code: u8,
    now: Timestamp,
) -> Result<bool, EntryError> {
    let (descriptor, state) = table.entry_mut(class, index)?;
    if !descriptor.is_event_driven() {
        return Err(EntryError::NotEventDriven { class, index });
    }
    if !descriptor.enabled {
        return Ok(false);
    }

    let period = error_repeat_period(descriptor, config);
    let flagged = state.record_error(code, now, period, descriptor.send_to_server);
    log::warn!(
        "{} {} event source failed with code {}",
        class,
        descriptor.id,
        code
    );
    Ok(flagged)
}
