// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Polling sampler
//!
//! One round-robin step per class per tick: pick the next entry, read it if
//! its poll interval has elapsed, classify, and decide whether the value is
//! stored and whether the entry's batch is ready.

use crate::classifier::{classify, Classification};
use crate::config::{CoreConfig, EntryDescriptor};
use crate::error::{EntryError, ReadStatus, READ_TYPE_MISMATCH};
use crate::pool::VarLenPool;
use crate::protocol::{EntryClass, Timestamp, TypedValue};
use crate::store::{error_repeat_period, stored_handles, EntryState, EntryTable};

/// Source of fresh entry values
pub trait EntryReader {
    /// Read one entry. Variable-length readers place their payload in `pool`
    /// and return the handle; the pipeline owns it from then on.
    fn read_entry(
        &mut self,
        class: EntryClass,
        index: usize,
        descriptor: &EntryDescriptor,
        pool: &mut VarLenPool,
    ) -> Result<TypedValue, ReadStatus>;
}

/// What one sampler step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No enabled entry in the class
    Idle,
    /// Entry is disabled, event-driven or not yet due
    Skipped { index: usize },
    /// Reader had nothing yet
    NoData { index: usize },
    /// Reader failed; `flagged` when the error is queued for upload
    ReadFailed {
        index: usize,
        code: u8,
        flagged: bool,
    },
    /// Fresh value read
    Sampled {
        index: usize,
        appended: bool,
        batch_ready: bool,
    },
}

/// Result of storing a classified value
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoreOutcome {
    pub appended: bool,
    pub batch_ready: bool,
    pub warning_changed: bool,
    /// Set when the append evicted the oldest record
    pub overflow: Option<EntryError>,
}

/// Apply a classification, append the record if retained, evaluate the batch
///
/// Shared by the sampler and the event recorder. A variable-length value that
/// is not retained, and any handle evicted by overflow, goes back to the pool.
#[allow(clippy::too_many_arguments)]
pub(crate) fn store_value(
    class: EntryClass,
    descriptor: &EntryDescriptor,
    state: &mut EntryState,
    pool: &mut VarLenPool,
    record: &[u32],
    value: TypedValue,
    classification: &Classification,
    interval_elapsed: bool,
    now: Timestamp,
    utc_ms: u64,
) -> StoreOutcome {
    let warning_changed = state.apply_classification(classification);
    if let (true, Some(hit)) = (warning_changed, classification.trigger.as_ref()) {
        log::info!(
            "{} {} '{}' now {}: {:.3} crossed {:?} threshold {:.3}",
            class,
            descriptor.id,
            descriptor.name,
            hit.level,
            hit.actual,
            hit.bound,
            hit.threshold
        );
    }

    let appended = descriptor.send_to_server
        && state.valid
        && (interval_elapsed || warning_changed || classification.percent_change);

    if !appended {
        if let Some(handle) = value.handle() {
            pool.release(handle);
            state.forget_handle(handle);
        }
        return StoreOutcome {
            appended: false,
            batch_ready: false,
            warning_changed,
            overflow: None,
        };
    }

    let overflow = state.append(record, value).map(|dropped| {
        for handle in stored_handles(descriptor, dropped.as_slice()) {
            pool.release(handle);
            state.forget_handle(handle);
        }
        let err = EntryError::HistoryFull {
            class,
            id: descriptor.id,
            dropped: dropped.len(),
        };
        log::warn!("{}", err);
        err
    });
    state.last_sample_time = Some(now);
    state.last_sample_utc_ms = utc_ms;

    let batch_ready =
        state.evaluate_batch(descriptor, warning_changed, classification.percent_change);

    StoreOutcome {
        appended: true,
        batch_ready,
        warning_changed,
        overflow,
    }
}

/// Round-robin cursors, one per class
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    cursors: [usize; 2],
}

impl Sampler {
    /// Create a sampler starting at entry 0 of each class
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next step will look at
    pub fn cursor(&self, class: EntryClass) -> usize {
        self.cursors[class as usize]
    }

    /// Run one step for `class`
    #[allow(clippy::too_many_arguments)]
    pub fn poll<R: EntryReader + ?Sized>(
        &mut self,
        class: EntryClass,
        now: Timestamp,
        utc_ms: u64,
        config: &CoreConfig,
        table: &mut EntryTable,
        pool: &mut VarLenPool,
        reader: &mut R,
    ) -> PollOutcome {
        let entries = table.class_mut(class);
        if entries.enabled_count() == 0 {
            return PollOutcome::Idle;
        }

        let cursor = &mut self.cursors[class as usize];
        let index = *cursor % entries.len();
        *cursor = (index + 1) % entries.len();

        let (descriptor, state) = match entries.get_mut(index) {
            Some(entry) => entry,
            None => return PollOutcome::Idle,
        };

        let poll_due = state
            .last_poll_time
            .map_or(true, |t| now >= t.saturating_add(descriptor.poll_rate_ms as u64));
        if !descriptor.enabled || descriptor.is_event_driven() || !poll_due {
            return PollOutcome::Skipped { index };
        }
        state.last_poll_time = Some(now);

        let read = reader
            .read_entry(class, index, descriptor, pool)
            .and_then(|value| {
                if value.data_type() == descriptor.data_type {
                    return Ok(value);
                }
                if let Some(handle) = value.handle() {
                    pool.release(handle);
                }
                log::warn!(
                    "{} {} reader returned {:?} for a {:?} entry",
                    class,
                    descriptor.id,
                    value.data_type(),
                    descriptor.data_type
                );
                Err(ReadStatus::Error(READ_TYPE_MISMATCH))
            });

        let value = match read {
            Ok(value) => value,
            Err(ReadStatus::NoData) => return PollOutcome::NoData { index },
            Err(ReadStatus::Error(code)) => {
                let period = error_repeat_period(descriptor, config);
                let flagged = state.record_error(code, now, period, descriptor.send_to_server);
                log::warn!(
                    "{} {} read failed with code {} ({} total)",
                    class,
                    descriptor.id,
                    code,
                    state.error_count
                );
                return PollOutcome::ReadFailed {
                    index,
                    code,
                    flagged,
                };
            }
        };

        state.record_success(value);
        let classification = classify(&value, state, descriptor);
        let interval_elapsed = state.sample_due(now, descriptor.sample_rate_ms);
        let stored = store_value(
            class,
            descriptor,
            state,
            pool,
            &[value.raw()],
            value,
            &classification,
            interval_elapsed,
            now,
            utc_ms,
        );

        PollOutcome::Sampled {
            index,
            appended: stored.appended,
            batch_ready: stored.batch_ready,
        }
    }
}
