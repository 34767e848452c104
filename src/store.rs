// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Entry data store
//!
//! One [`EntryState`] per configured control or sensor, each owning a
//! fixed-capacity FIFO of raw 32-bit samples. Polled entries store one slot
//! per sample; event-driven entries store `(utc_seconds, value)` pairs.
//!
//! Overflow never rejects the new record: the oldest record is dropped so
//! that `sample_count <= capacity` holds after every append.

use crate::classifier::Classification;
use crate::config::{CoreConfig, EntryDescriptor};
use crate::error::{ConfigError, EntryError};
use crate::protocol::{DataType, EntryClass, Timestamp, TypedValue, VarLenHandle, WarningLevel};
use crate::MAX_HISTORY_SIZE;
use heapless::{Deque, Vec as HVec};
use std::collections::HashSet;

/// Slots evicted by an overflowing append (at most one record)
pub type Dropped = HVec<u32, 2>;

/// Slots removed by a drain
pub type Drained = HVec<u32, MAX_HISTORY_SIZE>;

/// Fixed-capacity FIFO of raw samples
#[derive(Debug, Clone)]
pub struct History {
    slots: Deque<u32, MAX_HISTORY_SIZE>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Deque::new(),
            capacity: capacity.clamp(1, MAX_HISTORY_SIZE),
        }
    }

    /// Configured capacity in slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the history is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append one record, evicting the oldest record if it would not fit
    pub fn push_record(&mut self, record: &[u32]) -> Option<Dropped> {
        let mut dropped = None;
        if self.slots.len() + record.len() > self.capacity {
            let mut evicted = Dropped::new();
            for _ in 0..record.len() {
                if let Some(slot) = self.slots.pop_front() {
                    // Capacity of `Dropped` equals the largest record size
                    let _ = evicted.push(slot);
                }
            }
            dropped = Some(evicted);
        }
        for &slot in record {
            if self.slots.len() >= self.capacity {
                break;
            }
            let _ = self.slots.push_back(slot);
        }
        dropped
    }

    /// Oldest-first iterator over stored slots
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().copied()
    }

    /// Slot at `index` counted from the oldest
    pub fn get(&self, index: usize) -> Option<u32> {
        self.slots.iter().nth(index).copied()
    }

    /// Newest stored slot
    pub fn newest(&self) -> Option<u32> {
        self.slots.back().copied()
    }

    /// Remove up to `max_n` oldest slots; the remainder moves to the front
    pub fn drain(&mut self, max_n: usize) -> Drained {
        let mut out = Drained::new();
        for _ in 0..max_n {
            match self.slots.pop_front() {
                Some(slot) => {
                    let _ = out.push(slot);
                }
                None => break,
            }
        }
        out
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Mutable per-entry state, owned by the pipeline
#[derive(Debug, Clone)]
pub struct EntryState {
    history: History,
    /// Most recent successful reading
    pub last_value: Option<TypedValue>,
    /// Most recent value appended to the history (percent-change reference)
    pub last_recorded: Option<TypedValue>,
    pub last_poll_time: Option<Timestamp>,
    pub last_sample_time: Option<Timestamp>,
    /// Wall-clock time of the newest stored sample
    pub last_sample_utc_ms: u64,
    pub warning: WarningLevel,
    /// Warning level last reported to the server
    pub last_warning: WarningLevel,
    pub error: u8,
    pub last_error: u8,
    pub error_count: u32,
    /// Slots evicted by overflow since start
    pub dropped_samples: u32,
    pub valid: bool,
    pub send_batch: bool,
    pub send_on_error: bool,
    pub update_now: bool,
}

impl EntryState {
    /// Create an empty state with the given history capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            history: History::new(capacity),
            last_value: None,
            last_recorded: None,
            last_poll_time: None,
            last_sample_time: None,
            last_sample_utc_ms: 0,
            warning: WarningLevel::Informational,
            last_warning: WarningLevel::Informational,
            error: 0,
            last_error: 0,
            error_count: 0,
            dropped_samples: 0,
            valid: false,
            send_batch: false,
            send_on_error: false,
            update_now: false,
        }
    }

    /// Number of valid slots in the history
    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Read-only view of the history
    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Append a record and remember its value as the percent-change reference
    pub fn append(&mut self, record: &[u32], value: TypedValue) -> Option<Dropped> {
        let dropped = self.history.push_record(record);
        if let Some(ref d) = dropped {
            self.dropped_samples = self.dropped_samples.saturating_add(d.len() as u32);
        }
        self.last_recorded = Some(value);
        dropped
    }

    /// Drop references to a variable-length handle returned to the pool
    pub fn forget_handle(&mut self, handle: VarLenHandle) {
        let stale = Some(TypedValue::VarLen(handle));
        if self.last_value == stale {
            self.last_value = None;
        }
        if self.last_recorded == stale {
            self.last_recorded = None;
        }
    }

    /// Store a successful reading
    pub fn record_success(&mut self, value: TypedValue) {
        self.last_value = Some(value);
        self.valid = true;
        self.error = 0;
    }

    /// Track a reader failure; returns true if it is flagged for upload
    ///
    /// A failure is flagged when the code differs from the last flagged one
    /// or when `repeat_period_ms` has elapsed since the last flagged sample.
    pub fn record_error(
        &mut self,
        code: u8,
        now: Timestamp,
        repeat_period_ms: u64,
        send_to_server: bool,
    ) -> bool {
        self.error_count = self.error_count.saturating_add(1);
        self.error = code;
        self.valid = false;

        let period_elapsed = self
            .last_sample_time
            .map_or(true, |t| now.saturating_sub(t) >= repeat_period_ms);
        let flagged = code != self.last_error || period_elapsed;
        if flagged {
            self.send_on_error |= send_to_server;
            self.last_error = code;
            self.last_sample_time = Some(now);
        }
        flagged
    }

    /// Store a classification; returns true if the warning level changed
    pub fn apply_classification(&mut self, classification: &Classification) -> bool {
        let changed = self.warning != classification.warning;
        self.warning = classification.warning;
        changed
    }

    /// Whether the storage interval has elapsed
    pub fn sample_due(&self, now: Timestamp, sample_rate_ms: u32) -> bool {
        self.last_sample_time
            .map_or(true, |t| now >= t.saturating_add(sample_rate_ms as u64))
    }

    /// Evaluate the batch-ready criteria after an append
    ///
    /// Ready when the warning level changed, `batch_size` slots are stored
    /// (an event pair counts as two), the
    /// history is two slots from full, an immediate flush was requested, or a
    /// percent change was detected. Consumes `update_now`.
    pub fn evaluate_batch(
        &mut self,
        descriptor: &EntryDescriptor,
        warning_changed: bool,
        percent_change: bool,
    ) -> bool {
        let count = self.history.len();
        let nearly_full = count >= self.history.capacity().saturating_sub(2);

        let ready = warning_changed
            || count >= descriptor.batch_size as usize
            || nearly_full
            || self.update_now
            || percent_change;

        self.update_now = false;
        if ready {
            self.send_batch = true;
        }
        ready
    }
}

/// Handles held by a run of stored slots of a variable-length entry
pub fn stored_handles<'a>(
    descriptor: &EntryDescriptor,
    slots: &'a [u32],
) -> impl Iterator<Item = VarLenHandle> + 'a {
    let is_varlen = descriptor.data_type == DataType::VariableLength;
    let stride = descriptor.slots_per_record();
    slots
        .iter()
        .enumerate()
        .filter(move |(i, _)| is_varlen && (i % stride) == stride - 1)
        .map(|(_, &raw)| VarLenHandle(raw))
}

/// Period after which a repeated read error is flagged again
pub fn error_repeat_period(descriptor: &EntryDescriptor, config: &CoreConfig) -> u64 {
    let batch_period = descriptor.sample_rate_ms as u64 * descriptor.batch_size as u64;
    if batch_period == 0 {
        config.batch_check_interval_ms
    } else {
        batch_period
    }
}

/// Descriptors and states of one entry class
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    descriptors: Vec<EntryDescriptor>,
    states: Vec<EntryState>,
}

impl ClassTable {
    fn new(
        class: EntryClass,
        descriptors: Vec<EntryDescriptor>,
        capacity: usize,
    ) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        for d in &descriptors {
            d.validate()?;
            if !ids.insert(d.id) {
                return Err(ConfigError::DuplicateEntryId { class, id: d.id });
            }
        }
        let states = descriptors.iter().map(|_| EntryState::new(capacity)).collect();
        Ok(Self {
            descriptors,
            states,
        })
    }

    /// Number of configured entries
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if no entries are configured
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Number of enabled entries
    pub fn enabled_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.enabled).count()
    }

    /// Descriptor and state at `index`
    pub fn get(&self, index: usize) -> Option<(&EntryDescriptor, &EntryState)> {
        Some((self.descriptors.get(index)?, self.states.get(index)?))
    }

    /// Descriptor and mutable state at `index`
    pub fn get_mut(&mut self, index: usize) -> Option<(&EntryDescriptor, &mut EntryState)> {
        Some((self.descriptors.get(index)?, self.states.get_mut(index)?))
    }

    /// Iterate over (descriptor, state) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&EntryDescriptor, &EntryState)> {
        self.descriptors.iter().zip(self.states.iter())
    }
}

/// All entries of the device, controls and sensors
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    controls: ClassTable,
    sensors: ClassTable,
}

impl EntryTable {
    /// Build the table from validated descriptors
    pub fn new(
        config: &CoreConfig,
        controls: Vec<EntryDescriptor>,
        sensors: Vec<EntryDescriptor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            controls: ClassTable::new(EntryClass::Control, controls, config.history_size)?,
            sensors: ClassTable::new(EntryClass::Sensor, sensors, config.history_size)?,
        })
    }

    /// Table of one class
    pub fn class(&self, class: EntryClass) -> &ClassTable {
        match class {
            EntryClass::Control => &self.controls,
            EntryClass::Sensor => &self.sensors,
        }
    }

    /// Mutable table of one class
    pub fn class_mut(&mut self, class: EntryClass) -> &mut ClassTable {
        match class {
            EntryClass::Control => &mut self.controls,
            EntryClass::Sensor => &mut self.sensors,
        }
    }

    /// Look up an entry, reporting out-of-range indices
    pub fn entry(
        &self,
        class: EntryClass,
        index: usize,
    ) -> Result<(&EntryDescriptor, &EntryState), EntryError> {
        let table = self.class(class);
        let count = table.len();
        table
            .get(index)
            .ok_or(EntryError::InvalidEntryIndex { class, index, count })
    }

    /// Look up an entry mutably, reporting out-of-range indices
    pub fn entry_mut(
        &mut self,
        class: EntryClass,
        index: usize,
    ) -> Result<(&EntryDescriptor, &mut EntryState), EntryError> {
        let table = self.class_mut(class);
        let count = table.len();
        table
            .get_mut(index)
            .ok_or(EntryError::InvalidEntryIndex { class, index, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_fifo_order() {
        let mut h = History::new(4);
        for v in 1..=3 {
            assert!(h.push_record(&[v]).is_none());
        }
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(h.newest(), Some(3));
    }

    #[test]
    fn test_history_overflow_drops_oldest() {
        let mut h = History::new(3);
        for v in 1..=3 {
            h.push_record(&[v]);
        }
        let dropped = h.push_record(&[4]).unwrap();
        assert_eq!(dropped.as_slice(), &[1]);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_history_pair_overflow_drops_one_pair() {
        let mut h = History::new(5);
        h.push_record(&[10, 1]);
        h.push_record(&[11, 2]);
        let dropped = h.push_record(&[12, 3]).unwrap();
        assert_eq!(dropped.as_slice(), &[10, 1]);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![11, 2, 12, 3]);
    }

    #[test]
    fn test_history_drain_shifts_remainder() {
        let mut h = History::new(8);
        for v in 1..=5 {
            h.push_record(&[v]);
        }
        let drained = h.drain(3);
        assert_eq!(drained.as_slice(), &[1, 2, 3]);
        assert_eq!(h.get(0), Some(4));
        assert_eq!(h.len(), 2);
        assert_eq!(h.drain(10).as_slice(), &[4, 5]);
        assert!(h.is_empty());
    }

    #[test]
    fn test_record_error_flags_once_per_period() {
        let mut s = EntryState::new(16);
        assert!(s.record_error(5, 1000, 10_000, true));
        assert!(s.send_on_error);
        s.send_on_error = false;

        // Same code inside the period: tracked, not flagged
        assert!(!s.record_error(5, 2000, 10_000, true));
        assert!(!s.send_on_error);
        assert_eq!(s.error_count, 2);

        // Different code flags immediately
        assert!(s.record_error(6, 2500, 10_000, true));
        // Same code after the period flags again
        s.send_on_error = false;
        assert!(s.record_error(6, 12_500, 10_000, true));
        assert!(s.send_on_error);
    }

    #[test]
    fn test_evaluate_batch_criteria() {
        let d = EntryDescriptor::default().with_batch_size(4);
        let mut s = EntryState::new(16);
        for v in 0..3 {
            s.append(&[v], TypedValue::U32(v));
            assert!(!s.evaluate_batch(&d, false, false));
        }
        s.append(&[3], TypedValue::U32(3));
        assert!(s.evaluate_batch(&d, false, false));
        assert!(s.send_batch);
    }

    #[test]
    fn test_evaluate_batch_counts_event_slots() {
        let d = EntryDescriptor::event_driven(1, "door", DataType::UInt32).with_batch_size(4);
        let mut s = EntryState::new(16);
        s.append(&[100, 1], TypedValue::U32(1));
        assert!(!s.evaluate_batch(&d, false, false));
        // second event brings the history to 4 slots
        s.append(&[101, 0], TypedValue::U32(0));
        assert!(s.evaluate_batch(&d, false, false));
    }

    #[test]
    fn test_forget_handle_clears_matching_values() {
        let mut s = EntryState::new(16);
        s.append(&[3], TypedValue::VarLen(VarLenHandle(3)));
        s.record_success(TypedValue::VarLen(VarLenHandle(5)));

        s.forget_handle(VarLenHandle(5));
        assert!(s.last_value.is_none());
        assert_eq!(s.last_recorded, Some(TypedValue::VarLen(VarLenHandle(3))));

        s.forget_handle(VarLenHandle(3));
        assert!(s.last_recorded.is_none());
    }

    #[test]
    fn test_evaluate_batch_update_now_is_consumed() {
        let d = EntryDescriptor::default().with_batch_size(10);
        let mut s = EntryState::new(16);
        s.update_now = true;
        s.append(&[1], TypedValue::U32(1));
        assert!(s.evaluate_batch(&d, false, false));
        assert!(!s.update_now);
    }

    #[test]
    fn test_evaluate_batch_nearly_full() {
        let d = EntryDescriptor::default().with_batch_size(50);
        let mut s = EntryState::new(6);
        for v in 0..3 {
            s.append(&[v], TypedValue::U32(v));
            assert!(!s.evaluate_batch(&d, false, false));
        }
        s.append(&[3], TypedValue::U32(3));
        assert!(s.evaluate_batch(&d, false, false));
    }

    #[test]
    fn test_apply_classification_reports_change() {
        let mut s = EntryState::new(16);
        let c = Classification {
            warning: WarningLevel::Advisory,
            percent_change: false,
            trigger: None,
        };
        assert!(s.apply_classification(&c));
        assert!(!s.apply_classification(&c));
    }

    #[test]
    fn test_stored_handles_event_pairs() {
        let d = EntryDescriptor::event_driven(1, "label", DataType::VariableLength);
        let handles: Vec<_> = stored_handles(&d, &[100, 7, 101, 8]).collect();
        assert_eq!(handles, vec![VarLenHandle(7), VarLenHandle(8)]);

        let d = EntryDescriptor::polled(2, "temp", DataType::Float, 1000);
        assert_eq!(stored_handles(&d, &[1, 2]).count(), 0);
    }

    #[test]
    fn test_table_rejects_duplicate_ids() {
        let config = CoreConfig::default();
        let sensors = vec![
            EntryDescriptor::polled(1, "a", DataType::Float, 1000),
            EntryDescriptor::polled(1, "b", DataType::Float, 1000),
        ];
        assert!(matches!(
            EntryTable::new(&config, vec![], sensors),
            Err(ConfigError::DuplicateEntryId { id: 1, .. })
        ));
    }

    #[test]
    fn test_table_invalid_index() {
        let config = CoreConfig::default();
        let table = EntryTable::new(
            &config,
            vec![EntryDescriptor::polled(1, "valve", DataType::UInt32, 1000)],
            vec![],
        )
        .unwrap();
        assert!(table.entry(EntryClass::Control, 0).is_ok());
        assert!(matches!(
            table.entry(EntryClass::Sensor, 0),
            Err(EntryError::InvalidEntryIndex { count: 0, .. })
        ));
    }
}
