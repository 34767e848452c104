// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Acquisition-side integration tests: histories, classification and batch
//! triggers driven through the public pipeline.

use fieldlink::classifier::{evaluate_warning, percent_change};
use fieldlink::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

const UTC_BASE: u64 = 1_700_000_000_000;

type Reading = std::result::Result<TypedValue, ReadStatus>;

/// Reader fed per entry from a queue of scripted readings
#[derive(Default)]
struct ScriptReader {
    queue: HashMap<(EntryClass, usize), VecDeque<Reading>>,
}

impl ScriptReader {
    fn push(&mut self, class: EntryClass, index: usize, reading: Reading) {
        self.queue.entry((class, index)).or_default().push_back(reading);
    }
}

impl EntryReader for ScriptReader {
    fn read_entry(
        &mut self,
        class: EntryClass,
        index: usize,
        _descriptor: &EntryDescriptor,
        _pool: &mut VarLenPool,
    ) -> Reading {
        self.queue
            .get_mut(&(class, index))
            .and_then(|q| q.pop_front())
            .unwrap_or(Err(ReadStatus::NoData))
    }
}

type Pipeline = Telemetry<ScriptReader, MemoryTransport, ManualClock, NoopIndicator>;

fn pipeline(
    config: CoreConfig,
    controls: Vec<EntryDescriptor>,
    sensors: Vec<EntryDescriptor>,
) -> (Pipeline, ManualClock) {
    let clock = ManualClock::new(UTC_BASE);
    let telemetry = Telemetry::new(
        config,
        controls,
        sensors,
        ScriptReader::default(),
        MemoryTransport::new(256),
        clock.clone(),
        NoopIndicator,
    )
    .unwrap();
    (telemetry, clock)
}

/// Feed `values` to sensor 0, one per second
fn feed_sensor(t: &mut Pipeline, clock: &ManualClock, values: &[TypedValue]) -> Vec<PollOutcome> {
    values
        .iter()
        .map(|v| {
            t.reader_mut().push(EntryClass::Sensor, 0, Ok(*v));
            let now = clock.now();
            let outcome = t.poll_sensors(now);
            clock.advance(1000);
            outcome
        })
        .collect()
}

#[test]
fn batch_ready_exactly_on_fourth_sample() {
    let sensor = EntryDescriptor::polled(1, "temp", DataType::Float, 1000).with_batch_size(4);
    let (mut t, clock) = pipeline(CoreConfig::default(), vec![], vec![sensor]);

    let values: Vec<_> = [20.0f32, 20.1, 20.2, 20.3].iter().map(|v| TypedValue::F32(*v)).collect();
    let outcomes = feed_sensor(&mut t, &clock, &values);

    for (i, outcome) in outcomes.iter().enumerate() {
        let PollOutcome::Sampled { appended, batch_ready, .. } = *outcome else {
            panic!("expected a sample, got {:?}", outcome);
        };
        assert!(appended);
        assert_eq!(batch_ready, i == 3, "sample {}", i);
    }
    assert!(t.entry_state(EntryClass::Sensor, 0).unwrap().send_batch);
    assert_eq!(t.sample_count(EntryClass::Sensor, 0).unwrap(), 4);
}

#[test]
fn warning_crossing_forces_batch() {
    let sensor = EntryDescriptor::polled(1, "level", DataType::UInt32, 1000)
        .with_high_threshold(WarningLevel::Warning, 100.0)
        .with_batch_size(50);
    let (mut t, clock) = pipeline(CoreConfig::default(), vec![], vec![sensor]);

    let outcomes = feed_sensor(&mut t, &clock, &[TypedValue::U32(50), TypedValue::U32(150)]);
    assert!(matches!(outcomes[0], PollOutcome::Sampled { batch_ready: false, .. }));
    assert!(matches!(outcomes[1], PollOutcome::Sampled { batch_ready: true, .. }));
    assert_eq!(t.warning_level(EntryClass::Sensor, 0).unwrap(), WarningLevel::Warning);
}

#[test]
fn percent_change_stores_between_intervals() {
    let mut sensor = EntryDescriptor::polled(1, "flow", DataType::UInt32, 10_000)
        .with_percent_change(25)
        .with_batch_size(50);
    sensor.poll_rate_ms = 1000;
    let (mut t, clock) = pipeline(CoreConfig::default(), vec![], vec![sensor]);

    let outcomes = feed_sensor(
        &mut t,
        &clock,
        &[TypedValue::U32(100), TypedValue::U32(110), TypedValue::U32(200)],
    );
    assert!(matches!(outcomes[0], PollOutcome::Sampled { appended: true, batch_ready: false, .. }));
    // inside the storage interval and within 25%
    assert!(matches!(outcomes[1], PollOutcome::Sampled { appended: false, .. }));
    assert!(matches!(outcomes[2], PollOutcome::Sampled { appended: true, batch_ready: true, .. }));
    assert_eq!(t.sample_count(EntryClass::Sensor, 0).unwrap(), 2);
}

#[test]
fn history_never_exceeds_capacity() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..200 {
        let capacity = rng.gen_range(2..=fieldlink::MAX_HISTORY_SIZE);
        let pairs = rng.gen_bool(0.5);
        let stride = if pairs { 2 } else { 1 };
        let capacity = capacity - capacity % stride;
        let mut history = History::new(capacity);
        let mut pushed = 0u32;

        for _ in 0..rng.gen_range(1..200) {
            pushed += 1;
            let record = [pushed; 2];
            let before = history.len();
            let dropped = history.push_record(&record[..stride]);

            assert!(history.len() <= capacity);
            assert_eq!(history.newest(), Some(pushed), "newest record must survive");
            match dropped {
                Some(d) => {
                    assert_eq!(d.len(), stride);
                    assert_eq!(history.len(), before);
                    // the oldest went, which is never the one just pushed
                    assert!(d.iter().all(|&s| s < pushed));
                }
                None => assert_eq!(history.len(), before + stride),
            }
        }

        // FIFO order holds after any number of evictions
        let slots: Vec<_> = history.iter().collect();
        assert!(slots.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn warning_is_highest_matching_level() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let mut d = EntryDescriptor::polled(1, "x", DataType::Int32, 1000);
        for i in 0..3 {
            d.warning_high[i] = rng.gen_range(-100.0..100.0);
            d.warning_low[i] = rng.gen_range(-100.0..100.0);
        }
        d.warning_high_enabled_mask = rng.gen_range(0..8);
        d.warning_low_enabled_mask = rng.gen_range(0..8);

        let v = rng.gen_range(-150i32..150);
        let expected = (0..3)
            .filter(|&i| {
                let bit = 1u8 << i;
                (d.warning_low_enabled_mask & bit != 0 && (v as f64) < d.warning_low[i])
                    || (d.warning_high_enabled_mask & bit != 0 && (v as f64) > d.warning_high[i])
            })
            .map(|i| WarningLevel::THRESHOLD_LEVELS[i])
            .max()
            .unwrap_or(WarningLevel::Informational);

        assert_eq!(evaluate_warning(&TypedValue::I32(v), &d).0, expected);
    }
}

#[test]
fn percent_change_symmetry() {
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..1000 {
        let pct = rng.gen_range(0u16..=100);
        let u: u32 = rng.gen();
        let i: i32 = rng.gen();
        let f: f32 = rng.gen_range(-1.0e6..1.0e6);
        assert!(!percent_change(&TypedValue::U32(u), &TypedValue::U32(u), pct));
        assert!(!percent_change(&TypedValue::I32(i), &TypedValue::I32(i), pct));
        assert!(!percent_change(&TypedValue::F32(f), &TypedValue::F32(f), pct));

        if pct < 100 {
            let nz = rng.gen_range(1u32..u32::MAX);
            assert!(percent_change(&TypedValue::U32(nz), &TypedValue::U32(0), pct));
            assert!(percent_change(&TypedValue::I32(-(nz as i32 & 0x7FFF) - 1), &TypedValue::I32(0), pct));
        }
    }
}

#[test]
fn batch_trigger_matches_criteria() {
    let mut rng = StdRng::seed_from_u64(23);

    for _ in 0..300 {
        let capacity = rng.gen_range(4..=32);
        let batch_size = rng.gen_range(1..=40u16);
        let d = EntryDescriptor::polled(1, "x", DataType::UInt32, 1000).with_batch_size(batch_size);
        let mut state = EntryState::new(capacity);

        for v in 0..rng.gen_range(1..40u32) {
            state.append(&[v], TypedValue::U32(v));
            let warning_changed = rng.gen_bool(0.1);
            let pct = rng.gen_bool(0.1);
            let update_now = rng.gen_bool(0.05);
            state.update_now = update_now;
            state.send_batch = false;

            let count = state.sample_count();
            let expected = warning_changed
                || count >= batch_size as usize
                || count >= capacity - 2
                || update_now
                || pct;
            assert_eq!(state.evaluate_batch(&d, warning_changed, pct), expected);
            assert_eq!(state.send_batch, expected);
            assert!(!state.update_now);
        }
    }
}

#[test]
fn read_error_flagged_once_per_batch_interval() {
    let sensor = EntryDescriptor::polled(1, "gauge", DataType::Float, 1000).with_batch_size(5);
    let (mut t, clock) = pipeline(CoreConfig::default(), vec![], vec![sensor]);

    let mut flagged = Vec::new();
    for _ in 0..12 {
        t.reader_mut().push(EntryClass::Sensor, 0, Err(ReadStatus::Error(0x11)));
        if let PollOutcome::ReadFailed { flagged: f, .. } = t.poll_sensors(clock.now()) {
            flagged.push(f);
        }
        clock.advance(1000);
    }

    // repeat period = 5 samples x 1000 ms
    let expected: Vec<bool> = (0..12).map(|i| i % 5 == 0).collect();
    assert_eq!(flagged, expected);
    let state = t.entry_state(EntryClass::Sensor, 0).unwrap();
    assert_eq!(state.error_count, 12);
    assert_eq!(state.last_error, 0x11);
    assert!(!state.valid);
}

#[test]
fn recovery_after_read_error() {
    let sensor = EntryDescriptor::polled(1, "gauge", DataType::UInt32, 1000);
    let (mut t, clock) = pipeline(CoreConfig::default(), vec![], vec![sensor]);

    t.reader_mut().push(EntryClass::Sensor, 0, Err(ReadStatus::Error(3)));
    t.poll_sensors(clock.now());
    clock.advance(1000);
    let outcome = feed_sensor(&mut t, &clock, &[TypedValue::U32(8)]);

    assert!(matches!(outcome[0], PollOutcome::Sampled { appended: true, .. }));
    let state = t.entry_state(EntryClass::Sensor, 0).unwrap();
    assert!(state.valid);
    assert_eq!(state.error, 0);
    assert_eq!(state.last_error, 3);
}

#[test]
fn controls_and_sensors_have_independent_cursors() {
    let controls = vec![
        EntryDescriptor::polled(1, "valve", DataType::UInt32, 1000),
        EntryDescriptor::polled(2, "pump", DataType::UInt32, 1000),
    ];
    let sensors = vec![EntryDescriptor::polled(10, "temp", DataType::UInt32, 1000)];
    let (mut t, _clock) = pipeline(CoreConfig::default(), controls, sensors);

    for index in 0..2 {
        t.reader_mut().push(EntryClass::Control, index, Ok(TypedValue::U32(index as u32)));
    }
    t.reader_mut().push(EntryClass::Sensor, 0, Ok(TypedValue::U32(99)));

    assert!(matches!(t.poll_controls(0), PollOutcome::Sampled { index: 0, .. }));
    assert!(matches!(t.poll_sensors(0), PollOutcome::Sampled { index: 0, .. }));
    assert!(matches!(t.poll_controls(0), PollOutcome::Sampled { index: 1, .. }));
    assert_eq!(t.last_value(EntryClass::Control, 1).unwrap(), Some(TypedValue::U32(1)));
    assert_eq!(t.last_value(EntryClass::Sensor, 0).unwrap(), Some(TypedValue::U32(99)));
}

#[test]
fn event_entries_record_pairs_with_wall_time() {
    let controls = vec![EntryDescriptor::event_driven(4, "door", DataType::UInt32).with_batch_size(4)];
    let (mut t, clock) = pipeline(CoreConfig::default(), controls, vec![]);

    for (i, v) in [1u32, 0, 1].iter().enumerate() {
        clock.set(i as u64 * 2500);
        let outcome = t.record_event(EntryClass::Control, 0, TypedValue::U32(*v)).unwrap();
        assert!(outcome.appended);
        // batch size counts slots: the second pair reaches four
        assert_eq!(outcome.batch_ready, i >= 1);
    }

    let state = t.entry_state(EntryClass::Control, 0).unwrap();
    let base = (UTC_BASE / 1000) as u32;
    assert_eq!(
        state.history().iter().collect::<Vec<_>>(),
        vec![base, 1, base + 2, 0, base + 5, 1]
    );
    // polling never touches event entries
    assert!(matches!(t.poll_controls(10_000), PollOutcome::Skipped { index: 0 }));
}

#[test]
fn overflow_releases_varlen_handles() {
    let config = CoreConfig {
        history_size: 4,
        varlen_pool_slots: 8,
        ..Default::default()
    };
    let controls = vec![EntryDescriptor::event_driven(1, "label", DataType::VariableLength).with_batch_size(50)];
    let (mut t, _clock) = pipeline(config, controls, vec![]);

    for label in [&b"one"[..], b"two", b"three", b"four"] {
        t.record_varlen_event(EntryClass::Control, 0, label).unwrap();
    }

    // two pairs fit; two were evicted and their payloads returned
    assert_eq!(t.sample_count(EntryClass::Control, 0).unwrap(), 4);
    assert_eq!(t.pool().in_use(), 2);
    assert_eq!(t.entry_state(EntryClass::Control, 0).unwrap().dropped_samples, 4);
}

#[test]
fn disabled_entries_ignore_events() {
    let mut door = EntryDescriptor::event_driven(1, "door", DataType::UInt32);
    door.enabled = false;
    let (mut t, _clock) = pipeline(CoreConfig::default(), vec![door], vec![]);

    let outcome = t.record_event(EntryClass::Control, 0, TypedValue::U32(1)).unwrap();
    assert!(!outcome.appended);
    assert_eq!(t.sample_count(EntryClass::Control, 0).unwrap(), 0);
    assert!(t.entry_state(EntryClass::Control, 0).unwrap().last_value.is_none());
}
