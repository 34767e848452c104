// Fieldlink Sim - Host simulator for the Fieldlink pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Synthetic signal sources.
//!
//! Each simulated entry pairs a descriptor with a [`Signal`] and a few fault
//! knobs. [`SimReader`] turns them into readings for the sampler, and into
//! events for event-driven entries.

use fieldlink::{
    DataType, EntryClass, EntryDescriptor, EntryReader, ReadStatus, TypedValue, VarLenPool,
};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Reader error code for an injected fault
pub const FAULT_CODE: u8 = 0x01;

/// Reader error code for a payload the pool refused
pub const POOL_FULL_CODE: u8 = 0x02;

/// Signal shape of one simulated entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// `offset + amplitude * sin(2*PI*t/period_ms)` plus gaussian noise.
    Sine {
        amplitude: f64,
        period_ms: u64,
        offset: f64,
        #[serde(default)]
        noise_std: f64,
    },

    /// Two-state value toggling with probability `p_toggle` per tick.
    Binary { p_toggle: f64 },

    /// Cycles through text labels as variable-length payloads.
    Label { values: Vec<String> },
}

/// A simulated entry: descriptor, signal and fault injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEntry {
    pub descriptor: EntryDescriptor,
    pub signal: Signal,
    /// Chance per reading of a spike
    #[serde(default)]
    pub spike_probability: f64,
    /// Spike size added to the value
    #[serde(default)]
    pub spike_magnitude: f64,
    /// Chance per reading of a reader failure
    #[serde(default)]
    pub error_probability: f64,
}

/// Per-entry generator state.
#[derive(Debug, Clone, Default)]
struct SourceState {
    on: bool,
    label: usize,
}

/// Reader backed by synthetic signals.
pub struct SimReader {
    controls: Vec<(SimEntry, SourceState)>,
    sensors: Vec<(SimEntry, SourceState)>,
    rng: StdRng,
    now_ms: u64,
}

impl SimReader {
    /// Create a reader with a seeded generator.
    pub fn new(controls: Vec<SimEntry>, sensors: Vec<SimEntry>, seed: u64) -> Self {
        let with_state = |entries: Vec<SimEntry>| {
            entries
                .into_iter()
                .map(|e| (e, SourceState::default()))
                .collect()
        };
        Self {
            controls: with_state(controls),
            sensors: with_state(sensors),
            rng: StdRng::seed_from_u64(seed),
            now_ms: 0,
        }
    }

    /// Set the simulated time used by the signal shapes.
    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    fn entries_mut(&mut self, class: EntryClass) -> &mut Vec<(SimEntry, SourceState)> {
        match class {
            EntryClass::Control => &mut self.controls,
            EntryClass::Sensor => &mut self.sensors,
        }
    }

    /// Event-driven entries that fire at this tick, with their value.
    ///
    /// Binary entries fire when they toggle. Label entries fire with
    /// `spike_probability` and yield their next label as raw bytes.
    pub fn due_events(&mut self, class: EntryClass) -> Vec<(usize, EventValue)> {
        let mut rng = StdRng::seed_from_u64(self.rng.gen());
        let mut fired = Vec::new();

        for (index, (entry, state)) in self.entries_mut(class).iter_mut().enumerate() {
            if !entry.descriptor.is_event_driven() {
                continue;
            }
            match &entry.signal {
                Signal::Binary { p_toggle } => {
                    if rng.gen_bool(p_toggle.clamp(0.0, 1.0)) {
                        state.on = !state.on;
                        fired.push((index, EventValue::Value(TypedValue::U32(state.on as u32))));
                    }
                }
                Signal::Label { values } if !values.is_empty() => {
                    if rng.gen_bool(entry.spike_probability.clamp(0.0, 1.0)) {
                        let label = &values[state.label % values.len()];
                        state.label += 1;
                        fired.push((index, EventValue::Bytes(label.as_bytes().to_vec())));
                    }
                }
                _ => {}
            }
        }
        fired
    }
}

/// Value produced by an event-driven source.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Value(TypedValue),
    Bytes(Vec<u8>),
}

/// Convert a signal level to the entry's data type.
fn typed(data_type: DataType, value: f64) -> TypedValue {
    match data_type {
        DataType::Int32 => TypedValue::I32(value.round() as i32),
        DataType::Float => TypedValue::F32(value as f32),
        _ => TypedValue::U32(value.max(0.0).round() as u32),
    }
}

impl EntryReader for SimReader {
    fn read_entry(
        &mut self,
        class: EntryClass,
        index: usize,
        descriptor: &EntryDescriptor,
        pool: &mut VarLenPool,
    ) -> Result<TypedValue, ReadStatus> {
        let now_ms = self.now_ms;
        let mut rng = StdRng::seed_from_u64(self.rng.gen());
        let (entry, state) = self
            .entries_mut(class)
            .get_mut(index)
            .ok_or(ReadStatus::NoData)?;

        if rng.gen_bool(entry.error_probability.clamp(0.0, 1.0)) {
            return Err(ReadStatus::Error(FAULT_CODE));
        }

        let level = match &entry.signal {
            Signal::Sine {
                amplitude,
                period_ms,
                offset,
                noise_std,
            } => {
                let phase = 2.0 * PI * now_ms as f64 / (*period_ms).max(1) as f64;
                let noise = Normal::new(0.0, noise_std.max(0.0))
                    .map(|n| n.sample(&mut rng))
                    .unwrap_or(0.0);
                offset + amplitude * phase.sin() + noise
            }
            Signal::Binary { p_toggle } => {
                if rng.gen_bool(p_toggle.clamp(0.0, 1.0)) {
                    state.on = !state.on;
                }
                state.on as u32 as f64
            }
            Signal::Label { values } => {
                if values.is_empty() {
                    return Err(ReadStatus::NoData);
                }
                let label = &values[state.label % values.len()];
                state.label += 1;
                return pool
                    .alloc(label.as_bytes())
                    .map(TypedValue::VarLen)
                    .map_err(|_| ReadStatus::Error(POOL_FULL_CODE));
            }
        };

        let spike = if rng.gen_bool(entry.spike_probability.clamp(0.0, 1.0)) {
            entry.spike_magnitude
        } else {
            0.0
        };
        Ok(typed(descriptor.data_type, level + spike))
    }
}
