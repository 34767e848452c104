// Fieldlink Sim - Host simulator for the Fieldlink pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scenario files: pipeline configuration plus simulated entries.

use crate::signal::{Signal, SimEntry};
use fieldlink::{CoreConfig, DataType, EntryDescriptor, WarningLevel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors loading a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A complete simulation setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub core: CoreConfig,
    pub controls: Vec<SimEntry>,
    pub sensors: Vec<SimEntry>,
    /// Registration payload sent with the first packet
    pub registration: Option<String>,
}

impl Scenario {
    /// Load a scenario from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Pretty JSON for `--dump-config`.
    pub fn to_json(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Descriptors handed to the pipeline.
    pub fn descriptors(entries: &[SimEntry]) -> Vec<EntryDescriptor> {
        entries.iter().map(|e| e.descriptor.clone()).collect()
    }
}

impl Default for Scenario {
    fn default() -> Self {
        let pressure = SimEntry {
            descriptor: EntryDescriptor::polled(101, "pressure", DataType::Float, 5000)
                .with_batch_size(12)
                .with_high_threshold(WarningLevel::Watch, 4.5)
                .with_high_threshold(WarningLevel::Warning, 6.0)
                .with_low_threshold(WarningLevel::Advisory, 1.0),
            signal: Signal::Sine {
                amplitude: 1.0,
                period_ms: 600_000,
                offset: 3.0,
                noise_std: 0.05,
            },
            spike_probability: 0.01,
            spike_magnitude: 4.0,
            error_probability: 0.0,
        };

        let temperature = SimEntry {
            descriptor: EntryDescriptor::polled(102, "temperature", DataType::Int32, 10_000)
                .with_batch_size(6)
                .with_percent_change(20),
            signal: Signal::Sine {
                amplitude: 8.0,
                period_ms: 3_600_000,
                offset: 18.0,
                noise_std: 0.5,
            },
            spike_probability: 0.0,
            spike_magnitude: 0.0,
            error_probability: 0.02,
        };

        let mode = SimEntry {
            descriptor: EntryDescriptor::polled(103, "mode", DataType::VariableLength, 60_000)
                .with_batch_size(2),
            signal: Signal::Label {
                values: vec!["idle".into(), "pumping".into(), "flushing".into()],
            },
            spike_probability: 0.0,
            spike_magnitude: 0.0,
            error_probability: 0.0,
        };

        let door = SimEntry {
            descriptor: EntryDescriptor::event_driven(1, "door", DataType::UInt32).with_batch_size(4),
            signal: Signal::Binary { p_toggle: 0.02 },
            spike_probability: 0.0,
            spike_magnitude: 0.0,
            error_probability: 0.0,
        };

        let valve = SimEntry {
            descriptor: EntryDescriptor::polled(2, "valve", DataType::UInt32, 30_000)
                .with_batch_size(4),
            signal: Signal::Binary { p_toggle: 0.1 },
            spike_probability: 0.0,
            spike_magnitude: 0.0,
            error_probability: 0.0,
        };

        Self {
            core: CoreConfig::for_device(0x00F1_E1D0),
            controls: vec![door, valve],
            sensors: vec![pressure, temperature, mode],
            registration: Some(format!("fieldlink-sim/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}
