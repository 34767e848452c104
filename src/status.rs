// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Status signaling (fire-and-forget)

/// Indicator a status is shown on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusLed {
    /// Upload activity
    Upload,
    /// Urgent warning upload
    Warning,
}

/// Requested indicator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedState {
    Off,
    On,
    /// Short blink, then back to the previous state
    Flash,
}

/// Status sink; implementations must not block
pub trait StatusIndicator {
    fn notify_status(&mut self, led: StatusLed, state: LedState);
}

/// Indicator that ignores every request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndicator;

impl StatusIndicator for NoopIndicator {
    fn notify_status(&mut self, _led: StatusLed, _state: LedState) {}
}

/// Indicator that remembers every request
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    pub events: Vec<(StatusLed, LedState)>,
}

impl StatusIndicator for RecordingIndicator {
    fn notify_status(&mut self, led: StatusLed, state: LedState) {
        self.events.push((led, state));
    }
}
