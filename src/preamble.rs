// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! One-shot records sent ahead of entry data
//!
//! Each preamble is a "send now" flag plus its payload. It stays pending
//! until a packet carrying it has been enqueued.

/// Satellite position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
}

/// Position inside a mapped site, in meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndoorFix {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Pending preamble records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preamble {
    pub registration: Option<Vec<u8>>,
    pub gps: Option<GpsFix>,
    pub indoor: Option<IndoorFix>,
}

impl Preamble {
    /// Any preamble waiting to be sent
    pub fn is_pending(&self) -> bool {
        self.registration.is_some() || self.gps.is_some() || self.indoor.is_some()
    }
}

/// Which preambles a packet carried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreambleSent {
    pub registration: bool,
    pub gps: bool,
    pub indoor: bool,
}

impl PreambleSent {
    /// Number of preamble records written
    pub fn count(&self) -> usize {
        self.registration as usize + self.gps as usize + self.indoor as usize
    }

    /// Clear the flags of everything that was sent
    pub fn commit(&self, preamble: &mut Preamble) {
        if self.registration {
            preamble.registration = None;
        }
        if self.gps {
            preamble.gps = None;
        }
        if self.indoor {
            preamble.indoor = None;
        }
    }
}
