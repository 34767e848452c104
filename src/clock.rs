// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Time sources
//!
//! The pipeline needs a monotonic millisecond clock for scheduling and a
//! wall clock for record timestamps.

use crate::protocol::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Time source consumed by the pipeline
pub trait Clock {
    /// Monotonic milliseconds
    fn now(&self) -> Timestamp;

    /// Milliseconds since the Unix epoch
    fn utc_now_ms(&self) -> u64;
}

/// Host clock: `Instant` for scheduling, `chrono::Utc` for timestamps
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Create a clock whose monotonic time starts at zero
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }

    fn utc_now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually advanced clock for tests and simulation
///
/// Clones share the same time, so a test can keep one handle while the
/// pipeline owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    utc_base_ms: u64,
}

impl ManualClock {
    /// Create a clock at monotonic zero, mapped to `utc_base_ms`
    pub fn new(utc_base_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(0)),
            utc_base_ms,
        }
    }

    /// Set the monotonic time
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Advance the monotonic time
    pub fn advance(&self, ms: u64) -> Timestamp {
        self.now.fetch_add(ms, Ordering::Relaxed) + ms
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Relaxed)
    }

    fn utc_now_ms(&self) -> u64 {
        self.utc_base_ms + self.now()
    }
}
