// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for Fieldlink
//!
//! Descriptors and global defaults come from persisted configuration and are
//! read-only to the pipeline.

use crate::error::ConfigError;
use crate::protocol::{
    varlen_record_size, DataType, WarningLevel, RECORD_HEADER_SIZE, SAMPLE_SIZE,
};
use crate::{DEFAULT_HISTORY_SIZE, MAX_HISTORY_SIZE};

/// Smallest history able to hold one event pair
pub const MIN_HISTORY_SIZE: usize = 2;

/// Global pipeline configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CoreConfig {
    /// Ring buffer capacity per entry, in 32-bit slots (default: 16, max 60)
    pub history_size: usize,

    /// How often the encoder scans for batch-ready entries (default: 10 s)
    pub batch_check_interval_ms: u64,

    /// Warning level at or above which a change triggers an immediate upload
    pub notify_warning_threshold: WarningLevel,

    /// Smallest packet buffer worth encoding into (default: 128)
    pub min_packet_size: usize,

    /// GetPacket attempts before falling back to Init (default: 3)
    pub alloc_retry_limit: u32,

    /// Device identifier used by preamble records and the request token seed
    pub device_id: u32,

    /// URI path for regular uploads
    pub data_topic: String,

    /// URI path for uploads triggered by a warning change
    pub warning_topic: String,

    /// Content-Format option value (42 = application/octet-stream)
    pub content_format: u16,

    /// Number of variable-length payload slots
    pub varlen_pool_slots: usize,

    /// Maximum bytes per variable-length payload
    pub varlen_max_len: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            batch_check_interval_ms: 10_000,
            notify_warning_threshold: WarningLevel::Warning,
            min_packet_size: 128,
            alloc_retry_limit: 3,
            device_id: 0,
            data_topic: "data".to_string(),
            warning_topic: "warning".to_string(),
            content_format: 42,
            varlen_pool_slots: 8,
            varlen_max_len: 64,
        }
    }
}

impl CoreConfig {
    /// Create a configuration with a custom history size
    pub fn with_history_size(history_size: usize) -> Self {
        Self {
            history_size,
            ..Default::default()
        }
    }

    /// Create a configuration for a given device id
    pub fn for_device(device_id: u32) -> Self {
        Self {
            device_id,
            ..Default::default()
        }
    }

    /// Check global invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_HISTORY_SIZE..=MAX_HISTORY_SIZE).contains(&self.history_size) {
            return Err(ConfigError::HistorySizeOutOfRange {
                size: self.history_size,
                min: MIN_HISTORY_SIZE,
                max: MAX_HISTORY_SIZE,
            });
        }

        // An empty packet must take any single variable-length record, or the
        // entry holding it would never drain.
        let largest = varlen_record_size(self.varlen_max_len, true)
            .max(RECORD_HEADER_SIZE + 2 * SAMPLE_SIZE);
        let needed = largest + self.request_header_len();
        if self.min_packet_size < needed {
            return Err(ConfigError::MinPacketTooSmall {
                size: self.min_packet_size,
                needed,
            });
        }

        Ok(())
    }

    /// Worst-case request header length for the configured topics
    pub fn request_header_len(&self) -> usize {
        let uri = |topic: &str| -> usize {
            topic
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| 1 + option_ext_len(s.len()) + s.len())
                .sum()
        };
        let uri = uri(&self.data_topic).max(uri(&self.warning_topic));
        // fixed 4 + token 4 + uri + content-format (1 + up to 2) + marker
        8 + uri + 3 + 1
    }
}

/// Extended length bytes a CoAP option needs for a value of `len` bytes
pub(crate) fn option_ext_len(len: usize) -> usize {
    if len >= 269 {
        2
    } else if len >= 13 {
        1
    } else {
        0
    }
}

/// Static per-entry configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EntryDescriptor {
    pub id: u32,
    pub name: String,
    pub data_type: DataType,
    pub enabled: bool,
    /// Storage interval in ms (0 = event-driven)
    pub sample_rate_ms: u32,
    /// Reader polling interval in ms
    pub poll_rate_ms: u32,
    /// Samples that make a batch ready
    pub batch_size: u16,
    /// Low thresholds per level (Watch, Advisory, Warning)
    pub warning_low: [f64; 3],
    /// High thresholds per level (Watch, Advisory, Warning)
    pub warning_high: [f64; 3],
    /// Bit per level enabling the low threshold (bit 0 = Watch)
    pub warning_low_enabled_mask: u8,
    /// Bit per level enabling the high threshold (bit 0 = Watch)
    pub warning_high_enabled_mask: u8,
    pub percent_change_enabled: bool,
    /// Percent change (0-100) that counts as significant
    pub percent_change_threshold: u16,
    pub send_to_server: bool,
}

impl Default for EntryDescriptor {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            data_type: DataType::UInt32,
            enabled: true,
            sample_rate_ms: 1000,
            poll_rate_ms: 1000,
            batch_size: 8,
            warning_low: [0.0; 3],
            warning_high: [0.0; 3],
            warning_low_enabled_mask: 0,
            warning_high_enabled_mask: 0,
            percent_change_enabled: false,
            percent_change_threshold: 0,
            send_to_server: true,
        }
    }
}

impl EntryDescriptor {
    /// Create a polled entry
    pub fn polled(id: u32, name: impl Into<String>, data_type: DataType, rate_ms: u32) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            sample_rate_ms: rate_ms,
            poll_rate_ms: rate_ms,
            ..Default::default()
        }
    }

    /// Create an event-driven entry (sample rate 0)
    pub fn event_driven(id: u32, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            sample_rate_ms: 0,
            poll_rate_ms: 0,
            ..Default::default()
        }
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: u16) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable the high threshold for a level
    pub fn with_high_threshold(mut self, level: WarningLevel, value: f64) -> Self {
        if let Some(i) = level.threshold_index() {
            self.warning_high[i] = value;
            self.warning_high_enabled_mask |= 1 << i;
        }
        self
    }

    /// Enable the low threshold for a level
    pub fn with_low_threshold(mut self, level: WarningLevel, value: f64) -> Self {
        if let Some(i) = level.threshold_index() {
            self.warning_low[i] = value;
            self.warning_low_enabled_mask |= 1 << i;
        }
        self
    }

    /// Enable percent-change detection
    pub fn with_percent_change(mut self, threshold: u16) -> Self {
        self.percent_change_enabled = true;
        self.percent_change_threshold = threshold;
        self
    }

    /// Whether this entry is recorded through the event path
    pub fn is_event_driven(&self) -> bool {
        self.sample_rate_ms == 0
    }

    /// Slots a single stored record takes (event entries store time + value)
    pub fn slots_per_record(&self) -> usize {
        if self.is_event_driven() {
            2
        } else {
            1
        }
    }

    /// Check per-entry invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percent_change_threshold > 100 {
            return Err(ConfigError::PercentChangeOutOfRange {
                id: self.id,
                value: self.percent_change_threshold,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize { id: self.id });
        }
        Ok(())
    }
}
