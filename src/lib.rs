// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Fieldlink - Telemetry acquisition and upload encoding
//!
//! The telemetry core of a battery-powered field device: sample named
//! controls and sensors, classify every value against warning thresholds,
//! buffer it per entry, and drain ready entries into size-bounded packets.
//!
//! ## Key Features
//!
//! - **Bounded histories**: fixed-capacity FIFO per entry, drop-oldest on overflow
//! - **Warning classification**: per-level low/high thresholds plus percent-change detection
//! - **Budgeted packets**: bit-packed big-endian records that never overrun the buffer
//! - **Lossless retries**: samples leave a history only once their packet is queued
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldlink::{
//!     CoreConfig, DataType, EntryClass, EntryDescriptor, EntryReader, ManualClock,
//!     MemoryTransport, NoopIndicator, ReadStatus, Telemetry, TypedValue, VarLenPool,
//! };
//!
//! struct Thermometer;
//!
//! impl EntryReader for Thermometer {
//!     fn read_entry(
//!         &mut self,
//!         _class: EntryClass,
//!         _index: usize,
//!         _descriptor: &EntryDescriptor,
//!         _pool: &mut VarLenPool,
//!     ) -> Result<TypedValue, ReadStatus> {
//!         Ok(TypedValue::F32(21.5))
//!     }
//! }
//!
//! let sensors = vec![EntryDescriptor::polled(1, "temp", DataType::Float, 1000).with_batch_size(4)];
//! let clock = ManualClock::new(1_700_000_000_000);
//! let mut telemetry = Telemetry::new(
//!     CoreConfig::default(),
//!     vec![],
//!     sensors,
//!     Thermometer,
//!     MemoryTransport::new(256),
//!     clock.clone(),
//!     NoopIndicator,
//! )
//! .unwrap();
//!
//! for second in 0..4 {
//!     telemetry.poll_sensors(second * 1000);
//! }
//! for tick in 0..3 {
//!     telemetry.tick_upload(4000 + tick);
//! }
//!
//! let packet = telemetry.transport_mut().pop_outgoing().unwrap();
//! let decoded = fieldlink::decode_packet(packet.as_bytes()).unwrap();
//! assert_eq!(decoded.records[0].value_count(), 4);
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Entry classes, data types, warning levels and the record header
//! - [`config`]: Global configuration and entry descriptors
//! - [`store`]: Per-entry histories and state
//! - [`classifier`]: Warning and percent-change classification
//! - [`sampler`]: Round-robin polling
//! - [`recorder`]: Event-driven recording
//! - [`encoder`]: Packet building under a byte budget
//! - [`uploader`]: Upload state machine
//! - [`decoder`]: Collector-side packet parsing
//! - [`transport`]: Outbound transport abstraction
//! - [`metrics`]: Upload statistics

// Modules
pub mod classifier;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod preamble;
pub mod protocol;
pub mod recorder;
pub mod sampler;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod uploader;
pub mod writer;

// Re-exports for convenient access
pub use classifier::{classify, Bound, Classification, ThresholdHit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoreConfig, EntryDescriptor};
pub use decoder::{decode_packet, DecodedPacket, DecodedRecord, DecodedRequest, RecordValues};
pub use encoder::{DrainAction, PacketBuilder, PacketPlan, RequestHeader};
pub use error::{
    ConfigError, DecodeError, EncodeError, EntryError, FieldlinkError, PoolError, ReadStatus,
    Result, TransportError, READ_TYPE_MISMATCH,
};
pub use metrics::UploadMetrics;
pub use pool::VarLenPool;
pub use preamble::{GpsFix, IndoorFix, Preamble};
pub use protocol::{
    BlockType, DataType, EntryClass, RecordHeader, Timestamp, TypedValue, VarLenHandle,
    WarningLevel,
};
pub use recorder::EventOutcome;
pub use sampler::{EntryReader, PollOutcome, Sampler};
pub use status::{LedState, NoopIndicator, RecordingIndicator, StatusIndicator, StatusLed};
pub use store::{EntryState, EntryTable, History};
pub use telemetry::Telemetry;
pub use transport::{MemoryTransport, PacketBuffer, Transport, TransportMetrics};
pub use uploader::{UploadSession, UploadState};
pub use writer::PacketWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Record format version carried in every record header
pub const RECORD_VERSION: u8 = 1;

/// Default history capacity in 32-bit slots
pub const DEFAULT_HISTORY_SIZE: usize = 16;

/// Largest supported history capacity
pub const MAX_HISTORY_SIZE: usize = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_history_in_range() {
        assert!(DEFAULT_HISTORY_SIZE <= MAX_HISTORY_SIZE);
        assert_eq!(CoreConfig::default().history_size, DEFAULT_HISTORY_SIZE);
    }
}
