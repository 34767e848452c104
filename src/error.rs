// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Fieldlink
//!
//! Every error in this crate is recoverable. The pipeline handles them
//! locally (retry, drop-oldest, flag-and-continue) and only reports the ones
//! a caller can act on, such as an out-of-range entry index.

use crate::protocol::{DataType, EntryClass};
use thiserror::Error;

/// Result type alias for Fieldlink operations
pub type Result<T> = std::result::Result<T, FieldlinkError>;

/// Main error type for Fieldlink operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldlinkError {
    /// Entry lookup or entry-kind error
    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Variable-length payload pool error
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Status reported by an entry reader when no fresh value is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Reader is busy, no data yet. Prior state is retained.
    NoData,
    /// Reader failed with a device-specific error code (non-zero)
    Error(u8),
}

/// Read error code used when a reader returns a value of the wrong type
pub const READ_TYPE_MISMATCH: u8 = 0xFF;

/// Errors addressing a specific entry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntryError {
    /// Index outside the configured entry count
    #[error("Invalid {class} index {index} (configured: {count})")]
    InvalidEntryIndex {
        class: EntryClass,
        index: usize,
        count: usize,
    },

    /// Event entry point used on a polled entry
    #[error("{class} {index} is polled, not event-driven")]
    NotEventDriven { class: EntryClass, index: usize },

    /// Value type differs from the descriptor's data type
    #[error("{class} {index} expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        class: EntryClass,
        index: usize,
        expected: DataType,
        actual: DataType,
    },

    /// History at capacity; the oldest slots were dropped
    #[error("{class} {id} history full, dropped {dropped} oldest slot(s)")]
    HistoryFull {
        class: EntryClass,
        id: u32,
        dropped: usize,
    },
}

/// Errors while writing into a packet buffer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Buffer too small for the next write
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Payload too large for a single record
    #[error("Payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors while parsing a packet (collector side)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Invalid request header
    #[error("Invalid header")]
    InvalidHeader,

    /// Malformed option
    #[error("Malformed option at offset {offset}")]
    MalformedOption { offset: usize },

    /// No payload marker before end of packet
    #[error("Missing payload marker")]
    MissingPayloadMarker,

    /// Unknown block type
    #[error("Unknown block type: {0}")]
    UnknownBlockType(u8),

    /// Unsupported record version
    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u8),
}

/// Errors raised by the outbound transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No buffer available
    #[error("Packet allocation failed (requested {min_size} bytes)")]
    AllocationFailed { min_size: usize },

    /// Buffer handed out is below the minimum viable size
    #[error("Packet too small: {size} bytes, need at least {min_size}")]
    PacketTooSmall { size: usize, min_size: usize },

    /// Device offline or not provisioned
    #[error("Transport offline")]
    Offline,

    /// Outbound queue full
    #[error("Outbound queue full")]
    QueueFull,
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// History size outside the supported range
    #[error("History size {size} out of range ({min}..={max})")]
    HistorySizeOutOfRange { size: usize, min: usize, max: usize },

    /// Minimum packet cannot hold the largest record
    #[error("Minimum packet size {size} cannot hold a {needed}-byte record")]
    MinPacketTooSmall { size: usize, needed: usize },

    /// Percent-change threshold above 100
    #[error("Entry {id}: percent-change threshold {value} exceeds 100")]
    PercentChangeOutOfRange { id: u32, value: u16 },

    /// Batch size of zero
    #[error("Entry {id}: batch size must be non-zero")]
    ZeroBatchSize { id: u32 },

    /// Two entries in the same class share an id
    #[error("Duplicate {class} id {id}")]
    DuplicateEntryId { class: EntryClass, id: u32 },
}

/// Variable-length payload pool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// All slots in use
    #[error("Pool exhausted: all {slots} slots in use")]
    Exhausted { slots: usize },

    /// Payload larger than a slot
    #[error("Payload of {size} bytes exceeds slot size {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FieldlinkError::Entry(EntryError::InvalidEntryIndex {
            class: EntryClass::Sensor,
            index: 9,
            count: 4,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("sensor"));
        assert!(msg.contains("9"));
        assert!(msg.contains("4"));
    }

    #[test]
    fn test_entry_error_display() {
        let err = EntryError::TypeMismatch {
            class: EntryClass::Control,
            index: 1,
            expected: DataType::UInt32,
            actual: DataType::VariableLength,
        };
        assert_eq!(format!("{}", err), "control 1 expects UInt32, got VariableLength");

        let err = EntryError::HistoryFull {
            class: EntryClass::Sensor,
            id: 7,
            dropped: 2,
        };
        assert_eq!(format!("{}", err), "sensor 7 history full, dropped 2 oldest slot(s)");
    }

    #[test]
    fn test_error_conversion() {
        let err: FieldlinkError = TransportError::AllocationFailed { min_size: 64 }.into();
        assert!(matches!(err, FieldlinkError::Transport(_)));

        let err: FieldlinkError = PoolError::Exhausted { slots: 8 }.into();
        assert!(matches!(err, FieldlinkError::Pool(_)));
    }
}
