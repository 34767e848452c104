// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol definitions for Fieldlink
//!
//! This module defines the core types shared by the pipeline and the wire:
//! - Entry classes, data types and warning levels
//! - Typed sample values
//! - The bit-packed record header

use std::fmt;

/// Record header size in bytes (bits + id + last time + sample rate)
pub const RECORD_HEADER_SIZE: usize = 20;

/// Size of one stored sample on the wire
pub const SAMPLE_SIZE: usize = 4;

/// Size of the variable-length `length` field
pub const VARLEN_LENGTH_SIZE: usize = 4;

/// Size of the timestamp prefix carried by event-driven variable-length records
pub const EVENT_TIMESTAMP_SIZE: usize = 4;

/// Monotonic time in milliseconds
pub type Timestamp = u64;

/// Which peripheral table an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryClass {
    /// Actuator-side values (processed first)
    Control,
    /// Measured values
    Sensor,
}

impl EntryClass {
    /// Both classes in upload order
    pub const ALL: [EntryClass; 2] = [EntryClass::Control, EntryClass::Sensor];

    /// Block type used for records of this class
    pub fn block_type(&self) -> BlockType {
        match self {
            EntryClass::Control => BlockType::Control,
            EntryClass::Sensor => BlockType::Sensor,
        }
    }
}

impl fmt::Display for EntryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryClass::Control => write!(f, "control"),
            EntryClass::Sensor => write!(f, "sensor"),
        }
    }
}

/// Record block types (4 bits on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    Control = 1,
    Sensor = 2,
    Registration = 3,
    GpsLocation = 4,
    IndoorLocation = 5,
}

impl BlockType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(BlockType::Control),
            2 => Some(BlockType::Sensor),
            3 => Some(BlockType::Registration),
            4 => Some(BlockType::GpsLocation),
            5 => Some(BlockType::IndoorLocation),
            _ => None,
        }
    }
}

/// Sample data types (2 bits on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DataType {
    #[default]
    UInt32 = 0,
    Int32 = 1,
    Float = 2,
    VariableLength = 3,
}

impl DataType {
    /// Convert from the 2-bit wire value
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => DataType::UInt32,
            1 => DataType::Int32,
            2 => DataType::Float,
            _ => DataType::VariableLength,
        }
    }
}

/// Warning severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum WarningLevel {
    #[default]
    Informational = 0,
    Watch = 1,
    Advisory = 2,
    Warning = 3,
}

impl WarningLevel {
    /// Levels that carry thresholds, in ascending severity
    pub const THRESHOLD_LEVELS: [WarningLevel; 3] =
        [WarningLevel::Watch, WarningLevel::Advisory, WarningLevel::Warning];

    /// Convert from the 2-bit wire value
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => WarningLevel::Informational,
            1 => WarningLevel::Watch,
            2 => WarningLevel::Advisory,
            _ => WarningLevel::Warning,
        }
    }

    /// Index into the per-level threshold arrays (None for Informational)
    pub fn threshold_index(&self) -> Option<usize> {
        match self {
            WarningLevel::Informational => None,
            level => Some(*level as usize - 1),
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningLevel::Informational => write!(f, "INFORMATIONAL"),
            WarningLevel::Watch => write!(f, "WATCH"),
            WarningLevel::Advisory => write!(f, "ADVISORY"),
            WarningLevel::Warning => write!(f, "WARNING"),
        }
    }
}

/// Handle to a payload held in the variable-length pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarLenHandle(pub u32);

/// A sample value carrying its own type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypedValue {
    U32(u32),
    I32(i32),
    F32(f32),
    VarLen(VarLenHandle),
}

impl TypedValue {
    /// Data type of this value
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::U32(_) => DataType::UInt32,
            TypedValue::I32(_) => DataType::Int32,
            TypedValue::F32(_) => DataType::Float,
            TypedValue::VarLen(_) => DataType::VariableLength,
        }
    }

    /// Raw 32-bit representation as stored in a history and on the wire
    pub fn raw(&self) -> u32 {
        match self {
            TypedValue::U32(v) => *v,
            TypedValue::I32(v) => *v as u32,
            TypedValue::F32(v) => v.to_bits(),
            TypedValue::VarLen(h) => h.0,
        }
    }

    /// Reinterpret a raw stored word
    pub fn from_raw(data_type: DataType, raw: u32) -> Self {
        match data_type {
            DataType::UInt32 => TypedValue::U32(raw),
            DataType::Int32 => TypedValue::I32(raw as i32),
            DataType::Float => TypedValue::F32(f32::from_bits(raw)),
            DataType::VariableLength => TypedValue::VarLen(VarLenHandle(raw)),
        }
    }

    /// Numeric view for threshold comparison (None for variable-length)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::U32(v) => Some(*v as f64),
            TypedValue::I32(v) => Some(*v as f64),
            TypedValue::F32(v) => Some(*v as f64),
            TypedValue::VarLen(_) => None,
        }
    }

    /// Handle, if this is a variable-length value
    pub fn handle(&self) -> Option<VarLenHandle> {
        match self {
            TypedValue::VarLen(h) => Some(*h),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::U32(v) => write!(f, "{}", v),
            TypedValue::I32(v) => write!(f, "{}", v),
            TypedValue::F32(v) => write!(f, "{:.3}", v),
            TypedValue::VarLen(h) => write!(f, "<varlen #{}>", h.0),
        }
    }
}

/// Record header (20 bytes on the wire, big-endian)
///
/// ```text
/// bits:        u32  block_type:4 | data_type:2 | warning:2 | no_samples:8
///                   | sensor_error:8 | version:3 | reserved:5
/// id:          u32
/// last_time_ms u64
/// sample_rate: u32
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub block_type: BlockType,
    pub data_type: DataType,
    pub warning: WarningLevel,
    pub no_samples: u8,
    pub sensor_error: u8,
    pub version: u8,
    pub id: u32,
    pub last_time_ms: u64,
    pub sample_rate: u32,
}

impl RecordHeader {
    /// Header size in bytes
    pub const SIZE: usize = RECORD_HEADER_SIZE;

    /// Pack the header bit-field word
    pub fn encode_bits(&self) -> u32 {
        ((self.block_type as u32 & 0x0F) << 28)
            | ((self.data_type as u32 & 0x03) << 26)
            | ((self.warning as u32 & 0x03) << 24)
            | ((self.no_samples as u32) << 16)
            | ((self.sensor_error as u32) << 8)
            | ((self.version as u32 & 0x07) << 5)
    }

    /// Unpack the header bit-field word
    ///
    /// Returns (block_type, data_type, warning, no_samples, sensor_error, version).
    pub fn decode_bits(bits: u32) -> (u8, DataType, WarningLevel, u8, u8, u8) {
        let block_type = ((bits >> 28) & 0x0F) as u8;
        let data_type = DataType::from_bits(((bits >> 26) & 0x03) as u8);
        let warning = WarningLevel::from_bits(((bits >> 24) & 0x03) as u8);
        let no_samples = ((bits >> 16) & 0xFF) as u8;
        let sensor_error = ((bits >> 8) & 0xFF) as u8;
        let version = ((bits >> 5) & 0x07) as u8;
        (block_type, data_type, warning, no_samples, sensor_error, version)
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.encode_bits().to_be_bytes());
        bytes[4..8].copy_from_slice(&self.id.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.last_time_ms.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.sample_rate.to_be_bytes());
        bytes
    }
}

/// Bytes needed to pad `len` up to a 4-byte boundary
pub fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Wire size of a variable-length record carrying `payload_len` bytes
pub fn varlen_record_size(payload_len: usize, event_driven: bool) -> usize {
    let prefix = if event_driven { EVENT_TIMESTAMP_SIZE } else { 0 };
    RECORD_HEADER_SIZE + prefix + VARLEN_LENGTH_SIZE + payload_len + pad4(payload_len)
}
