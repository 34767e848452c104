// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Encoder module
//!
//! This module serializes buffered samples into a size-bounded packet:
//!
//! ```text
//! [request header] [options] 0xFF [preamble records] [entry records...]
//! ```
//!
//! Building a packet never mutates the entry histories. The builder returns
//! a [`PacketPlan`] describing what was copied; the upload session applies it
//! once the packet has been enqueued.

use crate::config::{CoreConfig, EntryDescriptor};
use crate::error::EncodeError;
use crate::pool::VarLenPool;
use crate::preamble::{Preamble, PreambleSent};
use crate::protocol::{
    varlen_record_size, BlockType, DataType, EntryClass, RecordHeader, TypedValue, WarningLevel,
    RECORD_HEADER_SIZE, SAMPLE_SIZE,
};
use crate::store::{EntryState, EntryTable};
use crate::writer::PacketWriter;
use xxhash_rust::xxh32::xxh32;

/// CoAP version carried in the first header byte
pub const COAP_VERSION: u8 = 1;

/// Confirmable message type
pub const COAP_TYPE_CON: u8 = 0;

/// Request code 0.02 (POST)
pub const COAP_CODE_POST: u8 = 0x02;

/// Uri-Path option number
pub const OPTION_URI_PATH: u16 = 11;

/// Content-Format option number
pub const OPTION_CONTENT_FORMAT: u16 = 12;

/// Marker separating options from payload
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Request token length
pub const TOKEN_LEN: usize = 4;

/// Smallest record worth starting: a header plus one sample
pub const MIN_RECORD_SIZE: usize = RECORD_HEADER_SIZE + SAMPLE_SIZE;

/// Request header written at the start of each packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader<'a> {
    pub message_id: u16,
    pub token: [u8; TOKEN_LEN],
    pub topic: &'a str,
    pub content_format: u16,
}

/// Derive the 4-byte request token for a packet
pub fn request_token(message_id: u16, utc_ms: u64, device_id: u32) -> [u8; TOKEN_LEN] {
    let mut input = [0u8; 10];
    input[..2].copy_from_slice(&message_id.to_be_bytes());
    input[2..].copy_from_slice(&utc_ms.to_be_bytes());
    xxh32(&input, device_id).to_be_bytes()
}

/// Write the fixed header, token, options and payload marker
pub fn write_request_header(
    w: &mut PacketWriter<'_>,
    header: &RequestHeader<'_>,
) -> Result<(), EncodeError> {
    w.write_u8((COAP_VERSION << 6) | (COAP_TYPE_CON << 4) | TOKEN_LEN as u8)?;
    w.write_u8(COAP_CODE_POST)?;
    w.write_u16(header.message_id)?;
    w.write_bytes(&header.token)?;

    let mut last_option = 0u16;
    for segment in header.topic.split('/').filter(|s| !s.is_empty()) {
        write_option(w, OPTION_URI_PATH - last_option, segment.as_bytes())?;
        last_option = OPTION_URI_PATH;
    }

    let format = header.content_format.to_be_bytes();
    let format: &[u8] = match header.content_format {
        0 => &[],
        1..=0xFF => &format[1..],
        _ => &format,
    };
    write_option(w, OPTION_CONTENT_FORMAT - last_option, format)?;

    w.write_u8(PAYLOAD_MARKER)
}

fn option_nibble(value: usize) -> (u8, Option<u8>, Option<u16>) {
    if value < 13 {
        (value as u8, None, None)
    } else if value < 269 {
        (13, Some((value - 13) as u8), None)
    } else {
        (14, None, Some((value - 269) as u16))
    }
}

fn write_option(w: &mut PacketWriter<'_>, delta: u16, value: &[u8]) -> Result<(), EncodeError> {
    let (d, d8, d16) = option_nibble(delta as usize);
    let (l, l8, l16) = option_nibble(value.len());
    w.write_u8((d << 4) | l)?;
    if let Some(v) = d8 {
        w.write_u8(v)?;
    }
    if let Some(v) = d16 {
        w.write_u16(v)?;
    }
    if let Some(v) = l8 {
        w.write_u8(v)?;
    }
    if let Some(v) = l16 {
        w.write_u16(v)?;
    }
    w.write_bytes(value)
}

/// Write a fixed-size record: header followed by raw samples
pub fn write_fixed_record(
    w: &mut PacketWriter<'_>,
    header: &RecordHeader,
    samples: impl IntoIterator<Item = u32>,
) -> Result<(), EncodeError> {
    let needed = RECORD_HEADER_SIZE + header.no_samples as usize * SAMPLE_SIZE;
    if needed > w.remaining() {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: w.remaining(),
        });
    }
    w.write_bytes(&header.to_bytes())?;
    for sample in samples.into_iter().take(header.no_samples as usize) {
        w.write_u32(sample)?;
    }
    Ok(())
}

/// Write a variable-length record: header, optional event time, length, padded payload
pub fn write_varlen_record(
    w: &mut PacketWriter<'_>,
    header: &RecordHeader,
    event_time: Option<u32>,
    payload: &[u8],
) -> Result<(), EncodeError> {
    if payload.len() > u32::MAX as usize {
        return Err(EncodeError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let needed = varlen_record_size(payload.len(), event_time.is_some());
    if needed > w.remaining() {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: w.remaining(),
        });
    }
    w.write_bytes(&header.to_bytes())?;
    if let Some(t) = event_time {
        w.write_u32(t)?;
    }
    w.write_u32(payload.len() as u32)?;
    let start = w.position();
    w.write_bytes(payload)?;
    w.pad_to_word(start)
}

/// Samples to remove from one entry once the packet is enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainAction {
    pub class: EntryClass,
    pub index: usize,
    /// Oldest slots copied into the packet
    pub slots: usize,
    /// Samples were left behind for a later packet
    pub partial: bool,
}

/// Outcome of building one packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketPlan {
    pub actions: Vec<DrainAction>,
    pub preamble: PreambleSent,
    /// Records written (preambles included)
    pub records: usize,
    /// Sample slots written
    pub samples: usize,
    /// Bytes written (request header included)
    pub length: usize,
    /// Scanning stopped because the budget ran out
    pub full: bool,
}

impl PacketPlan {
    /// No record was written
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

/// Scan pass within an entry class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Warning,
    Regular,
}

impl Pass {
    fn matches(&self, state: &EntryState) -> bool {
        let warned = state.warning > WarningLevel::Informational;
        match self {
            Pass::Warning => warned,
            Pass::Regular => !warned,
        }
    }
}

/// Builds one packet from the current entry table
pub struct PacketBuilder<'a> {
    config: &'a CoreConfig,
    table: &'a EntryTable,
    pool: &'a VarLenPool,
    preamble: &'a Preamble,
}

impl<'a> PacketBuilder<'a> {
    /// Create a builder over the pipeline state
    pub fn new(
        config: &'a CoreConfig,
        table: &'a EntryTable,
        pool: &'a VarLenPool,
        preamble: &'a Preamble,
    ) -> Self {
        Self {
            config,
            table,
            pool,
            preamble,
        }
    }

    /// Encode the request header, pending preambles and ready entries
    ///
    /// Controls come before sensors; within a class, warning entries come
    /// before regular ones. Stops at the first entry that no longer fits.
    pub fn build(
        &self,
        w: &mut PacketWriter<'_>,
        request: &RequestHeader<'_>,
        utc_ms: u64,
    ) -> Result<PacketPlan, EncodeError> {
        let mut plan = PacketPlan::default();

        write_request_header(w, request)?;
        self.write_preambles(w, utc_ms, &mut plan)?;

        'classes: for class in EntryClass::ALL {
            let table = self.table.class(class);
            for pass in [Pass::Warning, Pass::Regular] {
                for (index, (descriptor, state)) in table.iter().enumerate() {
                    if !(state.send_batch || state.send_on_error) || !pass.matches(state) {
                        continue;
                    }
                    if !self.encode_entry(w, class, index, descriptor, state, &mut plan)? {
                        plan.full = true;
                        break 'classes;
                    }
                }
            }
        }

        plan.length = w.position();
        Ok(plan)
    }

    fn write_preambles(
        &self,
        w: &mut PacketWriter<'_>,
        utc_ms: u64,
        plan: &mut PacketPlan,
    ) -> Result<(), EncodeError> {
        let header = |block_type, data_type, no_samples| RecordHeader {
            block_type,
            data_type,
            warning: WarningLevel::Informational,
            no_samples,
            sensor_error: 0,
            version: crate::RECORD_VERSION,
            id: self.config.device_id,
            last_time_ms: utc_ms,
            sample_rate: 0,
        };

        if let Some(ref payload) = self.preamble.registration {
            if varlen_record_size(payload.len(), false) <= w.remaining() {
                let h = header(BlockType::Registration, DataType::VariableLength, 1);
                write_varlen_record(w, &h, None, payload)?;
                plan.preamble.registration = true;
                plan.records += 1;
            }
        }

        if let Some(fix) = self.preamble.gps {
            if RECORD_HEADER_SIZE + 3 * SAMPLE_SIZE <= w.remaining() {
                let h = header(BlockType::GpsLocation, DataType::Float, 3);
                let samples = [fix.latitude, fix.longitude, fix.altitude].map(f32::to_bits);
                write_fixed_record(w, &h, samples)?;
                plan.preamble.gps = true;
                plan.records += 1;
            }
        }

        if let Some(fix) = self.preamble.indoor {
            if RECORD_HEADER_SIZE + 3 * SAMPLE_SIZE <= w.remaining() {
                let h = header(BlockType::IndoorLocation, DataType::Float, 3);
                let samples = [fix.x, fix.y, fix.z].map(f32::to_bits);
                write_fixed_record(w, &h, samples)?;
                plan.preamble.indoor = true;
                plan.records += 1;
            }
        }

        Ok(())
    }

    /// Encode one entry; returns false when the packet is full
    fn encode_entry(
        &self,
        w: &mut PacketWriter<'_>,
        class: EntryClass,
        index: usize,
        descriptor: &EntryDescriptor,
        state: &EntryState,
        plan: &mut PacketPlan,
    ) -> Result<bool, EncodeError> {
        let count = state.sample_count();
        let sensor_error = if state.send_on_error {
            state.last_error
        } else {
            state.error
        };
        let header = |no_samples: usize, last_time_ms: u64, data_type: DataType| RecordHeader {
            block_type: class.block_type(),
            data_type,
            warning: state.warning,
            no_samples: no_samples.min(u8::MAX as usize) as u8,
            sensor_error,
            version: crate::RECORD_VERSION,
            id: descriptor.id,
            last_time_ms,
            sample_rate: descriptor.sample_rate_ms,
        };

        if count == 0 {
            if state.send_on_error {
                if w.remaining() < RECORD_HEADER_SIZE {
                    return Ok(false);
                }
                let h = header(0, state.last_sample_utc_ms, descriptor.data_type);
                write_fixed_record(w, &h, std::iter::empty())?;
                plan.records += 1;
            }
            // Nothing stored: the flags are cleared on commit
            plan.actions.push(DrainAction {
                class,
                index,
                slots: 0,
                partial: false,
            });
            return Ok(true);
        }

        if descriptor.data_type == DataType::VariableLength {
            return self.encode_varlen_entry(w, class, index, descriptor, state, plan, header);
        }

        let stride = descriptor.slots_per_record();
        let fit = w.remaining().saturating_sub(RECORD_HEADER_SIZE) / SAMPLE_SIZE;
        let fit = fit.min(u8::MAX as usize);
        let take = count.min(fit - fit % stride);
        if take == 0 || w.remaining() < RECORD_HEADER_SIZE {
            return Ok(false);
        }

        let history = state.history();
        let last_time_ms = if descriptor.is_event_driven() {
            history.get(take - 2).map_or(state.last_sample_utc_ms, |t| t as u64 * 1000)
        } else {
            let left_behind = (count - take) as u64;
            state
                .last_sample_utc_ms
                .saturating_sub(descriptor.sample_rate_ms as u64 * left_behind)
        };

        let h = header(take, last_time_ms, descriptor.data_type);
        write_fixed_record(w, &h, history.iter())?;

        let partial = take < count;
        plan.records += 1;
        plan.samples += take;
        plan.actions.push(DrainAction {
            class,
            index,
            slots: take,
            partial,
        });

        if partial {
            log::debug!(
                "{} {} partially drained: {} of {} slots",
                class,
                descriptor.id,
                take,
                count
            );
        }
        Ok(!partial)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_varlen_entry(
        &self,
        w: &mut PacketWriter<'_>,
        class: EntryClass,
        index: usize,
        descriptor: &EntryDescriptor,
        state: &EntryState,
        plan: &mut PacketPlan,
        header: impl Fn(usize, u64, DataType) -> RecordHeader,
    ) -> Result<bool, EncodeError> {
        let history = state.history();
        let stride = descriptor.slots_per_record();
        let event_driven = descriptor.is_event_driven();
        let records = state.sample_count() / stride;

        let mut slots = 0;
        for r in 0..records {
            let event_time = if event_driven {
                history.get(r * stride)
            } else {
                None
            };
            let handle = match history.get(r * stride + stride - 1) {
                Some(raw) => TypedValue::from_raw(DataType::VariableLength, raw).handle(),
                None => None,
            };
            let payload = match handle.and_then(|h| self.pool.get(h)) {
                Some(p) => p,
                None => {
                    log::warn!(
                        "{} {}: variable-length payload {:?} missing, sending empty record",
                        class,
                        descriptor.id,
                        handle
                    );
                    &[]
                }
            };

            if varlen_record_size(payload.len(), event_driven) > w.remaining() {
                break;
            }

            let last_time_ms = match event_time {
                Some(t) => t as u64 * 1000,
                None => {
                    let after = (records - 1 - r) as u64;
                    state
                        .last_sample_utc_ms
                        .saturating_sub(descriptor.sample_rate_ms as u64 * after)
                }
            };
            let h = header(1, last_time_ms, DataType::VariableLength);
            write_varlen_record(w, &h, event_time, payload)?;

            slots += stride;
            plan.records += 1;
            plan.samples += stride;
        }

        if slots == 0 {
            return Ok(false);
        }

        let partial = slots < state.sample_count();
        plan.actions.push(DrainAction {
            class,
            index,
            slots,
            partial,
        });
        Ok(!partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_table() -> EntryTable {
        EntryTable::new(&CoreConfig::default(), vec![], vec![]).unwrap()
    }

    fn request(topic: &str) -> RequestHeader<'_> {
        RequestHeader {
            message_id: 0x1234,
            token: [0xA1, 0xB2, 0xC3, 0xD4],
            topic,
            content_format: 42,
        }
    }

    #[test]
    fn test_request_header_layout() {
        let mut buf = [0u8; 32];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request("data")).unwrap();
        let len = w.position();
        assert_eq!(
            &buf[..len],
            &[
                0x44, 0x02, 0x12, 0x34, 0xA1, 0xB2, 0xC3, 0xD4, // fixed + token
                0xB4, b'd', b'a', b't', b'a', // Uri-Path (delta 11, len 4)
                0x11, 42,   // Content-Format (delta 1, len 1)
                0xFF, // payload marker
            ]
        );
    }

    #[test]
    fn test_request_header_multi_segment_topic() {
        let mut buf = [0u8; 64];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request("t/warning")).unwrap();
        // second segment uses delta 0
        assert_eq!(buf[8], 0xB1);
        assert_eq!(buf[9], b't');
        assert_eq!(buf[10], 0x07);
        assert_eq!(&buf[11..18], b"warning");
    }

    #[test]
    fn test_long_option_extended_length() {
        let mut buf = [0u8; 64];
        let mut w = PacketWriter::new(&mut buf);
        write_option(&mut w, 11, b"a-very-long-topic").unwrap();
        assert_eq!(buf[0], 0xBD);
        assert_eq!(buf[1], 17 - 13);
        assert_eq!(&buf[2..19], b"a-very-long-topic");
    }

    #[test]
    fn test_request_token_deterministic() {
        let a = request_token(1, 1_700_000_000_000, 7);
        assert_eq!(a, request_token(1, 1_700_000_000_000, 7));
        assert_ne!(a, request_token(2, 1_700_000_000_000, 7));
        assert_ne!(a, request_token(1, 1_700_000_000_000, 8));
    }

    #[test]
    fn test_varlen_record_six_bytes_is_32() {
        let mut buf = [0xEEu8; 64];
        let mut w = PacketWriter::new(&mut buf);
        let h = RecordHeader {
            block_type: BlockType::Sensor,
            data_type: DataType::VariableLength,
            warning: WarningLevel::Informational,
            no_samples: 1,
            sensor_error: 0,
            version: 1,
            id: 3,
            last_time_ms: 0,
            sample_rate: 1000,
        };
        write_varlen_record(&mut w, &h, None, b"abcdef").unwrap();
        assert_eq!(w.position(), 32);
        assert_eq!(&buf[20..24], &6u32.to_be_bytes());
        assert_eq!(&buf[24..30], b"abcdef");
        assert_eq!(&buf[30..32], &[0, 0]);
    }

    #[test]
    fn test_fixed_record_rejects_overflow() {
        let mut buf = [0u8; 30];
        let mut w = PacketWriter::new(&mut buf);
        let h = RecordHeader {
            block_type: BlockType::Control,
            data_type: DataType::UInt32,
            warning: WarningLevel::Informational,
            no_samples: 3,
            sensor_error: 0,
            version: 1,
            id: 1,
            last_time_ms: 0,
            sample_rate: 1000,
        };
        assert!(write_fixed_record(&mut w, &h, [1, 2, 3]).is_err());
        assert_eq!(w.position(), 0);
    }

    #[test]
    fn test_build_with_only_preamble() {
        let config = CoreConfig::for_device(77);
        let table = empty_table();
        let pool = VarLenPool::new(1, 8);
        let preamble = Preamble {
            registration: Some(b"fw-1.2".to_vec()),
            gps: None,
            indoor: None,
        };
        let mut buf = [0u8; 128];
        let mut w = PacketWriter::new(&mut buf);
        let plan = PacketBuilder::new(&config, &table, &pool, &preamble)
            .build(&mut w, &request("data"), 5_000)
            .unwrap();
        assert!(plan.preamble.registration);
        assert_eq!(plan.records, 1);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.length, 16 + 32);
    }
}
