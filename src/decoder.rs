// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Decoder module
//!
//! Collector-side parsing of upload packets: the request header with its
//! options, then every record in the payload.

use crate::encoder::{OPTION_CONTENT_FORMAT, OPTION_URI_PATH, PAYLOAD_MARKER};
use crate::error::DecodeError;
use crate::protocol::{
    pad4, BlockType, DataType, RecordHeader, TypedValue, WarningLevel, RECORD_HEADER_SIZE,
};

/// Parsed request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub version: u8,
    pub message_type: u8,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub uri_path: Vec<String>,
    pub content_format: Option<u16>,
}

impl DecodedRequest {
    /// Topic rebuilt from the Uri-Path options
    pub fn topic(&self) -> String {
        self.uri_path.join("/")
    }
}

/// Values carried by a record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValues {
    /// Header only (error report)
    Empty,
    /// Fixed-size samples, oldest first
    Samples(Vec<TypedValue>),
    /// Event pairs `(utc_seconds, value)`, oldest first
    Events(Vec<(u32, TypedValue)>),
    /// One variable-length payload
    VarLen {
        event_time: Option<u32>,
        payload: Vec<u8>,
    },
}

/// Parsed record
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub block_type: BlockType,
    pub data_type: DataType,
    pub warning: WarningLevel,
    pub no_samples: u8,
    pub sensor_error: u8,
    pub id: u32,
    pub last_time_ms: u64,
    pub sample_rate: u32,
    pub values: RecordValues,
}

impl DecodedRecord {
    /// Record of a control or sensor entry
    pub fn is_entry(&self) -> bool {
        matches!(self.block_type, BlockType::Control | BlockType::Sensor)
    }

    /// Number of values (events count once, a variable-length payload once)
    pub fn value_count(&self) -> usize {
        match &self.values {
            RecordValues::Empty => 0,
            RecordValues::Samples(v) => v.len(),
            RecordValues::Events(v) => v.len(),
            RecordValues::VarLen { .. } => 1,
        }
    }
}

/// Parsed packet
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub request: DecodedRequest,
    pub records: Vec<DecodedRecord>,
}

impl DecodedPacket {
    /// Records of one block type, in packet order
    pub fn records_of(&self, block_type: BlockType) -> impl Iterator<Item = &DecodedRecord> {
        self.records
            .iter()
            .filter(move |r| r.block_type == block_type)
    }
}

/// Read-only cursor with big-endian reads
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::BufferTooShort {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_be_bytes(bytes))
    }
}

/// Decode a complete upload packet
pub fn decode_packet(bytes: &[u8]) -> Result<DecodedPacket, DecodeError> {
    let mut r = Reader::new(bytes);
    let request = decode_request(&mut r)?;

    let mut records = Vec::new();
    while r.remaining() > 0 {
        records.push(decode_record(&mut r)?);
    }

    Ok(DecodedPacket { request, records })
}

fn decode_request(r: &mut Reader<'_>) -> Result<DecodedRequest, DecodeError> {
    let first = r.u8()?;
    let version = first >> 6;
    let message_type = (first >> 4) & 0x03;
    let token_len = (first & 0x0F) as usize;
    if version != crate::encoder::COAP_VERSION || token_len > 8 {
        return Err(DecodeError::InvalidHeader);
    }
    let code = r.u8()?;
    let message_id = r.u16()?;
    let token = r.take(token_len)?.to_vec();

    let mut uri_path = Vec::new();
    let mut content_format = None;
    let mut option = 0u16;

    loop {
        if r.remaining() == 0 {
            return Err(DecodeError::MissingPayloadMarker);
        }
        let offset = r.pos;
        let byte = r.u8()?;
        if byte == PAYLOAD_MARKER {
            break;
        }
        let delta = option_value(r, byte >> 4, offset)?;
        let len = option_value(r, byte & 0x0F, offset)? as usize;
        option = option
            .checked_add(delta)
            .ok_or(DecodeError::MalformedOption { offset })?;
        let value = r.take(len)?;

        match option {
            OPTION_URI_PATH => uri_path.push(String::from_utf8_lossy(value).into_owned()),
            OPTION_CONTENT_FORMAT => {
                if len > 2 {
                    return Err(DecodeError::MalformedOption { offset });
                }
                content_format = Some(value.iter().fold(0u16, |acc, &b| (acc << 8) | b as u16));
            }
            _ => {}
        }
    }

    Ok(DecodedRequest {
        version,
        message_type,
        code,
        message_id,
        token,
        uri_path,
        content_format,
    })
}

fn option_value(r: &mut Reader<'_>, nibble: u8, offset: usize) -> Result<u16, DecodeError> {
    match nibble {
        0..=12 => Ok(nibble as u16),
        13 => Ok(r.u8()? as u16 + 13),
        14 => r
            .u16()?
            .checked_add(269)
            .ok_or(DecodeError::MalformedOption { offset }),
        _ => Err(DecodeError::MalformedOption { offset }),
    }
}

fn decode_record(r: &mut Reader<'_>) -> Result<DecodedRecord, DecodeError> {
    if r.remaining() < RECORD_HEADER_SIZE {
        return Err(DecodeError::BufferTooShort {
            needed: r.pos + RECORD_HEADER_SIZE,
            available: r.buf.len(),
        });
    }
    let (block, data_type, warning, no_samples, sensor_error, version) =
        RecordHeader::decode_bits(r.u32()?);
    if version != crate::RECORD_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let block_type = BlockType::from_u8(block).ok_or(DecodeError::UnknownBlockType(block))?;
    let id = r.u32()?;
    let last_time_ms = r.u64()?;
    let sample_rate = r.u32()?;

    let entry = matches!(block_type, BlockType::Control | BlockType::Sensor);
    let event_driven = entry && sample_rate == 0;

    let values = if no_samples == 0 {
        RecordValues::Empty
    } else if data_type == DataType::VariableLength {
        let event_time = if event_driven { Some(r.u32()?) } else { None };
        let len = r.u32()? as usize;
        let payload = r.take(len)?.to_vec();
        r.take(pad4(len))?;
        RecordValues::VarLen {
            event_time,
            payload,
        }
    } else if event_driven {
        let mut events = Vec::with_capacity(no_samples as usize / 2);
        for _ in 0..no_samples / 2 {
            let time = r.u32()?;
            events.push((time, TypedValue::from_raw(data_type, r.u32()?)));
        }
        RecordValues::Events(events)
    } else {
        let mut samples = Vec::with_capacity(no_samples as usize);
        for _ in 0..no_samples {
            samples.push(TypedValue::from_raw(data_type, r.u32()?));
        }
        RecordValues::Samples(samples)
    };

    Ok(DecodedRecord {
        block_type,
        data_type,
        warning,
        no_samples,
        sensor_error,
        id,
        last_time_ms,
        sample_rate,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{write_fixed_record, write_request_header, write_varlen_record, RequestHeader};
    use crate::writer::PacketWriter;
    use approx::assert_relative_eq;

    fn header(block_type: BlockType, data_type: DataType, no_samples: u8, rate: u32) -> RecordHeader {
        RecordHeader {
            block_type,
            data_type,
            warning: WarningLevel::Watch,
            no_samples,
            sensor_error: 0,
            version: crate::RECORD_VERSION,
            id: 42,
            last_time_ms: 1_700_000_000_000,
            sample_rate: rate,
        }
    }

    fn request<'a>() -> RequestHeader<'a> {
        RequestHeader {
            message_id: 9,
            token: [1, 2, 3, 4],
            topic: "site/data",
            content_format: 42,
        }
    }

    #[test]
    fn test_decode_request_header() {
        let mut buf = [0u8; 64];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        let len = w.position();

        let packet = decode_packet(&buf[..len]).unwrap();
        assert_eq!(packet.request.message_id, 9);
        assert_eq!(packet.request.code, 0x02);
        assert_eq!(packet.request.token, vec![1, 2, 3, 4]);
        assert_eq!(packet.request.topic(), "site/data");
        assert_eq!(packet.request.content_format, Some(42));
        assert!(packet.records.is_empty());
    }

    #[test]
    fn test_decode_float_samples() {
        let mut buf = [0u8; 128];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        let samples = [21.5f32, -3.25, 0.1].map(f32::to_bits);
        write_fixed_record(&mut w, &header(BlockType::Sensor, DataType::Float, 3, 1000), samples)
            .unwrap();
        let len = w.position();

        let packet = decode_packet(&buf[..len]).unwrap();
        let record = &packet.records[0];
        assert_eq!(record.warning, WarningLevel::Watch);
        match &record.values {
            RecordValues::Samples(v) => {
                assert_eq!(v.len(), 3);
                let TypedValue::F32(third) = v[2] else {
                    panic!("expected float");
                };
                assert_relative_eq!(third, 0.1f32);
            }
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_pairs() {
        let mut buf = [0u8; 128];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        write_fixed_record(
            &mut w,
            &header(BlockType::Control, DataType::Int32, 4, 0),
            [100, (-1i32) as u32, 105, 7],
        )
        .unwrap();
        let len = w.position();

        let packet = decode_packet(&buf[..len]).unwrap();
        assert_eq!(
            packet.records[0].values,
            RecordValues::Events(vec![(100, TypedValue::I32(-1)), (105, TypedValue::I32(7))])
        );
        assert_eq!(packet.records[0].value_count(), 2);
    }

    #[test]
    fn test_decode_varlen_event_prefix() {
        let mut buf = [0u8; 128];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        write_varlen_record(
            &mut w,
            &header(BlockType::Sensor, DataType::VariableLength, 1, 0),
            Some(1234),
            b"hello",
        )
        .unwrap();
        let len = w.position();

        let packet = decode_packet(&buf[..len]).unwrap();
        assert_eq!(
            packet.records[0].values,
            RecordValues::VarLen {
                event_time: Some(1234),
                payload: b"hello".to_vec()
            }
        );
    }

    #[test]
    fn test_decode_error_only_record() {
        let mut buf = [0u8; 64];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        let mut h = header(BlockType::Sensor, DataType::UInt32, 0, 1000);
        h.sensor_error = 0x21;
        write_fixed_record(&mut w, &h, std::iter::empty()).unwrap();
        let len = w.position();

        let packet = decode_packet(&buf[..len]).unwrap();
        assert_eq!(packet.records[0].values, RecordValues::Empty);
        assert_eq!(packet.records[0].sensor_error, 0x21);
    }

    #[test]
    fn test_missing_marker() {
        let bytes = [0x44, 0x02, 0, 1, 1, 2, 3, 4, 0xB1, b'x'];
        assert_eq!(decode_packet(&bytes), Err(DecodeError::MissingPayloadMarker));
    }

    #[test]
    fn test_invalid_version() {
        let bytes = [0x84, 0x02, 0, 1, 1, 2, 3, 4, 0xFF];
        assert_eq!(decode_packet(&bytes), Err(DecodeError::InvalidHeader));
    }

    #[test]
    fn test_truncated_record() {
        let mut buf = [0u8; 128];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        write_fixed_record(&mut w, &header(BlockType::Sensor, DataType::UInt32, 2, 1000), [1, 2])
            .unwrap();
        let len = w.position();
        assert!(matches!(
            decode_packet(&buf[..len - 2]),
            Err(DecodeError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_block_type() {
        let mut buf = [0u8; 64];
        let mut w = PacketWriter::new(&mut buf);
        write_request_header(&mut w, &request()).unwrap();
        let start = w.position();
        write_fixed_record(
            &mut w,
            &header(BlockType::Sensor, DataType::UInt32, 0, 1000),
            std::iter::empty(),
        )
        .unwrap();
        let len = w.position();
        buf[start] = (buf[start] & 0x0F) | 0x90;
        assert_eq!(decode_packet(&buf[..len]), Err(DecodeError::UnknownBlockType(9)));
    }
}
