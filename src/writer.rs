// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bounds-checked cursor over a packet buffer
//!
//! Every write checks the remaining budget first and fails with
//! [`EncodeError::BufferTooSmall`] without touching the buffer.

use crate::error::EncodeError;

/// Big-endian writer over a fixed slice
#[derive(Debug)]
pub struct PacketWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> PacketWriter<'a> {
    /// Start writing at offset zero
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Remaining budget in bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total buffer size
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn reserve(&mut self, n: usize) -> Result<&mut [u8], EncodeError> {
        if n > self.remaining() {
            return Err(EncodeError::BufferTooSmall {
                needed: n,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        self.reserve(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), EncodeError> {
        self.reserve(8)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Zero-pad up to the next 4-byte boundary relative to `start`
    pub fn pad_to_word(&mut self, start: usize) -> Result<(), EncodeError> {
        let pad = crate::protocol::pad4(self.pos - start);
        self.reserve(pad)?.fill(0);
        Ok(())
    }
}
