// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Variable-length payload pool
//!
//! Variable-length samples are stored in a history as a handle into this
//! pool. The history owns the handle until the sample is either committed to
//! an enqueued packet or evicted, at which point the slot is released.

use crate::error::PoolError;
use crate::protocol::VarLenHandle;

/// Fixed-slot pool of byte payloads
#[derive(Debug, Clone)]
pub struct VarLenPool {
    slots: Vec<Option<Vec<u8>>>,
    max_len: usize,
}

impl VarLenPool {
    /// Create a pool with `slots` payloads of at most `max_len` bytes
    pub fn new(slots: usize, max_len: usize) -> Self {
        Self {
            slots: vec![None; slots],
            max_len,
        }
    }

    /// Copy `bytes` into a free slot
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<VarLenHandle, PoolError> {
        if bytes.len() > self.max_len {
            return Err(PoolError::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_len,
            });
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PoolError::Exhausted {
                slots: self.slots.len(),
            })?;
        self.slots[index] = Some(bytes.to_vec());
        Ok(VarLenHandle(index as u32))
    }

    /// Payload behind a live handle
    pub fn get(&self, handle: VarLenHandle) -> Option<&[u8]> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|slot| slot.as_deref())
    }

    /// Return a slot to the pool; false if the handle was not live
    pub fn release(&mut self, handle: VarLenHandle) -> bool {
        match self.slots.get_mut(handle.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Number of slots in use
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum payload size
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
