// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transport abstraction module
//!
//! The pipeline only needs a transport that hands out packet buffers and
//! accepts finished ones. Everything below that (sockets, retries, Wi-Fi) is
//! the transport's business.

use crate::error::{Result, TransportError};
use std::collections::VecDeque;

/// An outbound packet buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
    urgent: bool,
}

impl PacketBuffer {
    /// Allocate a zeroed buffer of `size` bytes
    pub fn with_size(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            urgent: false,
        }
    }

    /// Current length (allocated size until finalized)
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the packet was built for the warning topic
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Mark the packet as an urgent warning upload
    pub fn set_urgent(&mut self, urgent: bool) {
        self.urgent = urgent;
    }

    /// Writable view of the whole buffer
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Packet bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cut the buffer down to the bytes actually written
    pub fn finalize(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Consume into the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Statistics about transport usage
#[derive(Debug, Clone, Default)]
pub struct TransportMetrics {
    /// Buffers handed out
    pub packets_allocated: u64,
    /// Allocation requests that failed
    pub allocation_failures: u64,
    /// Packets accepted into the queue
    pub packets_enqueued: u64,
    /// Bytes accepted into the queue
    pub bytes_enqueued: u64,
}

/// Outbound transport consumed by the upload encoder
pub trait Transport {
    /// Device is online and provisioned
    fn is_ready(&self) -> bool;

    /// Try once to obtain a buffer of at least `min_size` bytes
    fn alloc_packet(&mut self, min_size: usize) -> Option<PacketBuffer>;

    /// Queue a finished packet for transmission
    fn enqueue(&mut self, packet: PacketBuffer) -> Result<()>;

    /// Get transport metrics
    fn metrics(&self) -> TransportMetrics;
}

/// In-memory transport for tests and simulation
#[derive(Debug)]
pub struct MemoryTransport {
    /// Queued packets
    queue: VecDeque<PacketBuffer>,
    /// Size of buffers handed out
    packet_size: usize,
    /// Maximum queued packets
    max_queue: usize,
    /// Online/provisioned
    online: bool,
    /// Allocation requests to refuse before succeeding again
    fail_allocs: u32,
    /// Enqueue requests to refuse before succeeding again
    fail_enqueues: u32,
    metrics: TransportMetrics,
}

impl MemoryTransport {
    /// Create a transport handing out `packet_size`-byte buffers
    pub fn new(packet_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            packet_size,
            max_queue: 64,
            online: true,
            fail_allocs: 0,
            fail_enqueues: 0,
            metrics: TransportMetrics::default(),
        }
    }

    /// Create with a custom queue depth
    pub fn with_queue_depth(packet_size: usize, max_queue: usize) -> Self {
        Self {
            max_queue,
            ..Self::new(packet_size)
        }
    }

    /// Simulate connectivity changes
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Change the size of future buffers
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size;
    }

    /// Refuse the next `count` allocations
    pub fn fail_next_allocs(&mut self, count: u32) {
        self.fail_allocs = count;
    }

    /// Refuse the next `count` enqueues
    pub fn fail_next_enqueues(&mut self, count: u32) {
        self.fail_enqueues = count;
    }

    /// Pop the oldest queued packet (simulate transmission)
    pub fn pop_outgoing(&mut self) -> Option<PacketBuffer> {
        self.queue.pop_front()
    }

    /// Number of queued packets
    pub fn pending_outgoing(&self) -> usize {
        self.queue.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Transport for MemoryTransport {
    fn is_ready(&self) -> bool {
        self.online
    }

    fn alloc_packet(&mut self, _min_size: usize) -> Option<PacketBuffer> {
        if !self.online || self.fail_allocs > 0 || self.queue.len() >= self.max_queue {
            self.fail_allocs = self.fail_allocs.saturating_sub(1);
            self.metrics.allocation_failures += 1;
            return None;
        }
        self.metrics.packets_allocated += 1;
        Some(PacketBuffer::with_size(self.packet_size))
    }

    fn enqueue(&mut self, packet: PacketBuffer) -> Result<()> {
        if !self.online {
            return Err(TransportError::Offline.into());
        }
        if self.fail_enqueues > 0 || self.queue.len() >= self.max_queue {
            self.fail_enqueues = self.fail_enqueues.saturating_sub(1);
            return Err(TransportError::QueueFull.into());
        }

        self.metrics.packets_enqueued += 1;
        self.metrics.bytes_enqueued += packet.len() as u64;
        self.queue.push_back(packet);
        Ok(())
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldlinkError;

    #[test]
    fn test_alloc_and_enqueue() {
        let mut transport = MemoryTransport::new(128);
        let mut packet = transport.alloc_packet(64).unwrap();
        assert_eq!(packet.len(), 128);
        packet.finalize(40);
        transport.enqueue(packet).unwrap();

        assert_eq!(transport.pending_outgoing(), 1);
        assert_eq!(transport.metrics().bytes_enqueued, 40);
        assert_eq!(transport.pop_outgoing().unwrap().len(), 40);
    }

    #[test]
    fn test_offline_refuses() {
        let mut transport = MemoryTransport::new(128);
        transport.set_online(false);
        assert!(!transport.is_ready());
        assert!(transport.alloc_packet(64).is_none());
        let result = transport.enqueue(PacketBuffer::with_size(8));
        assert!(matches!(
            result,
            Err(FieldlinkError::Transport(TransportError::Offline))
        ));
    }

    #[test]
    fn test_injected_alloc_failures() {
        let mut transport = MemoryTransport::new(128);
        transport.fail_next_allocs(2);
        assert!(transport.alloc_packet(64).is_none());
        assert!(transport.alloc_packet(64).is_none());
        assert!(transport.alloc_packet(64).is_some());
        assert_eq!(transport.metrics().allocation_failures, 2);
    }

    #[test]
    fn test_queue_depth() {
        let mut transport = MemoryTransport::with_queue_depth(32, 1);
        let p = transport.alloc_packet(16).unwrap();
        transport.enqueue(p).unwrap();
        assert!(transport.alloc_packet(16).is_none());
    }
}
