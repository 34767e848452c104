// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Upload statistics
//!
//! Counters kept by the upload session, plus a plain-text report for the
//! debug console.

use crate::encoder::PacketPlan;

/// Upload statistics collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetrics {
    /// Packets handed to the transport
    pub packets_sent: u64,
    /// Urgent (warning topic) packets among them
    pub urgent_packets: u64,
    /// Records encoded into sent packets
    pub records_encoded: u64,
    /// Sample slots encoded into sent packets
    pub samples_encoded: u64,
    /// Bytes handed to the transport
    pub bytes_sent: u64,
    /// Entries that did not fit completely in a packet
    pub partial_drains: u64,
    /// Allocation attempts that returned nothing
    pub alloc_failures: u64,
    /// Buffers rejected as smaller than the minimum
    pub packets_too_small: u64,
    /// Packets the transport refused
    pub enqueue_failures: u64,
    /// Packets abandoned because encoding failed
    pub build_failures: u64,
}

impl UploadMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet accepted by the transport
    pub fn record_packet(&mut self, plan: &PacketPlan, urgent: bool) {
        self.packets_sent += 1;
        if urgent {
            self.urgent_packets += 1;
        }
        self.records_encoded += plan.records as u64;
        self.samples_encoded += plan.samples as u64;
        self.bytes_sent += plan.length as u64;
        self.partial_drains += plan.actions.iter().filter(|a| a.partial).count() as u64;
    }

    /// Average packet size in bytes
    pub fn average_packet_size(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.packets_sent as f64
    }

    /// Fraction of allocation attempts that failed (0.0 - 1.0)
    pub fn alloc_failure_rate(&self) -> f64 {
        let failed = self.alloc_failures + self.packets_too_small;
        let total = failed + self.packets_sent + self.enqueue_failures + self.build_failures;
        if total == 0 {
            return 0.0;
        }
        failed as f64 / total as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Fieldlink Upload Metrics ===\n\n");

        report.push_str(&format!(
            "Packets sent: {} ({} urgent)\n",
            self.packets_sent, self.urgent_packets
        ));
        report.push_str(&format!("Bytes sent: {} bytes\n", self.bytes_sent));
        report.push_str(&format!(
            "Average packet size: {:.1} bytes\n",
            self.average_packet_size()
        ));
        report.push_str(&format!(
            "Records: {} ({} samples, {} partial)\n\n",
            self.records_encoded, self.samples_encoded, self.partial_drains
        ));

        report.push_str("Failures:\n");
        report.push_str(&format!("  Allocation: {}\n", self.alloc_failures));
        report.push_str(&format!("  Undersized buffer: {}\n", self.packets_too_small));
        report.push_str(&format!("  Enqueue: {}\n", self.enqueue_failures));
        report.push_str(&format!("  Encoding: {}\n", self.build_failures));
        report.push_str(&format!(
            "  Allocation failure rate: {:.1}%\n",
            self.alloc_failure_rate() * 100.0
        ));

        report
    }
}
