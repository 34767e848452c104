// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Upload state machine
//!
//! ```text
//! Init ──trigger──▶ GetPacket ──buffer──▶ LoadPacket ──enqueued──▶ UploadComplete
//!  ▲                    │ retries spent        │ build/enqueue failed      │
//!  └────────────────────┴──────────────────────┴───────────────────────────┘
//! ```
//!
//! Each call to [`UploadSession::tick`] advances at most one state and never
//! blocks. Entry histories are only drained after the transport accepted
//! the packet, so a failed attempt loses nothing.

use crate::config::CoreConfig;
use crate::encoder::{request_token, PacketBuilder, PacketPlan, RequestHeader};
use crate::metrics::UploadMetrics;
use crate::pool::VarLenPool;
use crate::preamble::Preamble;
use crate::protocol::{EntryClass, Timestamp};
use crate::status::{LedState, StatusIndicator, StatusLed};
use crate::store::{stored_handles, EntryTable};
use crate::transport::{PacketBuffer, Transport};
use crate::writer::PacketWriter;
use std::fmt;

/// Upload encoder states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadState {
    /// Waiting for a trigger
    #[default]
    Init,
    /// Requesting an outbound buffer
    GetPacket,
    /// Building and enqueueing the packet
    LoadPacket,
    /// Packet queued, signaling success
    UploadComplete,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Init => write!(f, "INIT"),
            UploadState::GetPacket => write!(f, "GET_PACKET"),
            UploadState::LoadPacket => write!(f, "LOAD_PACKET"),
            UploadState::UploadComplete => write!(f, "UPLOAD_COMPLETE"),
        }
    }
}

/// Pipeline state borrowed for one tick
pub struct UploadEnv<'a> {
    pub config: &'a CoreConfig,
    pub table: &'a mut EntryTable,
    pub pool: &'a mut VarLenPool,
    pub preamble: &'a mut Preamble,
    pub transport: &'a mut dyn Transport,
    pub status: &'a mut dyn StatusIndicator,
    pub utc_ms: u64,
}

/// Entry whose warning crossed the notify threshold since it was last reported
pub fn urgent_pending(config: &CoreConfig, table: &EntryTable) -> bool {
    EntryClass::ALL.iter().any(|&class| {
        table.class(class).iter().any(|(_, s)| {
            s.send_batch
                && s.warning >= config.notify_warning_threshold
                && s.warning != s.last_warning
        })
    })
}

/// Entry with a ready batch or a flagged error
pub fn batch_pending(table: &EntryTable) -> bool {
    EntryClass::ALL.iter().any(|&class| {
        table
            .class(class)
            .iter()
            .any(|(_, s)| s.send_batch || s.send_on_error)
    })
}

/// Apply a plan after its packet was enqueued
///
/// Drains the copied slots, releases their variable-length handles, clears
/// the upload flags and records the reported warning level. An entry left
/// with samples behind keeps `send_batch` so the rest goes out next.
pub fn commit_plan(
    plan: &PacketPlan,
    table: &mut EntryTable,
    pool: &mut VarLenPool,
    preamble: &mut Preamble,
) {
    plan.preamble.commit(preamble);

    for action in &plan.actions {
        let (descriptor, state) = match table.class_mut(action.class).get_mut(action.index) {
            Some(entry) => entry,
            None => continue,
        };
        let drained = state.history_mut().drain(action.slots);
        for handle in stored_handles(descriptor, drained.as_slice()) {
            pool.release(handle);
            state.forget_handle(handle);
        }
        state.send_batch = action.partial;
        state.send_on_error = false;
        state.last_warning = state.warning;
    }
}

/// The single upload session
#[derive(Debug, Default)]
pub struct UploadSession {
    state: UploadState,
    packet: Option<PacketBuffer>,
    urgent: bool,
    message_id: u16,
    last_batch_check: Option<Timestamp>,
    alloc_attempts: u32,
    metrics: UploadMetrics,
}

impl UploadSession {
    /// Create an idle session
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Whether the packet in progress targets the warning topic
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Message id the next packet will carry
    pub fn next_message_id(&self) -> u16 {
        self.message_id
    }

    /// Upload statistics
    pub fn metrics(&self) -> &UploadMetrics {
        &self.metrics
    }

    /// Advance the state machine by one step
    pub fn tick(&mut self, now: Timestamp, env: UploadEnv<'_>) -> UploadState {
        let next = match self.state {
            UploadState::Init => self.on_init(now, &env),
            UploadState::GetPacket => self.on_get_packet(env),
            UploadState::LoadPacket => self.on_load_packet(env),
            UploadState::UploadComplete => {
                env.status.notify_status(StatusLed::Upload, LedState::Flash);
                if self.urgent {
                    env.status.notify_status(StatusLed::Warning, LedState::Flash);
                }
                self.urgent = false;
                UploadState::Init
            }
        };

        if next != self.state {
            log::debug!("upload {} -> {}", self.state, next);
        }
        self.state = next;
        next
    }

    fn on_init(&mut self, now: Timestamp, env: &UploadEnv<'_>) -> UploadState {
        if !env.transport.is_ready() {
            return UploadState::Init;
        }

        if urgent_pending(env.config, env.table) {
            self.urgent = true;
            self.alloc_attempts = 0;
            log::info!("warning level change, starting urgent upload");
            return UploadState::GetPacket;
        }

        let check_due = self
            .last_batch_check
            .map_or(true, |t| now.saturating_sub(t) >= env.config.batch_check_interval_ms);
        if !check_due {
            return UploadState::Init;
        }
        self.last_batch_check = Some(now);

        if batch_pending(env.table) || env.preamble.is_pending() {
            self.urgent = false;
            self.alloc_attempts = 0;
            return UploadState::GetPacket;
        }
        UploadState::Init
    }

    fn on_get_packet(&mut self, env: UploadEnv<'_>) -> UploadState {
        let min_size = env.config.min_packet_size;
        match env.transport.alloc_packet(min_size) {
            Some(mut packet) if packet.len() >= min_size => {
                packet.set_urgent(self.urgent);
                self.packet = Some(packet);
                return UploadState::LoadPacket;
            }
            Some(packet) => {
                self.metrics.packets_too_small += 1;
                log::warn!(
                    "transport buffer too small: {} bytes, need {}",
                    packet.len(),
                    min_size
                );
            }
            None => {
                self.metrics.alloc_failures += 1;
                log::warn!("packet allocation failed ({} bytes requested)", min_size);
            }
        }

        self.alloc_attempts += 1;
        if self.alloc_attempts >= env.config.alloc_retry_limit {
            self.alloc_attempts = 0;
            UploadState::Init
        } else {
            UploadState::GetPacket
        }
    }

    fn on_load_packet(&mut self, env: UploadEnv<'_>) -> UploadState {
        let mut packet = match self.packet.take() {
            Some(packet) => packet,
            None => return UploadState::Init,
        };

        let config = env.config;
        let message_id = self.message_id;
        let request = RequestHeader {
            message_id,
            token: request_token(message_id, env.utc_ms, config.device_id),
            topic: if self.urgent {
                config.warning_topic.as_str()
            } else {
                config.data_topic.as_str()
            },
            content_format: config.content_format,
        };

        let built = {
            let mut w = PacketWriter::new(packet.as_mut_slice());
            PacketBuilder::new(config, env.table, env.pool, env.preamble).build(
                &mut w,
                &request,
                env.utc_ms,
            )
        };
        let plan = match built {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.build_failures += 1;
                log::warn!("packet {} build failed: {}", message_id, e);
                return UploadState::Init;
            }
        };

        if plan.is_empty() {
            // Flags pointed at entries with nothing left to send
            commit_plan(&plan, env.table, env.pool, env.preamble);
            log::debug!("nothing to send, packet {} discarded", message_id);
            return UploadState::Init;
        }

        packet.finalize(plan.length);
        match env.transport.enqueue(packet) {
            Ok(()) => {
                commit_plan(&plan, env.table, env.pool, env.preamble);
                self.metrics.record_packet(&plan, self.urgent);
                self.message_id = self.message_id.wrapping_add(1);
                log::info!(
                    "packet {} queued: {} bytes, {} records, {} samples{}",
                    message_id,
                    plan.length,
                    plan.records,
                    plan.samples,
                    if plan.full { " (full)" } else { "" }
                );
                UploadState::UploadComplete
            }
            Err(e) => {
                self.metrics.enqueue_failures += 1;
                log::warn!("packet {} not queued: {}", message_id, e);
                UploadState::Init
            }
        }
    }
}
