// Fieldlink - Telemetry acquisition and upload encoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline context
//!
//! [`Telemetry`] owns every entry table, the payload pool, the preamble flags
//! and the upload session, together with the injected collaborators. The
//! host driver calls it once per tick; nothing in here blocks.

use crate::clock::Clock;
use crate::config::{CoreConfig, EntryDescriptor};
use crate::error::{PoolError, Result};
use crate::metrics::UploadMetrics;
use crate::pool::VarLenPool;
use crate::preamble::{GpsFix, IndoorFix, Preamble};
use crate::protocol::{EntryClass, Timestamp, TypedValue, WarningLevel};
use crate::recorder::{self, EventOutcome};
use crate::sampler::{EntryReader, PollOutcome, Sampler};
use crate::status::StatusIndicator;
use crate::store::{EntryState, EntryTable};
use crate::transport::Transport;
use crate::uploader::{UploadEnv, UploadSession, UploadState};

/// Telemetry acquisition and upload pipeline
pub struct Telemetry<R, T, C, S> {
    config: CoreConfig,
    table: EntryTable,
    pool: VarLenPool,
    preamble: Preamble,
    sampler: Sampler,
    session: UploadSession,
    reader: R,
    transport: T,
    clock: C,
    status: S,
}

impl<R, T, C, S> Telemetry<R, T, C, S>
where
    R: EntryReader,
    T: Transport,
    C: Clock,
    S: StatusIndicator,
{
    /// Validate the configuration and build the pipeline
    pub fn new(
        config: CoreConfig,
        controls: Vec<EntryDescriptor>,
        sensors: Vec<EntryDescriptor>,
        reader: R,
        transport: T,
        clock: C,
        status: S,
    ) -> Result<Self> {
        let table = EntryTable::new(&config, controls, sensors)?;
        let pool = VarLenPool::new(config.varlen_pool_slots, config.varlen_max_len);
        log::info!(
            "telemetry ready: {} controls, {} sensors, history {} slots",
            table.class(EntryClass::Control).len(),
            table.class(EntryClass::Sensor).len(),
            config.history_size
        );

        Ok(Self {
            config,
            table,
            pool,
            preamble: Preamble::default(),
            sampler: Sampler::new(),
            session: UploadSession::new(),
            reader,
            transport,
            clock,
            status,
        })
    }

    fn poll_class(&mut self, class: EntryClass, now: Timestamp) -> PollOutcome {
        let utc_ms = self.clock.utc_now_ms();
        self.sampler.poll(
            class,
            now,
            utc_ms,
            &self.config,
            &mut self.table,
            &mut self.pool,
            &mut self.reader,
        )
    }

    /// One sampler step over the controls
    pub fn poll_controls(&mut self, now: Timestamp) -> PollOutcome {
        self.poll_class(EntryClass::Control, now)
    }

    /// One sampler step over the sensors
    pub fn poll_sensors(&mut self, now: Timestamp) -> PollOutcome {
        self.poll_class(EntryClass::Sensor, now)
    }

    /// Record a value for an event-driven entry
    pub fn record_event(
        &mut self,
        class: EntryClass,
        index: usize,
        value: TypedValue,
    ) -> Result<EventOutcome> {
        let now = self.clock.now();
        let utc_ms = self.clock.utc_now_ms();
        let outcome = recorder::record_event(
            &mut self.table,
            &mut self.pool,
            class,
            index,
            value,
            now,
            utc_ms,
        )?;
        Ok(outcome)
    }

    /// Copy `bytes` into the pool and record them for an event-driven entry
    pub fn record_varlen_event(
        &mut self,
        class: EntryClass,
        index: usize,
        bytes: &[u8],
    ) -> Result<EventOutcome> {
        self.table.entry(class, index)?;
        let handle = self.pool.alloc(bytes)?;
        self.record_event(class, index, TypedValue::VarLen(handle))
    }

    /// Record a producer failure for an event-driven entry
    pub fn record_event_error(&mut self, class: EntryClass, index: usize, code: u8) -> Result<bool> {
        let now = self.clock.now();
        let flagged =
            recorder::record_event_error(&mut self.table, &self.config, class, index, code, now)?;
        Ok(flagged)
    }

    /// Advance the upload state machine by one step
    pub fn tick_upload(&mut self, now: Timestamp) -> UploadState {
        let env = UploadEnv {
            config: &self.config,
            table: &mut self.table,
            pool: &mut self.pool,
            preamble: &mut self.preamble,
            transport: &mut self.transport,
            status: &mut self.status,
            utc_ms: self.clock.utc_now_ms(),
        };
        self.session.tick(now, env)
    }

    /// Make the entry's next batch evaluation succeed
    pub fn request_immediate_flush(&mut self, class: EntryClass, index: usize) -> Result<()> {
        let (_, state) = self.table.entry_mut(class, index)?;
        state.update_now = true;
        Ok(())
    }

    /// Queue a registration record for the next packet
    pub fn queue_registration(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.varlen_max_len {
            return Err(PoolError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.varlen_max_len,
            }
            .into());
        }
        self.preamble.registration = Some(payload.to_vec());
        Ok(())
    }

    /// Queue a GPS location record for the next packet
    pub fn queue_gps_location(&mut self, fix: GpsFix) {
        self.preamble.gps = Some(fix);
    }

    /// Queue an indoor location record for the next packet
    pub fn queue_indoor_location(&mut self, fix: IndoorFix) {
        self.preamble.indoor = Some(fix);
    }

    /// Current warning level of an entry
    pub fn warning_level(&self, class: EntryClass, index: usize) -> Result<WarningLevel> {
        Ok(self.table.entry(class, index)?.1.warning)
    }

    /// Stored slots of an entry
    pub fn sample_count(&self, class: EntryClass, index: usize) -> Result<usize> {
        Ok(self.table.entry(class, index)?.1.sample_count())
    }

    /// Most recent successful reading of an entry
    pub fn last_value(&self, class: EntryClass, index: usize) -> Result<Option<TypedValue>> {
        Ok(self.table.entry(class, index)?.1.last_value)
    }

    /// Full state of an entry
    pub fn entry_state(&self, class: EntryClass, index: usize) -> Result<&EntryState> {
        Ok(self.table.entry(class, index)?.1)
    }

    /// Descriptor of an entry
    pub fn descriptor(&self, class: EntryClass, index: usize) -> Result<&EntryDescriptor> {
        Ok(self.table.entry(class, index)?.0)
    }

    /// Global configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Upload state
    pub fn upload_state(&self) -> UploadState {
        self.session.state()
    }

    /// Upload statistics
    pub fn metrics(&self) -> &UploadMetrics {
        self.session.metrics()
    }

    /// Payload pool (for readers allocating outside a poll)
    pub fn pool(&self) -> &VarLenPool {
        &self.pool
    }

    /// Mutable payload pool
    pub fn pool_mut(&mut self) -> &mut VarLenPool {
        &mut self.pool
    }

    /// Injected transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable injected transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Injected reader
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Injected status indicator
    pub fn status(&self) -> &S {
        &self.status
    }

    /// Injected clock
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
