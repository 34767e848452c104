// Fieldlink Sim - Host simulator for the Fieldlink pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Fieldlink Sim
//!
//! Drives the telemetry pipeline with synthetic sensors on simulated time
//! and decodes every packet the uploader queues.
//!
//! ## Usage
//!
//! ```bash
//! # Ten simulated minutes with the built-in scenario
//! fieldlink-sim --ticks 600
//!
//! # Custom scenario, small packets, decoded packets as JSON lines
//! fieldlink-sim --config scenario.json --packet-size 128 --json
//! ```

mod scenario;
mod signal;

use clap::Parser;
use fieldlink::{
    decode_packet, Clock, DecodedPacket, EntryClass, LedState, ManualClock, MemoryTransport,
    RecordValues, StatusIndicator, StatusLed, Telemetry,
};
use scenario::Scenario;
use serde::Serialize;
use signal::{EventValue, SimReader};
use std::path::PathBuf;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Fieldlink pipeline simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated ticks
    #[arg(short, long, default_value = "600")]
    ticks: u64,

    /// Simulated milliseconds per tick
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Size of the buffers the transport hands out
    #[arg(short, long, default_value = "256")]
    packet_size: usize,

    /// Scenario file (JSON); the built-in scenario is used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the synthetic signals
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Simulated wall clock at tick zero (ms since the Unix epoch)
    #[arg(long, default_value = "1700000000000")]
    utc_start: u64,

    /// Print decoded packets as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the active scenario as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Status indicator that logs instead of blinking.
struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn notify_status(&mut self, led: StatusLed, state: LedState) {
        debug!("LED {:?} -> {:?}", led, state);
    }
}

/// One decoded record, flattened for output.
#[derive(Serialize)]
struct RecordSummary {
    block: String,
    id: u32,
    warning: String,
    error: u8,
    last_time_ms: u64,
    values: Vec<String>,
}

/// One decoded packet, flattened for output.
#[derive(Serialize)]
struct PacketSummary {
    message_id: u16,
    topic: String,
    bytes: usize,
    records: Vec<RecordSummary>,
}

impl PacketSummary {
    fn new(packet: &DecodedPacket, bytes: usize) -> Self {
        let records = packet
            .records
            .iter()
            .map(|r| RecordSummary {
                block: format!("{:?}", r.block_type),
                id: r.id,
                warning: r.warning.to_string(),
                error: r.sensor_error,
                last_time_ms: r.last_time_ms,
                values: match &r.values {
                    RecordValues::Empty => vec![],
                    RecordValues::Samples(v) => v.iter().map(|s| s.to_string()).collect(),
                    RecordValues::Events(v) => {
                        v.iter().map(|(t, s)| format!("{}@{}", s, t)).collect()
                    }
                    RecordValues::VarLen { payload, .. } => {
                        vec![String::from_utf8_lossy(payload).into_owned()]
                    }
                },
            })
            .collect();

        Self {
            message_id: packet.request.message_id,
            topic: packet.request.topic(),
            bytes,
            records,
        }
    }
}

type SimTelemetry = Telemetry<SimReader, MemoryTransport, ManualClock, LogIndicator>;

fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = match &args.config {
        Some(path) => Scenario::from_file(path)?,
        None => Scenario::default(),
    };

    if args.dump_config {
        println!("{}", scenario.to_json()?);
        return Ok(());
    }

    info!("Fieldlink Sim v{}", env!("CARGO_PKG_VERSION"));

    let clock = ManualClock::new(args.utc_start);
    let reader = SimReader::new(scenario.controls.clone(), scenario.sensors.clone(), args.seed);
    let mut telemetry: SimTelemetry = Telemetry::new(
        scenario.core.clone(),
        Scenario::descriptors(&scenario.controls),
        Scenario::descriptors(&scenario.sensors),
        reader,
        MemoryTransport::new(args.packet_size),
        clock.clone(),
        LogIndicator,
    )?;

    if let Some(registration) = &scenario.registration {
        telemetry.queue_registration(registration.as_bytes())?;
    }

    let mut packets = 0usize;
    for tick in 0..args.ticks {
        clock.set(tick * args.tick_ms);
        step(&mut telemetry, &scenario);
        packets += drain_outgoing(&mut telemetry, args.json)?;
    }

    info!(
        "{} ticks simulated, {} packets decoded",
        args.ticks, packets
    );
    println!("{}", telemetry.metrics().report());
    Ok(())
}

/// One simulated tick: poll every entry once, raise events, run the uploader.
fn step(telemetry: &mut SimTelemetry, scenario: &Scenario) {
    let now = telemetry.clock().now();
    telemetry.reader_mut().set_time(now);

    for _ in 0..scenario.controls.len() {
        telemetry.poll_controls(now);
    }
    for _ in 0..scenario.sensors.len() {
        telemetry.poll_sensors(now);
    }

    for class in EntryClass::ALL {
        for (index, value) in telemetry.reader_mut().due_events(class) {
            let recorded = match value {
                EventValue::Value(v) => telemetry.record_event(class, index, v),
                EventValue::Bytes(b) => telemetry.record_varlen_event(class, index, &b),
            };
            if let Err(e) = recorded {
                warn!("{} {} event dropped: {}", class, index, e);
            }
        }
    }

    // Init -> GetPacket -> LoadPacket -> UploadComplete -> Init
    for _ in 0..4 {
        telemetry.tick_upload(now);
    }
}

/// Pop and decode everything the uploader queued.
fn drain_outgoing(
    telemetry: &mut SimTelemetry,
    json: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut count = 0;
    while let Some(packet) = telemetry.transport_mut().pop_outgoing() {
        let decoded = decode_packet(packet.as_bytes())?;
        let summary = PacketSummary::new(&decoded, packet.len());
        count += 1;

        if json {
            println!("{}", serde_json::to_string(&summary)?);
            continue;
        }

        info!(
            "packet {} -> /{}: {} bytes, {} records",
            summary.message_id,
            summary.topic,
            summary.bytes,
            summary.records.len()
        );
        for record in &summary.records {
            info!(
                "  {} {} [{}] err={} t={} {:?}",
                record.block,
                record.id,
                record.warning,
                record.error,
                record.last_time_ms,
                record.values
            );
        }
    }
    Ok(count)
}
