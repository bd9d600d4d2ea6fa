use clap::Parser;
use moritz_lib::constants::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PATH};
use moritz_lib::{
    CulConfig, CulTransceiver, EngineConfig, Event, EventBus, EventTopic, MessageEngine,
};
use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;
use tracing::info;

/// Bridges MAX! radiator thermostats to this host via a CUL transceiver.
///
/// Impersonates a cube: answers pair and time requests, tracks reported
/// thermostat state and dumps it as JSON on an interval.
#[derive(Parser, Debug)]
#[command(name = "moritz-cli", version)]
struct Args {
    /// Serial device of the CUL transceiver
    #[arg(long, default_value = DEFAULT_DEVICE_PATH)]
    device: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Cube identity to impersonate (24-bit, hex)
    #[arg(long, value_parser = parse_device_id, default_value = "123456")]
    cube_id: u32,

    /// Do not answer pair requests as a cube
    #[arg(long)]
    no_pair_as_cube: bool,

    /// Answer pair requests as a wall thermostat
    #[arg(long)]
    pair_as_wall_thermostat: bool,

    /// Answer pair requests as a shutter contact
    #[arg(long)]
    pair_as_shutter_contact: bool,

    /// Seconds between state dumps
    #[arg(long, default_value_t = 30)]
    state_interval: u64,
}

fn parse_device_id(input: &str) -> Result<u32, String> {
    u32::from_str_radix(input.trim_start_matches("0x"), 16).map_err(|err| err.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let cul = CulTransceiver::spawn(CulConfig {
        device_path: args.device.clone(),
        baud_rate: args.baud,
    })?;
    info!(device = %args.device, "connected to CUL");

    let mut bus = EventBus::new();
    bus.subscribe(EventTopic::DevicePairRequest, |event| {
        if let Event::DevicePairRequest { frame } = event {
            info!(%frame, "device requests pairing");
        }
    });
    bus.subscribe(EventTopic::DevicePairAccepted, |event| {
        if let Event::DevicePairAccepted { response } = event {
            info!("pairing accepted for 0x{:X}", response.receiver_id);
        }
    });
    bus.subscribe(EventTopic::ThermostatStateReceived, |event| {
        if let Event::ThermostatStateReceived {
            frame,
            signal_strength,
        } = event
        {
            info!(%frame, signal_strength, "thermostat state received");
        }
    });

    let engine = MessageEngine::spawn(
        EngineConfig {
            cube_id: args.cube_id,
            pair_as_cube: !args.no_pair_as_cube,
            pair_as_wall_thermostat: args.pair_as_wall_thermostat,
            pair_as_shutter_contact: args.pair_as_shutter_contact,
        },
        bus,
        cul.link(),
    )?;

    loop {
        std::thread::sleep(Duration::from_secs(args.state_interval));
        let state = engine.state();
        if state.is_empty() {
            info!("no thermostat state received yet");
            continue;
        }
        // key by printable device id for the dump
        let rendered: BTreeMap<String, _> = state
            .into_iter()
            .map(|(id, snapshot)| (format!("0x{id:06X}"), snapshot))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    }
}
