use clap::{App, Arg, ArgMatches};
use colored::*;
use nimbus::chips::PolarizationSupply;
use nimbus::sim::SignalProfile;
use nimbus::{
    ConfigurationRequest, LockState, NimFrontend, PowerLevelLookup, SimulatedBus, StatusSnapshot,
    WorkerBuilder, WorkerConfig,
};
use std::fs;
use tokio::sync::broadcast::error::RecvError;
use tracing::{warn, Level};

const DEFAULT_FREQUENCY_HZ: &str = "1296000000";
const DEFAULT_SYMBOL_RATE: &str = "1500000";
const DEFAULT_COUNT: &str = "5";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("nimbus-sim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("📡 Runs a NIM worker against a simulated DVB-S/S2 receiver board")
        .arg(
            Arg::with_name("frequency")
                .short("f")
                .long("frequency")
                .value_name("HZ")
                .help("Tuner frequency in Hz")
                .takes_value(true)
                .default_value(DEFAULT_FREQUENCY_HZ)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Frequency must be a whole number of Hz".into()),
                }),
        )
        .arg(
            Arg::with_name("symbol-rate")
                .short("s")
                .long("symbol-rate")
                .value_name("BAUD")
                .help("Symbol rate in symbols per second")
                .takes_value(true)
                .default_value(DEFAULT_SYMBOL_RATE)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Symbol rate must be a whole number".into()),
                }),
        )
        .arg(
            Arg::with_name("input-b")
                .long("input-b")
                .help("Route the secondary RF input to the tuner"),
        )
        .arg(
            Arg::with_name("lnb")
                .long("lnb")
                .value_name("SUPPLY")
                .help("LNB supply")
                .takes_value(true)
                .possible_values(&["off", "vertical", "horizontal"])
                .default_value("off"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Worker config as JSON")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("count")
                .short("n")
                .long("count")
                .value_name("N")
                .help("Snapshots to print before stopping")
                .takes_value(true)
                .default_value(DEFAULT_COUNT)
                .validator(|v| match v.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(()),
                    _ => Err("Count must be a positive number".into()),
                }),
        )
        .arg(
            Arg::with_name("no-signal")
                .long("no-signal")
                .help("Simulate a transponder the demodulator never locks to"),
        )
        .arg(
            Arg::with_name("format")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    run(&matches)
}

fn run(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match matches.value_of("config") {
        Some(path) => WorkerConfig::from_json(&fs::read_to_string(path)?)?,
        None => WorkerConfig::default(),
    };
    let request = request_from_args(matches)?;
    let count: usize = matches.value_of("count").unwrap_or(DEFAULT_COUNT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");

    let profile = if matches.is_present("no-signal") {
        SignalProfile::no_signal()
    } else {
        SignalProfile::default()
    };
    let (bus, sim) = SimulatedBus::with_profile(profile);

    if format == "table" {
        println!("{}", "📡 Nimbus - simulated NIM worker".bright_blue().bold());
        println!(
            "{} {} Hz @ {} Bd, LNB {:?}",
            "Tuning".dimmed(),
            request.frequency_hz,
            request.symbol_rate,
            request.polarization()
        );
    }

    let worker = WorkerBuilder::new(NimFrontend::new(bus), PowerLevelLookup::builtin()?)
        .config(config)
        .name("nimbus-sim")
        .spawn()?;
    let mut telemetry = worker.subscribe();
    worker.enqueue(request)?;

    let mut printed = 0;
    while printed < count {
        match telemetry.blocking_recv() {
            Ok(snapshot) => {
                print_snapshot(&snapshot, format)?;
                printed += 1;
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "console fell behind the worker"),
            Err(RecvError::Closed) => break,
        }
    }

    let exit = worker.shutdown()?;
    if format == "table" {
        let stats = sim.stats();
        println!(
            "{} {:?} after {} reads, {} writes",
            "Worker finished:".bright_white(),
            exit,
            stats.reads.to_string().bright_cyan(),
            stats.writes.to_string().bright_cyan()
        );
    }
    Ok(())
}

fn request_from_args(matches: &ArgMatches<'_>) -> Result<ConfigurationRequest, Box<dyn std::error::Error>> {
    let frequency_hz = matches.value_of("frequency").unwrap_or(DEFAULT_FREQUENCY_HZ).parse()?;
    let symbol_rate = matches.value_of("symbol-rate").unwrap_or(DEFAULT_SYMBOL_RATE).parse()?;
    let supply = match matches.value_of("lnb") {
        Some("vertical") => PolarizationSupply::Vertical,
        Some("horizontal") => PolarizationSupply::Horizontal,
        _ => PolarizationSupply::Off,
    };

    Ok(ConfigurationRequest::new(frequency_hz, symbol_rate)
        .with_input_b(matches.is_present("input-b"))
        .with_polarization(supply))
}

fn print_snapshot(snapshot: &StatusSnapshot, format: &str) -> Result<(), serde_json::Error> {
    if format == "json" {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let lock = match snapshot.lock_state {
        LockState::LockedS2 => "DVB-S2".bright_green(),
        LockState::LockedS => "DVB-S".bright_green(),
        LockState::Searching => "searching".yellow(),
        LockState::Unlocked => "unlocked".bright_red(),
    };
    let marker = if snapshot.reconfigured { "*".bright_cyan() } else { " ".normal() };

    println!(
        "{} {:<10} {:>5} dBm  MER {:>5.1} dB  SR {:>9}  offset {:>8} Hz  modcod {:>2}{}{}",
        marker,
        lock,
        snapshot.input_power_dbm,
        f64::from(snapshot.mer) / 10.0,
        snapshot.symbol_rate,
        snapshot.carrier_offset_hz,
        snapshot.modcod,
        if snapshot.short_frame { " short" } else { "" },
        if snapshot.pilots { " pilots" } else { "" },
    );
    Ok(())
}
