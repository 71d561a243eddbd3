//! Binary entrypoint for the TankSync CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the receiver station
//! - `init` - create a starter config file and the settings database
//! - `status` - print the last status snapshot and stored device settings
//! - `calibrate --near <cm> --far <cm> --capacity <liters>` - store tank calibration
//! - `radio [--frequency <hz>] [--network-id <n>] [--address <n>]` - store modem settings
//! - `wifi --ssid <name> [--password <pw>] | --clear` - store or forget Wi-Fi credentials
//! - `smoketest --port <path> [-b <baud>]` - probe and configure the modem, print JSON
//!
//! See the library crate docs for module-level details: `tanksync::`.
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use tanksync::clock::{Clock, PacedYield, SystemClock, Watchdog};
use tanksync::config::Config;
use tanksync::link::network::NetworkSupervisor;
use tanksync::link::sysfs::SysfsNetwork;
use tanksync::publish::{LogSink, PublishSink};
use tanksync::radio::serial::{DetachedSerial, SerialLink};
use tanksync::radio::RadioTransport;
use tanksync::settings::{
    load_calibration, save_calibration, RadioSettings, SledStore, WifiCredentials,
};
use tanksync::station::status::StatusSnapshot;
use tanksync::station::{Station, StationParts};
use tanksync::tank::Calibration;
use tanksync::telemetry::TelemetryIngest;

#[derive(Parser)]
#[command(name = "tanksync")]
#[command(about = "LoRa water tank telemetry receiver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "tanksync.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the receiver station
    Start {
        /// Radio serial port (e.g., /dev/ttyUSB0); overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file and create the settings database
    Init,
    /// Show the last status snapshot and stored settings
    Status,
    /// Store tank calibration (distance when full, distance when empty, volume)
    Calibrate {
        /// Sensor distance in cm when the tank is full
        #[arg(long)]
        near: i32,
        /// Sensor distance in cm when the tank is empty
        #[arg(long)]
        far: i32,
        /// Tank volume in liters
        #[arg(long)]
        capacity: f32,
    },
    /// Store LoRa modem settings, applied on next start
    Radio {
        /// Band in Hz (e.g., 865000000)
        #[arg(long)]
        frequency: Option<String>,
        /// LoRa network id shared with the sensor node
        #[arg(long)]
        network_id: Option<u8>,
        /// This receiver's LoRa address
        #[arg(long)]
        address: Option<u16>,
    },
    /// Store or clear Wi-Fi station credentials
    Wifi {
        #[arg(long, required_unless_present = "clear", conflicts_with = "clear")]
        ssid: Option<String>,
        #[arg(long, default_value = "")]
        password: String,
        /// Forget stored credentials (the station will stay in access-point mode)
        #[arg(long)]
        clear: bool,
    },
    /// Probe the radio module and apply stored settings
    #[command(alias = "smoketest")]
    SmokeTest {
        /// Radio serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let mut config = require_config(pre_config, &cli.config).await?;
            if let Some(port) = port {
                config.radio.port = port;
            }
            info!("Starting TankSync v{}", env!("CARGO_PKG_VERSION"));
            run_station(config).await?;
        }
        Commands::Init => {
            info!("Initializing new TankSync configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let config = Config::default();
            SledStore::open(&config.storage.settings_path)?;
            info!("Settings database ready at {}", config.storage.settings_path);
        }
        Commands::Status => {
            let config = require_config(pre_config, &cli.config).await?;
            show_status(&config)?;
        }
        Commands::Calibrate {
            near,
            far,
            capacity,
        } => {
            let config = require_config(pre_config, &cli.config).await?;
            let mut store = SledStore::open(&config.storage.settings_path)?;
            let calibration = save_calibration(&mut store, near, far, capacity)?;
            println!("{}", calibration_saved_message(&calibration));
        }
        Commands::Radio {
            frequency,
            network_id,
            address,
        } => {
            let config = require_config(pre_config, &cli.config).await?;
            let mut store = SledStore::open(&config.storage.settings_path)?;
            let mut settings = RadioSettings::load(&store)?;
            if let Some(frequency) = frequency {
                settings.frequency = frequency;
            }
            if let Some(network_id) = network_id {
                settings.network_id = network_id;
            }
            if let Some(address) = address {
                settings.address = address;
            }
            settings.save(&mut store)?;
            println!("{}", radio_saved_message(&settings));
        }
        Commands::Wifi {
            ssid,
            password,
            clear,
        } => {
            let config = require_config(pre_config, &cli.config).await?;
            let mut store = SledStore::open(&config.storage.settings_path)?;
            match ssid {
                Some(ssid) if !clear => {
                    let credentials = WifiCredentials { ssid, password };
                    credentials.save(&mut store)?;
                    println!(
                        "Wi-Fi credentials saved for {} ({})",
                        credentials.ssid, NEXT_START_NOTE
                    );
                }
                _ => {
                    WifiCredentials::clear(&mut store)?;
                    println!("Wi-Fi credentials cleared");
                }
            }
        }
        Commands::SmokeTest { port, baud } => {
            let config = pre_config.unwrap_or_default();
            let code = smoke_test(&config, &port, baud);
            std::process::exit(code);
        }
    }

    Ok(())
}

/// Settings commands write the store only; a running station picks changes up on restart.
const NEXT_START_NOTE: &str = "applied on next start";

fn calibration_saved_message(calibration: &Calibration) -> String {
    format!(
        "Calibration saved: full at {} cm, empty at {} cm, {} L ({})",
        calibration.near_cm(),
        calibration.far_cm(),
        calibration.capacity_liters(),
        NEXT_START_NOTE
    )
}

fn radio_saved_message(settings: &RadioSettings) -> String {
    format!(
        "Radio settings saved: band {} Hz, network {}, address {} ({})",
        settings.frequency, settings.network_id, settings.address, NEXT_START_NOTE
    )
}

async fn require_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        None => Config::load(path)
            .await
            .map_err(|e| anyhow::anyhow!("{} (run `tanksync init` to create one)", e)),
    }
}

async fn run_station(config: Config) -> Result<()> {
    let watchdog = Rc::new(Watchdog::new(Duration::from_millis(
        config.scheduler.watchdog_ms,
    )));
    let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());

    let store = SledStore::open(&config.storage.settings_path)?;
    let calibration = load_calibration(&store)?;
    let radio_settings = RadioSettings::load(&store)?;
    let credentials = WifiCredentials::load(&store)?;
    drop(store);

    let radio = RadioTransport::new(
        open_serial(&config.radio.port, config.radio.baud_rate),
        Rc::clone(&clock),
        Box::new(PacedYield::new(config.poll_slice(), Rc::clone(&watchdog))),
        config.radio_timing(),
    );
    let network =
        NetworkSupervisor::new(credentials, config.network_timing(), config.access_point());
    let driver = SysfsNetwork::new(config.network.interface.clone(), config.network_hooks());
    let sink = build_sink(&config);

    let mut station = Station::new(StationParts {
        radio,
        network,
        driver: Box::new(driver),
        sink,
        ingest: TelemetryIngest::new(calibration),
        clock,
        watchdog,
        options: config.station_options(),
    });
    station.start(&radio_settings);

    let mut ticker = tokio::time::interval(Duration::from_millis(config.scheduler.tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = station.tick();
                if report.accepted > 0 {
                    debug!(
                        "Tick: {} line(s), {} accepted, {} published",
                        report.lines, report.accepted, report.published
                    );
                }
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    let overruns = station.watchdog().overruns();
    if overruns > 0 {
        warn!("Watchdog overran {} time(s) during this run", overruns);
    }
    Ok(())
}

fn open_serial(port: &str, baud: u32) -> Box<dyn SerialLink> {
    #[cfg(feature = "serial")]
    {
        match tanksync::radio::serial::HardwareSerial::open(port, baud) {
            Ok(serial) => return Box::new(serial),
            Err(e) => warn!("{}; radio will report absent", e),
        }
    }
    #[cfg(not(feature = "serial"))]
    warn!(
        "Built without serial support; {} @ {} unavailable, radio will report absent",
        port, baud
    );
    Box::new(DetachedSerial)
}

/// MQTT sink when enabled (its event loop runs as a background task), log sink otherwise.
fn build_sink(config: &Config) -> Box<dyn PublishSink> {
    #[cfg(feature = "mqtt")]
    if config.mqtt.enabled {
        let (sink, connection) = tanksync::publish::mqtt::connect(&config.mqtt);
        tokio::spawn(connection.run());
        return Box::new(sink);
    }
    #[cfg(not(feature = "mqtt"))]
    if config.mqtt.enabled {
        warn!("MQTT enabled in config but built without the `mqtt` feature; logging instead");
    }
    Box::new(LogSink)
}

fn show_status(config: &Config) -> Result<()> {
    println!("TankSync v{}", env!("CARGO_PKG_VERSION"));
    println!("Radio port: {} @ {}", config.radio.port, config.radio.baud_rate);

    match config.storage.status_file.as_deref() {
        Some(path) => match StatusSnapshot::load(std::path::Path::new(path)) {
            Ok(status) => {
                println!("Last update: {}", status.updated_at.to_rfc3339());
                println!(
                    "Radio: {} ({})  Network: {}",
                    status.status, status.radio_state, status.network_state
                );
                if status.data_valid {
                    println!(
                        "Water: {}% ({} cm, {:.1} of {:.1} L)",
                        status.water_percent,
                        status.water_level_cm,
                        status.water_liters,
                        status.tank_capacity
                    );
                    println!(
                        "Battery: {}% ({:.2} V)  RSSI {} dBm  SNR {}",
                        status.battery_percent, status.battery_voltage, status.rssi, status.snr
                    );
                    println!("Packets received: {}", status.packets_received);
                    if let Some(last_update) = status.last_update {
                        let age = chrono::Utc::now().signed_duration_since(last_update);
                        println!(
                            "Last packet: {} ({} s ago)",
                            last_update.to_rfc3339(),
                            age.num_seconds().max(0)
                        );
                    }
                } else {
                    println!("No telemetry received yet");
                }
            }
            Err(e) => println!("No status snapshot at {}: {}", path, e),
        },
        None => println!("Status file disabled in config"),
    }

    // Another tanksync command may hold the database open; stored settings are optional here.
    match SledStore::open(&config.storage.settings_path) {
        Ok(store) => {
            let calibration = load_calibration(&store)?;
            let radio = RadioSettings::load(&store)?;
            let wifi = WifiCredentials::load(&store)?;
            println!(
                "Calibration: full {} cm, empty {} cm, {} L",
                calibration.near_cm(),
                calibration.far_cm(),
                calibration.capacity_liters()
            );
            println!(
                "LoRa: band {} Hz, network {}, address {}",
                radio.frequency, radio.network_id, radio.address
            );
            match wifi {
                Some(wifi) => println!("Wi-Fi: {}", wifi.ssid),
                None => println!("Wi-Fi: not configured (access-point mode)"),
            }
        }
        Err(e) => println!("Settings unavailable ({})", e),
    }
    Ok(())
}

/// Probe and configure the modem once. Returns the process exit code.
fn smoke_test(config: &Config, port: &str, baud: u32) -> i32 {
    let radio_settings = SledStore::open(&config.storage.settings_path)
        .and_then(|store| RadioSettings::load(&store))
        .unwrap_or_else(|e| {
            warn!("Using default radio settings ({})", e);
            RadioSettings::default()
        });

    let watchdog = Rc::new(Watchdog::new(Duration::from_millis(
        config.scheduler.watchdog_ms,
    )));
    let mut radio = RadioTransport::new(
        open_serial(port, baud),
        Rc::new(SystemClock::new()),
        Box::new(PacedYield::new(config.poll_slice(), watchdog)),
        config.radio_timing(),
    );
    info!("Starting smoke test on {} @ {} baud", port, baud);
    let result = radio.initialize(&radio_settings);
    let ok = result.is_ok();

    let payload = serde_json::json!({
        "status": if ok { "ok" } else { "failed" },
        "port": port,
        "baud": baud,
        "hardware": radio.presence(),
        "radio": radio_settings,
        "error": result.err().map(|e| e.to_string()),
        "exchange_timeout_ms": config.radio.exchange_timeout_ms,
    });
    println!("{}", payload);
    if ok {
        0
    } else {
        1
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity, else from config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled logs every flush at debug
    builder.filter_module("sled", log::LevelFilter::Warn);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
