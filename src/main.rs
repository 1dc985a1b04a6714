//! Keyboard RepeatKit - measure the native key repeat rate and watch
//! calibrated repeats from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::LocalSet;

use keyboard_repeatkit::{
    config::{config_path, Backend, Config},
    keyboard::{key_by_name, DeviceListener, KeyCode, KeyEvent, KeyGroup, KeyboardPoller, SignalBus, CATALOG},
    CalibrationReport, InputSession, RepeatCalibrator,
};

#[cfg(target_os = "linux")]
use keyboard_repeatkit::keyboard::{evdev_status, EvdevListener};

#[derive(Parser)]
#[command(name = "repeatkit", version, about = "Key repeat calibration and dispatch")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Measure the platform auto-repeat interval while a key is held
    Calibrate {
        /// Only count repeats of this key
        #[arg(long)]
        key: Option<String>,
        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Store the measured interval as the session repeat interval
        #[arg(long)]
        save: bool,
    },
    /// Print session repeats for held keys until Ctrl-C
    Watch {
        /// Repeat interval in milliseconds (defaults to the configured one)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Comma-separated key names or group names
        #[arg(long)]
        keys: Option<String>,
    },
    /// List known keys by group
    Keys,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Keys => {
            print_keys();
            Ok(())
        }
        Command::Calibrate { key, report, save } => {
            let rt = runtime()?;
            LocalSet::new().block_on(&rt, calibrate(config, cli.config, key, report, save))
        }
        Command::Watch { interval_ms, keys } => {
            let rt = runtime()?;
            LocalSet::new().block_on(&rt, watch(config, interval_ms, keys))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if path.exists() => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        Some(_) => Ok(Config::default()),
        None => Config::load().context("Failed to load config"),
    }
}

/// Open the configured hardware listener.
///
/// `needs_repeats` is set for calibration, which only works when the
/// platform's auto-repeat events are visible.
fn open_poller(backend: Backend, needs_repeats: bool) -> Result<Box<dyn KeyboardPoller>> {
    #[cfg(target_os = "linux")]
    {
        // Sessions run their own repeat chains, so kernel repeats only matter
        // to the calibrator.
        let configure = |mut evdev: EvdevListener| -> Box<dyn KeyboardPoller> {
            evdev.set_forward_repeats(needs_repeats);
            log::info!(
                "evdev: reading {} of {}",
                evdev.device_count(),
                evdev_status()
            );
            Box::new(evdev)
        };
        match backend {
            Backend::Evdev => {
                let evdev = EvdevListener::new().context("Failed to open evdev devices")?;
                return Ok(configure(evdev));
            }
            Backend::Auto => match EvdevListener::new() {
                Ok(evdev) => return Ok(configure(evdev)),
                Err(e) => log::warn!("evdev unavailable ({}), falling back to device_query", e),
            },
            Backend::DeviceQuery => {}
        }
    }
    #[cfg(not(target_os = "linux"))]
    if backend == Backend::Evdev {
        bail!("the evdev backend is only available on Linux");
    }

    if needs_repeats {
        log::warn!("device_query does not report auto-repeat; calibration will time out");
    }
    Ok(Box::new(DeviceListener::new()))
}

/// Poll `poller` into `bus` until `stop` is set
async fn pump(poller: &mut dyn KeyboardPoller, bus: &SignalBus, every: Duration, stop: &AtomicBool) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    while !stop.load(Ordering::Relaxed) {
        ticker.tick().await;
        poller.poll(bus);
    }
}

fn parse_key(name: &str) -> Result<KeyCode> {
    key_by_name(name).with_context(|| format!("Unknown key '{}' (see `repeatkit keys`)", name))
}

async fn calibrate(
    mut config: Config,
    config_file: Option<PathBuf>,
    key: Option<String>,
    report: Option<PathBuf>,
    save: bool,
) -> Result<()> {
    let mut calibrator = RepeatCalibrator::new(config.calibration.clone());
    if let Some(name) = &key {
        calibrator = calibrator.with_key(parse_key(name)?);
    }

    let mut poller = open_poller(config.input.backend, true)?;
    let bus = SignalBus::new();
    let stop = AtomicBool::new(false);

    println!(
        "Hold down {} until calibration finishes (about {} presses)...",
        key.as_deref().unwrap_or("any key"),
        config.calibration.needed()
    );

    let calibration = tokio::select! {
        result = calibrator.measure(&bus) => result?,
        _ = pump(poller.as_mut(), &bus, config.poll_interval(), &stop) => bail!("input listener stopped"),
    };

    println!(
        "Repeat interval: {:.3} ms over {} samples",
        calibration.interval_ms(),
        calibration.samples
    );
    if let Some(jitter) = calibration.jitter {
        println!("Jitter: {:.3} ms", jitter.as_secs_f64() * 1000.0);
    }

    if let Some(path) = report {
        CalibrationReport::new(&calibration, &config.calibration, key)
            .export_json(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if save {
        config.repeat.interval_ms = calibration.interval_ms_rounded().max(1);
        let path = match config_file {
            Some(path) => path,
            None => config_path()?,
        };
        config
            .save_to(&path)
            .with_context(|| format!("Failed to save config to {}", path.display()))?;
        println!("Saved interval {} ms to {}", config.repeat.interval_ms, path.display());
    }
    Ok(())
}

fn watched_keys(list: Option<&str>) -> Result<Vec<KeyCode>> {
    let Some(list) = list else {
        return Ok(CATALOG.iter().map(|info| info.code).collect());
    };
    let mut keys = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.parse::<KeyGroup>() {
            Ok(group) => keys.extend(group.keys()),
            Err(_) => keys.push(parse_key(item)?),
        }
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

async fn watch(config: Config, interval_ms: Option<u64>, keys: Option<String>) -> Result<()> {
    let mut repeat = config.repeat.clone();
    if let Some(ms) = interval_ms {
        if ms == 0 {
            bail!("--interval-ms must be at least 1");
        }
        repeat.interval_ms = ms;
    }

    let keys = watched_keys(keys.as_deref())?;
    let session = InputSession::from_config(&repeat);
    let started = tokio::time::Instant::now();
    for key in &keys {
        session.bind(*key, move |event: &KeyEvent| -> anyhow::Result<()> {
            println!("{:>9.3}s  {}", started.elapsed().as_secs_f64(), event.key);
            Ok(())
        });
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl-C handler")?;

    let mut poller = open_poller(config.input.backend, false)?;
    let bus = SignalBus::new();
    session.attach(&bus);
    log::info!(
        "watching {} keys at {} ms via {} (Ctrl-C to stop)",
        keys.len(),
        repeat.interval_ms,
        poller.name()
    );

    pump(poller.as_mut(), &bus, config.poll_interval(), &stop).await;

    session.detach(&bus);
    let stats = session.stats();
    println!(
        "{} presses, {} repeats, {} handler errors",
        stats.initial_calls, stats.repeat_ticks, stats.handler_errors
    );
    Ok(())
}

fn print_keys() {
    for group in KeyGroup::all() {
        println!("{}:", group.name());
        for info in CATALOG.iter().filter(|info| info.group == *group) {
            println!("  {:<16} {:>4}  {}", info.name, info.code.as_u16(), info.label);
        }
    }
}
