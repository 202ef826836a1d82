//! Needle - timecode vinyl control of digital tracks
//!
//! Startup:
//! 1. Load the YAML config and build the timecode lookups it names
//! 2. Open the sound card (or run headless) and build the rig at its rate
//! 3. Start the service, controller, console and status threads
//!
//! Type commands such as `/deck1/load /path/to/track.flac` on stdin;
//! Ctrl-D or `/quit` exits.
//!
//! ## Command line flags
//!
//! - `--config <path>`: use this config file instead of the default
//! - `--headless`: no audio device, decks run on a timer with silent input
//! - `--list-devices`: print audio devices and exit
//! - `--save-config`: write the effective config and exit

mod config;
mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use needle_core::audio::{self, AudioDevice, CpalAudioHandle};
use needle_core::controller::{CommandController, Controller};
use needle_core::rig::{RealtimeLoop, Rig};
use needle_core::track::import::ScriptImporter;

use config::PlayerConfig;

/// Main thread wake-up while waiting for quit
const WAIT_TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    headless: bool,
    list_devices: bool,
    save_config: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--headless" => parsed.headless = true,
            "--list-devices" => parsed.list_devices = true,
            "--save-config" => parsed.save_config = true,
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(parsed)
}

/// Whatever is driving `Rig::process`
enum Driver {
    Device(CpalAudioHandle),
    Headless(RealtimeLoop),
}

impl Driver {
    fn stop(self) {
        match self {
            Driver::Device(handle) => {
                drop(handle);
                log::info!("Audio streams closed");
            }
            Driver::Headless(realtime) => {
                realtime.join();
            }
        }
    }
}

fn print_devices(title: &str, devices: audio::AudioResult<Vec<AudioDevice>>) {
    println!("{}:", title);
    match devices {
        Ok(devices) => devices.iter().for_each(|d| println!("  {}", d)),
        Err(e) => println!("  ({})", e),
    }
}

fn spawn(name: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("Failed to spawn {} thread", name))
}

fn join(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("thread").to_string();
    if handle.join().is_err() {
        log::error!("{} thread panicked", name);
    }
}

/// Join the console if it has exited, otherwise leave it behind
///
/// A quit from elsewhere leaves the console blocked on stdin; it goes down
/// with the process. Returns whether the thread was joined.
fn finish_console(console: JoinHandle<()>) -> bool {
    if console.is_finished() {
        join(console);
        true
    } else {
        log::info!("Console still waiting on stdin; detaching it");
        drop(console);
        false
    }
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    // RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_devices {
        print_devices("Input devices", audio::get_input_devices());
        print_devices("Output devices", audio::get_output_devices());
        return Ok(());
    }

    let config_path = config::config_path(args.config.as_deref());
    let config: PlayerConfig = config::load(&config_path);
    if args.save_config {
        config::save(&config, &config_path)
            .with_context(|| format!("Failed to save config to {:?}", config_path))?;
        println!("Config written to {}", config_path.display());
        return Ok(());
    }

    log::info!("needle starting with {} decks", config.rig.decks.len());
    config.rig.prepare_timecodes();
    let importer = Arc::new(ScriptImporter::from_config(&config.importer));

    let plan = if args.headless {
        None
    } else {
        match audio::negotiate(&config.audio, config.rig.decks.len()) {
            Ok(plan) => Some(plan),
            Err(e) => {
                log::error!("Could not open audio device: {}", e);
                return Err(e).context("Audio startup failed (use --headless to run without a device)");
            }
        }
    };

    let sample_rate = plan
        .as_ref()
        .map(|p| p.sample_rate())
        .unwrap_or_else(|| config.audio.target_sample_rate());
    let rig = Arc::new(Rig::new(&config.rig, sample_rate, importer).context("Failed to build decks")?);

    let driver = match plan {
        Some(plan) => Driver::Device(plan.start(Arc::clone(&rig)).context("Failed to start audio")?),
        None => {
            let frames = config.audio.buffer_size.frames() as usize;
            Driver::Headless(
                RealtimeLoop::start(Arc::clone(&rig), frames).context("Failed to start realtime loop")?,
            )
        }
    };

    let (command_tx, command_rx) = flume::unbounded();
    let (reply_tx, reply_rx) = flume::unbounded();
    let mut controller = CommandController::new("console", command_rx).with_replies(reply_tx);
    for deck in 0..rig.deck_count() {
        controller.add_deck(deck)?;
    }
    rig.add_controller(Box::new(controller));

    let service = {
        let rig = Arc::clone(&rig);
        spawn("rig-service", move || rig.run_service())?
    };
    let controllers = {
        let rig = Arc::clone(&rig);
        spawn("controllers", move || rig.run_controllers())?
    };
    let status = {
        let rig = Arc::clone(&rig);
        let interval = config.status_interval();
        spawn("status", move || console::run_status(rig, reply_rx, interval))?
    };
    let console = if config.console {
        let rig = Arc::clone(&rig);
        Some(spawn("console", move || console::run_console(rig, command_tx))?)
    } else {
        drop(command_tx);
        None
    };

    println!("needle running at {}Hz. Ctrl-D or /quit to exit.", sample_rate);

    let shutdown = rig.shutdown_signal();
    while !shutdown.wait_timeout(WAIT_TICK) {}
    log::info!("Shutting down");

    if let Some(console) = console {
        finish_console(console);
    }
    join(status);
    join(controllers);
    join(service);
    driver.stop();

    log::info!("needle stopped");
    Ok(())
}
